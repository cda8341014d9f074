//! Transport seam for strata.
//!
//! The I/O chain never talks to an HTTP engine directly. It drives
//! [`Session`]s checked out of a [`SessionPool`], which asks a
//! [`SessionFactory`] for new ones when no idle session matches the endpoint.
//!
//! # Implementations
//!
//! - `ReqwestSessionFactory` (feature `reqwest`, default): blocking sessions
//!   over `reqwest`, driven on a shared tokio runtime.
//! - `fake::FakeServer` (feature `fake`): in-memory server for tests.

mod buffer;
mod error;
mod pool;
mod session;

#[cfg(feature = "reqwest")]
mod reqwest_session;

#[cfg(feature = "fake")]
pub mod fake;

pub use buffer::{DEFAULT_CHUNK_SIZE, ResponseBuffer};
pub use error::{Error, ErrorKind, Result, scope};
pub use pool::{PooledSession, SessionPool};
pub use session::{Body, Method, RequestSpec, Session, SessionFactory, SessionKey, SessionOptions};

#[cfg(feature = "reqwest")]
pub use reqwest_session::{ReqwestSession, ReqwestSessionFactory};
