//! I/O operations: the link chain, its decorators and the HTTP request
//! driver the links share.
//!
//! Every operation enters the chain at its head. A link either handles the
//! call, wraps the rest of the chain (retry, metalink failover), or hands it
//! to [`Next`].

mod chain;
mod client;
mod context;
mod http_io;
mod http_meta;
mod metalink;
mod protocol;
mod redirect;
mod request;
mod retry;
mod vec_io;

pub use chain::{ContentProvider, IoChain, IoLink, Next};
pub use client::{Client, RemoteFile};
pub use context::{Context, IoChainContext};
pub use http_io::HttpIoLink;
pub use http_meta::HttpMetaLink;
pub use metalink::{DISABLE_METALINK_ENV, MetalinkLink, discover_replicas};
pub use protocol::{AzureLink, ObjectStoreLink, SwiftLink, WebDavLink};
pub use redirect::RedirectCache;
pub use request::HttpRequest;
pub use retry::RetryLink;
pub use vec_io::{VecIoLink, read_at, read_vectored};
