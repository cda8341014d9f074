//! Immutable configuration and value types.

mod config;
mod params;
mod protocol;
mod types;

pub use config::{ClientConfig, ConfigError};
pub use params::{MetalinkMode, RequestParams, VecOptions, fragment_params};
pub use protocol::{Protocol, has_azure_sas, normalize_url};
pub use types::{DirEntry, FdHandler, FileKind, IoVec, MultirangeResult, StatInfo};
