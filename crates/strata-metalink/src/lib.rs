//! Metalink replica descriptors.
//!
//! A metalink document lists alternate locations (replicas) of one resource.
//! Servers advertise it through a `Link:` response header, or answer with the
//! document itself when asked for `application/metalink4+xml`.
//!
//! Both the 3.0 format (`metalinker.org`) and RFC 5854 are understood.

mod link;
mod parser;

pub use link::{ACCEPT_METALINK, find_metalink_link, is_metalink_content_type};
pub use parser::parse;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetalinkError {
    #[error("malformed metalink XML at byte {position}: {message}")]
    Xml { position: usize, message: String },

    #[error("document root is <{0}>, not <metalink>")]
    NotMetalink(String),

    #[error("metalink document is empty")]
    Empty,
}

pub type Result<T> = std::result::Result<T, MetalinkError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetalinkVersion {
    V3,
    V4,
}

/// One location of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub url: String,
    /// RFC 5854 `priority` (lower is preferred) or 3.0 `preference`
    /// (higher is preferred), depending on the document version.
    pub rank: Option<u32>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetalinkFile {
    pub name: Option<String>,
    pub size: Option<u64>,
    pub hashes: Vec<FileHash>,
    pub urls: Vec<Replica>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metalink {
    pub version: MetalinkVersion,
    pub files: Vec<MetalinkFile>,
}

impl Metalink {
    /// Replicas of the first file, best first. Ties keep document order.
    pub fn replicas(&self) -> Vec<Replica> {
        let Some(file) = self.files.first() else {
            return Vec::new();
        };
        let mut urls = file.urls.clone();
        match self.version {
            MetalinkVersion::V4 => urls.sort_by_key(|r| r.rank.unwrap_or(u32::MAX)),
            MetalinkVersion::V3 => {
                urls.sort_by_key(|r| std::cmp::Reverse(r.rank.unwrap_or(0)));
            }
        }
        urls
    }
}
