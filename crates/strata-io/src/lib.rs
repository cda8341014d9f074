//! Storage access over HTTP: WebDAV, S3, GCS, Swift and Azure behind one
//! chain of I/O links.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - `data` - Immutable configuration and value types
//! - `core` - Pure transformations: range planning, multipart parsing,
//!   listing and digest decoding
//! - `effects` - The I/O chain and the requests it sends
//!
//! # Key Features
//!
//! - **Retry**: recoverable failures are retried with a fixed delay
//! - **Replica Failover**: Metalink replicas are tried in turn when the
//!   primary fails
//! - **Vectored Reads**: nearby ranges are merged and fetched with
//!   multi-range requests, falling back to parallel single-range GETs
//! - **Redirect Cache**: resolved redirects are remembered per method
//!
//! # Examples
//!
//! ```no_run
//! use strata_io::{Client, IoVec};
//! use url::Url;
//!
//! let client = Client::new()?;
//! let url = Url::parse("https://storage.example/data/events.root")?;
//!
//! let (mut a, mut b) = (vec![0u8; 100], vec![0u8; 100]);
//! let mut slots = [IoVec::new(0, &mut a), IoVec::new(4096, &mut b)];
//! let read = client.pread_vec(&url, &mut slots)?;
//! println!("{read} bytes");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod core;
mod data;
mod effects;

pub use core::{
    BoundaryLine, ByteRange, ContentRange, DavResource, IntervalTree, ObjectListing, PartHeader,
    RangeBatch, check_status, classify_line, digest_from_header, extract_boundary, is_recoverable,
    is_redirect, is_success, md5_from_etag, merge_ranges, pack_range_headers,
    parse_content_range, parse_http_date, parse_multistatus, parse_object_listing,
    parse_part_header, parse_swift_listing, range_header, want_digest_token,
};
pub use data::{
    ClientConfig, ConfigError, DirEntry, FdHandler, FileKind, IoVec, MetalinkMode,
    MultirangeResult, Protocol, RequestParams, StatInfo, VecOptions, fragment_params,
    has_azure_sas, normalize_url,
};
pub use effects::{
    AzureLink, Client, ContentProvider, Context, DISABLE_METALINK_ENV, HttpIoLink, HttpMetaLink,
    HttpRequest, IoChain, IoChainContext, IoLink, MetalinkLink, Next, ObjectStoreLink,
    RedirectCache, RemoteFile, RetryLink, SwiftLink, VecIoLink, WebDavLink, discover_replicas,
    read_at, read_vectored,
};

pub use strata_transport::{Error, ErrorKind, Result};
