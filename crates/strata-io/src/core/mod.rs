//! Pure transformations: range planning, header and body parsing.
//!
//! Nothing here touches the network.

mod digest;
mod interval_tree;
mod listing;
mod multipart;
mod ranges;
mod validation;

pub use digest::{digest_from_header, md5_from_etag, want_digest_token};
pub use interval_tree::IntervalTree;
pub use listing::{
    DavResource, ObjectListing, parse_http_date, parse_multistatus, parse_object_listing,
    parse_swift_listing,
};
pub use multipart::{
    BoundaryLine, ContentRange, MAX_BLANK_LINES, MAX_BOUNDARY_LEN, PartHeader, classify_line,
    extract_boundary, parse_content_range, parse_part_header,
};
pub use ranges::{ByteRange, RangeBatch, merge_ranges, pack_range_headers, range_header};
pub use validation::{check_status, is_recoverable, is_redirect, is_success};
