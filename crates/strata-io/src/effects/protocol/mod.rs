//! Storage dialects layered over plain HTTP.

mod azure;
mod object_store;
mod swift;
mod webdav;

pub use azure::AzureLink;
pub use object_store::ObjectStoreLink;
pub use swift::SwiftLink;
pub use webdav::WebDavLink;

use strata_transport::Result;

use super::context::IoChainContext;
use super::http_meta::{head_digest, no_digest};
use crate::core::md5_from_etag;

/// `Want-Digest` checksum, falling back to the MD5 object stores put in
/// plain ETags.
fn digest_or_etag(ctx: &IoChainContext<'_>, algorithm: &str) -> Result<String> {
    let (digest, etag) = head_digest(ctx, algorithm)?;
    if let Some(digest) = digest {
        return Ok(digest);
    }
    if algorithm.eq_ignore_ascii_case("md5") {
        if let Some(md5) = etag.as_deref().and_then(md5_from_etag) {
            return Ok(md5);
        }
    }
    Err(no_digest(&ctx.url, algorithm))
}

/// Percent-decoded path of `url`.
fn decoded_path(url: &url::Url) -> String {
    urlencoding::decode(url.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| url.path().to_string())
}

/// Turn a key into a listing prefix: non-empty prefixes end with `/`.
fn as_prefix(key: &str) -> String {
    if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

/// The part of `name` below `prefix`, without a trailing slash. `None` for
/// the prefix itself.
fn child_name(name: &str, prefix: &str) -> Option<String> {
    let rest = name.strip_prefix(prefix).unwrap_or(name).trim_end_matches('/');
    (!rest.is_empty()).then(|| rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_helpers() {
        assert_eq!(as_prefix(""), "");
        assert_eq!(as_prefix("dir"), "dir/");
        assert_eq!(as_prefix("dir/"), "dir/");
        assert_eq!(child_name("dir/a", "dir/").as_deref(), Some("a"));
        assert_eq!(child_name("dir/sub/", "dir/").as_deref(), Some("sub"));
        assert_eq!(child_name("dir/", "dir/"), None);
    }
}
