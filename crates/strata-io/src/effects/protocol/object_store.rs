//! S3 and GCS: pseudo-directories over a flat key space.

use strata_transport::{Error, ErrorKind, Method, Result, scope};
use tracing::{debug, trace};
use url::Url;

use super::{as_prefix, child_name, decoded_path, digest_or_etag};
use crate::core::{check_status, parse_object_listing};
use crate::data::{DirEntry, StatInfo};
use crate::effects::chain::{IoLink, Next};
use crate::effects::context::IoChainContext;

/// Bucket endpoint to list against, and the object key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ObjectLocation {
    bucket_url: Url,
    key: String,
}

fn locate(url: &Url, path_style: bool) -> Result<ObjectLocation> {
    let path = decoded_path(url);
    let path = path.trim_start_matches('/');
    let mut bucket_url = url.clone();
    bucket_url.set_query(None);
    bucket_url.set_fragment(None);

    if !path_style {
        bucket_url.set_path("/");
        return Ok(ObjectLocation {
            bucket_url,
            key: path.to_string(),
        });
    }
    let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
    if bucket.is_empty() {
        return Err(Error::new(
            scope::META,
            ErrorKind::InvalidArgument,
            format!("no bucket in {url}"),
        ));
    }
    bucket_url.set_path(&format!("/{bucket}/"));
    Ok(ObjectLocation {
        bucket_url,
        key: key.to_string(),
    })
}

/// One `ListObjectsV2` request URL.
fn listing_url(location: &ObjectLocation, prefix: &str, token: Option<&str>, max_keys: Option<u32>) -> Url {
    let mut url = location.bucket_url.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("list-type", "2")
            .append_pair("prefix", prefix)
            .append_pair("delimiter", "/");
        if let Some(token) = token {
            query.append_pair("continuation-token", token);
        }
        if let Some(max) = max_keys {
            query.append_pair("max-keys", &max.to_string());
        }
    }
    url
}

/// Every child of `prefix`, following continuation tokens.
fn list_prefix(ctx: &IoChainContext<'_>, location: &ObjectLocation, prefix: &str) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let url = listing_url(location, prefix, token.as_deref(), None);
        trace!(target: "strata::meta", %url, "listing page");
        let mut request = ctx.request_to(Method::Get, url);
        request.execute()?;
        check_status(request.status(), "list")?;
        let page = parse_object_listing(&request.read_text()?)?;

        for (key, stat) in page.objects {
            if let Some(name) = child_name(&key, prefix) {
                entries.push(DirEntry { name, stat });
            }
        }
        for common in page.prefixes {
            if let Some(name) = child_name(&common, prefix) {
                entries.push(DirEntry {
                    name,
                    stat: StatInfo::directory(),
                });
            }
        }
        match page.continuation {
            Some(next) if page.truncated => token = Some(next),
            _ => return Ok(entries),
        }
    }
}

/// Anything stored below `key/` makes it a directory.
fn is_pseudo_directory(ctx: &IoChainContext<'_>, location: &ObjectLocation) -> Result<bool> {
    let prefix = as_prefix(&location.key);
    let url = listing_url(location, &prefix, None, Some(1));
    let mut request = ctx.request_to(Method::Get, url);
    request.execute()?;
    check_status(request.status(), "stat")?;
    let page = parse_object_listing(&request.read_text()?)?;
    Ok(!page.objects.is_empty() || !page.prefixes.is_empty())
}

/// S3/GCS metadata: directory markers, prefix listings and ETag checksums.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectStoreLink;

impl IoLink for ObjectStoreLink {
    fn name(&self) -> &'static str {
        "object_store"
    }

    fn stat(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<StatInfo> {
        if !ctx.protocol.is_object_store() {
            return next.stat(ctx);
        }
        match next.stat(ctx) {
            Err(e) if e.kind() == ErrorKind::FileNotFound => {
                let location = locate(&ctx.url, ctx.params.s3_path_style)?;
                if !location.key.is_empty() && is_pseudo_directory(ctx, &location)? {
                    debug!(target: "strata::meta", url = %ctx.url, "pseudo-directory");
                    return Ok(StatInfo::directory());
                }
                Err(e)
            }
            other => other,
        }
    }

    fn make_collection(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<()> {
        if !ctx.protocol.is_object_store() {
            return next.make_collection(ctx);
        }
        let mut marker = ctx.url.clone();
        if !marker.path().ends_with('/') {
            let path = format!("{}/", marker.path());
            marker.set_path(&path);
        }
        let mut request = ctx.request_to(Method::Put, marker).header("Content-Length", "0");
        request.execute()?;
        let status = request.status();
        request.finish()?;
        check_status(status, "mkdir")
    }

    fn list_collection(
        &self,
        ctx: &mut IoChainContext<'_>,
        next: Next<'_>,
    ) -> Result<Vec<DirEntry>> {
        if !ctx.protocol.is_object_store() {
            return next.list_collection(ctx);
        }
        let location = locate(&ctx.url, ctx.params.s3_path_style)?;
        let prefix = as_prefix(&location.key);
        list_prefix(ctx, &location, &prefix)
    }

    fn checksum(
        &self,
        ctx: &mut IoChainContext<'_>,
        algorithm: &str,
        next: Next<'_>,
    ) -> Result<String> {
        if !ctx.protocol.is_object_store() {
            return next.checksum(ctx, algorithm);
        }
        digest_or_etag(ctx, algorithm)
    }
}
