//! OpenStack Swift: container listings and segmented (SLO) uploads.

use serde::Serialize;
use strata_transport::{Error, ErrorKind, Method, Result, scope};
use tracing::{debug, info};
use url::Url;

use super::{as_prefix, child_name, decoded_path, digest_or_etag};
use crate::core::{check_status, parse_swift_listing};
use crate::data::{DirEntry, Protocol, StatInfo, fragment_params};
use crate::effects::chain::{ContentProvider, IoLink, Next, fill_from_provider};
use crate::effects::context::IoChainContext;

/// Uploads above this size are segmented.
pub const SEGMENTED_UPLOAD_THRESHOLD: u64 = 512 * 1024 * 1024;
pub const DEFAULT_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;
/// Swift refuses manifests with more segments than this.
const MAX_MANIFEST_SEGMENTS: usize = 1000;
const LISTING_PAGE: usize = 1000;

/// `/v1/<account>/<container>` and the object path below it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SwiftLocation {
    container_url: Url,
    /// `/<container>`, as referenced from a manifest.
    container_ref: String,
    object: String,
}

fn locate(url: &Url) -> Result<SwiftLocation> {
    let path = decoded_path(url);
    let mut parts = path.trim_start_matches('/').splitn(4, '/');
    let (Some(version), Some(account), Some(container)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::new(
            scope::META,
            ErrorKind::InvalidArgument,
            format!("{url} does not name a Swift container"),
        ));
    };
    if container.is_empty() {
        return Err(Error::new(
            scope::META,
            ErrorKind::InvalidArgument,
            format!("{url} does not name a Swift container"),
        ));
    }
    let mut container_url = url.clone();
    container_url.set_query(None);
    container_url.set_fragment(None);
    container_url.set_path(&format!("/{version}/{account}/{container}"));
    Ok(SwiftLocation {
        container_url,
        container_ref: format!("/{container}"),
        object: parts.next().unwrap_or("").to_string(),
    })
}

fn list_prefix(ctx: &IoChainContext<'_>, location: &SwiftLocation, prefix: &str, limit: usize) -> Result<Vec<(String, StatInfo)>> {
    let mut items = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let mut url = location.container_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("format", "json")
                .append_pair("prefix", prefix)
                .append_pair("delimiter", "/")
                .append_pair("limit", &limit.to_string());
            if let Some(marker) = marker.as_deref() {
                query.append_pair("marker", marker);
            }
        }
        let mut request = ctx.request_to(Method::Get, url);
        request.execute()?;
        // An empty container answers 204 without a body.
        if request.status() == 204 {
            request.finish()?;
            return Ok(items);
        }
        check_status(request.status(), "list")?;
        let page = parse_swift_listing(&request.read_text()?)?;
        let full = page.len() >= limit;
        marker = page.last().map(|(name, _)| name.clone());
        items.extend(page);
        if !full || limit == 1 {
            return Ok(items);
        }
    }
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    path: String,
    etag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
}

fn should_segment(ctx: &IoChainContext<'_>, size: Option<u64>) -> bool {
    if fragment_params(&ctx.url).any(|(k, _)| k == "forceMultiPart") {
        return true;
    }
    size.is_some_and(|s| s > SEGMENTED_UPLOAD_THRESHOLD)
}

fn put_and_etag(ctx: &IoChainContext<'_>, url: Url, body: Vec<u8>, content_type: Option<&str>) -> Result<String> {
    let mut request = ctx.request_to(Method::Put, url.clone()).body(body);
    if let Some(ct) = content_type {
        request = request.header("Content-Type", ct);
    }
    request.execute()?;
    let status = request.status();
    let etag = request.header_value("ETag");
    request.finish()?;
    check_status(status, "write")?;
    etag.map(|e| e.trim_matches('"').to_string()).ok_or_else(|| {
        Error::new(
            scope::IO,
            ErrorKind::InvalidServerResponse,
            format!("no ETag for segment {url}, it is required to commit the upload"),
        )
    })
}

fn with_path(url: &Url, path: &str) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);
    out.set_path(path);
    out
}

/// Upload `provider` as numbered segments `<object>/<n>`, then commit them
/// with a static large object manifest.
fn segmented_upload(ctx: &IoChainContext<'_>, provider: &mut dyn ContentProvider) -> Result<u64> {
    let location = locate(&ctx.url)?;
    let segment_size = ctx.params.upload_chunk_size.unwrap_or(DEFAULT_SEGMENT_SIZE).max(1);
    let object_path = ctx.url.path().trim_end_matches('/').to_string();
    info!(
        target: "strata::io",
        url = %ctx.url,
        size = ?provider.size(),
        segment_size,
        "segmented upload"
    );

    let mut buffer = vec![0u8; segment_size.min(provider.size().unwrap_or(segment_size).max(1)) as usize];
    let mut segments: Vec<(String, u64)> = Vec::new();
    let mut total = 0u64;
    loop {
        let n = fill_from_provider(provider, &mut buffer)?;
        if n == 0 {
            break;
        }
        let number = segments.len() + 1;
        let url = with_path(&ctx.url, &format!("{object_path}/{number}"));
        debug!(target: "strata::io", segment = number, bytes = n, "uploading segment");
        let etag = put_and_etag(ctx, url, buffer[..n].to_vec(), None)?;
        segments.push((etag, n as u64));
        total += n as u64;
        if n < buffer.len() {
            break;
        }
    }
    commit_manifests(ctx, &location, &object_path, &segments)?;
    Ok(total)
}

/// Write the manifest. More than [`MAX_MANIFEST_SEGMENTS`] segments are
/// chained: each intermediate manifest `<object>-<i>` becomes the first
/// entry of the next one.
fn commit_manifests(
    ctx: &IoChainContext<'_>,
    location: &SwiftLocation,
    object_path: &str,
    segments: &[(String, u64)],
) -> Result<()> {
    let object_ref = format!("{}/{}", location.container_ref, location.object.trim_end_matches('/'));
    let mut start = 0;
    let mut round = 0;
    let mut previous: Option<ManifestEntry> = None;
    loop {
        let room = MAX_MANIFEST_SEGMENTS - usize::from(previous.is_some());
        let end = (start + room).min(segments.len());
        let last = end == segments.len();

        let mut entries: Vec<ManifestEntry> = previous.take().into_iter().collect();
        entries.extend(segments[start..end].iter().enumerate().map(|(i, (etag, size))| {
            ManifestEntry {
                path: format!("{object_ref}/{}", start + i + 1),
                etag: etag.clone(),
                size_bytes: Some(*size),
            }
        }));
        let body = serde_json::to_vec(&entries).map_err(|e| {
            Error::new(scope::IO, ErrorKind::Unknown, format!("manifest encoding: {e}"))
        })?;

        let (target, target_ref) = if last {
            (object_path.to_string(), object_ref.clone())
        } else {
            (format!("{object_path}-{round}"), format!("{object_ref}-{round}"))
        };
        let mut url = with_path(&ctx.url, &target);
        url.query_pairs_mut().append_pair("multipart-manifest", "put");
        debug!(target: "strata::io", %url, entries = entries.len(), "committing manifest");
        let etag = put_and_etag(ctx, url, body, Some("application/json"));
        if last {
            return etag.map(|_| ());
        }
        previous = Some(ManifestEntry {
            path: target_ref,
            etag: etag?,
            size_bytes: None,
        });
        start = end;
        round += 1;
    }
}

/// Swift metadata and large uploads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwiftLink;

impl IoLink for SwiftLink {
    fn name(&self) -> &'static str {
        "swift"
    }

    fn stat(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<StatInfo> {
        if ctx.protocol != Protocol::Swift {
            return next.stat(ctx);
        }
        match next.stat(ctx) {
            Err(e) if e.kind() == ErrorKind::FileNotFound => {
                let location = locate(&ctx.url)?;
                if location.object.is_empty() {
                    return Err(e);
                }
                let prefix = as_prefix(&location.object);
                if list_prefix(ctx, &location, &prefix, 1)?.is_empty() {
                    return Err(e);
                }
                Ok(StatInfo::directory())
            }
            other => other,
        }
    }

    fn make_collection(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<()> {
        if ctx.protocol != Protocol::Swift {
            return next.make_collection(ctx);
        }
        let path = format!("{}/", ctx.url.path().trim_end_matches('/'));
        let url = with_path(&ctx.url, &path);
        let mut request = ctx
            .request_to(Method::Put, url)
            .header("Content-Type", "application/directory")
            .header("Content-Length", "0");
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
        if ctx.protocol != Protocol::Swift {
            return next.list_collection(ctx);
        }
        let location = locate(&ctx.url)?;
        let prefix = as_prefix(&location.object);
        Ok(list_prefix(ctx, &location, &prefix, LISTING_PAGE)?
            .into_iter()
            .filter_map(|(name, stat)| child_name(&name, &prefix).map(|name| DirEntry { name, stat }))
            .collect())
    }

    fn checksum(
        &self,
        ctx: &mut IoChainContext<'_>,
        algorithm: &str,
        next: Next<'_>,
    ) -> Result<String> {
        if ctx.protocol != Protocol::Swift {
            return next.checksum(ctx, algorithm);
        }
        digest_or_etag(ctx, algorithm)
    }

    fn write_from_provider(
        &self,
        ctx: &mut IoChainContext<'_>,
        provider: &mut dyn ContentProvider,
        next: Next<'_>,
    ) -> Result<u64> {
        if ctx.protocol != Protocol::Swift || !should_segment(ctx, provider.size()) {
            return next.write_from_provider(ctx, provider);
        }
        segmented_upload(ctx, provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate() {
        let url = Url::parse("https://swift.example/v1/AUTH_a/cont/dir/obj").unwrap();
        let loc = locate(&url).unwrap();
        assert_eq!(loc.container_url.as_str(), "https://swift.example/v1/AUTH_a/cont");
        assert_eq!(loc.container_ref, "/cont");
        assert_eq!(loc.object, "dir/obj");

        let bare = locate(&Url::parse("https://swift.example/v1/AUTH_a/cont").unwrap()).unwrap();
        assert_eq!(bare.object, "");
        assert!(locate(&Url::parse("https://swift.example/v1/AUTH_a").unwrap()).is_err());
    }

    #[test]
    fn test_manifest_entry_json() {
        let entry = ManifestEntry {
            path: "/cont/obj/1".into(),
            etag: "abc".into(),
            size_bytes: Some(3),
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"path":"/cont/obj/1","etag":"abc","size_bytes":3}"#
        );
    }
}
