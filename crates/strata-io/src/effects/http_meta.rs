use strata_transport::{Error, ErrorKind, Method, Result, scope};
use tracing::debug;
use url::Url;

use super::chain::{IoLink, Next};
use super::context::IoChainContext;
use super::request::HttpRequest;
use crate::core::{check_status, digest_from_header, parse_http_date, want_digest_token};
use crate::data::{FileKind, StatInfo, normalize_url};

/// Metadata of a HEAD answer.
pub(crate) fn stat_from_headers(request: &HttpRequest<'_>) -> StatInfo {
    StatInfo {
        size: request.content_length().unwrap_or(0),
        kind: FileKind::File,
        mtime: request
            .header_value("Last-Modified")
            .and_then(|v| parse_http_date(&v)),
        etag: request.header_value("ETag"),
        content_type: request.header_value("Content-Type"),
    }
}

/// HEAD the resource and map non-2xx to errors.
pub(crate) fn head_stat(ctx: &IoChainContext<'_>) -> Result<StatInfo> {
    let mut request = ctx.request(Method::Head);
    request.execute()?;
    check_status(request.status(), "stat")?;
    Ok(stat_from_headers(&request))
}

/// HEAD with `Want-Digest`; returns the requested digest, if sent, and the
/// ETag.
pub(crate) fn head_digest(
    ctx: &IoChainContext<'_>,
    algorithm: &str,
) -> Result<(Option<String>, Option<String>)> {
    let mut request = ctx
        .request(Method::Head)
        .header("Want-Digest", want_digest_token(algorithm));
    request.execute()?;
    check_status(request.status(), "checksum")?;
    let digest = request
        .header_values("Digest")
        .iter()
        .find_map(|v| digest_from_header(v, algorithm));
    Ok((digest, request.header_value("ETag")))
}

pub(crate) fn no_digest(url: &Url, algorithm: &str) -> Error {
    Error::new(
        scope::META,
        ErrorKind::OperationNotSupported,
        format!("server sent no {algorithm} digest for {url}"),
    )
}

/// Plain HTTP metadata: HEAD stat, DELETE, MOVE and `Want-Digest`
/// checksums. Serves every protocol that did not claim the operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpMetaLink;

impl IoLink for HttpMetaLink {
    fn name(&self) -> &'static str {
        "http_meta"
    }

    fn stat(&self, ctx: &mut IoChainContext<'_>, _next: Next<'_>) -> Result<StatInfo> {
        head_stat(ctx)
    }

    fn delete_resource(&self, ctx: &mut IoChainContext<'_>, _next: Next<'_>) -> Result<()> {
        let mut request = ctx.request(Method::Delete);
        request.execute()?;
        let status = request.status();
        request.finish()?;
        // A multistatus answer to DELETE lists members that could not go.
        if status == 207 {
            return Err(Error::new(
                scope::META,
                ErrorKind::PermissionDenied,
                format!("delete of {} partially failed", ctx.url),
            ));
        }
        check_status(status, "delete")?;
        debug!(target: "strata::meta", url = %ctx.url, "deleted");
        Ok(())
    }

    fn move_resource(
        &self,
        ctx: &mut IoChainContext<'_>,
        destination: &Url,
        _next: Next<'_>,
    ) -> Result<()> {
        let (mut destination, _) = normalize_url(destination)?;
        destination.set_fragment(None);
        let mut request = ctx
            .request(Method::Move)
            .header("Destination", destination.as_str())
            .header("Overwrite", "T");
        request.execute()?;
        let status = request.status();
        request.finish()?;
        check_status(status, "move")
    }

    fn checksum(
        &self,
        ctx: &mut IoChainContext<'_>,
        algorithm: &str,
        _next: Next<'_>,
    ) -> Result<String> {
        match head_digest(ctx, algorithm)? {
            (Some(digest), _) => Ok(digest),
            (None, _) => Err(no_digest(&ctx.url, algorithm)),
        }
    }
}
