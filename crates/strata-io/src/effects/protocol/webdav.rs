use strata_transport::{Error, ErrorKind, Method, Result, scope};
use tracing::debug;

use crate::core::{DavResource, check_status, parse_multistatus};
use crate::data::{DirEntry, Protocol, StatInfo};
use crate::effects::chain::{IoLink, Next};
use crate::effects::context::IoChainContext;

const PROPFIND_BODY: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8" ?>"#,
    r#"<D:propfind xmlns:D="DAV:"><D:prop>"#,
    "<D:resourcetype/><D:getcontentlength/><D:getlastmodified/>",
    "<D:getetag/><D:getcontenttype/>",
    "</D:prop></D:propfind>"
);

fn propfind(ctx: &IoChainContext<'_>, depth: u8) -> Result<Vec<DavResource>> {
    let mut request = ctx
        .request(Method::Propfind)
        .header("Depth", depth.to_string())
        .header("Content-Type", "application/xml; charset=utf-8")
        .body(PROPFIND_BODY.to_string());
    request.execute()?;
    check_status(request.status(), "propfind")?;
    let body = request.read_text()?;
    parse_multistatus(&body)
}

/// Last path component of an href, without a trailing slash.
fn entry_name(href: &str) -> &str {
    let trimmed = href.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn same_path(href: &str, path: &str) -> bool {
    // hrefs may be absolute URLs or absolute paths.
    let href_path = match href.find("://") {
        Some(i) => href[i + 3..].find('/').map_or("/", |p| &href[i + 3 + p..]),
        None => href,
    };
    href_path.trim_end_matches('/') == path.trim_end_matches('/')
}

/// PROPFIND stat and listing, MKCOL.
///
/// Listing and MKCOL also serve plain `http` URLs; stat only takes over for
/// an explicit WebDAV protocol, HEAD being cheaper otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebDavLink;

impl WebDavLink {
    fn speaks_dav(protocol: Protocol) -> bool {
        matches!(protocol, Protocol::WebDav | Protocol::Http)
    }
}

impl IoLink for WebDavLink {
    fn name(&self) -> &'static str {
        "webdav"
    }

    fn stat(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<StatInfo> {
        if ctx.protocol != Protocol::WebDav {
            return next.stat(ctx);
        }
        propfind(ctx, 0)?
            .into_iter()
            .next()
            .map(|res| res.stat)
            .ok_or_else(|| {
                Error::new(
                    scope::META,
                    ErrorKind::InvalidServerResponse,
                    format!("empty PROPFIND answer for {}", ctx.url),
                )
            })
    }

    fn make_collection(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<()> {
        if !Self::speaks_dav(ctx.protocol) {
            return next.make_collection(ctx);
        }
        let mut request = ctx.request(Method::Mkcol);
        request.execute()?;
        let status = request.status();
        request.finish()?;
        if status == 405 {
            return Err(Error::new(
                scope::META,
                ErrorKind::FileExist,
                format!("{} already exists", ctx.url),
            ));
        }
        check_status(status, "mkcol")
    }

    fn list_collection(
        &self,
        ctx: &mut IoChainContext<'_>,
        next: Next<'_>,
    ) -> Result<Vec<DirEntry>> {
        if !Self::speaks_dav(ctx.protocol) {
            return next.list_collection(ctx);
        }
        let resources = propfind(ctx, 1)?;
        let path = urlencoding::decode(ctx.url.path())
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| ctx.url.path().to_string());

        let mut entries = Vec::with_capacity(resources.len());
        for res in resources {
            if same_path(&res.href, &path) {
                if !res.stat.is_dir() {
                    return Err(Error::new(
                        scope::META,
                        ErrorKind::InvalidArgument,
                        format!("{} is not a collection", ctx.url),
                    ));
                }
                continue;
            }
            entries.push(DirEntry {
                name: entry_name(&res.href).to_string(),
                stat: res.stat,
            });
        }
        debug!(target: "strata::meta", url = %ctx.url, entries = entries.len(), "listed collection");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name("/a/b/c.txt"), "c.txt");
        assert_eq!(entry_name("/a/b/dir/"), "dir");
        assert_eq!(entry_name("name"), "name");
    }

    #[test]
    fn test_same_path() {
        assert!(same_path("/data/dir/", "/data/dir"));
        assert!(same_path("http://h:8080/data/dir", "/data/dir/"));
        assert!(!same_path("/data/dir/x", "/data/dir"));
    }
}
