//! Parsers for collection listings: WebDAV multistatus, S3 `ListObjectsV2`
//! and Swift JSON container listings.

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;

use strata_transport::{Error, ErrorKind, Result, scope};

use crate::data::{FileKind, StatInfo};

fn parse_error(what: &str, detail: impl std::fmt::Display) -> Error {
    Error::new(
        scope::META,
        ErrorKind::InvalidServerResponse,
        format!("invalid {what}: {detail}"),
    )
}

/// Seconds since the epoch from an HTTP date or an ISO 8601 timestamp.
///
/// ```
/// use strata_io::parse_http_date;
///
/// assert_eq!(parse_http_date("Thu, 01 Jan 1970 00:01:00 GMT"), Some(60));
/// assert_eq!(parse_http_date("1970-01-01T00:00:10.000Z"), Some(10));
/// assert_eq!(parse_http_date("yesterday"), None);
/// ```
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(t) = chrono::DateTime::parse_from_rfc2822(value) {
        return Some(t.timestamp());
    }
    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(t.timestamp());
    }
    // Swift omits the zone and means UTC.
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc().timestamp())
}

/// One `<response>` of a PROPFIND multistatus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResource {
    /// Percent-decoded `href`.
    pub href: String,
    pub stat: StatInfo,
}

/// Parse a `207 Multi-Status` PROPFIND body.
///
/// Responses whose own status is not 2xx are skipped.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavResource>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut out = Vec::new();
    let mut current: Option<(DavResource, bool)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| parse_error("multistatus", e))?;
        match event {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "response" {
                    current = Some((
                        DavResource {
                            href: String::new(),
                            stat: StatInfo::default(),
                        },
                        true,
                    ));
                } else if name == "collection" && path.last().is_some_and(|p| p == "resourcetype")
                {
                    if let Some((res, _)) = current.as_mut() {
                        res.stat.kind = FileKind::Directory;
                    }
                }
                path.push(name);
            }
            Event::Empty(ref e) => {
                if e.local_name().as_ref() == b"collection"
                    && path.last().is_some_and(|p| p == "resourcetype")
                {
                    if let Some((res, _)) = current.as_mut() {
                        res.stat.kind = FileKind::Directory;
                    }
                }
            }
            Event::End(_) => {
                if path.pop().as_deref() == Some("response") {
                    if let Some((res, ok)) = current.take() {
                        if ok && !res.href.is_empty() {
                            out.push(res);
                        }
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| parse_error("multistatus", e))?;
                let text = text.trim();
                let Some((res, ok)) = current.as_mut() else {
                    continue;
                };
                let parent = path.len().checked_sub(2).map(|i| path[i].as_str());
                match path.last().map(String::as_str) {
                    Some("href") if parent == Some("response") => {
                        res.href = urlencoding::decode(text)
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| text.to_string());
                    }
                    Some("status") if parent == Some("response") => {
                        *ok = text.split_whitespace().nth(1).is_some_and(|c| c.starts_with('2'));
                    }
                    Some("getcontentlength") => res.stat.size = text.parse().unwrap_or(0),
                    Some("getlastmodified") => res.stat.mtime = parse_http_date(text),
                    Some("getetag") => res.stat.etag = Some(text.to_string()),
                    Some("getcontenttype") => res.stat.content_type = Some(text.to_string()),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// One page of an S3 `ListObjectsV2` answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    /// Object keys with their metadata.
    pub objects: Vec<(String, StatInfo)>,
    /// Common prefixes, i.e. pseudo-directories, with their trailing `/`.
    pub prefixes: Vec<String>,
    pub truncated: bool,
    pub continuation: Option<String>,
}

pub fn parse_object_listing(xml: &str) -> Result<ObjectListing> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut listing = ObjectListing::default();
    let mut object: Option<(String, StatInfo)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| parse_error("object listing", e))?;
        match event {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.is_empty() && name != "ListBucketResult" {
                    return Err(parse_error("object listing", format!("unexpected root <{name}>")));
                }
                if name == "Contents" {
                    object = Some((String::new(), StatInfo::default()));
                }
                path.push(name);
            }
            Event::End(_) => {
                if path.pop().as_deref() == Some("Contents") {
                    if let Some(obj) = object.take() {
                        listing.objects.push(obj);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| parse_error("object listing", e))?;
                let text = text.trim();
                let parent = path.len().checked_sub(2).map(|i| path[i].as_str());
                match (parent, path.last().map(String::as_str)) {
                    (Some("Contents"), Some(field)) => {
                        if let Some((key, stat)) = object.as_mut() {
                            match field {
                                "Key" => *key = text.to_string(),
                                "Size" => stat.size = text.parse().unwrap_or(0),
                                "LastModified" => stat.mtime = parse_http_date(text),
                                "ETag" => stat.etag = Some(text.to_string()),
                                _ => {}
                            }
                        }
                    }
                    (Some("CommonPrefixes"), Some("Prefix")) => {
                        listing.prefixes.push(text.to_string());
                    }
                    (Some("ListBucketResult"), Some("IsTruncated")) => {
                        listing.truncated = text.eq_ignore_ascii_case("true");
                    }
                    (Some("ListBucketResult"), Some("NextContinuationToken")) => {
                        listing.continuation = Some(text.to_string());
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(listing)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SwiftItem {
    Dir {
        subdir: String,
    },
    Object {
        name: String,
        #[serde(default)]
        bytes: u64,
        #[serde(default)]
        hash: Option<String>,
        #[serde(default)]
        last_modified: Option<String>,
        #[serde(default)]
        content_type: Option<String>,
    },
}

/// Parse a Swift `?format=json` container listing into `(name, stat)` pairs.
///
/// Pseudo-directories keep their trailing `/`.
pub fn parse_swift_listing(json: &str) -> Result<Vec<(String, StatInfo)>> {
    let items: Vec<SwiftItem> =
        serde_json::from_str(json).map_err(|e| parse_error("container listing", e))?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            SwiftItem::Dir { subdir } => (subdir, StatInfo::directory()),
            SwiftItem::Object {
                name,
                bytes,
                hash,
                last_modified,
                content_type,
            } => {
                let kind = if content_type.as_deref() == Some("application/directory") {
                    FileKind::Directory
                } else {
                    FileKind::File
                };
                let stat = StatInfo {
                    size: bytes,
                    kind,
                    mtime: last_modified.as_deref().and_then(parse_http_date),
                    etag: hash,
                    content_type,
                };
                (name, stat)
            }
        })
        .collect())
}
