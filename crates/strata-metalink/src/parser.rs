use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::trace;

use crate::{FileHash, Metalink, MetalinkError, MetalinkFile, MetalinkVersion, Replica, Result};

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn local(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Parse a metalink document.
///
/// # Examples
///
/// ```
/// let xml = r#"<metalink xmlns="urn:ietf:params:xml:ns:metalink">
///   <file name="f"><url priority="2">http://b/f</url><url priority="1">http://a/f</url></file>
/// </metalink>"#;
/// let doc = strata_metalink::parse(xml).unwrap();
/// let urls: Vec<_> = doc.replicas().into_iter().map(|r| r.url).collect();
/// assert_eq!(urls, ["http://a/f", "http://b/f"]);
/// ```
pub fn parse(xml: &str) -> Result<Metalink> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut version = None;
    let mut path: Vec<String> = Vec::new();
    let mut files = Vec::new();
    let mut file: Option<MetalinkFile> = None;
    let mut replica: Option<Replica> = None;
    let mut hash_type: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(|e| MetalinkError::Xml {
            position: reader.buffer_position(),
            message: e.to_string(),
        })?;
        match event {
            Event::Start(ref e) => {
                let name = local(e);
                if path.is_empty() {
                    if name != "metalink" {
                        return Err(MetalinkError::NotMetalink(name));
                    }
                    let v3 = attr(e, "version").is_some_and(|v| v.starts_with('3'));
                    version = Some(if v3 { MetalinkVersion::V3 } else { MetalinkVersion::V4 });
                }
                match name.as_str() {
                    "file" => {
                        file = Some(MetalinkFile {
                            name: attr(e, "name"),
                            ..Default::default()
                        });
                    }
                    "url" if file.is_some() => {
                        let rank = attr(e, "priority")
                            .or_else(|| attr(e, "preference"))
                            .and_then(|p| p.trim().parse().ok());
                        replica = Some(Replica {
                            url: String::new(),
                            rank,
                            location: attr(e, "location"),
                        });
                    }
                    "hash" => hash_type = attr(e, "type"),
                    _ => {}
                }
                path.push(name);
            }
            Event::End(_) => {
                let Some(name) = path.pop() else { continue };
                match name.as_str() {
                    "file" => {
                        if let Some(f) = file.take() {
                            files.push(f);
                        }
                    }
                    "url" => {
                        if let (Some(r), Some(f)) = (replica.take(), file.as_mut()) {
                            if !r.url.is_empty() {
                                trace!(target: "strata::metalink", url = %r.url, "replica");
                                f.urls.push(r);
                            }
                        }
                    }
                    "hash" => hash_type = None,
                    _ => {}
                }
            }
            Event::Empty(ref e) if path.is_empty() => {
                let name = local(e);
                if name == "metalink" {
                    return Err(MetalinkError::Empty);
                }
                return Err(MetalinkError::NotMetalink(name));
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|err| MetalinkError::Xml {
                    position: reader.buffer_position(),
                    message: err.to_string(),
                })?;
                let text = text.trim();
                match path.last().map(String::as_str) {
                    Some("url") => {
                        if let Some(r) = replica.as_mut() {
                            r.url.push_str(text);
                        }
                    }
                    Some("size") => {
                        if let Some(f) = file.as_mut() {
                            f.size = text.parse().ok();
                        }
                    }
                    Some("hash") => {
                        if let (Some(f), Some(t)) = (file.as_mut(), hash_type.as_ref()) {
                            f.hashes.push(FileHash {
                                algorithm: t.clone(),
                                value: text.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let version = version.ok_or(MetalinkError::Empty)?;
    Ok(Metalink { version, files })
}
