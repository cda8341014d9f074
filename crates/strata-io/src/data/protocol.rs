use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use strata_transport::{Error, ErrorKind, Result, scope};

/// Storage dialect spoken to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Pick from the URL scheme, then from the URL itself.
    #[default]
    Auto,
    Http,
    WebDav,
    S3,
    Gcs,
    Swift,
    Azure,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Auto => "auto",
            Protocol::Http => "http",
            Protocol::WebDav => "webdav",
            Protocol::S3 => "s3",
            Protocol::Gcs => "gcs",
            Protocol::Swift => "swift",
            Protocol::Azure => "azure",
        };
        f.write_str(s)
    }
}

/// Scheme aliases and the protocol they imply.
const SCHEME_ALIASES: &[(&str, &str, Protocol)] = &[
    ("dav", "http", Protocol::WebDav),
    ("davs", "https", Protocol::WebDav),
    ("s3", "http", Protocol::S3),
    ("s3s", "https", Protocol::S3),
    ("gcloud", "http", Protocol::Gcs),
    ("gclouds", "https", Protocol::Gcs),
    ("swift", "http", Protocol::Swift),
    ("swifts", "https", Protocol::Swift),
    ("azure", "http", Protocol::Azure),
    ("azures", "https", Protocol::Azure),
];

/// Rewrite protocol-specific schemes to `http`/`https`.
///
/// Returns the wire URL and the protocol the original scheme implied, if any.
///
/// # Examples
///
/// ```
/// use strata_io::{Protocol, normalize_url};
/// use url::Url;
///
/// let (url, implied) = normalize_url(&Url::parse("davs://h/dir/f").unwrap()).unwrap();
/// assert_eq!(url.as_str(), "https://h/dir/f");
/// assert_eq!(implied, Some(Protocol::WebDav));
/// ```
pub fn normalize_url(url: &Url) -> Result<(Url, Option<Protocol>)> {
    let scheme = url.scheme();
    if scheme == "http" || scheme == "https" {
        return Ok((url.clone(), None));
    }
    let Some((_, wire, protocol)) = SCHEME_ALIASES.iter().find(|(alias, _, _)| *alias == scheme)
    else {
        return Err(Error::new(
            scope::REQUEST,
            ErrorKind::InvalidArgument,
            format!("unsupported URL scheme: {scheme}"),
        ));
    };
    // Url::set_scheme refuses to switch between special and non-special schemes.
    let rest = &url.as_str()[scheme.len()..];
    let rewritten = Url::parse(&format!("{wire}{rest}")).map_err(|e| {
        Error::new(
            scope::REQUEST,
            ErrorKind::InvalidArgument,
            format!("cannot rewrite {url}: {e}"),
        )
    })?;
    Ok((rewritten, Some(*protocol)))
}

/// True when the query string carries an Azure shared access signature.
pub fn has_azure_sas(url: &Url) -> bool {
    let mut sig = false;
    let mut sr = false;
    let mut sp = false;
    for (k, _) in url.query_pairs() {
        match k.as_ref() {
            "sig" => sig = true,
            "sr" => sr = true,
            "sp" => sp = true,
            _ => {}
        }
    }
    sig && sr && sp
}

impl Protocol {
    /// Settle `Auto` using what the scheme implied and the URL shape.
    pub fn resolve(self, implied: Option<Protocol>, url: &Url) -> Protocol {
        match self {
            Protocol::Auto => match implied {
                Some(p) => p,
                None if has_azure_sas(url) => Protocol::Azure,
                None => Protocol::Http,
            },
            explicit => explicit,
        }
    }

    /// S3 and GCS share the object-store dialect.
    pub fn is_object_store(self) -> bool {
        matches!(self, Protocol::S3 | Protocol::Gcs)
    }
}
