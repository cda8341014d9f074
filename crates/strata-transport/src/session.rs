//! The narrow interface strata consumes from an HTTP engine.
//!
//! A [`Session`] owns one physical connection (or handle). The I/O layers
//! above drive it with one request at a time: start, inspect status and
//! headers, read the body block by block, end.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::error::{Error, ErrorKind, Result, scope};

/// HTTP verbs used by the storage protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
    Propfind,
    Mkcol,
    Move,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Propfind => "PROPFIND",
            Method::Mkcol => "MKCOL",
            Method::Move => "MOVE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body. Storage uploads are buffered by the caller before sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Bytes(Bytes::from(s))
    }
}

/// Everything needed to put one request on the wire.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl RequestSpec {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    /// Add a header. Existing headers with the same name are kept.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Per-session transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionOptions {
    pub connect_timeout: Option<Duration>,
    pub operation_timeout: Option<Duration>,
    pub verify_tls: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            operation_timeout: None,
            verify_tls: true,
        }
    }
}

/// Pool key: sessions are only reused against the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl SessionKey {
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or_else(|| {
            Error::new(
                scope::TRANSPORT,
                ErrorKind::InvalidArgument,
                format!("URL has no host: {url}"),
            )
        })?;
        let port = url.port_or_known_default().ok_or_else(|| {
            Error::new(
                scope::TRANSPORT,
                ErrorKind::InvalidArgument,
                format!("URL has no port and scheme {} has no default", url.scheme()),
            )
        })?;
        Ok(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// One connection to a server, driven one request at a time.
///
/// Implementations must not follow redirects themselves.
pub trait Session: Send {
    /// Send the request and wait for the status line and headers.
    fn start_request(&mut self, request: &RequestSpec) -> Result<()>;

    /// Status code of the current response. Zero before `start_request`.
    fn status_code(&self) -> u16;

    /// Case-insensitive lookup of a response header.
    fn answer_header(&self, name: &str) -> Option<String>;

    fn answer_headers(&self) -> Vec<(String, String)>;

    /// Read up to `buf.len()` body bytes. `Ok(0)` means end of body.
    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Discard the rest of the body so the session can take another request.
    fn end_request(&mut self) -> Result<()> {
        let mut scratch = [0u8; 4096];
        while self.read_block(&mut scratch)? > 0 {}
        Ok(())
    }
}

/// Opens new sessions for the pool.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, key: &SessionKey, options: &SessionOptions)
    -> Result<Box<dyn Session>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_default_ports() {
        let key = SessionKey::from_url(&Url::parse("https://Example.org/a").unwrap()).unwrap();
        assert_eq!(key.scheme, "https");
        assert_eq!(key.host, "example.org");
        assert_eq!(key.port, 443);

        let key = SessionKey::from_url(&Url::parse("http://h:8080/").unwrap()).unwrap();
        assert_eq!(key.port, 8080);
        assert_eq!(key.to_string(), "http://h:8080");
    }

    #[test]
    fn test_session_key_requires_host() {
        let err = SessionKey::from_url(&Url::parse("file:///tmp/x").unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_request_builder() {
        let req = RequestSpec::new(Method::Get, Url::parse("http://h/f").unwrap())
            .header("Range", "bytes=0-9")
            .headers([("X-A", "1")])
            .body(b"abc".to_vec());
        assert_eq!(req.header_value("range"), Some("bytes=0-9"));
        assert_eq!(req.header_value("x-a"), Some("1"));
        assert_eq!(req.body.len(), 3);
        assert_eq!(Method::Propfind.to_string(), "PROPFIND");
    }
}
