//! Error types shared by every strata crate.

use std::borrow::Cow;
use std::fmt;
use std::io;

use thiserror::Error;

/// Layer names used as error scopes.
pub mod scope {
    pub const TRANSPORT: &str = "strata::transport";
    pub const REQUEST: &str = "strata::request";
    pub const CHAIN: &str = "strata::chain";
    pub const VEC: &str = "strata::vec";
    pub const META: &str = "strata::meta";
    pub const IO: &str = "strata::io";
    pub const RETRY: &str = "strata::retry";
    pub const METALINK: &str = "strata::metalink";
}

/// Kind of failure, independent of the layer that detected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NameResolution,
    ConnectionRefused,
    ConnectionReset,
    ConnectionTimeout,
    Tls,
    ConnectionProblem,
    InvalidServerResponse,
    MultipartParse,
    RangeNotSatisfiable,
    RedirectionNeeded,
    TooManyRedirects,
    OperationTimeout,
    PermissionDenied,
    AuthenticationError,
    Canceled,
    InvalidArgument,
    FileNotFound,
    FileExist,
    OperationNotSupported,
    Io,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NameResolution => "name resolution failure",
            ErrorKind::ConnectionRefused => "connection refused",
            ErrorKind::ConnectionReset => "connection reset",
            ErrorKind::ConnectionTimeout => "connection timeout",
            ErrorKind::Tls => "TLS failure",
            ErrorKind::ConnectionProblem => "connection problem",
            ErrorKind::InvalidServerResponse => "invalid server response",
            ErrorKind::MultipartParse => "multipart parse error",
            ErrorKind::RangeNotSatisfiable => "range not satisfiable",
            ErrorKind::RedirectionNeeded => "redirection needed",
            ErrorKind::TooManyRedirects => "too many redirects",
            ErrorKind::OperationTimeout => "operation timeout",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::AuthenticationError => "authentication error",
            ErrorKind::Canceled => "operation canceled",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::FileExist => "file exists",
            ErrorKind::OperationNotSupported => "operation not supported",
            ErrorKind::Io => "I/O error",
            ErrorKind::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged failure: what went wrong, which layer saw it, and a message for humans.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{scope}: {message}")]
pub struct Error {
    kind: ErrorKind,
    scope: Cow<'static, str>,
    message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(
        scope: impl Into<Cow<'static, str>>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            scope: scope.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Same kind and scope, message replaced.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Map an unsuccessful HTTP status code to an error.
    pub fn from_status(code: u16, scope: impl Into<Cow<'static, str>>, context: &str) -> Self {
        let kind = match code {
            401 | 402 | 407 => ErrorKind::AuthenticationError,
            403 | 423 => ErrorKind::PermissionDenied,
            404 | 410 => ErrorKind::FileNotFound,
            409 => ErrorKind::FileExist,
            416 => ErrorKind::RangeNotSatisfiable,
            300..=302 => ErrorKind::RedirectionNeeded,
            400 | 405 | 408 | 411..=415 | 424 | 501 | 504 | 507 => ErrorKind::ConnectionProblem,
            _ => ErrorKind::InvalidServerResponse,
        };
        let message = if context.is_empty() {
            format!("HTTP error {code}")
        } else {
            format!("{context}: HTTP error {code}")
        };
        Self::new(scope, kind, message)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ErrorKind::ConnectionReset
            }
            io::ErrorKind::TimedOut => ErrorKind::ConnectionTimeout,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
            _ => ErrorKind::Io,
        };
        Error::new(scope::IO, kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_scope_and_message() {
        let err = Error::new(scope::VEC, ErrorKind::MultipartParse, "bad boundary");
        assert_eq!(err.to_string(), "strata::vec: bad boundary");
        assert_eq!(err.kind(), ErrorKind::MultipartParse);
        assert_eq!(err.scope(), "strata::vec");
    }

    #[test]
    fn test_from_status_mapping() {
        assert_eq!(Error::from_status(404, scope::REQUEST, "").kind(), ErrorKind::FileNotFound);
        assert_eq!(Error::from_status(403, scope::REQUEST, "").kind(), ErrorKind::PermissionDenied);
        assert_eq!(Error::from_status(401, scope::REQUEST, "").kind(), ErrorKind::AuthenticationError);
        assert_eq!(Error::from_status(409, scope::REQUEST, "").kind(), ErrorKind::FileExist);
        assert_eq!(
            Error::from_status(416, scope::REQUEST, "").kind(),
            ErrorKind::RangeNotSatisfiable
        );
        assert_eq!(
            Error::from_status(302, scope::REQUEST, "").kind(),
            ErrorKind::RedirectionNeeded
        );
        assert_eq!(
            Error::from_status(504, scope::REQUEST, "").kind(),
            ErrorKind::ConnectionProblem
        );
        assert_eq!(
            Error::from_status(500, scope::REQUEST, "").kind(),
            ErrorKind::InvalidServerResponse
        );
    }

    #[test]
    fn test_from_status_message() {
        let err = Error::from_status(500, scope::REQUEST, "stat failed");
        assert_eq!(err.message(), "stat failed: HTTP error 500");
        let err = Error::from_status(500, scope::REQUEST, "");
        assert_eq!(err.message(), "HTTP error 500");
    }

    #[test]
    fn test_from_io_error() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionRefused, "nope").into();
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(err.kind(), ErrorKind::ConnectionTimeout);
    }
}
