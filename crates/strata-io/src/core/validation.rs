use strata_transport::{Error, ErrorKind, scope};

/// Returns `true` if the HTTP status code indicates a redirect.
///
/// # Recognized Redirect Codes
///
/// - 301: Moved Permanently
/// - 302: Found
/// - 303: See Other
/// - 307: Temporary Redirect
/// - 308: Permanent Redirect
///
/// # Examples
///
/// ```
/// use strata_io::is_redirect;
///
/// assert!(is_redirect(301));
/// assert!(is_redirect(308));
/// assert!(!is_redirect(200));
/// assert!(!is_redirect(304));
/// ```
pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// `Ok` for 2xx, otherwise the mapped error.
pub fn check_status(status: u16, context: &str) -> Result<(), Error> {
    if is_success(status) {
        Ok(())
    } else {
        Err(Error::from_status(status, scope::REQUEST, context))
    }
}

/// Kinds that neither the retry loop nor replica failover may absorb.
///
/// A timeout or a refusal will not change on another attempt, and a needed
/// redirect is for the caller to act on.
pub fn is_recoverable(kind: ErrorKind) -> bool {
    !matches!(
        kind,
        ErrorKind::ConnectionTimeout
            | ErrorKind::OperationTimeout
            | ErrorKind::PermissionDenied
            | ErrorKind::RedirectionNeeded
            | ErrorKind::Canceled
            | ErrorKind::InvalidArgument
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_redirect_all_codes() {
        for code in [301, 302, 303, 307, 308] {
            assert!(is_redirect(code), "{code}");
        }
        for code in [200, 206, 300, 304, 305, 404] {
            assert!(!is_redirect(code), "{code}");
        }
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(204, "").is_ok());
        let err = check_status(404, "stat").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.message(), "stat: HTTP error 404");
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(is_recoverable(ErrorKind::ConnectionReset));
        assert!(is_recoverable(ErrorKind::FileNotFound));
        assert!(is_recoverable(ErrorKind::InvalidServerResponse));
        assert!(!is_recoverable(ErrorKind::ConnectionTimeout));
        assert!(!is_recoverable(ErrorKind::OperationTimeout));
        assert!(!is_recoverable(ErrorKind::PermissionDenied));
        assert!(!is_recoverable(ErrorKind::RedirectionNeeded));
        assert!(!is_recoverable(ErrorKind::Canceled));
    }
}
