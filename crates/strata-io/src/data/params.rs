use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use strata_transport::SessionOptions;

use super::protocol::Protocol;

/// When replica failover through metalink is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetalinkMode {
    /// Never consult metalink.
    Disable,
    /// Fail over to replicas when the primary target fails.
    #[default]
    Auto,
    /// Same recovery as `Auto`, stated explicitly.
    FailOver,
}

/// Tuning of the vectored read engine.
///
/// # Examples
///
/// ```
/// use strata_io::VecOptions;
/// use url::Url;
///
/// let url = Url::parse("http://h/f#mergewindow=10&multirange=false").unwrap();
/// let opts = VecOptions::default().with_fragment(&url);
/// assert_eq!(opts.merge_window, 10);
/// assert!(!opts.multirange);
/// assert_eq!(opts.connections, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VecOptions {
    /// Largest gap in bytes between two ranges that still merges them.
    pub merge_window: u64,
    /// Concurrent single-range requests on the fallback path.
    pub connections: usize,
    /// Try one request carrying several ranges before falling back.
    pub multirange: bool,
    /// Size cap of one `Range` header value.
    pub header_budget: usize,
    /// A whole-entity `200` answer is only streamed when the entity is at
    /// most this large...
    pub full_body_min_size: u64,
    /// ...or at most `full_body_ratio` times the bytes asked for.
    pub full_body_ratio: u64,
}

impl Default for VecOptions {
    fn default() -> Self {
        Self {
            merge_window: 2000,
            connections: 3,
            multirange: true,
            header_budget: 3900,
            full_body_min_size: 1024 * 1024,
            full_body_ratio: 2,
        }
    }
}

impl VecOptions {
    /// Apply `mergewindow`, `nconnections` and `multirange` from the URL fragment.
    #[must_use]
    pub fn with_fragment(&self, url: &Url) -> Self {
        let mut opts = self.clone();
        for (key, value) in fragment_params(url) {
            match key {
                "mergewindow" => {
                    if let Ok(v) = value.parse() {
                        opts.merge_window = v;
                    }
                }
                "nconnections" => {
                    if let Ok(v) = value.parse::<usize>() {
                        opts.connections = v.max(1);
                    }
                }
                "multirange" => {
                    if value.eq_ignore_ascii_case("false") || value == "0" {
                        opts.multirange = false;
                    }
                }
                _ => {}
            }
        }
        opts
    }
}

/// `key=value` pairs of the URL fragment, split on `&`. A bare key has an
/// empty value.
pub fn fragment_params(url: &Url) -> impl Iterator<Item = (&str, &str)> {
    url.fragment()
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| p.split_once('=').unwrap_or((p, "")))
}

/// Per-request configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use strata_io::{MetalinkMode, RequestParams};
///
/// let params = RequestParams::default()
///     .max_retries(5)
///     .retry_delay(Duration::from_millis(50))
///     .metalink_mode(MetalinkMode::Disable)
///     .header("Authorization", "Bearer token");
/// assert_eq!(params.max_retries, 5);
/// ```
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub protocol: Protocol,

    /// Retries after the first attempt. The default of 2 gives three attempts.
    pub max_retries: u32,

    pub retry_delay: Duration,

    /// Budget for one whole logical operation, retries included.
    pub operation_timeout: Option<Duration>,

    pub connect_timeout: Option<Duration>,

    pub verify_tls: bool,

    pub metalink_mode: MetalinkMode,

    /// Follow 3xx answers instead of surfacing them.
    pub transparent_redirects: bool,

    pub max_redirects: u32,

    /// Remember where a URL redirected to and go there directly next time.
    pub redirect_caching: bool,

    /// Sent with every request, e.g. credentials.
    pub headers: Vec<(String, String)>,

    /// Address S3 buckets as `host/bucket` rather than `bucket.host`.
    pub s3_path_style: bool,

    /// Block size for Azure uploads and segment size for Swift uploads.
    pub upload_chunk_size: Option<u64>,

    /// Set to `true` from any thread to abort transfers between network rounds.
    pub cancel: Option<Arc<AtomicBool>>,

    pub vec: VecOptions,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            protocol: Protocol::Auto,
            max_retries: 2,
            retry_delay: Duration::ZERO,
            operation_timeout: None,
            connect_timeout: Some(Duration::from_secs(30)),
            verify_tls: true,
            metalink_mode: MetalinkMode::Auto,
            transparent_redirects: true,
            max_redirects: 10,
            redirect_caching: true,
            headers: Vec::new(),
            s3_path_style: false,
            upload_chunk_size: None,
            cancel: None,
            vec: VecOptions::default(),
        }
    }
}

impl RequestParams {
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    #[must_use]
    pub fn metalink_mode(mut self, mode: MetalinkMode) -> Self {
        self.metalink_mode = mode;
        self
    }

    #[must_use]
    pub fn transparent_redirects(mut self, follow: bool) -> Self {
        self.transparent_redirects = follow;
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    #[must_use]
    pub fn redirect_caching(mut self, enabled: bool) -> Self {
        self.redirect_caching = enabled;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn s3_path_style(mut self, enabled: bool) -> Self {
        self.s3_path_style = enabled;
        self
    }

    #[must_use]
    pub fn upload_chunk_size(mut self, size: u64) -> Self {
        self.upload_chunk_size = Some(size);
        self
    }

    #[must_use]
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    #[must_use]
    pub fn vec_options(mut self, vec: VecOptions) -> Self {
        self.vec = vec;
        self
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: self.connect_timeout,
            operation_timeout: self.operation_timeout,
            verify_tls: self.verify_tls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = RequestParams::default();
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.retry_delay, Duration::ZERO);
        assert_eq!(p.metalink_mode, MetalinkMode::Auto);
        assert!(p.transparent_redirects);
        assert_eq!(p.max_redirects, 10);
        assert_eq!(p.vec.merge_window, 2000);
        assert_eq!(p.vec.connections, 3);
        assert_eq!(p.vec.header_budget, 3900);
        assert!(p.vec.multirange);
        assert!(!p.is_canceled());
    }

    #[test]
    fn test_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let p = RequestParams::default().cancel_flag(flag.clone());
        assert!(!p.is_canceled());
        flag.store(true, Ordering::Relaxed);
        assert!(p.is_canceled());
    }

    #[test]
    fn test_fragment_overrides() {
        let url = Url::parse("http://h/f#nconnections=0&mergewindow=oops&forceMultiPart").unwrap();
        let opts = VecOptions::default().with_fragment(&url);
        assert_eq!(opts.connections, 1);
        assert_eq!(opts.merge_window, 2000);
        let keys: Vec<_> = fragment_params(&url).map(|(k, _)| k).collect();
        assert_eq!(keys, ["nconnections", "mergewindow", "forceMultiPart"]);
    }

    #[test]
    fn test_no_fragment() {
        let url = Url::parse("http://h/f").unwrap();
        assert_eq!(VecOptions::default().with_fragment(&url), VecOptions::default());
        assert_eq!(fragment_params(&url).count(), 0);
    }
}
