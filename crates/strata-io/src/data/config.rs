use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use strata_transport::{Error, ErrorKind, scope};

use super::params::{MetalinkMode, RequestParams, VecOptions};
use super::protocol::Protocol;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("unknown config format for {0}, expected .toml or .json")]
    UnknownFormat(String),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::new(scope::REQUEST, ErrorKind::InvalidArgument, e.to_string())
    }
}

/// File-level client configuration. Unset fields keep the
/// [`RequestParams`] defaults.
///
/// # Examples
///
/// ```
/// use strata_io::ClientConfig;
///
/// let config = ClientConfig::from_toml_str(r#"
///     retries = 4
///     metalink = "disable"
///
///     [headers]
///     Authorization = "Bearer t"
///
///     [vec]
///     merge_window = 64
/// "#).unwrap();
/// let params = config.into_params();
/// assert_eq!(params.max_retries, 4);
/// assert_eq!(params.vec.merge_window, 64);
/// assert_eq!(params.vec.connections, 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub protocol: Option<Protocol>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub operation_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub verify_tls: Option<bool>,
    pub metalink: Option<MetalinkMode>,
    pub follow_redirects: Option<bool>,
    pub max_redirects: Option<u32>,
    pub redirect_caching: Option<bool>,
    pub s3_path_style: Option<bool>,
    pub upload_chunk_size: Option<u64>,
    pub headers: BTreeMap<String, String>,
    pub vec: Option<VecOptions>,
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load from a `.toml` or `.json` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(ConfigError::UnknownFormat(path.display().to_string())),
        }
    }

    pub fn into_params(self) -> RequestParams {
        self.apply(RequestParams::default())
    }

    /// Overlay the fields that are set onto `params`.
    pub fn apply(self, mut params: RequestParams) -> RequestParams {
        if let Some(v) = self.protocol {
            params.protocol = v;
        }
        if let Some(v) = self.retries {
            params.max_retries = v;
        }
        if let Some(v) = self.retry_delay_ms {
            params.retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.operation_timeout_secs {
            params.operation_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = self.connect_timeout_secs {
            params.connect_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = self.verify_tls {
            params.verify_tls = v;
        }
        if let Some(v) = self.metalink {
            params.metalink_mode = v;
        }
        if let Some(v) = self.follow_redirects {
            params.transparent_redirects = v;
        }
        if let Some(v) = self.max_redirects {
            params.max_redirects = v;
        }
        if let Some(v) = self.redirect_caching {
            params.redirect_caching = v;
        }
        if let Some(v) = self.s3_path_style {
            params.s3_path_style = v;
        }
        if let Some(v) = self.upload_chunk_size {
            params.upload_chunk_size = Some(v);
        }
        params.headers.extend(self.headers);
        if let Some(v) = self.vec {
            params.vec = v;
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_config() {
        let config = ClientConfig::from_json_str(
            r#"{"protocol": "s3", "retry_delay_ms": 250, "verify_tls": false, "s3_path_style": true}"#,
        )
        .unwrap();
        let params = config.into_params();
        assert_eq!(params.protocol, Protocol::S3);
        assert_eq!(params.retry_delay, Duration::from_millis(250));
        assert!(!params.verify_tls);
        assert!(params.s3_path_style);
        assert_eq!(params.max_retries, 2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            ClientConfig::from_toml_str("retires = 3"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_partial_vec_table() {
        let config = ClientConfig::from_toml_str("[vec]\nmultirange = false\n").unwrap();
        let params = config.into_params();
        assert!(!params.vec.multirange);
        assert_eq!(params.vec.header_budget, 3900);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("client.toml");
        std::fs::write(&toml_path, "retries = 7\nfollow_redirects = false\n").unwrap();
        let params = ClientConfig::from_path(&toml_path).unwrap().into_params();
        assert_eq!(params.max_retries, 7);
        assert!(!params.transparent_redirects);

        let json_path = dir.path().join("client.json");
        std::fs::write(&json_path, r#"{"metalink": "failover"}"#).unwrap();
        let params = ClientConfig::from_path(&json_path).unwrap().into_params();
        assert_eq!(params.metalink_mode, MetalinkMode::FailOver);
    }

    #[test]
    fn test_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");
        std::fs::write(&path, "retries: 1").unwrap();
        assert!(matches!(
            ClientConfig::from_path(&path),
            Err(ConfigError::UnknownFormat(_))
        ));
        let err: Error = ClientConfig::from_path(&path).unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
