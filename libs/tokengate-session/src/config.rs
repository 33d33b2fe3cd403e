use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokengate_http::{HttpClientConfig, TlsRootConfig, TransportSecurity};
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Configuration of an [`AuthenticatedHttpClient`](crate::AuthenticatedHttpClient).
///
/// ```yaml
/// base_url: https://api.example.com
/// refresh_path: /auth/refresh
/// request_timeout: 30s
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionClientConfig {
    /// Backend root; request paths and `refresh_path` are appended to it.
    pub base_url: String,

    /// Path of the refresh endpoint (default `/auth/refresh`).
    pub refresh_path: String,

    /// Per-attempt timeout, also applied to the refresh call (default `30s`).
    #[serde(with = "tokengate_utils::duration_serde")]
    pub request_timeout: Duration,

    pub user_agent: String,

    /// Accept `http://` base URLs. Local development only.
    pub allow_insecure_http: bool,

    /// Response body limit in bytes (default 10 MB).
    pub max_body_size: usize,

    /// Trusted roots: `webpki` (bundled Mozilla roots, default) or `native`
    /// (the OS store, for backends behind a private CA).
    pub tls_roots: TlsRootConfig,
}

impl Default for SessionClientConfig {
    fn default() -> Self {
        let http = HttpClientConfig::default();
        Self {
            base_url: String::new(),
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            request_timeout: http.request_timeout,
            user_agent: http.user_agent,
            allow_insecure_http: false,
            max_body_size: http.max_body_size,
            tls_roots: http.tls_roots,
        }
    }
}

impl SessionClientConfig {
    /// Config for `base_url` with every other field at its default.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns the first problem found: unparsable or host-less `base_url`,
    /// plain HTTP without `allow_insecure_http`, a relative `refresh_path`,
    /// or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: "missing host".to_owned(),
            });
        }

        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure_http => {}
            "http" => return Err(ConfigError::InsecureBaseUrl(self.base_url.clone())),
            other => {
                return Err(ConfigError::InvalidBaseUrl {
                    url: self.base_url.clone(),
                    reason: format!("unsupported scheme '{other}'"),
                });
            }
        }

        if !self.refresh_path.starts_with('/') {
            return Err(ConfigError::InvalidRefreshPath(self.refresh_path.clone()));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(())
    }

    /// Absolute URL for `path`; absolute `http(s)://` inputs are returned as-is.
    #[must_use]
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            return path.to_owned();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    #[must_use]
    pub fn refresh_url(&self) -> String {
        self.resolve(&self.refresh_path)
    }

    fn transport(&self) -> TransportSecurity {
        if self.allow_insecure_http {
            TransportSecurity::AllowInsecureHttp
        } else {
            TransportSecurity::TlsOnly
        }
    }

    /// HTTP settings for business requests.
    #[must_use]
    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            request_timeout: self.request_timeout,
            max_body_size: self.max_body_size,
            user_agent: self.user_agent.clone(),
            transport: self.transport(),
            tls_roots: self.tls_roots,
            ..HttpClientConfig::default()
        }
    }

    /// HTTP settings for the refresh endpoint: same timeout, small pool.
    #[must_use]
    pub fn refresh_http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            request_timeout: self.request_timeout,
            user_agent: self.user_agent.clone(),
            transport: self.transport(),
            tls_roots: self.tls_roots,
            ..HttpClientConfig::refresh_endpoint()
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SessionClientConfig::new("https://api.example.com");
        assert_eq!(cfg.refresh_path, "/auth/refresh");
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserializes_humantime_timeout() {
        let cfg: SessionClientConfig = serde_json::from_value(serde_json::json!({
            "base_url": "https://api.example.com/v1",
            "request_timeout": "5s"
        }))
        .unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.refresh_url(), "https://api.example.com/v1/auth/refresh");
    }

    #[test]
    fn native_roots_reach_both_clients() {
        let cfg: SessionClientConfig = serde_json::from_value(serde_json::json!({
            "base_url": "https://api.internal.example.com",
            "tls_roots": "native"
        }))
        .unwrap();
        assert_eq!(cfg.http_config().tls_roots, TlsRootConfig::Native);
        assert_eq!(cfg.refresh_http_config().tls_roots, TlsRootConfig::Native);
        assert_eq!(
            SessionClientConfig::new("https://api.example.com").tls_roots,
            TlsRootConfig::WebPki
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_value::<SessionClientConfig>(serde_json::json!({
            "base_url": "https://api.example.com",
            "retries": 3
        }));
        assert!(result.is_err());
    }

    #[test]
    fn http_requires_opt_in() {
        let mut cfg = SessionClientConfig::new("http://localhost:8080");
        assert!(matches!(cfg.validate(), Err(ConfigError::InsecureBaseUrl(_))));

        cfg.allow_insecure_http = true;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.http_config().transport, TransportSecurity::AllowInsecureHttp);
    }

    #[test]
    fn rejects_bad_values() {
        let empty = SessionClientConfig::default();
        assert!(matches!(
            empty.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        let mut relative = SessionClientConfig::new("https://api.example.com");
        relative.refresh_path = "auth/refresh".into();
        assert!(matches!(
            relative.validate(),
            Err(ConfigError::InvalidRefreshPath(_))
        ));

        let mut zero = SessionClientConfig::new("https://api.example.com");
        zero.request_timeout = Duration::ZERO;
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroTimeout)));
    }

    #[test]
    fn resolve_joins_and_passes_absolute_urls() {
        let cfg = SessionClientConfig::new("https://api.example.com/");
        assert_eq!(cfg.resolve("/pets"), "https://api.example.com/pets");
        assert_eq!(cfg.resolve("pets?page=2"), "https://api.example.com/pets?page=2");
        assert_eq!(cfg.resolve("https://other.example.com/x"), "https://other.example.com/x");
    }

    #[test]
    fn refresh_client_keeps_request_timeout() {
        let mut cfg = SessionClientConfig::new("https://api.example.com");
        cfg.request_timeout = Duration::from_secs(7);
        let http = cfg.refresh_http_config();
        assert_eq!(http.request_timeout, Duration::from_secs(7));
        assert_eq!(http.max_body_size, HttpClientConfig::refresh_endpoint().max_body_size);
    }
}
