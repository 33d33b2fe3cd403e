use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default User-Agent header value
pub const DEFAULT_USER_AGENT: &str = concat!("tokengate-http/", env!("CARGO_PKG_VERSION"));

/// TLS root certificate configuration
///
/// Serialized as `webpki` or `native`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// OS native root certificate store, for backends behind a private CA
    Native,
}

/// Whether plain `http://` URLs are accepted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// HTTPS only
    #[default]
    TlsOnly,
    /// Allow plain HTTP (local mock servers only)
    AllowInsecureHttp,
}

/// Overall HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-attempt timeout (default: 30 seconds)
    ///
    /// Applies to each dispatch on its own. When an auth layer replays a
    /// request, the replay gets a fresh timeout.
    pub request_timeout: Duration,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// User-Agent header value
    pub user_agent: String,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Number of requests that may queue in front of the service (default: 1024)
    pub buffer_capacity: usize,

    /// Idle connection timeout for the pool (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Idle connections kept per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// Configuration for the session refresh endpoint.
    ///
    /// Refresh responses are tiny and the endpoint is hit rarely, so the pool
    /// is kept small. The timeout matches the default request timeout: a
    /// refresh must not be allowed to outlive the requests waiting on it by
    /// more than one regular attempt.
    #[must_use]
    pub fn refresh_endpoint() -> Self {
        Self {
            max_body_size: 64 * 1024,
            buffer_capacity: 64,
            pool_idle_timeout: Some(Duration::from_secs(60)),
            pool_max_idle_per_host: 2,
            ..Self::default()
        }
    }

    /// Configuration for tests against local mock servers (allows plain HTTP)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn default_is_tls_only() {
        let cfg = HttpClientConfig::default();
        assert_eq!(cfg.transport, TransportSecurity::TlsOnly);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn refresh_endpoint_keeps_default_timeout() {
        let cfg = HttpClientConfig::refresh_endpoint();
        assert_eq!(
            cfg.request_timeout,
            HttpClientConfig::default().request_timeout
        );
        assert_eq!(cfg.max_body_size, 64 * 1024);
    }

    #[test]
    fn tls_roots_use_lowercase_names() {
        assert_eq!(
            serde_json::from_str::<TlsRootConfig>("\"native\"").unwrap(),
            TlsRootConfig::Native
        );
        assert_eq!(
            serde_json::to_string(&TlsRootConfig::WebPki).unwrap(),
            "\"webpki\""
        );
    }

    #[test]
    fn testing_preset_allows_http() {
        let cfg = HttpClientConfig::for_testing();
        assert_eq!(cfg.transport, TransportSecurity::AllowInsecureHttp);
    }
}
