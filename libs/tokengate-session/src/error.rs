use thiserror::Error;

/// Failures of the session lifecycle.
///
/// Every variant fails the request that hit it. Apart from
/// [`RefreshAborted`](Self::RefreshAborted), by the time a caller sees one
/// the session the request ran under has been torn down (unless a newer
/// sign-in already replaced it) and the application sent to sign-in;
/// an aborted refresh leaves the stored tokens in place so the next `401`
/// can try again. The type is `Clone` so one refresh failure can be handed
/// to every caller waiting on it.
///
/// None of the variants carry token values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// A refresh was needed but no refresh token is stored.
    #[error("no refresh token stored")]
    RefreshTokenMissing,

    /// The refresh endpoint answered with a non-2xx status.
    #[error("refresh rejected with HTTP {status}")]
    RefreshRejected { status: http::StatusCode },

    /// The refresh call failed below HTTP (connect, TLS, timeout).
    ///
    /// The text comes from
    /// [`format_http_error`](crate::http_error::format_http_error).
    #[error("{0}")]
    Network(String),

    /// The refresh endpoint returned 2xx with an unusable body.
    #[error("invalid refresh response: {0}")]
    InvalidRefreshResponse(String),

    /// A request replayed with a refreshed token was rejected again.
    #[error("request rejected after session refresh")]
    ReplayRejected,

    /// Persisting the refreshed session failed.
    #[error("session storage failed: {0}")]
    Storage(String),

    /// The refresh task ended without settling its callers.
    ///
    /// The session is not invalidated.
    #[error("session refresh aborted")]
    RefreshAborted,
}

/// Errors from a [`KeyValueStore`](crate::storage::KeyValueStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::Storage(err.to_string())
    }
}

/// Invalid [`SessionClientConfig`](crate::config::SessionClientConfig).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid base_url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("base_url must use https unless allow_insecure_http is set (got '{0}')")]
    InsecureBaseUrl(String),

    #[error("invalid refresh_path '{0}': must start with '/'")]
    InvalidRefreshPath(String),

    #[error("request_timeout must be greater than zero")]
    ZeroTimeout,

    #[error("HTTP client setup failed: {0}")]
    Http(String),
}
