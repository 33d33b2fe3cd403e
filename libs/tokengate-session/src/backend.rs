use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokengate_http::{HttpClient, HttpClientBuilder, HttpError};
use tokengate_utils::SecretString;

use crate::config::SessionClientConfig;
use crate::error::{ConfigError, SessionError};
use crate::http_error::format_http_error;
use crate::store::Session;

const ERROR_PREFIX: &str = "session refresh";

/// Exchanges a refresh token for a new session.
#[async_trait]
pub trait RefreshBackend: Send + Sync {
    /// # Errors
    ///
    /// `RefreshRejected` for a non-2xx answer, `Network` when no answer
    /// arrived, `InvalidRefreshResponse` when the answer is unusable.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<Session, SessionError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshEnvelope {
    data: RefreshData,
}

#[derive(Deserialize)]
struct RefreshData {
    session: WireSession,
}

#[derive(Deserialize)]
struct WireSession {
    access_token: String,
    refresh_token: String,
}

/// `POST {endpoint}` with `{"refresh_token": ...}`, expecting
/// `{"data": {"session": {"access_token", "refresh_token"}}}` back.
///
/// Uses its own [`HttpClient`] without the session auth layer, so a refresh
/// can never recurse into another refresh.
#[derive(Clone)]
pub struct HttpRefreshBackend {
    client: HttpClient,
    endpoint: String,
}

impl HttpRefreshBackend {
    #[must_use]
    pub fn new(client: HttpClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Build the backend and its dedicated client from `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config is invalid or the client cannot be built.
    pub fn from_config(config: &SessionClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = HttpClientBuilder::with_config(config.refresh_http_config())
            .build()
            .map_err(|e| ConfigError::Http(format_http_error(&e, ERROR_PREFIX)))?;
        Ok(Self::new(client, config.refresh_url()))
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpRefreshBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRefreshBackend")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RefreshBackend for HttpRefreshBackend {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<Session, SessionError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.expose(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .map_err(|e| SessionError::Network(format_http_error(&e, ERROR_PREFIX)))?
            .send()
            .await
            .map_err(|e| SessionError::Network(format_http_error(&e, ERROR_PREFIX)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::RefreshRejected { status });
        }

        let envelope: RefreshEnvelope = response.json().await.map_err(|e| match e {
            HttpError::Json(err) => SessionError::InvalidRefreshResponse(describe_json_error(&err)),
            other => SessionError::Network(format_http_error(&other, ERROR_PREFIX)),
        })?;

        let WireSession {
            access_token,
            refresh_token,
        } = envelope.data.session;

        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(SessionError::InvalidRefreshResponse(
                "session contains an empty token".to_owned(),
            ));
        }

        Ok(Session::new(access_token, refresh_token))
    }
}

/// serde_json messages can quote input values; keep only the category and position.
fn describe_json_error(err: &serde_json::Error) -> String {
    use serde_json::error::Category;

    let kind = match err.classify() {
        Category::Io => "I/O error",
        Category::Syntax => "malformed JSON",
        Category::Data => "unexpected shape",
        Category::Eof => "truncated JSON",
    };
    format!("{kind} at line {} column {}", err.line(), err.column())
}
