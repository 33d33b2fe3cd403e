use std::sync::Arc;

use http::Method;
use tokengate_http::{HttpClient, HttpClientBuilder, RequestBuilder};
use tokio::sync::watch;

use crate::backend::{HttpRefreshBackend, RefreshBackend};
use crate::builder_ext::HttpClientBuilderExt;
use crate::config::SessionClientConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::{ConfigError, SessionError};
use crate::http_error::format_http_error;
use crate::invalidator::{
    AuthState, CacheInvalidator, InvalidationOutcome, Navigator, NoopCacheInvalidator,
    NoopNavigator, SessionInvalidator,
};
use crate::layer::SessionAuthLayer;
use crate::metrics::{NoOpMetrics, SessionEvent, SessionMetrics};
use crate::storage::MemoryStore;
use crate::store::{Session, TokenStore};

/// HTTP client bound to one backend and one user session.
///
/// Every request carries the current access token. An expired token is
/// refreshed once, shared by all concurrent callers, and the request is
/// replayed; if the session cannot be recovered it is torn down and the
/// request fails with [`HttpError::Auth`](tokengate_http::HttpError::Auth)
/// wrapping a [`SessionError`].
///
/// Cheap to clone; clones share the session.
///
/// ```ignore
/// let client = AuthenticatedHttpClient::builder(SessionClientConfig::new("https://api.example.com"))
///     .token_store(Arc::new(TokenStore::load(kv).await?))
///     .build()?;
///
/// let pets: Vec<Pet> = client.get("/pets").send().await?.json().await?;
/// ```
#[derive(Clone)]
pub struct AuthenticatedHttpClient {
    http: HttpClient,
    config: Arc<SessionClientConfig>,
    store: Arc<TokenStore>,
    invalidator: Arc<SessionInvalidator>,
    coordinator: RefreshCoordinator,
    metrics: Arc<dyn SessionMetrics>,
}

impl std::fmt::Debug for AuthenticatedHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedHttpClient")
            .field("base_url", &self.config.base_url)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AuthenticatedHttpClient {
    #[must_use]
    pub fn builder(config: SessionClientConfig) -> AuthenticatedHttpClientBuilder {
        AuthenticatedHttpClientBuilder::new(config)
    }

    /// Request to `path`, resolved against the configured base URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, &self.config.resolve(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Establish a session from a backend-issued token pair.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the pair cannot be persisted.
    pub async fn sign_in(&self, session: &Session) -> Result<(), SessionError> {
        let generation = self.store.set_session(session).await?;
        self.invalidator.mark_signed_in();
        self.metrics.record_event(SessionEvent::SignedIn);
        tracing::info!(generation, "signed in");
        Ok(())
    }

    /// End the session: clear tokens and cache, publish `SignedOut`, navigate
    /// to sign-in. A no-op when already signed out.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the persisted tokens could not be
    /// removed.
    pub async fn sign_out(&self) -> Result<InvalidationOutcome, SessionError> {
        self.invalidator.sign_out().await
    }

    /// Watch sign-in state changes.
    #[must_use]
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.invalidator.subscribe()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn config(&self) -> &SessionClientConfig {
        &self.config
    }
}

/// Builder for [`AuthenticatedHttpClient`].
#[must_use]
pub struct AuthenticatedHttpClientBuilder {
    config: SessionClientConfig,
    store: Option<Arc<TokenStore>>,
    cache: Arc<dyn CacheInvalidator>,
    navigator: Arc<dyn Navigator>,
    metrics: Arc<dyn SessionMetrics>,
    backend: Option<Arc<dyn RefreshBackend>>,
}

impl AuthenticatedHttpClientBuilder {
    fn new(config: SessionClientConfig) -> Self {
        Self {
            config,
            store: None,
            cache: Arc::new(NoopCacheInvalidator),
            navigator: Arc::new(NoopNavigator),
            metrics: Arc::new(NoOpMetrics),
            backend: None,
        }
    }

    /// Token store to use; defaults to an empty in-memory store.
    pub fn token_store(mut self, store: Arc<TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache_invalidator(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn SessionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the HTTP refresh call; defaults to [`HttpRefreshBackend`].
    pub fn refresh_backend(mut self, backend: Arc<dyn RefreshBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Must be called inside a Tokio runtime (the request buffer spawns a worker).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config is invalid or an HTTP client cannot
    /// be built.
    pub fn build(self) -> Result<AuthenticatedHttpClient, ConfigError> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(TokenStore::new(Arc::new(MemoryStore::new()))));

        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpRefreshBackend::from_config(&self.config)?),
        };

        let invalidator = Arc::new(
            SessionInvalidator::new(Arc::clone(&store), self.cache, self.navigator)
                .with_metrics(Arc::clone(&self.metrics)),
        );
        let coordinator = RefreshCoordinator::with_metrics(
            backend,
            Arc::clone(&store),
            Arc::clone(&invalidator),
            Arc::clone(&self.metrics),
        );
        let layer = SessionAuthLayer::with_metrics(
            Arc::clone(&store),
            coordinator.clone(),
            Arc::clone(&invalidator),
            Arc::clone(&self.metrics),
        );

        let http = HttpClientBuilder::with_config(self.config.http_config())
            .with_session_auth(layer)
            .build()
            .map_err(|e| ConfigError::Http(format_http_error(&e, "http client")))?;

        tracing::debug!(base_url = %self.config.base_url, "authenticated client built");

        Ok(AuthenticatedHttpClient {
            http,
            config: Arc::new(self.config),
            store,
            invalidator,
            coordinator,
            metrics: self.metrics,
        })
    }
}
