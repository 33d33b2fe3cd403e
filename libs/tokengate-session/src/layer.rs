use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::AUTHORIZATION;
use http::request::Parts;
use http::{HeaderValue, Request, Response, StatusCode};
use tokengate_http::HttpError;
use tokengate_utils::SecretString;
use tower::{Layer, Service, ServiceExt};

use crate::coordinator::RefreshCoordinator;
use crate::error::SessionError;
use crate::invalidator::SessionInvalidator;
use crate::metrics::{NoOpMetrics, SessionEvent, SessionMetrics};
use crate::store::TokenStore;

/// Request extension marking a replay after a refresh.
///
/// A 401 on a request carrying it ends the session instead of refreshing
/// again. Callers may set it themselves to opt a request out of refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryMarker;

/// How a single dispatch ended, as far as the session is concerned.
enum AttemptOutcome<R> {
    Completed(R),
    AuthExpired,
}

impl<ResBody> AttemptOutcome<Response<ResBody>> {
    fn classify(response: Response<ResBody>) -> Self {
        if response.status() == StatusCode::UNAUTHORIZED {
            Self::AuthExpired
        } else {
            Self::Completed(response)
        }
    }
}

/// Token a request is dispatched with and the store generation it came from.
struct Credentials {
    generation: u64,
    access_token: Option<SecretString>,
}

struct Shared {
    store: Arc<TokenStore>,
    coordinator: RefreshCoordinator,
    invalidator: Arc<SessionInvalidator>,
    metrics: Arc<dyn SessionMetrics>,
}

impl Shared {
    fn current(&self) -> Credentials {
        let snapshot = self.store.snapshot();
        Credentials {
            generation: snapshot.generation,
            access_token: snapshot.access_token.clone(),
        }
    }

    /// Token for the replay of a request sent at `seen_generation`.
    ///
    /// If another batch already replaced the session, its token is used
    /// without a new refresh.
    async fn fresh_credentials(&self, seen_generation: u64) -> Result<Credentials, HttpError> {
        let current = self.current();
        if current.generation != seen_generation && current.access_token.is_some() {
            tracing::debug!(
                seen_generation,
                generation = current.generation,
                "session already refreshed, replaying with stored token"
            );
            return Ok(current);
        }

        let refreshed = self.coordinator.refresh().await.map_err(HttpError::auth)?;
        Ok(Credentials {
            generation: refreshed.generation,
            access_token: Some(refreshed.access_token),
        })
    }

    async fn reject_replay(&self, generation: u64) -> HttpError {
        let reason = SessionError::ReplayRejected;
        tracing::warn!(generation, "request rejected after token refresh");
        self.metrics.record_event(SessionEvent::ReplayRejected);
        self.invalidator
            .invalidate_if_current(generation, &reason)
            .await;
        HttpError::auth(reason)
    }
}

/// Tower layer that attaches the session's bearer token and recovers from an
/// expired access token by refreshing once and replaying the request.
#[derive(Clone)]
pub struct SessionAuthLayer {
    shared: Arc<Shared>,
}

impl SessionAuthLayer {
    #[must_use]
    pub fn new(
        store: Arc<TokenStore>,
        coordinator: RefreshCoordinator,
        invalidator: Arc<SessionInvalidator>,
    ) -> Self {
        Self::with_metrics(store, coordinator, invalidator, Arc::new(NoOpMetrics))
    }

    #[must_use]
    pub fn with_metrics(
        store: Arc<TokenStore>,
        coordinator: RefreshCoordinator,
        invalidator: Arc<SessionInvalidator>,
        metrics: Arc<dyn SessionMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                coordinator,
                invalidator,
                metrics,
            }),
        }
    }
}

impl std::fmt::Debug for SessionAuthLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthLayer")
            .field("store", &self.shared.store)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for SessionAuthLayer {
    type Service = SessionAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionAuthService {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Service created by [`SessionAuthLayer`].
#[derive(Clone)]
pub struct SessionAuthService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> std::fmt::Debug for SessionAuthService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthService").finish_non_exhaustive()
    }
}

impl<S, B, ResBody> Service<Request<B>> for SessionAuthService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Clone + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Clone-swap pattern (Tower Service contract): the ready service goes
        // into the future.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let shared = Arc::clone(&self.shared);

        Box::pin(dispatch(shared, inner, req))
    }
}

async fn dispatch<S, B, ResBody>(
    shared: Arc<Shared>,
    mut inner: S,
    req: Request<B>,
) -> Result<Response<ResBody>, HttpError>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>,
    B: Clone,
{
    let (parts, body) = req.into_parts();
    let mut replayed = parts.extensions.get::<RetryMarker>().is_some();
    let mut credentials = shared.current();
    let mut first = true;

    loop {
        let attempt = rebuild(&parts, body.clone(), credentials.access_token.as_ref(), replayed)?;

        // The first attempt rides on the readiness the caller already polled.
        if !first {
            inner.ready().await?;
        }
        first = false;

        match AttemptOutcome::classify(inner.call(attempt).await?) {
            AttemptOutcome::Completed(response) => return Ok(response),
            AttemptOutcome::AuthExpired if replayed => {
                return Err(shared.reject_replay(credentials.generation).await);
            }
            AttemptOutcome::AuthExpired => {
                tracing::debug!(
                    method = %parts.method,
                    generation = credentials.generation,
                    "access token rejected, refreshing"
                );
                credentials = shared.fresh_credentials(credentials.generation).await?;
                replayed = true;
                shared.metrics.record_event(SessionEvent::RequestReplayed);
            }
        }
    }
}

fn rebuild<B>(
    parts: &Parts,
    body: B,
    access_token: Option<&SecretString>,
    replayed: bool,
) -> Result<Request<B>, HttpError> {
    let mut req = Request::new(body);
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    *req.extensions_mut() = parts.extensions.clone();

    if let Some(token) = access_token {
        let raw = zeroize::Zeroizing::new(format!("Bearer {}", token.expose()));
        let mut value = HeaderValue::from_str(&raw)?;
        value.set_sensitive(true);
        req.headers_mut().insert(AUTHORIZATION, value);
    }

    if replayed {
        req.extensions_mut().insert(RetryMarker);
    }

    Ok(req)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::backend::RefreshBackend;
    use crate::invalidator::{NoopCacheInvalidator, NoopNavigator};
    use crate::storage::MemoryStore;
    use crate::store::Session;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::Method;
    use http_body_util::Full;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Inner service answering with scripted statuses and recording what it saw.
    #[derive(Clone, Default)]
    struct Scripted {
        statuses: Arc<Mutex<VecDeque<StatusCode>>>,
        seen: Arc<Mutex<Vec<(Option<String>, bool)>>>,
    }

    impl Scripted {
        fn new(statuses: &[StatusCode]) -> Self {
            Self {
                statuses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
                seen: Arc::default(),
            }
        }

        fn seen(&self) -> Vec<(Option<String>, bool)> {
            self.seen.lock().clone()
        }
    }

    impl Service<Request<Full<Bytes>>> for Scripted {
        type Response = Response<Full<Bytes>>;
        type Error = HttpError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let auth = req
                .headers()
                .get(AUTHORIZATION)
                .map(|v| v.to_str().unwrap().to_owned());
            let marked = req.extensions().get::<RetryMarker>().is_some();
            self.seen.lock().push((auth, marked));
            let status = self.statuses.lock().pop_front().unwrap_or(StatusCode::OK);

            Box::pin(async move {
                Ok(Response::builder()
                    .status(status)
                    .body(Full::new(Bytes::new()))
                    .unwrap())
            })
        }
    }

    struct FixedBackend {
        calls: AtomicUsize,
        result: Result<Session, SessionError>,
    }

    #[async_trait]
    impl RefreshBackend for FixedBackend {
        async fn refresh(&self, _refresh_token: &SecretString) -> Result<Session, SessionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    async fn harness(
        result: Result<Session, SessionError>,
    ) -> (Arc<TokenStore>, Arc<FixedBackend>, SessionAuthLayer) {
        let store = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
        store
            .set_session(&Session::new("at-old", "rt-old"))
            .await
            .unwrap();
        let invalidator = Arc::new(SessionInvalidator::new(
            store.clone(),
            Arc::new(NoopCacheInvalidator),
            Arc::new(NoopNavigator),
        ));
        let backend = Arc::new(FixedBackend {
            calls: AtomicUsize::new(0),
            result,
        });
        let coordinator =
            RefreshCoordinator::new(backend.clone(), store.clone(), invalidator.clone());
        let layer = SessionAuthLayer::new(store.clone(), coordinator, invalidator);
        (store, backend, layer)
    }

    fn get() -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri("https://api.example.com/pets")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[test]
    fn layer_and_service_are_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone>() {}
        assert_traits::<SessionAuthLayer>();
        assert_traits::<SessionAuthService<Scripted>>();
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let (_store, backend, layer) = harness(Ok(Session::new("x", "y"))).await;
        let inner = Scripted::new(&[StatusCode::OK]);
        let svc = layer.layer(inner.clone());

        let response = svc.oneshot(get()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(inner.seen(), vec![(Some("Bearer at-old".to_owned()), false)]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unauthorized_refreshes_and_replays_once() {
        let (store, backend, layer) = harness(Ok(Session::new("at-new", "rt-new"))).await;
        let inner = Scripted::new(&[StatusCode::UNAUTHORIZED, StatusCode::OK]);
        let svc = layer.layer(inner.clone());

        let response = svc.oneshot(get()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            inner.seen(),
            vec![
                (Some("Bearer at-old".to_owned()), false),
                (Some("Bearer at-new".to_owned()), true),
            ]
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.access_token().unwrap().expose(), "at-new");
    }

    #[tokio::test]
    async fn second_unauthorized_ends_session() {
        let (store, backend, layer) = harness(Ok(Session::new("at-new", "rt-new"))).await;
        let inner = Scripted::new(&[StatusCode::UNAUTHORIZED, StatusCode::UNAUTHORIZED]);
        let svc = layer.layer(inner.clone());

        let err = svc.oneshot(get()).await.unwrap_err();

        assert_eq!(
            err.auth_cause::<SessionError>(),
            Some(&SessionError::ReplayRejected)
        );
        assert_eq!(inner.seen().len(), 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn refresh_failure_is_not_replayed() {
        let rejected = SessionError::RefreshRejected {
            status: StatusCode::UNAUTHORIZED,
        };
        let (store, _backend, layer) = harness(Err(rejected.clone())).await;
        let inner = Scripted::new(&[StatusCode::UNAUTHORIZED]);
        let svc = layer.layer(inner.clone());

        let err = svc.oneshot(get()).await.unwrap_err();

        assert_eq!(err.auth_cause::<SessionError>(), Some(&rejected));
        assert_eq!(inner.seen().len(), 1);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn marked_request_is_not_refreshed() {
        let (store, backend, layer) = harness(Ok(Session::new("x", "y"))).await;
        let inner = Scripted::new(&[StatusCode::UNAUTHORIZED]);
        let svc = layer.layer(inner);

        let mut req = get();
        req.extensions_mut().insert(RetryMarker);
        let err = svc.oneshot(req).await.unwrap_err();

        assert_eq!(
            err.auth_cause::<SessionError>(),
            Some(&SessionError::ReplayRejected)
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn non_401_statuses_pass_through() {
        let (_store, backend, layer) = harness(Ok(Session::new("x", "y"))).await;
        for status in [StatusCode::FORBIDDEN, StatusCode::INTERNAL_SERVER_ERROR] {
            let inner = Scripted::new(&[status]);
            let response = layer.layer(inner).oneshot(get()).await.unwrap();
            assert_eq!(response.status(), status);
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_token_sends_request_without_header() {
        let (store, _backend, layer) = harness(Ok(Session::new("x", "y"))).await;
        store.clear().await.unwrap();
        let inner = Scripted::new(&[StatusCode::OK]);

        layer.layer(inner.clone()).oneshot(get()).await.unwrap();

        assert_eq!(inner.seen(), vec![(None, false)]);
    }
}
