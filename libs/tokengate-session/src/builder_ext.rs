use tower::ServiceExt;

use crate::layer::SessionAuthLayer;

/// Extension trait for adding session auth to [`tokengate_http::HttpClientBuilder`].
///
/// # Example
///
/// ```ignore
/// use tokengate_session::HttpClientBuilderExt;
///
/// let client = HttpClientBuilder::new()
///     .with_session_auth(SessionAuthLayer::new(store, coordinator, invalidator))
///     .build()?;
/// ```
pub trait HttpClientBuilderExt {
    /// Attach the session's bearer token and refresh it on `401`.
    #[must_use]
    fn with_session_auth(self, layer: SessionAuthLayer) -> Self;
}

impl HttpClientBuilderExt for tokengate_http::HttpClientBuilder {
    fn with_session_auth(self, layer: SessionAuthLayer) -> Self {
        self.with_auth_layer(move |svc| {
            tower::ServiceBuilder::new()
                .layer(layer)
                .service(svc)
                .boxed_clone()
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::backend::RefreshBackend;
    use crate::coordinator::RefreshCoordinator;
    use crate::error::SessionError;
    use crate::invalidator::{NoopCacheInvalidator, NoopNavigator, SessionInvalidator};
    use crate::storage::MemoryStore;
    use crate::store::{Session, TokenStore};
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use std::sync::Arc;
    use tokengate_http::{HttpClientBuilder, TransportSecurity};
    use tokengate_utils::SecretString;

    struct NoRefresh;

    #[async_trait]
    impl RefreshBackend for NoRefresh {
        async fn refresh(&self, _refresh_token: &SecretString) -> Result<Session, SessionError> {
            Err(SessionError::RefreshRejected {
                status: http::StatusCode::UNAUTHORIZED,
            })
        }
    }

    #[tokio::test]
    async fn installed_layer_attaches_bearer_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/pets")
                .header("authorization", "Bearer at-1");
            then.status(200).body("ok");
        });

        let store = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
        store
            .set_session(&Session::new("at-1", "rt-1"))
            .await
            .unwrap();
        let invalidator = Arc::new(SessionInvalidator::new(
            store.clone(),
            Arc::new(NoopCacheInvalidator),
            Arc::new(NoopNavigator),
        ));
        let coordinator =
            RefreshCoordinator::new(Arc::new(NoRefresh), store.clone(), invalidator.clone());

        let client = HttpClientBuilder::new()
            .transport(TransportSecurity::AllowInsecureHttp)
            .with_session_auth(SessionAuthLayer::new(store, coordinator, invalidator))
            .build()
            .unwrap();

        let resp = client.get(&server.url("/pets")).send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "ok");
        mock.assert();
    }
}
