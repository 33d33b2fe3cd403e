use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::SessionError;
use crate::metrics::{NoOpMetrics, SessionEvent, SessionMetrics};
use crate::store::{ClearOutcome, TokenStore};

/// Whether the application currently holds a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    SignedIn,
    SignedOut,
}

/// Client-side data cache that must be dropped with the session.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn clear_all(&self);
}

/// Application navigation, used only to send the user back to sign-in.
pub trait Navigator: Send + Sync {
    fn navigate_to_sign_in(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheInvalidator;

#[async_trait]
impl CacheInvalidator for NoopCacheInvalidator {
    async fn clear_all(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn navigate_to_sign_in(&self) {}
}

/// What an invalidation request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// Tokens were cleared and the sign-out side effects ran.
    Invalidated,
    /// A newer session replaced the one the caller saw fail; it was kept.
    Superseded,
    /// Nothing was stored. After a failed refresh or replay the sign-out
    /// signals still ran; after [`SessionInvalidator::sign_out`] nothing ran.
    AlreadyCleared,
}

/// Tears a session down: clears the token store, the client cache and the
/// auth state, then asks the application to show sign-in.
///
/// Side effects run once per session no matter how many failing callers
/// ask for it.
pub struct SessionInvalidator {
    store: Arc<TokenStore>,
    cache: Arc<dyn CacheInvalidator>,
    navigator: Arc<dyn Navigator>,
    auth_state: watch::Sender<AuthState>,
    metrics: Arc<dyn SessionMetrics>,
}

impl SessionInvalidator {
    #[must_use]
    pub fn new(
        store: Arc<TokenStore>,
        cache: Arc<dyn CacheInvalidator>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let initial = if store.snapshot().is_empty() {
            AuthState::SignedOut
        } else {
            AuthState::SignedIn
        };
        let (auth_state, _) = watch::channel(initial);
        Self {
            store,
            cache,
            navigator,
            auth_state,
            metrics: Arc::new(NoOpMetrics),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn SessionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        *self.auth_state.borrow()
    }

    pub(crate) fn mark_signed_in(&self) {
        self.auth_state.send_replace(AuthState::SignedIn);
    }

    /// Invalidate the session the caller observed at `generation`.
    ///
    /// Skipped entirely when the store has moved on to a newer session. When
    /// the store is already empty there is nothing to clear, but the cache,
    /// auth state and sign-in navigation still fire, so a failed request
    /// always ends at sign-in.
    pub async fn invalidate_if_current(
        &self,
        generation: u64,
        reason: &SessionError,
    ) -> InvalidationOutcome {
        match self.store.clear_if_current(generation).await {
            ClearOutcome::Cleared { generation } => {
                tracing::info!(reason = %reason, generation, "session invalidated");
                self.after_clear().await;
                InvalidationOutcome::Invalidated
            }
            ClearOutcome::Superseded => {
                tracing::debug!(reason = %reason, generation, "invalidation skipped: session replaced");
                self.metrics.record_event(SessionEvent::InvalidationSkipped);
                InvalidationOutcome::Superseded
            }
            ClearOutcome::AlreadyEmpty => {
                tracing::info!(reason = %reason, "no session stored; sending to sign-in");
                self.signal_signed_out().await;
                InvalidationOutcome::AlreadyCleared
            }
        }
    }

    /// Unconditional sign-out.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the persisted tokens could not be
    /// removed. The in-memory session and the side effects are handled
    /// regardless.
    pub async fn sign_out(&self) -> Result<InvalidationOutcome, SessionError> {
        let (outcome, persisted) = self.store.clear_reporting().await;

        let outcome = match outcome {
            ClearOutcome::Cleared { generation } => {
                tracing::info!(generation, "signed out");
                self.after_clear().await;
                InvalidationOutcome::Invalidated
            }
            ClearOutcome::AlreadyEmpty | ClearOutcome::Superseded => {
                InvalidationOutcome::AlreadyCleared
            }
        };
        persisted?;
        Ok(outcome)
    }

    async fn after_clear(&self) {
        self.metrics.record_event(SessionEvent::SessionInvalidated);
        self.signal_signed_out().await;
    }

    async fn signal_signed_out(&self) {
        self.cache.clear_all().await;
        self.auth_state.send_replace(AuthState::SignedOut);
        self.navigator.navigate_to_sign_in();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::store::Session;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        cache_clears: AtomicUsize,
        navigations: AtomicUsize,
    }

    #[async_trait]
    impl CacheInvalidator for Counting {
        async fn clear_all(&self) {
            self.cache_clears.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Navigator for Counting {
        fn navigate_to_sign_in(&self) {
            self.navigations.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn signed_in() -> (Arc<TokenStore>, Arc<Counting>, SessionInvalidator) {
        let store = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
        store.set_session(&Session::new("at", "rt")).await.unwrap();
        let counting = Arc::new(Counting::default());
        let invalidator = SessionInvalidator::new(store.clone(), counting.clone(), counting.clone());
        (store, counting, invalidator)
    }

    #[tokio::test]
    async fn invalidation_runs_side_effects_once() {
        let (store, counting, invalidator) = signed_in().await;
        let mut state = invalidator.subscribe();
        assert_eq!(*state.borrow_and_update(), AuthState::SignedIn);

        let generation = store.generation();
        let reason = SessionError::RefreshRejected {
            status: http::StatusCode::UNAUTHORIZED,
        };
        assert_eq!(
            invalidator.invalidate_if_current(generation, &reason).await,
            InvalidationOutcome::Invalidated
        );
        assert_eq!(
            invalidator.invalidate_if_current(generation, &reason).await,
            InvalidationOutcome::Superseded
        );

        assert!(store.snapshot().is_empty());
        assert_eq!(counting.cache_clears.load(Ordering::SeqCst), 1);
        assert_eq!(counting.navigations.load(Ordering::SeqCst), 1);
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn concurrent_invalidations_clear_once() {
        let (store, counting, invalidator) = signed_in().await;
        let invalidator = Arc::new(invalidator);
        let generation = store.generation();

        let a = {
            let inv = invalidator.clone();
            tokio::spawn(async move {
                inv.invalidate_if_current(generation, &SessionError::ReplayRejected)
                    .await
            })
        };
        let b = {
            let inv = invalidator.clone();
            tokio::spawn(async move {
                inv.invalidate_if_current(generation, &SessionError::RefreshTokenMissing)
                    .await
            })
        };

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == InvalidationOutcome::Invalidated)
                .count(),
            1
        );
        assert_eq!(counting.cache_clears.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn newer_session_is_not_cleared() {
        let (store, counting, invalidator) = signed_in().await;
        let stale = store.generation();
        store.set_session(&Session::new("at-2", "rt-2")).await.unwrap();

        assert_eq!(
            invalidator
                .invalidate_if_current(stale, &SessionError::ReplayRejected)
                .await,
            InvalidationOutcome::Superseded
        );
        assert_eq!(store.access_token().unwrap().expose(), "at-2");
        assert_eq!(counting.navigations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sign_out_is_idempotent() {
        let (store, counting, invalidator) = signed_in().await;

        assert_eq!(
            invalidator.sign_out().await.unwrap(),
            InvalidationOutcome::Invalidated
        );
        assert_eq!(
            invalidator.sign_out().await.unwrap(),
            InvalidationOutcome::AlreadyCleared
        );
        assert!(store.snapshot().is_empty());
        assert_eq!(counting.cache_clears.load(Ordering::SeqCst), 1);
        assert_eq!(invalidator.auth_state(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn failure_without_session_still_sends_to_sign_in() {
        let store = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
        let counting = Arc::new(Counting::default());
        let invalidator = SessionInvalidator::new(store.clone(), counting.clone(), counting.clone());

        assert_eq!(
            invalidator
                .invalidate_if_current(store.generation(), &SessionError::RefreshTokenMissing)
                .await,
            InvalidationOutcome::AlreadyCleared
        );
        assert_eq!(store.generation(), 0);
        assert_eq!(counting.cache_clears.load(Ordering::SeqCst), 1);
        assert_eq!(counting.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(invalidator.auth_state(), AuthState::SignedOut);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sign_out_racing_sign_in_reports_what_it_removed() {
        for _ in 0..50 {
            let store = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
            let counting = Arc::new(Counting::default());
            let invalidator = Arc::new(SessionInvalidator::new(
                store.clone(),
                counting.clone(),
                counting.clone(),
            ));

            let sign_out = {
                let inv = invalidator.clone();
                tokio::spawn(async move { inv.sign_out().await })
            };
            let sign_in = {
                let store = store.clone();
                tokio::spawn(async move { store.set_session(&Session::new("at", "rt")).await })
            };
            let outcome = sign_out.await.unwrap().unwrap();
            sign_in.await.unwrap().unwrap();

            // Invalidated only when the sign-in landed first and was removed
            let removed = store.snapshot().is_empty();
            assert_eq!(outcome == InvalidationOutcome::Invalidated, removed);
            assert_eq!(
                counting.navigations.load(Ordering::SeqCst),
                usize::from(removed)
            );
        }
    }
}
