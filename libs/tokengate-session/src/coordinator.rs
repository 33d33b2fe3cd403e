//! Single-flight session refresh.
//!
//! However many callers hit an expired token at once, one refresh call goes
//! out. The first caller moves the coordinator from `Idle` to `Refreshing`
//! and spawns the refresh; everyone arriving before it settles is queued
//! and receives the same result. The `Idle -> Refreshing` check-and-set
//! happens under one synchronous lock with no await inside.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokengate_utils::SecretString;
use tokio::sync::oneshot;

use crate::backend::RefreshBackend;
use crate::error::SessionError;
use crate::invalidator::SessionInvalidator;
use crate::metrics::{NoOpMetrics, SessionEvent, SessionMetrics};
use crate::store::TokenStore;

/// Access token produced by a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: SecretString,
    /// Store generation the token was published at.
    pub generation: u64,
}

type RefreshResult = Result<RefreshedToken, SessionError>;

struct PendingCaller {
    tx: oneshot::Sender<RefreshResult>,
}

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<PendingCaller> },
}

struct Inner {
    state: Mutex<RefreshState>,
    backend: Arc<dyn RefreshBackend>,
    store: Arc<TokenStore>,
    invalidator: Arc<SessionInvalidator>,
    metrics: Arc<dyn SessionMetrics>,
}

/// Handle to the refresh state machine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(
        backend: Arc<dyn RefreshBackend>,
        store: Arc<TokenStore>,
        invalidator: Arc<SessionInvalidator>,
    ) -> Self {
        Self::with_metrics(backend, store, invalidator, Arc::new(NoOpMetrics))
    }

    #[must_use]
    pub fn with_metrics(
        backend: Arc<dyn RefreshBackend>,
        store: Arc<TokenStore>,
        invalidator: Arc<SessionInvalidator>,
        metrics: Arc<dyn SessionMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                backend,
                store,
                invalidator,
                metrics,
            }),
        }
    }

    /// `true` while a refresh is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state.lock(), RefreshState::Refreshing { .. })
    }

    /// Start a refresh, or join the one in flight, and wait for its result.
    ///
    /// On failure the session has already been invalidated when this returns.
    /// Dropping the returned future leaves the refresh running for the
    /// other callers.
    ///
    /// # Errors
    ///
    /// The refresh failure shared by the whole batch, or
    /// `SessionError::RefreshAborted` if the refresh task died.
    pub async fn refresh(&self) -> RefreshResult {
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        waiters: vec![PendingCaller { tx }],
                    };
                    true
                }
                RefreshState::Refreshing { waiters } => {
                    waiters.push(PendingCaller { tx });
                    false
                }
            }
        };

        if leader {
            tracing::debug!("starting session refresh");
            self.inner.metrics.record_event(SessionEvent::RefreshStarted);
            tokio::spawn(run_refresh(Arc::clone(&self.inner)));
        } else {
            tracing::debug!("joining in-flight session refresh");
            self.inner.metrics.record_event(SessionEvent::RefreshJoined);
        }

        rx.await.unwrap_or(Err(SessionError::RefreshAborted))
    }
}

/// Settles the batch with `RefreshAborted` if the refresh task unwinds first.
struct SettleOnDrop {
    inner: Option<Arc<Inner>>,
}

impl SettleOnDrop {
    fn settle(mut self, outcome: &RefreshResult) {
        if let Some(inner) = self.inner.take() {
            inner.settle(outcome);
        }
    }
}

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            tracing::warn!("session refresh ended without a result");
            inner.settle(&Err(SessionError::RefreshAborted));
        }
    }
}

async fn run_refresh(inner: Arc<Inner>) {
    let guard = SettleOnDrop {
        inner: Some(Arc::clone(&inner)),
    };

    let started = Instant::now();
    let (generation, outcome) = inner.perform().await;
    inner.metrics.record_refresh_duration(started.elapsed());

    match &outcome {
        Ok(token) => {
            tracing::debug!(generation = token.generation, "session refreshed");
            inner.metrics.record_event(SessionEvent::RefreshSucceeded);
        }
        Err(e) => {
            tracing::warn!(error = %e, "session refresh failed");
            inner.metrics.record_event(SessionEvent::RefreshFailed);
            // Invalidate before releasing the batch so no caller sees the
            // failure while the dead session is still stored.
            inner.invalidator.invalidate_if_current(generation, e).await;
        }
    }

    guard.settle(&outcome);
}

impl Inner {
    /// Returns the store generation the refresh started from, and the result.
    async fn perform(&self) -> (u64, RefreshResult) {
        let snapshot = self.store.snapshot();
        let generation = snapshot.generation;

        let Some(refresh_token) = snapshot.refresh_token.clone() else {
            return (generation, Err(SessionError::RefreshTokenMissing));
        };
        drop(snapshot);

        let outcome = async {
            let session = self.backend.refresh(&refresh_token).await?;
            let generation = self.store.set_session(&session).await?;
            Ok(RefreshedToken {
                access_token: session.access_token().clone(),
                generation,
            })
        }
        .await;

        (generation, outcome)
    }

    /// Return to `Idle` and resolve every queued caller in arrival order.
    fn settle(&self, outcome: &RefreshResult) {
        let waiters = match std::mem::replace(&mut *self.state.lock(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };

        tracing::debug!(callers = waiters.len(), ok = outcome.is_ok(), "refresh settled");

        for waiter in waiters {
            if waiter.tx.send(outcome.clone()).is_err() {
                tracing::trace!("refresh caller went away before settlement");
            }
        }
    }
}
