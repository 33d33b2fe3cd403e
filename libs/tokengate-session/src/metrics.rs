//! Event hooks for session lifecycle metrics.
//!
//! Plug a backend in by implementing [`SessionMetrics`]; [`NoOpMetrics`] is
//! the default and [`LoggingMetrics`] emits every event at `debug`.

use std::time::Duration;

/// Session lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A caller started a refresh (network call issued)
    RefreshStarted,

    /// A caller joined a refresh already in flight
    RefreshJoined,

    /// A refresh stored a new session
    RefreshSucceeded,

    /// A refresh failed and its batch was rejected
    RefreshFailed,

    /// A request was re-dispatched with a new token
    RequestReplayed,

    /// A replayed request got 401 again
    ReplayRejected,

    /// Stored tokens were cleared by an invalidation
    SessionInvalidated,

    /// An invalidation found the session already cleared or replaced
    InvalidationSkipped,

    /// A session was established by sign-in
    SignedIn,
}

impl SessionEvent {
    #[must_use]
    pub fn metric_name(&self) -> &'static str {
        match self {
            SessionEvent::RefreshStarted => "session.refresh.started",
            SessionEvent::RefreshJoined => "session.refresh.joined",
            SessionEvent::RefreshSucceeded => "session.refresh.ok",
            SessionEvent::RefreshFailed => "session.refresh.fail",
            SessionEvent::RequestReplayed => "session.request.replayed",
            SessionEvent::ReplayRejected => "session.request.replay_rejected",
            SessionEvent::SessionInvalidated => "session.invalidated",
            SessionEvent::InvalidationSkipped => "session.invalidation.skipped",
            SessionEvent::SignedIn => "session.signed_in",
        }
    }
}

/// Trait for metrics backends
pub trait SessionMetrics: Send + Sync {
    fn record_event(&self, event: SessionEvent);

    /// Wall time of one refresh call, successful or not.
    fn record_refresh_duration(&self, duration: Duration);
}

/// No-op metrics implementation (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl SessionMetrics for NoOpMetrics {
    fn record_event(&self, _event: SessionEvent) {}

    fn record_refresh_duration(&self, _duration: Duration) {}
}

/// Logging-based metrics implementation (for debugging)
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMetrics;

impl SessionMetrics for LoggingMetrics {
    fn record_event(&self, event: SessionEvent) {
        tracing::debug!(metric = event.metric_name(), "Session event recorded");
    }

    fn record_refresh_duration(&self, duration: Duration) {
        tracing::debug!(
            metric = "session.refresh.duration_ms",
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Refresh duration recorded"
        );
    }
}
