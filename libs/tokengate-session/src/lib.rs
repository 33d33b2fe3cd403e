#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Session token lifecycle for tokengate.
//!
//! - [`TokenStore`]: the persisted access/refresh pair, read lock-free
//! - [`RefreshCoordinator`]: at most one refresh in flight, its result shared
//!   by every caller that hit an expired token meanwhile
//! - [`SessionAuthLayer`]: bearer injection, refresh on `401` and a single
//!   replay per request
//! - [`SessionInvalidator`]: clears tokens, cache and auth state exactly once
//!   per failed session
//! - [`AuthenticatedHttpClient`]: all of the above wired around a
//!   [`tokengate_http::HttpClient`]
//!
//! Session failures reach callers as
//! [`HttpError::Auth`](tokengate_http::HttpError::Auth); use
//! `err.auth_cause::<SessionError>()` to inspect the cause.

pub mod backend;
pub mod builder_ext;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
mod http_error;
pub mod invalidator;
pub mod layer;
pub mod metrics;
pub mod storage;
pub mod store;

pub use backend::{HttpRefreshBackend, RefreshBackend};
pub use builder_ext::HttpClientBuilderExt;
pub use client::{AuthenticatedHttpClient, AuthenticatedHttpClientBuilder};
pub use config::{DEFAULT_REFRESH_PATH, SessionClientConfig};
pub use coordinator::{RefreshCoordinator, RefreshedToken};
pub use error::{ConfigError, SessionError, StorageError};
pub use http_error::format_http_error;
pub use invalidator::{
    AuthState, CacheInvalidator, InvalidationOutcome, Navigator, NoopCacheInvalidator,
    NoopNavigator, SessionInvalidator,
};
pub use layer::{RetryMarker, SessionAuthLayer, SessionAuthService};
pub use metrics::{LoggingMetrics, NoOpMetrics, SessionEvent, SessionMetrics};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use store::{ClearOutcome, Session, TokenSnapshot, TokenStore};
