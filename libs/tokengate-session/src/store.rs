use std::sync::Arc;

use arc_swap::ArcSwap;
use tokengate_utils::SecretString;

use crate::error::{SessionError, StorageError};
use crate::storage::KeyValueStore;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// An access/refresh token pair issued by the backend.
///
/// Replaced wholesale on every refresh; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    access_token: SecretString,
    refresh_token: SecretString,
}

impl Session {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token),
            refresh_token: SecretString::new(refresh_token),
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }
}

/// Point-in-time view of the stored tokens.
///
/// `generation` increases on every `set_session` and every clear that
/// removed something, so two snapshots with the same generation hold the
/// same tokens.
#[derive(Debug, Default)]
pub struct TokenSnapshot {
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub generation: u64,
}

impl TokenSnapshot {
    /// `true` when neither token is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Result of [`TokenStore::clear`] and [`TokenStore::clear_if_current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Tokens were removed; the store is now at `generation`.
    Cleared { generation: u64 },
    /// The session was replaced after the caller observed it; nothing removed.
    Superseded,
    /// Nothing was stored.
    AlreadyEmpty,
}

/// Persisted access and refresh tokens.
///
/// Reads are lock-free: they load the current [`TokenSnapshot`], so a reader
/// sees either the old pair or the new one. Writers are serialized and write
/// through to the [`KeyValueStore`] before publishing.
pub struct TokenStore {
    kv: Arc<dyn KeyValueStore>,
    current: ArcSwap<TokenSnapshot>,
    write_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.current.load();
        f.debug_struct("TokenStore")
            .field("generation", &snapshot.generation)
            .field("has_access_token", &snapshot.access_token.is_some())
            .field("has_refresh_token", &snapshot.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Store with no tokens, writing through to `kv`.
    ///
    /// Whatever `kv` already holds is ignored; use [`load`](Self::load) to
    /// resume a persisted session.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            current: ArcSwap::from_pointee(TokenSnapshot::default()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Hydrate from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns the storage error if either token cannot be read.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let access_token = kv.get(ACCESS_TOKEN_KEY).await?.map(SecretString::new);
        let refresh_token = kv.get(REFRESH_TOKEN_KEY).await?.map(SecretString::new);

        tracing::debug!(
            has_access_token = access_token.is_some(),
            has_refresh_token = refresh_token.is_some(),
            "loaded persisted session"
        );

        Ok(Self {
            kv,
            current: ArcSwap::from_pointee(TokenSnapshot {
                access_token,
                refresh_token,
                generation: 0,
            }),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        self.current.load().access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.current.load().refresh_token.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<TokenSnapshot> {
        self.current.load_full()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Replace both tokens. Returns the new generation.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the pair cannot be persisted; the
    /// previous session stays published in that case.
    pub async fn set_session(&self, session: &Session) -> Result<u64, SessionError> {
        let _guard = self.write_lock.lock().await;

        self.kv
            .set_many(vec![
                (ACCESS_TOKEN_KEY, session.access_token.expose().to_owned()),
                (REFRESH_TOKEN_KEY, session.refresh_token.expose().to_owned()),
            ])
            .await?;

        let generation = self.current.load().generation + 1;
        self.current.store(Arc::new(TokenSnapshot {
            access_token: Some(session.access_token.clone()),
            refresh_token: Some(session.refresh_token.clone()),
            generation,
        }));

        tracing::debug!(generation, "session stored");
        Ok(generation)
    }

    /// Remove both tokens and the user snapshot.
    ///
    /// Returns [`ClearOutcome::Cleared`] if a session was stored and
    /// [`ClearOutcome::AlreadyEmpty`] otherwise, decided under the write lock.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the keys cannot be removed from storage.
    /// The in-memory session is dropped regardless.
    pub async fn clear(&self) -> Result<ClearOutcome, SessionError> {
        let (outcome, persisted) = self.clear_reporting().await;
        persisted?;
        Ok(outcome)
    }

    /// Like [`clear`](Self::clear), but hands back the outcome even when
    /// persisting the removal failed.
    pub(crate) async fn clear_reporting(&self) -> (ClearOutcome, Result<(), SessionError>) {
        let _guard = self.write_lock.lock().await;
        let outcome = if self.current.load().is_empty() {
            ClearOutcome::AlreadyEmpty
        } else {
            ClearOutcome::Cleared {
                generation: self.unpublish(),
            }
        };
        let persisted = self
            .kv
            .remove_many(&SESSION_KEYS)
            .await
            .map_err(SessionError::from);
        (outcome, persisted)
    }

    /// Clear only if the store is still at `expected_generation`.
    ///
    /// A failure to persist the removal is logged; the in-memory session is
    /// gone either way.
    pub async fn clear_if_current(&self, expected_generation: u64) -> ClearOutcome {
        let _guard = self.write_lock.lock().await;

        let current = self.current.load();
        if current.generation != expected_generation {
            return ClearOutcome::Superseded;
        }
        if current.is_empty() {
            return ClearOutcome::AlreadyEmpty;
        }
        drop(current);

        let generation = self.unpublish();
        if let Err(e) = self.kv.remove_many(&SESSION_KEYS).await {
            tracing::warn!(error = %e, "failed to remove persisted session");
        }
        ClearOutcome::Cleared { generation }
    }

    /// Publish an empty snapshot at the next generation. Callers hold the write lock.
    fn unpublish(&self) -> u64 {
        let generation = self.current.load().generation + 1;
        self.current.store(Arc::new(TokenSnapshot {
            generation,
            ..TokenSnapshot::default()
        }));
        tracing::debug!(generation, "session cleared");
        generation
    }

    /// The opaque user snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the value cannot be read or is not JSON.
    pub async fn user(&self) -> Result<Option<serde_json::Value>, SessionError> {
        let Some(raw) = self.kv.get(USER_KEY).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SessionError::from(StorageError::Corrupt(e)))
    }

    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the value cannot be persisted.
    pub async fn set_user(&self, user: &serde_json::Value) -> Result<(), SessionError> {
        let raw = serde_json::to_string(user).map_err(StorageError::Corrupt)?;
        self.kv.set(USER_KEY, raw).await?;
        Ok(())
    }
}
