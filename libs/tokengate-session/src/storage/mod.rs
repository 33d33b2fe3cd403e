//! Persisted string key-value capability backing the token store.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StorageError;

/// Async string key-value storage.
///
/// Implementations must be safe to share between tasks. The batch methods
/// exist so a backend that can apply several writes as one unit (a file
/// rewritten in one go) gets the chance to; the defaults apply them one by one.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Write several keys.
    async fn set_many(&self, entries: Vec<(&'static str, String)>) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }

    /// Remove several keys.
    async fn remove_many(&self, keys: &[&'static str]) -> Result<(), StorageError> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}
