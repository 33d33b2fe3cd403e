use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::KeyValueStore;
use crate::error::StorageError;

/// Store persisted as a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash mid-write leaves either the old or the new contents.
/// On Unix the temporary file is created with mode `0600`, so the tokens are
/// never readable by other users, not even before the rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing contents.
    ///
    /// A missing file is an empty store; the file is created on the first write.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the file cannot be read and
    /// `StorageError::Corrupt` if it is not a JSON object of strings.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened session file store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `edit` to a copy of the map, persist it, then commit it in memory.
    async fn update<F>(&self, edit: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send,
    {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        edit(&mut next);
        if next == *entries {
            return Ok(());
        }
        write_atomic(&self.path, &serde_json::to_vec_pretty(&next)?).await?;
        *entries = next;
        Ok(())
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(dir).await?;
    }

    // unique per write so concurrent processes never share a temp file
    let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

    let result = async {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            tracing::debug!(path = %tmp_path.display(), error = %cleanup, "temp file not removed");
        }
        tracing::warn!(path = %path.display(), error = %e, "failed to persist session file");
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let key = key.to_owned();
        self.update(move |map| {
            map.insert(key, value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        self.update(move |map| {
            map.remove(&key);
        })
        .await
    }

    async fn set_many(&self, entries: Vec<(&'static str, String)>) -> Result<(), StorageError> {
        self.update(move |map| {
            for (key, value) in entries {
                map.insert(key.to_owned(), value);
            }
        })
        .await
    }

    async fn remove_many(&self, keys: &[&'static str]) -> Result<(), StorageError> {
        let keys = keys.to_vec();
        self.update(move |map| {
            for key in keys {
                map.remove(key);
            }
        })
        .await
    }
}
