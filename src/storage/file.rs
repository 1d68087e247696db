use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::Mutex;
use tracing::debug;

use super::{strip_prefixed, Storage, StorageEntry};
use crate::errors::{Error, Result};

/// Single JSON document on disk mapping keys to base64 values.
///
/// Every mutation rewrites the whole file through a sibling temp file and a
/// rename, so a reader never observes a half-written store.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::storage(format!(
                "failed to read store {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&tmp, body).await.map_err(|e| {
            Error::storage(format!("failed to write store {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::storage(format!("failed to replace store {}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), keys = entries.len(), "Store rewritten");
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        let _guard = self.lock.lock().await;
        let entries = self.load().await?;
        entries
            .get(key)
            .map(|encoded| {
                STANDARD
                    .decode(encoded)
                    .map(|value| StorageEntry { key: key.to_string(), value })
                    .map_err(|e| Error::storage(format!("corrupt value for '{}': {}", key, e)))
            })
            .transpose()
    }

    async fn put(&self, entry: StorageEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(entry.key, STANDARD.encode(entry.value));
        self.save(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let entries = self.load().await?;
        Ok(strip_prefixed(entries.keys(), prefix))
    }
}
