//! # Backing Store
//!
//! Key/value persistence for role configurations and credentials. A store
//! offers plain overwrite semantics: there is no compare-and-swap, so the
//! last writer for a key wins.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::Result;

pub mod file;
pub mod memory;

pub use file::JsonFileStorage;
pub use memory::InMemoryStorage;

/// A single stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl StorageEntry {
    /// Encode `value` as JSON under `key`.
    pub fn json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self { key: key.into(), value: serde_json::to_vec(value)? })
    }

    /// Decode the stored JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.value)?)
    }
}

/// Storage backend used by the role registry.
///
/// # Errors
///
/// Implementations return [`crate::errors::Error::Storage`] for backend
/// failures. A missing key is `Ok(None)`, not an error.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>>;

    /// Write `entry`, replacing any existing value wholesale.
    async fn put(&self, entry: StorageEntry) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys directly under `prefix`, with the prefix stripped, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Shared helper for `list`: keys under `prefix` with the prefix removed.
pub(crate) fn strip_prefixed<'a>(
    keys: impl Iterator<Item = &'a String>,
    prefix: &str,
) -> Vec<String> {
    let mut names: Vec<String> = keys
        .filter_map(|key| key.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}
