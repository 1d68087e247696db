use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{strip_prefixed, Storage, StorageEntry};
use crate::errors::Result;

/// Process-local store, used by tests and by embedders that bring their own
/// persistence.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .map(|value| StorageEntry { key: key.to_string(), value: value.clone() }))
    }

    async fn put(&self, entry: StorageEntry) -> Result<()> {
        self.entries.write().await.insert(entry.key, entry.value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(strip_prefixed(entries.keys(), prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites_and_list_strips_prefix() {
        let storage = InMemoryStorage::new();
        storage.put(StorageEntry::json("role/web", &1u32).unwrap()).await.unwrap();
        storage.put(StorageEntry::json("role/web", &2u32).unwrap()).await.unwrap();
        storage.put(StorageEntry::json("role/api", &3u32).unwrap()).await.unwrap();
        storage.put(StorageEntry::json("credential/web", &4u32).unwrap()).await.unwrap();

        let entry = storage.get("role/web").await.unwrap().unwrap();
        assert_eq!(entry.decode::<u32>().unwrap(), 2);
        assert_eq!(storage.list("role/").await.unwrap(), vec!["api", "web"]);

        storage.delete("role/web").await.unwrap();
        assert!(storage.get("role/web").await.unwrap().is_none());
    }
}
