//! Volatile in-memory blob store

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::BlobStore;
use crate::storage::{StoreError, StoreResult};

/// Blob store for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    opened: AtomicBool,
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.opened.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn open(&self) -> StoreResult<()> {
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, id: &str, bytes: &[u8]) -> StoreResult<()> {
        self.ensure_open()?;
        self.blobs
            .lock()
            .await
            .insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, id: &str) -> StoreResult<Vec<u8>> {
        self.ensure_open()?;
        self.blobs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.blobs.lock().await.remove(id);
        Ok(())
    }

    async fn ids(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.blobs.lock().await.keys().cloned().collect())
    }

    async fn gc(&self, valid_ids: &HashSet<String>) -> StoreResult<usize> {
        self.ensure_open()?;
        let mut blobs = self.blobs.lock().await;
        let before = blobs.len();
        blobs.retain(|id, _| valid_ids.contains(id));
        Ok(before - blobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gc_keeps_only_valid_ids() {
        let store = MemoryBlobStore::new();
        store.open().await.unwrap();

        for id in ["a", "b", "c"] {
            store.write(id, id.as_bytes()).await.unwrap();
        }

        let valid: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(store.gc(&valid).await.unwrap(), 2);

        assert_eq!(store.read("a").await.unwrap(), b"a".to_vec());
        assert!(store.read("b").await.unwrap_err().is_not_found());
        assert!(store.read("c").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_requires_open() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.write("a", b"x").await.unwrap_err(),
            StoreError::NotInitialized
        ));
    }
}
