//! Durable blob store writing through a persistence provider

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{blob_path, is_valid_id, BlobStore, BLOB_DIR, BLOB_EXT};
use crate::storage::{PersistenceProvider, StoreError, StoreResult};

/// Blob store keeping each blob as `blobs/<id>.bin` in a provider
pub struct ProviderBlobStore {
    provider: Arc<dyn PersistenceProvider>,
    opened: AtomicBool,
    /// Serializes write/delete/gc
    write_lock: Mutex<()>,
}

impl ProviderBlobStore {
    pub fn new(provider: Arc<dyn PersistenceProvider>) -> Self {
        Self {
            provider,
            opened: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.opened.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    fn checked_path(id: &str) -> StoreResult<String> {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidOperation(format!(
                "invalid blob id '{}'",
                id
            )));
        }
        Ok(blob_path(id))
    }
}

#[async_trait]
impl BlobStore for ProviderBlobStore {
    async fn open(&self) -> StoreResult<()> {
        if !self.opened.swap(true, Ordering::SeqCst) {
            debug!("Blob store opened");
        }
        Ok(())
    }

    async fn write(&self, id: &str, bytes: &[u8]) -> StoreResult<()> {
        self.ensure_open()?;
        let path = Self::checked_path(id)?;
        let _lock = self.write_lock.lock().await;
        self.provider.write_file(&path, bytes).await
    }

    async fn read(&self, id: &str) -> StoreResult<Vec<u8>> {
        self.ensure_open()?;
        let path = Self::checked_path(id)?;
        self.provider
            .read_file(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let path = Self::checked_path(id)?;
        let _lock = self.write_lock.lock().await;
        self.provider.remove_file(&path).await
    }

    async fn ids(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let names = self.provider.list_files(BLOB_DIR).await?;
        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_suffix(BLOB_EXT).map(str::to_string))
            .collect())
    }

    async fn gc(&self, valid_ids: &HashSet<String>) -> StoreResult<usize> {
        self.ensure_open()?;
        let _lock = self.write_lock.lock().await;

        let names = self.provider.list_files(BLOB_DIR).await?;
        let mut removed = 0;
        for id in names
            .iter()
            .filter_map(|name| name.strip_suffix(BLOB_EXT))
            .filter(|id| !valid_ids.contains(*id))
        {
            match self.provider.remove_file(&blob_path(id)).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(blob = %id, error = %e, "Failed to collect blob"),
            }
        }

        debug!(removed, kept = valid_ids.len(), "Blob garbage collection finished");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DirectoryProvider, MemoryProvider};
    use tempfile::TempDir;

    async fn open_store() -> ProviderBlobStore {
        let store = ProviderBlobStore::new(Arc::new(MemoryProvider::new()));
        store.open().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_requires_open() {
        let store = ProviderBlobStore::new(Arc::new(MemoryProvider::new()));
        assert!(matches!(
            store.read("a").await.unwrap_err(),
            StoreError::NotInitialized
        ));

        store.open().await.unwrap();
        store.open().await.unwrap();
        store.write("a", b"1").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let store = open_store().await;

        store.write("a", b"alpha").await.unwrap();
        assert_eq!(store.read("a").await.unwrap(), b"alpha".to_vec());

        store.write("a", b"beta").await.unwrap();
        assert_eq!(store.read("a").await.unwrap(), b"beta".to_vec());

        store.delete("a").await.unwrap();
        assert!(store.read("a").await.unwrap_err().is_not_found());

        // Deleting again is fine
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let store = open_store().await;
        let err = store.write("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_gc_keeps_only_valid_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProviderBlobStore::new(Arc::new(DirectoryProvider::new(temp_dir.path())));
        store.open().await.unwrap();

        for id in ["a", "b", "c"] {
            store.write(id, id.as_bytes()).await.unwrap();
        }

        let valid: HashSet<String> = ["a".to_string()].into_iter().collect();
        let removed = store.gc(&valid).await.unwrap();
        assert_eq!(removed, 2);

        assert_eq!(store.read("a").await.unwrap(), b"a".to_vec());
        assert!(store.read("b").await.unwrap_err().is_not_found());
        assert!(store.read("c").await.unwrap_err().is_not_found());
        assert_eq!(store.ids().await.unwrap(), vec!["a".to_string()]);
        assert!(temp_dir.path().join("blobs").join("a.bin").exists());
    }
}
