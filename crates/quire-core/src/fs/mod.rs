//! Node-graph filesystem
//!
//! `NodeFs` models folders, files and named parent -> child bindings on top
//! of the [`Database`] adapter, and keeps large payloads in a [`BlobStore`].
//!
//! ## Usage
//!
//! ```ignore
//! let fs = NodeFs::in_memory();
//! fs.open().await?;
//!
//! let file = fs.create_file("text").await?;
//! file.write("hello").await?;
//! fs.root().link("a.txt", file.id()).await?;
//! ```
//!
//! Every mutating operation commits one transaction and then persists a
//! snapshot (unless persistence is suspended on the database).
//!
//! Destroying a node removes only its own rows. Bindings that still point at
//! it are skipped when children are resolved, and orphaned blobs are removed
//! by [`NodeFs::collect_garbage`].

mod content;
mod dump;
mod handle;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rusqlite::params;
use tracing::{debug, info};
use uuid::Uuid;

use crate::blob::{id_from_path, BlobStore, MemoryBlobStore, ProviderBlobStore};
use crate::config::Config;
use crate::externalize::{externalize, internalize};
use crate::storage::{
    Database, DirectoryProvider, MemoryProvider, NodeKind, NodeRow, PersistenceProvider,
    StoreError, StoreResult, Tx,
};
use crate::value::Value;

pub use content::{EncodedMedia, FileData, MediaConverter, BINARY_MEDIA_TYPE, TEXT_MEDIA_TYPE};
pub use dump::{DumpRecord, DumpSummary, DUMP_FORMAT, DUMP_FORMAT_VERSION};
pub use handle::{DirEntry, FileHandle, FolderHandle, NodeHandle};

/// Well-known id of the root folder
pub const ROOT_ID: &str = "root";

/// Attribute key holding a file's media kind
pub const MEDIA_KIND_KEY: &str = "mediaKind";

/// Tunables for a filesystem instance
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// Namespace for the database keys in the persistence provider
    pub key_prefix: String,
    /// Largest text (in bytes) stored inline in the database
    pub inline_threshold: usize,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            key_prefix: "quire".to_string(),
            inline_threshold: 64 * 1024,
        }
    }
}

impl From<&Config> for FsOptions {
    fn from(config: &Config) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            inline_threshold: config.inline_threshold,
        }
    }
}

/// Counts describing the live graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStats {
    pub version: u64,
    pub schema_version: i32,
    pub folders: i64,
    pub files: i64,
    pub bindings: i64,
    pub blobs: usize,
}

/// Node-graph filesystem over a database and a blob store
///
/// Cheap to clone; clones share the same database and blob store.
#[derive(Clone)]
pub struct NodeFs {
    inner: Arc<FsInner>,
}

impl fmt::Debug for NodeFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFs")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

struct FsInner {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    options: FsOptions,
}

impl NodeFs {
    /// Create a filesystem persisting through `provider` and `blobs`
    ///
    /// Nothing is read until [`NodeFs::open`] (or [`NodeFs::undump`]).
    pub fn new(
        provider: Arc<dyn PersistenceProvider>,
        blobs: Arc<dyn BlobStore>,
        options: FsOptions,
    ) -> Self {
        let db = Database::new(provider, options.key_prefix.clone());
        Self {
            inner: Arc::new(FsInner { db, blobs, options }),
        }
    }

    /// Create a directory-backed filesystem from configuration
    pub fn with_config(config: &Config) -> Self {
        let provider: Arc<dyn PersistenceProvider> =
            Arc::new(DirectoryProvider::new(config.data_dir.clone()));
        let blobs = Arc::new(ProviderBlobStore::new(provider.clone()));
        Self::new(provider, blobs, FsOptions::from(config))
    }

    /// Create a volatile filesystem (for testing and ephemeral sessions)
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryProvider::new()),
            Arc::new(MemoryBlobStore::new()),
            FsOptions::default(),
        )
    }

    /// Get the underlying database adapter
    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Get the blob store
    pub fn blob_store(&self) -> &dyn BlobStore {
        self.inner.blobs.as_ref()
    }

    pub fn options(&self) -> &FsOptions {
        &self.inner.options
    }

    /// Open the database and blob store and make sure the root folder exists
    pub async fn open(&self) -> StoreResult<()> {
        self.inner.blobs.open().await?;
        self.inner.db.open().await?;

        let created = self
            .inner
            .db
            .transaction(|tx| -> StoreResult<bool> {
                let existing: Option<String> =
                    tx.select_one("SELECT id FROM nodes WHERE id = ?1", params![ROOT_ID])?;
                if existing.is_some() {
                    return Ok(false);
                }
                tx.run(
                    "INSERT INTO nodes (id, type, attributes) VALUES (?1, ?2, '{}')",
                    params![ROOT_ID, NodeKind::Folder.as_str()],
                )?;
                Ok(true)
            })
            .await?;

        if created {
            info!("Created root folder");
            self.inner.db.persist().await?;
        }
        Ok(())
    }

    /// Handle to the root folder
    pub fn root(&self) -> FolderHandle {
        FolderHandle::new(self.clone(), ROOT_ID.to_string())
    }

    // ==================== Node Operations ====================

    /// Create an empty file node of the given media kind
    pub async fn create_file(&self, media_kind: &str) -> StoreResult<FileHandle> {
        let mut attributes = Value::object();
        attributes.insert(MEDIA_KIND_KEY, media_kind);
        let id = self.insert_node(NodeKind::File, &attributes).await?;
        Ok(FileHandle::new(self.clone(), id))
    }

    /// Create an empty folder node
    pub async fn create_folder(&self) -> StoreResult<FolderHandle> {
        let id = self.insert_node(NodeKind::Folder, &Value::object()).await?;
        Ok(FolderHandle::new(self.clone(), id))
    }

    /// Look up a node, `None` if it doesn't exist
    pub async fn get_node(&self, id: &str) -> StoreResult<Option<NodeHandle>> {
        match self.node_row(id).await? {
            Some(row) => NodeHandle::from_row(self, row).map(Some),
            None => Ok(None),
        }
    }

    /// Remove a node and its content row
    ///
    /// Bindings that reference the node and blobs it owned are left for
    /// read-time filtering and garbage collection. Returns whether the node
    /// existed.
    pub async fn destroy_node(&self, id: &str) -> StoreResult<bool> {
        if id == ROOT_ID {
            return Err(StoreError::InvalidOperation(
                "the root folder cannot be destroyed".to_string(),
            ));
        }

        let removed = self
            .inner
            .db
            .transaction(|tx| -> StoreResult<usize> {
                tx.run("DELETE FROM files WHERE id = ?1", params![id])?;
                tx.run("DELETE FROM nodes WHERE id = ?1", params![id])
            })
            .await?;

        if removed == 0 {
            return Ok(false);
        }
        self.inner.db.persist().await?;
        debug!(id, "Destroyed node");
        Ok(true)
    }

    /// Resolve a `/`-separated path of binding names from the root
    ///
    /// Returns `None` if any segment is missing, dangling, or not a folder.
    pub async fn resolve_path(&self, path: &str) -> StoreResult<Option<NodeHandle>> {
        let mut current = NodeHandle::Folder(self.root());
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let NodeHandle::Folder(folder) = current else {
                return Ok(None);
            };
            let Some(entry) = folder.get_entry_by_name(segment).await? else {
                return Ok(None);
            };
            let Some(next) = self.get_node(&entry.child_id).await? else {
                return Ok(None);
            };
            current = next;
        }
        Ok(Some(current))
    }

    // ==================== Maintenance ====================

    /// Delete every blob not referenced by a file or a node attribute
    ///
    /// Returns the number of blobs removed.
    pub async fn collect_garbage(&self) -> StoreResult<usize> {
        let valid = self.live_blob_ids().await?;
        let removed = self.inner.blobs.gc(&valid).await?;
        info!(removed, live = valid.len(), "Garbage collection finished");
        Ok(removed)
    }

    /// Counts of nodes, bindings and blobs
    pub async fn stats(&self) -> StoreResult<FsStats> {
        let db = &self.inner.db;
        let count = |kind: NodeKind| async move {
            db.select_one::<i64, _>("SELECT COUNT(*) FROM nodes WHERE type = ?1", [kind.as_str()])
                .await
                .map(|c| c.unwrap_or(0))
        };

        Ok(FsStats {
            version: db.version().await?,
            schema_version: db.schema_version().await?,
            folders: count(NodeKind::Folder).await?,
            files: count(NodeKind::File).await?,
            bindings: db
                .select_one::<i64, _>("SELECT COUNT(*) FROM child_bindings", [])
                .await?
                .unwrap_or(0),
            blobs: self.inner.blobs.ids().await?.len(),
        })
    }

    // ==================== Crate-internal helpers ====================

    pub(crate) fn db(&self) -> &Database {
        &self.inner.db
    }

    pub(crate) fn blobs(&self) -> &dyn BlobStore {
        self.inner.blobs.as_ref()
    }

    pub(crate) async fn node_row(&self, id: &str) -> StoreResult<Option<NodeRow>> {
        self.inner
            .db
            .select_one(
                "SELECT id, type, attributes FROM nodes WHERE id = ?1",
                [id],
            )
            .await
    }

    /// Attributes of a node with externalized payloads loaded back in
    pub(crate) async fn node_attributes(&self, id: &str) -> StoreResult<Option<Value>> {
        let Some(row) = self.node_row(id).await? else {
            return Ok(None);
        };
        let stored = Value::parse(&row.attributes)?;
        Ok(Some(internalize(&stored, self.blobs()).await?))
    }

    /// Replace a node's attributes, externalizing binary payloads
    ///
    /// File nodes keep their media kind unless the new attributes set one.
    pub(crate) async fn set_node_attributes(&self, id: &str, attributes: Value) -> StoreResult<()> {
        let row = self
            .node_row(id)
            .await?
            .ok_or_else(|| missing_node(id))?;

        let mut attributes = attributes;
        if row.kind() == Some(NodeKind::File) && attributes.get(MEDIA_KIND_KEY).is_none() {
            if let Some(kind) = Value::parse(&row.attributes)?.get(MEDIA_KIND_KEY).cloned() {
                attributes.insert(MEDIA_KIND_KEY, kind);
            }
        }

        let stored = externalize(&attributes, self.blobs(), id).await?;
        let text = stored.to_json_string()?;
        let updated = self
            .inner
            .db
            .run(
                "UPDATE nodes SET attributes = ?1 WHERE id = ?2",
                [text.as_str(), id],
            )
            .await?;
        if updated == 0 {
            return Err(missing_node(id));
        }

        self.inner.db.persist().await
    }

    async fn insert_node(&self, kind: NodeKind, attributes: &Value) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let text = attributes.to_json_string()?;
        self.inner
            .db
            .run(
                "INSERT INTO nodes (id, type, attributes) VALUES (?1, ?2, ?3)",
                [id.as_str(), kind.as_str(), text.as_str()],
            )
            .await?;
        self.inner.db.persist().await?;

        debug!(id = %id, kind = %kind, "Created node");
        Ok(id)
    }

    /// Blob ids referenced by file contents and node attributes
    async fn live_blob_ids(&self) -> StoreResult<HashSet<String>> {
        let mut valid = HashSet::new();

        let content_paths: Vec<String> = self
            .inner
            .db
            .select("SELECT blob_path FROM files WHERE blob_path IS NOT NULL", [])
            .await?;
        let attributes: Vec<String> = self
            .inner
            .db
            .select("SELECT attributes FROM nodes", [])
            .await?;

        let attribute_paths = attributes
            .iter()
            .map(|text| Value::parse(text).map(|v| v.blob_refs()))
            .collect::<StoreResult<Vec<_>>>()?;

        for path in content_paths
            .iter()
            .chain(attribute_paths.iter().flatten())
        {
            if let Some(id) = id_from_path(path) {
                valid.insert(id.to_string());
            }
        }
        Ok(valid)
    }
}

/// Error for operations on a node that doesn't exist (or was destroyed)
pub(crate) fn missing_node(id: &str) -> StoreError {
    StoreError::InvalidOperation(format!("node '{}' does not exist", id))
}

/// Check inside a transaction that `id` exists and has the expected kind
pub(crate) fn ensure_kind(tx: &Tx<'_>, id: &str, kind: NodeKind) -> StoreResult<()> {
    let node_type: Option<String> =
        tx.select_one("SELECT type FROM nodes WHERE id = ?1", params![id])?;
    match node_type {
        None => Err(missing_node(id)),
        Some(t) if t == kind.as_str() => Ok(()),
        Some(t) => Err(StoreError::InvalidOperation(format!(
            "node '{}' is a {}, expected a {}",
            id, t, kind
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_fs() -> NodeFs {
        let fs = NodeFs::in_memory();
        fs.open().await.unwrap();
        fs
    }

    #[tokio::test]
    async fn test_open_creates_root() {
        let fs = open_fs().await;

        let root = fs.get_node(ROOT_ID).await.unwrap().unwrap();
        assert!(root.as_folder().is_some());
        assert_eq!(root.id(), ROOT_ID);

        // Opening again does not duplicate anything
        fs.open().await.unwrap();
        assert_eq!(fs.stats().await.unwrap().folders, 1);
    }

    #[tokio::test]
    async fn test_lifecycle_scenario() {
        let fs = open_fs().await;

        let file = fs.create_file("text").await.unwrap();
        file.write("hello").await.unwrap();
        assert_eq!(
            file.read().await.unwrap(),
            Some(FileData::Text("hello".to_string()))
        );

        let folder = fs.create_folder().await.unwrap();
        assert_ne!(folder.id(), file.id());
        folder.link("a.txt", file.id()).await.unwrap();

        let entries = folder.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].child_id, file.id());

        assert!(fs.destroy_node(file.id()).await.unwrap());
        assert!(fs.get_node(file.id()).await.unwrap().is_none());
        assert!(!fs.destroy_node(file.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_node_reconstructs_kind() {
        let fs = open_fs().await;
        let file = fs.create_file("image").await.unwrap();
        let folder = fs.create_folder().await.unwrap();

        let node = fs.get_node(file.id()).await.unwrap().unwrap();
        assert_eq!(node.kind(), NodeKind::File);
        assert_eq!(
            node.as_file().unwrap().media_kind().await.unwrap().as_deref(),
            Some("image")
        );

        let node = fs.get_node(folder.id()).await.unwrap().unwrap();
        assert_eq!(node.kind(), NodeKind::Folder);
        assert!(fs.get_node("no-such-node").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_root_cannot_be_destroyed() {
        let fs = open_fs().await;
        let err = fs.destroy_node(ROOT_ID).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_operations_before_open_fail() {
        let fs = NodeFs::in_memory();
        let err = fs.create_folder().await.unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));
    }

    #[tokio::test]
    async fn test_resolve_path() {
        let fs = open_fs().await;
        let docs = fs.create_folder().await.unwrap();
        fs.root().link("docs", docs.id()).await.unwrap();
        let note = fs.create_file("text").await.unwrap();
        docs.link("note.md", note.id()).await.unwrap();

        let found = fs.resolve_path("docs/note.md").await.unwrap().unwrap();
        assert_eq!(found.id(), note.id());
        assert_eq!(fs.resolve_path("/").await.unwrap().unwrap().id(), ROOT_ID);
        assert!(fs.resolve_path("docs/missing").await.unwrap().is_none());
        assert!(fs.resolve_path("docs/note.md/deeper").await.unwrap().is_none());

        fs.destroy_node(note.id()).await.unwrap();
        assert!(fs.resolve_path("docs/note.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_collect_garbage_keeps_referenced_blobs() {
        let fs = open_fs().await;

        let kept = fs.create_file("binary").await.unwrap();
        kept.write(vec![1u8, 2, 3]).await.unwrap();

        let mut attributes = Value::object();
        attributes.insert("thumbnail", vec![9u8, 9]);
        fs.root().set_attributes(attributes).await.unwrap();

        let dropped = fs.create_file("binary").await.unwrap();
        dropped.write(vec![4u8, 5, 6]).await.unwrap();
        fs.destroy_node(dropped.id()).await.unwrap();

        assert_eq!(fs.blob_store().ids().await.unwrap().len(), 3);
        assert_eq!(fs.collect_garbage().await.unwrap(), 1);
        assert_eq!(fs.blob_store().ids().await.unwrap().len(), 2);

        assert_eq!(
            kept.read().await.unwrap(),
            Some(FileData::Bytes(vec![1, 2, 3]))
        );
        let root_attrs = fs.root().attributes().await.unwrap();
        assert_eq!(
            root_attrs.get("thumbnail").and_then(Value::as_bytes),
            Some(&[9u8, 9][..])
        );
    }

    #[tokio::test]
    async fn test_persisted_graph_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let file_id = {
            let fs = NodeFs::with_config(&config);
            fs.open().await.unwrap();
            let file = fs.create_file("text").await.unwrap();
            file.write("persisted").await.unwrap();
            fs.root().link("p.txt", file.id()).await.unwrap();
            file.id().to_string()
        };

        let fs = NodeFs::with_config(&config);
        fs.open().await.unwrap();
        let entry = fs.root().get_entry_by_name("p.txt").await.unwrap().unwrap();
        assert_eq!(entry.child_id, file_id);
        let file = fs.get_node(&file_id).await.unwrap().unwrap().into_file().unwrap();
        assert_eq!(
            file.read().await.unwrap(),
            Some(FileData::Text("persisted".to_string()))
        );
    }

    #[tokio::test]
    async fn test_suspended_persistence_batches_snapshots() {
        let fs = open_fs().await;
        let before = fs.database().version().await.unwrap();

        fs.database().suspend_persistence();
        for _ in 0..5 {
            fs.create_folder().await.unwrap();
        }
        assert_eq!(fs.database().version().await.unwrap(), before);

        fs.database().resume_persistence().await.unwrap();
        assert_eq!(fs.database().version().await.unwrap(), before + 1);
        assert_eq!(fs.stats().await.unwrap().folders, 6);
    }
}
