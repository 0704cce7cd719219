//! File and folder handles

use rusqlite::params;
use tracing::debug;
use uuid::Uuid;

use super::content::{EncodedMedia, FileData, MediaConverter};
use super::{ensure_kind, missing_node, NodeFs, MEDIA_KIND_KEY};
use crate::blob::{blob_id, blob_path, id_from_path, PathSegment};
use crate::storage::{ChildBindingRow, FileContentRow, NodeKind, NodeRow, StoreError, StoreResult};
use crate::value::Value;

/// Field the file content blob is addressed under
const CONTENT_FIELD: &str = "content";

/// A named binding inside a folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub bind_id: String,
    pub name: String,
    pub child_id: String,
}

impl From<ChildBindingRow> for DirEntry {
    fn from(row: ChildBindingRow) -> Self {
        Self {
            bind_id: row.bind_id,
            name: row.name,
            child_id: row.child_id,
        }
    }
}

/// Either kind of node
#[derive(Clone, Debug)]
pub enum NodeHandle {
    File(FileHandle),
    Folder(FolderHandle),
}

impl NodeHandle {
    pub(crate) fn from_row(fs: &NodeFs, row: NodeRow) -> StoreResult<Self> {
        match row.kind() {
            Some(NodeKind::File) => Ok(NodeHandle::File(FileHandle::new(fs.clone(), row.id))),
            Some(NodeKind::Folder) => Ok(NodeHandle::Folder(FolderHandle::new(fs.clone(), row.id))),
            None => Err(StoreError::Conversion(format!(
                "node '{}' has unknown type '{}'",
                row.id, row.node_type
            ))),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            NodeHandle::File(file) => file.id(),
            NodeHandle::Folder(folder) => folder.id(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeHandle::File(_) => NodeKind::File,
            NodeHandle::Folder(_) => NodeKind::Folder,
        }
    }

    pub fn as_file(&self) -> Option<&FileHandle> {
        match self {
            NodeHandle::File(file) => Some(file),
            NodeHandle::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&FolderHandle> {
        match self {
            NodeHandle::Folder(folder) => Some(folder),
            NodeHandle::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<FileHandle> {
        match self {
            NodeHandle::File(file) => Some(file),
            NodeHandle::Folder(_) => None,
        }
    }

    pub fn into_folder(self) -> Option<FolderHandle> {
        match self {
            NodeHandle::Folder(folder) => Some(folder),
            NodeHandle::File(_) => None,
        }
    }

    /// Attributes with externalized payloads loaded back in
    pub async fn attributes(&self) -> StoreResult<Value> {
        match self {
            NodeHandle::File(file) => file.attributes().await,
            NodeHandle::Folder(folder) => folder.attributes().await,
        }
    }
}

// ==================== Files ====================

/// Handle to a file node
#[derive(Clone, Debug)]
pub struct FileHandle {
    fs: NodeFs,
    id: String,
}

impl FileHandle {
    pub(crate) fn new(fs: NodeFs, id: String) -> Self {
        Self { fs, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media kind given at creation
    pub async fn media_kind(&self) -> StoreResult<Option<String>> {
        let attributes = self.attributes().await?;
        Ok(attributes
            .get(MEDIA_KIND_KEY)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Attributes with externalized payloads loaded back in
    pub async fn attributes(&self) -> StoreResult<Value> {
        self.fs
            .node_attributes(&self.id)
            .await?
            .ok_or_else(|| missing_node(&self.id))
    }

    /// Replace the attributes; binary leaves go to the blob store
    pub async fn set_attributes(&self, attributes: Value) -> StoreResult<()> {
        self.fs.set_node_attributes(&self.id, attributes).await
    }

    /// Store new content
    ///
    /// Text up to the inline threshold is kept in the database; larger text
    /// and all binary content is written to the blob store.
    pub async fn write(&self, data: impl Into<FileData>) -> StoreResult<()> {
        let data = data.into();
        let media_type = data.media_type();
        let threshold = self.fs.options().inline_threshold;

        match data {
            FileData::Text(text) if text.len() <= threshold => {
                self.store_content(Some(text), None, media_type).await
            }
            other => {
                self.ensure_live().await?;
                let path = self.store_blob(&other.into_bytes()).await?;
                self.store_content(None, Some(path), media_type).await
            }
        }
    }

    /// Read the content, `None` if the file was never written
    pub async fn read(&self) -> StoreResult<Option<FileData>> {
        let Some(row) = self.content_row().await? else {
            return Ok(None);
        };
        if let Some(text) = row.inline_content {
            return Ok(Some(FileData::Text(text)));
        }

        let bytes = self.load_blob(row.blob_path.as_deref()).await?;
        if row.media_type.starts_with("text/") {
            String::from_utf8(bytes)
                .map(|text| Some(FileData::Text(text)))
                .map_err(|e| StoreError::Conversion(format!("file '{}': {}", self.id, e)))
        } else {
            Ok(Some(FileData::Bytes(bytes)))
        }
    }

    /// Store a media resource, always through the blob store
    pub async fn write_media_resource<C: MediaConverter>(
        &self,
        converter: &C,
        resource: &C::Resource,
    ) -> StoreResult<()> {
        let media = converter.encode(resource)?;
        self.ensure_live().await?;
        let path = self.store_blob(&media.bytes).await?;
        self.store_content(None, Some(path), &media.media_type).await
    }

    /// Read the content back as a media resource
    pub async fn read_media_resource<C: MediaConverter>(
        &self,
        converter: &C,
    ) -> StoreResult<Option<C::Resource>> {
        let Some(row) = self.content_row().await? else {
            return Ok(None);
        };
        let bytes = match row.inline_content {
            Some(text) => text.into_bytes(),
            None => self.load_blob(row.blob_path.as_deref()).await?,
        };
        converter
            .decode(EncodedMedia {
                media_type: row.media_type,
                bytes,
            })
            .map(Some)
    }

    /// Media type of the stored content, `None` if never written
    pub async fn media_type(&self) -> StoreResult<Option<String>> {
        Ok(self.content_row().await?.map(|row| row.media_type))
    }

    async fn content_row(&self) -> StoreResult<Option<FileContentRow>> {
        self.fs
            .db()
            .select_one(
                "SELECT id, inline_content, blob_path, media_type FROM files WHERE id = ?1",
                [self.id.as_str()],
            )
            .await
    }

    async fn ensure_live(&self) -> StoreResult<()> {
        match self.fs.node_row(&self.id).await? {
            Some(row) if row.kind() == Some(NodeKind::File) => Ok(()),
            Some(_) => Err(StoreError::InvalidOperation(format!(
                "node '{}' is not a file",
                self.id
            ))),
            None => Err(missing_node(&self.id)),
        }
    }

    /// Write content bytes under a fresh generation
    ///
    /// The blob the committed row points at is never overwritten; superseded
    /// generations are reclaimed by `collect_garbage`.
    async fn store_blob(&self, bytes: &[u8]) -> StoreResult<String> {
        let generation = Uuid::new_v4().simple().to_string();
        let id = blob_id(
            &self.id,
            &[
                PathSegment::Key(CONTENT_FIELD.to_string()),
                PathSegment::Key(generation),
            ],
        );
        self.fs.blobs().write(&id, bytes).await?;
        Ok(blob_path(&id))
    }

    async fn load_blob(&self, path: Option<&str>) -> StoreResult<Vec<u8>> {
        let id = path.and_then(id_from_path).ok_or_else(|| {
            StoreError::Conversion(format!("file '{}' has no valid blob path", self.id))
        })?;
        self.fs.blobs().read(id).await
    }

    async fn store_content(
        &self,
        inline_content: Option<String>,
        blob_path: Option<String>,
        media_type: &str,
    ) -> StoreResult<()> {
        let id = self.id.as_str();
        self.fs
            .db()
            .transaction(|tx| -> StoreResult<()> {
                ensure_kind(tx, id, NodeKind::File)?;
                tx.run(
                    r#"
                    INSERT INTO files (id, inline_content, blob_path, media_type)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(id) DO UPDATE SET
                        inline_content = excluded.inline_content,
                        blob_path = excluded.blob_path,
                        media_type = excluded.media_type
                    "#,
                    params![id, inline_content, blob_path, media_type],
                )?;
                Ok(())
            })
            .await?;

        self.fs.db().persist().await
    }
}

// ==================== Folders ====================

/// Handle to a folder node
#[derive(Clone, Debug)]
pub struct FolderHandle {
    fs: NodeFs,
    id: String,
}

impl FolderHandle {
    pub(crate) fn new(fs: NodeFs, id: String) -> Self {
        Self { fs, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attributes with externalized payloads loaded back in
    pub async fn attributes(&self) -> StoreResult<Value> {
        self.fs
            .node_attributes(&self.id)
            .await?
            .ok_or_else(|| missing_node(&self.id))
    }

    /// Replace the attributes; binary leaves go to the blob store
    pub async fn set_attributes(&self, attributes: Value) -> StoreResult<()> {
        self.fs.set_node_attributes(&self.id, attributes).await
    }

    /// Bind `child_id` under `name`, returning the new binding id
    ///
    /// The same node may be bound under several names and folders. Names are
    /// not required to be unique; lookups by name see the latest binding.
    pub async fn link(&self, name: &str, child_id: &str) -> StoreResult<String> {
        validate_name(name)?;
        let bind_id = Uuid::new_v4().to_string();
        let parent_id = self.id.as_str();

        self.fs
            .db()
            .transaction(|tx| -> StoreResult<()> {
                ensure_kind(tx, parent_id, NodeKind::Folder)?;
                let child: Option<String> =
                    tx.select_one("SELECT id FROM nodes WHERE id = ?1", params![child_id])?;
                if child.is_none() {
                    return Err(missing_node(child_id));
                }

                let next_idx: Option<i64> = tx.select_one(
                    "SELECT COALESCE(MAX(idx) + 1, 0) FROM child_bindings WHERE parent_id = ?1",
                    params![parent_id],
                )?;
                tx.run(
                    "INSERT INTO child_bindings (parent_id, bind_id, name, child_id, idx) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![parent_id, bind_id, name, child_id, next_idx.unwrap_or(0)],
                )?;
                Ok(())
            })
            .await?;

        self.fs.db().persist().await?;
        debug!(parent = %self.id, name, child = child_id, "Linked node");
        Ok(bind_id)
    }

    /// Remove a binding from this folder; the child node is untouched
    ///
    /// Returns whether the binding existed.
    pub async fn unlink(&self, bind_id: &str) -> StoreResult<bool> {
        let removed = self
            .fs
            .db()
            .run(
                "DELETE FROM child_bindings WHERE bind_id = ?1 AND parent_id = ?2",
                [bind_id, self.id.as_str()],
            )
            .await?;

        if removed == 0 {
            return Ok(false);
        }
        self.fs.db().persist().await?;
        Ok(true)
    }

    /// All bindings in link order
    pub async fn list(&self) -> StoreResult<Vec<DirEntry>> {
        let rows: Vec<ChildBindingRow> = self
            .fs
            .db()
            .select(
                "SELECT parent_id, bind_id, name, child_id, idx FROM child_bindings WHERE parent_id = ?1 ORDER BY idx",
                [self.id.as_str()],
            )
            .await?;
        Ok(rows.into_iter().map(DirEntry::from).collect())
    }

    /// Latest binding with `name`, `None` if there is none
    pub async fn get_entry_by_name(&self, name: &str) -> StoreResult<Option<DirEntry>> {
        let row: Option<ChildBindingRow> = self
            .fs
            .db()
            .select_one(
                "SELECT parent_id, bind_id, name, child_id, idx FROM child_bindings WHERE parent_id = ?1 AND name = ?2 ORDER BY idx DESC LIMIT 1",
                [self.id.as_str(), name],
            )
            .await?;
        Ok(row.map(DirEntry::from))
    }

    /// Bindings resolved to node handles; dangling bindings are skipped
    pub async fn children(&self) -> StoreResult<Vec<(DirEntry, NodeHandle)>> {
        let mut children = Vec::new();
        for entry in self.list().await? {
            match self.fs.get_node(&entry.child_id).await? {
                Some(node) => children.push((entry, node)),
                None => debug!(bind_id = %entry.bind_id, "Skipping dangling binding"),
            }
        }
        Ok(children)
    }
}

fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StoreError::InvalidOperation(format!(
            "invalid entry name '{}'",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsOptions, BINARY_MEDIA_TYPE, TEXT_MEDIA_TYPE};
    use crate::blob::MemoryBlobStore;
    use crate::storage::MemoryProvider;
    use std::sync::Arc;

    async fn open_fs() -> NodeFs {
        let fs = NodeFs::in_memory();
        fs.open().await.unwrap();
        fs
    }

    /// Toy "image": dimensions plus pixels, encoded as w,h,pixels...
    #[derive(Debug, Clone, PartialEq)]
    struct Image {
        width: u8,
        height: u8,
        pixels: Vec<u8>,
    }

    struct ImageConverter;

    impl MediaConverter for ImageConverter {
        type Resource = Image;

        fn encode(&self, image: &Image) -> StoreResult<EncodedMedia> {
            let mut bytes = vec![image.width, image.height];
            bytes.extend_from_slice(&image.pixels);
            Ok(EncodedMedia {
                media_type: "image/x-toy".to_string(),
                bytes,
            })
        }

        fn decode(&self, media: EncodedMedia) -> StoreResult<Image> {
            if media.media_type != "image/x-toy" || media.bytes.len() < 2 {
                return Err(StoreError::Conversion("not a toy image".to_string()));
            }
            Ok(Image {
                width: media.bytes[0],
                height: media.bytes[1],
                pixels: media.bytes[2..].to_vec(),
            })
        }
    }

    #[tokio::test]
    async fn test_small_text_is_inline() {
        let fs = open_fs().await;
        let file = fs.create_file("text").await.unwrap();
        file.write("short").await.unwrap();

        let row = file.content_row().await.unwrap().unwrap();
        assert_eq!(row.inline_content.as_deref(), Some("short"));
        assert!(row.blob_path.is_none());
        assert_eq!(row.media_type, TEXT_MEDIA_TYPE);
        assert!(fs.blob_store().ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_text_is_externalized() {
        let fs = NodeFs::new(
            Arc::new(MemoryProvider::new()),
            Arc::new(MemoryBlobStore::new()),
            FsOptions {
                inline_threshold: 8,
                ..FsOptions::default()
            },
        );
        fs.open().await.unwrap();

        let file = fs.create_file("text").await.unwrap();
        let long = "this text is longer than eight bytes";
        file.write(long).await.unwrap();

        let row = file.content_row().await.unwrap().unwrap();
        assert!(row.inline_content.is_none());
        assert!(row.blob_path.is_some());
        assert_eq!(file.read().await.unwrap(), Some(FileData::from(long)));

        // Rewriting small text flips back to inline
        file.write("tiny").await.unwrap();
        let row = file.content_row().await.unwrap().unwrap();
        assert_eq!(row.inline_content.as_deref(), Some("tiny"));
        assert!(row.blob_path.is_none());
    }

    #[tokio::test]
    async fn test_binary_content_roundtrip() {
        let fs = open_fs().await;
        let file = fs.create_file("binary").await.unwrap();
        assert!(file.read().await.unwrap().is_none());

        file.write(vec![0u8, 159, 146, 150]).await.unwrap();
        assert_eq!(
            file.read().await.unwrap(),
            Some(FileData::Bytes(vec![0, 159, 146, 150]))
        );
        assert_eq!(
            file.media_type().await.unwrap().as_deref(),
            Some(BINARY_MEDIA_TYPE)
        );
    }

    #[tokio::test]
    async fn test_rewrite_keeps_committed_blob_until_gc() {
        let fs = open_fs().await;
        let file = fs.create_file("binary").await.unwrap();

        file.write(vec![1u8, 1]).await.unwrap();
        let first = file.content_row().await.unwrap().unwrap().blob_path;
        file.write(vec![2u8, 2]).await.unwrap();
        let second = file.content_row().await.unwrap().unwrap().blob_path;
        assert_ne!(first, second);

        // The old generation is untouched until collected
        let old_id = first.as_deref().and_then(id_from_path).unwrap().to_string();
        assert_eq!(fs.blob_store().read(&old_id).await.unwrap(), vec![1, 1]);

        assert_eq!(fs.collect_garbage().await.unwrap(), 1);
        assert!(fs.blob_store().read(&old_id).await.unwrap_err().is_not_found());
        assert_eq!(
            file.read().await.unwrap(),
            Some(FileData::Bytes(vec![2, 2]))
        );
    }

    #[tokio::test]
    async fn test_media_resource_roundtrip() {
        let fs = open_fs().await;
        let file = fs.create_file("image").await.unwrap();
        let image = Image {
            width: 2,
            height: 1,
            pixels: vec![10, 20, 30, 40, 50, 60],
        };

        file.write_media_resource(&ImageConverter, &image)
            .await
            .unwrap();

        let row = file.content_row().await.unwrap().unwrap();
        assert!(row.blob_path.is_some());
        assert_eq!(row.media_type, "image/x-toy");

        let loaded = file.read_media_resource(&ImageConverter).await.unwrap();
        assert_eq!(loaded, Some(image));
    }

    #[tokio::test]
    async fn test_write_to_destroyed_file_fails() {
        let fs = open_fs().await;
        let file = fs.create_file("text").await.unwrap();
        fs.destroy_node(file.id()).await.unwrap();

        assert!(matches!(
            file.write("late").await.unwrap_err(),
            StoreError::InvalidOperation(_)
        ));
        assert!(file.write(vec![1u8]).await.is_err());
        assert!(fs.get_node(file.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destroy_removes_content_row() {
        let fs = open_fs().await;
        let file = fs.create_file("text").await.unwrap();
        file.write("gone soon").await.unwrap();
        fs.destroy_node(file.id()).await.unwrap();

        assert!(file.content_row().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_link_same_child_under_many_names() {
        let fs = open_fs().await;
        let file = fs.create_file("text").await.unwrap();
        let a = fs.create_folder().await.unwrap();
        let b = fs.create_folder().await.unwrap();

        let first = a.link("one", file.id()).await.unwrap();
        let second = a.link("two", file.id()).await.unwrap();
        b.link("elsewhere", file.id()).await.unwrap();
        assert_ne!(first, second);

        let names: Vec<String> = a.list().await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(b.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_names_latest_wins() {
        let fs = open_fs().await;
        let folder = fs.root();
        let old = fs.create_file("text").await.unwrap();
        let new = fs.create_file("text").await.unwrap();

        folder.link("same", old.id()).await.unwrap();
        folder.link("same", new.id()).await.unwrap();

        let entry = folder.get_entry_by_name("same").await.unwrap().unwrap();
        assert_eq!(entry.child_id, new.id());
        assert!(folder.get_entry_by_name("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unlink() {
        let fs = open_fs().await;
        let file = fs.create_file("text").await.unwrap();
        let bind_id = fs.root().link("f", file.id()).await.unwrap();

        assert!(fs.root().unlink(&bind_id).await.unwrap());
        assert!(!fs.root().unlink(&bind_id).await.unwrap());
        assert!(fs.root().list().await.unwrap().is_empty());
        // The node itself survives
        assert!(fs.get_node(file.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_link_validation() {
        let fs = open_fs().await;
        let file = fs.create_file("text").await.unwrap();

        assert!(fs.root().link("", file.id()).await.is_err());
        assert!(fs.root().link("a/b", file.id()).await.is_err());
        assert!(fs.root().link("x", "missing-node").await.is_err());

        // Files cannot have children
        let as_folder = FolderHandle::new(fs.clone(), file.id().to_string());
        let err = as_folder.link("x", file.id()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_dangling_bindings_are_skipped_by_children() {
        let fs = open_fs().await;
        let kept = fs.create_file("text").await.unwrap();
        let gone = fs.create_file("text").await.unwrap();
        fs.root().link("kept", kept.id()).await.unwrap();
        fs.root().link("gone", gone.id()).await.unwrap();
        fs.destroy_node(gone.id()).await.unwrap();

        assert_eq!(fs.root().list().await.unwrap().len(), 2);
        let children = fs.root().children().await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0.name, "kept");
        assert_eq!(children[0].1.id(), kept.id());
    }

    #[tokio::test]
    async fn test_attributes_externalize_binary() {
        let fs = open_fs().await;
        let file = fs.create_file("image").await.unwrap();

        let mut attributes = Value::object();
        attributes.insert("caption", "sunset");
        attributes.insert("thumbnail", vec![1u8, 2, 3, 4]);
        file.set_attributes(attributes).await.unwrap();

        // Stored row holds a marker, not bytes
        let row = fs.node_row(file.id()).await.unwrap().unwrap();
        let stored = Value::parse(&row.attributes).unwrap();
        assert!(stored.get("thumbnail").unwrap().as_blob_marker().is_some());

        let loaded = file.attributes().await.unwrap();
        assert_eq!(loaded.get("caption").and_then(Value::as_str), Some("sunset"));
        assert_eq!(
            loaded.get("thumbnail").and_then(Value::as_bytes),
            Some(&[1u8, 2, 3, 4][..])
        );
        // Media kind is carried over
        assert_eq!(file.media_kind().await.unwrap().as_deref(), Some("image"));
    }
}
