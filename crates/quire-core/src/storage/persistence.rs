//! Persistence providers
//!
//! A persistence provider is a flat, name-keyed byte/text store. The engine
//! keeps its version marker, database snapshots and blobs in one provider
//! and namespaces its own keys, e.g.:
//!
//! - `quire.version` - the current snapshot version (text)
//! - `quire.db.<version>` - a database snapshot (bytes)
//! - `blobs/<id>.bin` - an externalized payload (bytes)
//!
//! Two providers ship with the crate: [`DirectoryProvider`] maps names onto
//! files below a root directory and writes atomically (temp file, then
//! rename); [`MemoryProvider`] keeps everything in a map and is used for
//! tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::error::{StoreError, StoreResult};

/// Name-keyed byte/text storage the engine persists through
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Read a binary entry, `None` if it doesn't exist
    async fn read_file(&self, name: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Create or overwrite a binary entry
    async fn write_file(&self, name: &str, data: &[u8]) -> StoreResult<()>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn remove_file(&self, name: &str) -> StoreResult<()>;

    /// Read a text entry, `None` if it doesn't exist
    async fn read_text(&self, name: &str) -> StoreResult<Option<String>>;

    /// Create or overwrite a text entry
    async fn write_text(&self, name: &str, text: &str) -> StoreResult<()>;

    /// List the entry names directly inside `dir` (names relative to `dir`)
    async fn list_files(&self, dir: &str) -> StoreResult<Vec<String>>;
}

/// Provider backed by a local directory
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    /// Create a provider rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an entry name to a path below the root
    ///
    /// Names are `/`-separated and may not escape the root.
    fn resolve(&self, name: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if name.is_empty() || escapes {
            return Err(StoreError::InvalidOperation(format!(
                "invalid entry name '{}'",
                name
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl PersistenceProvider for DirectoryProvider {
    async fn read_file(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.resolve(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadError { path, source: e }),
        }
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.resolve(name)?;
        atomic_write(&path, data).await
    }

    async fn remove_file(&self, name: &str) -> StoreResult<()> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::from_io(e, path)),
        }
    }

    async fn read_text(&self, name: &str) -> StoreResult<Option<String>> {
        let path = self.resolve(name)?;
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadError { path, source: e }),
        }
    }

    async fn write_text(&self, name: &str, text: &str) -> StoreResult<()> {
        self.write_file(name, text.as_bytes()).await
    }

    async fn list_files(&self, dir: &str) -> StoreResult<Vec<String>> {
        let path = self.resolve(dir)?;
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::ReadError { path, source: e }),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::ReadError {
                path: path.clone(),
                source: e,
            })?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            // Skip leftovers from interrupted atomic writes
            if is_file && !name.ends_with(".tmp") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// This ensures the target file is never left in a partially-written state.
async fn atomic_write(path: &Path, data: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::from_io(e, parent.to_path_buf()))?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| StoreError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .await
        .map_err(|e| StoreError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .await
        .map_err(|e| StoreError::from_io(e, temp_path.clone()))?;
    drop(file);

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StoreError::from_io(e, path.to_path_buf()))?;

    Ok(())
}

/// Volatile provider keeping every entry in memory
#[derive(Debug, Default)]
pub struct MemoryProvider {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceProvider for MemoryProvider {
    async fn read_file(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(name).cloned())
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        self.entries
            .lock()
            .await
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn remove_file(&self, name: &str) -> StoreResult<()> {
        self.entries.lock().await.remove(name);
        Ok(())
    }

    async fn read_text(&self, name: &str) -> StoreResult<Option<String>> {
        match self.entries.lock().await.get(name) {
            Some(bytes) => String::from_utf8(bytes.clone())
                .map(Some)
                .map_err(|e| StoreError::Conversion(format!("entry '{}': {}", name, e))),
            None => Ok(None),
        }
    }

    async fn write_text(&self, name: &str, text: &str) -> StoreResult<()> {
        self.write_file(name, text.as_bytes()).await
    }

    async fn list_files(&self, dir: &str) -> StoreResult<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_directory_read_write_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(temp_dir.path());

        assert!(provider.read_file("doc.bin").await.unwrap().is_none());

        provider.write_file("doc.bin", b"\x00\x01\x02").await.unwrap();
        assert_eq!(
            provider.read_file("doc.bin").await.unwrap().unwrap(),
            vec![0, 1, 2]
        );

        provider.write_text("doc.version", "7").await.unwrap();
        assert_eq!(
            provider.read_text("doc.version").await.unwrap().as_deref(),
            Some("7")
        );
    }

    #[tokio::test]
    async fn test_directory_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(temp_dir.path());

        provider.write_file("blobs/a.bin", b"test data").await.unwrap();

        let path = temp_dir.path().join("blobs").join("a.bin");
        assert!(path.exists());
        assert!(!temp_dir.path().join("blobs").join("a.bin.tmp").exists());
    }

    #[tokio::test]
    async fn test_directory_remove_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(temp_dir.path());

        provider.remove_file("nothing-here").await.unwrap();

        provider.write_file("x", b"1").await.unwrap();
        provider.remove_file("x").await.unwrap();
        assert!(provider.read_file("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_list_files() {
        let temp_dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(temp_dir.path());

        assert!(provider.list_files("blobs").await.unwrap().is_empty());

        provider.write_file("blobs/b.bin", b"b").await.unwrap();
        provider.write_file("blobs/a.bin", b"a").await.unwrap();
        provider.write_file("other.bin", b"o").await.unwrap();

        assert_eq!(
            provider.list_files("blobs").await.unwrap(),
            vec!["a.bin".to_string(), "b.bin".to_string()]
        );
    }

    #[tokio::test]
    async fn test_directory_rejects_escaping_names() {
        let temp_dir = TempDir::new().unwrap();
        let provider = DirectoryProvider::new(temp_dir.path());

        let err = provider.write_file("../outside", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
        assert!(provider.read_file("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_provider() {
        let provider = MemoryProvider::new();

        provider.write_text("p.version", "1").await.unwrap();
        provider.write_file("blobs/one.bin", b"1").await.unwrap();
        provider.write_file("blobs/nested/two.bin", b"2").await.unwrap();

        assert_eq!(
            provider.read_text("p.version").await.unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(
            provider.list_files("blobs").await.unwrap(),
            vec!["one.bin".to_string()]
        );

        provider.remove_file("blobs/one.bin").await.unwrap();
        assert!(provider.read_file("blobs/one.bin").await.unwrap().is_none());
        assert!(provider.read_file("blobs/nested/two.bin").await.unwrap().is_some());
        assert!(provider.list_files("blobs").await.unwrap().is_empty());
    }
}
