//! Content-addressed blob storage
//!
//! Blobs are opaque payloads kept outside the database snapshot. They are
//! addressed by ids derived from the owning node and the field path the
//! payload was found at, and are stored as `blobs/<id>.bin`.
//!
//! The store does no reference counting. Callers compute the set of live ids
//! and pass it to [`BlobStore::gc`], which deletes everything else.

mod memory;
mod provider;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::storage::StoreResult;

pub use memory::MemoryBlobStore;
pub use provider::ProviderBlobStore;

/// Directory (provider namespace) holding blob entries
pub const BLOB_DIR: &str = "blobs";

/// File extension of blob entries
const BLOB_EXT: &str = ".bin";

/// Binary payload storage shared by the durable and volatile backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bind the store to its persistence root. Idempotent.
    async fn open(&self) -> StoreResult<()>;

    /// Store (or overwrite) a blob
    async fn write(&self, id: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Read a blob, failing with `NotFound` if it is absent
    async fn read(&self, id: &str) -> StoreResult<Vec<u8>>;

    /// Remove a blob. Removing an absent blob is not an error.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Ids of every stored blob
    async fn ids(&self) -> StoreResult<Vec<String>>;

    /// Delete every blob whose id is not in `valid_ids`
    ///
    /// Returns the number of blobs removed.
    async fn gc(&self, valid_ids: &HashSet<String>) -> StoreResult<usize>;
}

/// One step of a path into a value tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Unambiguous byte encoding of a field path
///
/// Each key is tagged and length-prefixed and each index is tagged and fixed
/// width, so distinct paths never share an encoding (`["a.b"]` vs `["a", "b"]`).
fn encode_path(path: &[PathSegment]) -> Vec<u8> {
    let mut out = Vec::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                out.push(b'k');
                out.extend_from_slice(&(key.len() as u64).to_be_bytes());
                out.extend_from_slice(key.as_bytes());
            }
            PathSegment::Index(i) => {
                out.push(b'i');
                out.extend_from_slice(&(*i as u64).to_be_bytes());
            }
        }
    }
    out
}

/// Deterministic blob id for the payload at `path` inside `owner_id`'s data
///
/// The encoded field path is base58 so ids stay file-name safe.
pub fn blob_id(owner_id: &str, path: &[PathSegment]) -> String {
    let encoded = bs58::encode(encode_path(path)).into_string();
    format!("{}.{}", owner_id, encoded)
}

/// Relative storage path of a blob id
pub fn blob_path(id: &str) -> String {
    format!("{}/{}{}", BLOB_DIR, id, BLOB_EXT)
}

/// Blob id named by a relative storage path, if it is one
pub fn id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(BLOB_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_suffix(BLOB_EXT))
        .filter(|id| is_valid_id(id))
}

/// Ids must be non-empty and usable as a single file name
pub(crate) fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_id_distinguishes_lookalike_paths() {
        let key = |k: &str| PathSegment::Key(k.to_string());

        assert_ne!(
            blob_id("n", &[key("a.b")]),
            blob_id("n", &[key("a"), key("b")])
        );
        assert_ne!(
            blob_id("n", &[key("x[0]")]),
            blob_id("n", &[key("x"), PathSegment::Index(0)])
        );
        assert_ne!(
            blob_id("n", &[key("ab")]),
            blob_id("n", &[key("a"), key("b")])
        );
        assert_ne!(blob_id("n", &[key("0")]), blob_id("n", &[PathSegment::Index(0)]));
    }

    #[test]
    fn test_blob_id_is_deterministic() {
        let path = [PathSegment::Key("content".to_string())];
        let a = blob_id("node-1", &path);
        let b = blob_id("node-1", &path);
        assert_eq!(a, b);
        assert!(a.starts_with("node-1."));
        assert!(is_valid_id(&a));

        assert_ne!(a, blob_id("node-2", &path));
        assert_ne!(a, blob_id("node-1", &[PathSegment::Index(0)]));
    }

    #[test]
    fn test_blob_path_roundtrip() {
        let id = blob_id("n", &[PathSegment::Key("thumb".to_string())]);
        let path = blob_path(&id);
        assert!(path.starts_with("blobs/"));
        assert!(path.ends_with(".bin"));
        assert_eq!(id_from_path(&path), Some(id.as_str()));
    }

    #[test]
    fn test_id_from_path_rejects_foreign_paths() {
        assert_eq!(id_from_path("other/x.bin"), None);
        assert_eq!(id_from_path("blobs/x.png"), None);
        assert_eq!(id_from_path("blobs/.bin"), None);
        assert_eq!(id_from_path("blobs/a/b.bin"), None);
    }
}
