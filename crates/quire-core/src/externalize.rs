//! Moving binary payloads between value trees and a blob store
//!
//! [`externalize`] replaces every binary leaf with a blob marker after
//! writing the bytes under an id derived from the owner and the leaf's path.
//! [`internalize`] reads the bytes back in place of each marker.
//!
//! Both walks are split into a pure tree rewrite and a batch of blob I/O, so
//! the recursion itself never awaits.

use std::collections::HashMap;

use crate::blob::{blob_id, blob_path, id_from_path, BlobStore, PathSegment};
use crate::storage::StoreResult;
use crate::value::Value;

/// Replace binary leaves with markers, writing their bytes to `store`
///
/// The output tree holds no binary payloads and can be JSON encoded.
pub async fn externalize(
    value: &Value,
    store: &dyn BlobStore,
    owner_id: &str,
) -> StoreResult<Value> {
    let mut payloads = Vec::new();
    let mut path = Vec::new();
    let rewritten = extract_binaries(value, owner_id, &mut path, &mut payloads);

    for (id, bytes) in payloads {
        store.write(&id, bytes).await?;
    }

    Ok(rewritten)
}

/// Replace blob markers with the bytes they reference
///
/// Only markers whose path has the `blobs/<id>.bin` shape are loaded; any
/// other `__blobPath` object is ordinary data and passes through unchanged.
pub async fn internalize(value: &Value, store: &dyn BlobStore) -> StoreResult<Value> {
    let mut loaded: HashMap<String, Vec<u8>> = HashMap::new();
    for path in value.blob_refs() {
        if loaded.contains_key(&path) {
            continue;
        }
        let Some(id) = id_from_path(&path) else {
            continue;
        };
        let bytes = store.read(id).await?;
        loaded.insert(path, bytes);
    }

    Ok(inject_binaries(value, &loaded))
}

/// Rebuild `value` with binaries swapped for markers, collecting the payloads
fn extract_binaries<'a>(
    value: &'a Value,
    owner_id: &str,
    path: &mut Vec<PathSegment>,
    payloads: &mut Vec<(String, &'a [u8])>,
) -> Value {
    match value {
        Value::Binary(bytes) => {
            let id = blob_id(owner_id, path);
            let marker = Value::blob_marker(blob_path(&id));
            payloads.push((id, bytes.as_slice()));
            marker
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    path.push(PathSegment::Index(i));
                    let out = extract_binaries(item, owner_id, path, payloads);
                    path.pop();
                    out
                })
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    path.push(PathSegment::Key(key.clone()));
                    let out = extract_binaries(item, owner_id, path, payloads);
                    path.pop();
                    (key.clone(), out)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Rebuild `value` with markers swapped for loaded payloads
fn inject_binaries(value: &Value, loaded: &HashMap<String, Vec<u8>>) -> Value {
    if let Some(bytes) = value.as_blob_marker().and_then(|path| loaded.get(path)) {
        return Value::Binary(bytes.clone());
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| inject_binaries(item, loaded))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), inject_binaries(item, loaded)))
                .collect(),
        ),
        other => other.clone(),
    }
}
