//! Attribute values
//!
//! `Value` is a JSON-like tree that can also hold raw binary payloads.
//! Binary leaves must be externalized (see [`crate::externalize`]) before a
//! tree can be turned into JSON text.

use std::collections::BTreeMap;

use serde_json::Number;

use crate::storage::{StoreError, StoreResult};

/// Object key marking an externalized payload: `{"__blobPath": "blobs/<id>.bin"}`
pub const BLOB_PATH_KEY: &str = "__blobPath";

/// JSON-like value tree with binary leaves
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Binary(Vec<u8>),
}

impl Value {
    /// An empty object
    pub fn object() -> Self {
        Value::Object(BTreeMap::new())
    }

    /// Build the marker object for an externalized payload
    pub fn blob_marker(path: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(BLOB_PATH_KEY.to_string(), Value::String(path.into()));
        Value::Object(map)
    }

    /// The blob path if this value is exactly a marker object
    pub fn as_blob_marker(&self) -> Option<&str> {
        match self {
            Value::Object(map) if map.len() == 1 => match map.get(BLOB_PATH_KEY) {
                Some(Value::String(path)) => Some(path),
                _ => None,
            },
            _ => None,
        }
    }

    /// Look up a key on an object value
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Insert a key on an object value; non-objects are replaced by an object
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if !matches!(self, Value::Object(_)) {
            *self = Value::object();
        }
        if let Value::Object(map) = self {
            map.insert(key.into(), value.into());
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Whether any leaf of the tree is a binary payload
    pub fn contains_binary(&self) -> bool {
        match self {
            Value::Binary(_) => true,
            Value::Array(items) => items.iter().any(Value::contains_binary),
            Value::Object(map) => map.values().any(Value::contains_binary),
            _ => false,
        }
    }

    /// Every blob path referenced by a marker in the tree
    pub fn blob_refs(&self) -> Vec<String> {
        let mut refs = Vec::new();
        self.collect_blob_refs(&mut refs);
        refs
    }

    fn collect_blob_refs(&self, refs: &mut Vec<String>) {
        if let Some(path) = self.as_blob_marker() {
            refs.push(path.to_string());
            return;
        }
        match self {
            Value::Array(items) => items.iter().for_each(|v| v.collect_blob_refs(refs)),
            Value::Object(map) => map.values().for_each(|v| v.collect_blob_refs(refs)),
            _ => {}
        }
    }

    /// Convert from a JSON value
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON value
    ///
    /// Fails if the tree still holds binary payloads.
    pub fn to_json(&self) -> StoreResult<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<StoreResult<Vec<_>>>()?,
            ),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<StoreResult<serde_json::Map<_, _>>>()?,
            ),
            Value::Binary(_) => {
                return Err(StoreError::Conversion(
                    "binary payload must be externalized before JSON encoding".to_string(),
                ))
            }
        })
    }

    /// Parse JSON text
    pub fn parse(text: &str) -> StoreResult<Self> {
        Ok(Value::from_json(serde_json::from_str(text)?))
    }

    /// Encode as JSON text
    pub fn to_json_string(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(&self.to_json()?)?)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Binary(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion() {
        let json = json!({"name": "a", "tags": [1, 2.5, true, null]});
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json().unwrap(), json);
    }

    #[test]
    fn test_binary_refuses_json() {
        let mut value = Value::object();
        value.insert("raw", vec![1u8, 2, 3]);
        assert!(value.contains_binary());
        assert!(matches!(
            value.to_json().unwrap_err(),
            StoreError::Conversion(_)
        ));
    }

    #[test]
    fn test_blob_marker_detection() {
        let marker = Value::blob_marker("blobs/x.bin");
        assert_eq!(marker.as_blob_marker(), Some("blobs/x.bin"));

        // Extra keys mean it is ordinary data
        let mut not_marker = Value::blob_marker("blobs/x.bin");
        not_marker.insert("other", 1i64);
        assert_eq!(not_marker.as_blob_marker(), None);

        let mut wrong_type = Value::object();
        wrong_type.insert(BLOB_PATH_KEY, 5i64);
        assert_eq!(wrong_type.as_blob_marker(), None);
    }

    #[test]
    fn test_blob_refs() {
        let mut value = Value::object();
        value.insert("a", Value::blob_marker("blobs/a.bin"));
        value.insert(
            "list",
            vec![Value::Null, Value::blob_marker("blobs/b.bin")],
        );
        let mut refs = value.blob_refs();
        refs.sort();
        assert_eq!(refs, vec!["blobs/a.bin", "blobs/b.bin"]);
    }

    #[test]
    fn test_parse_and_encode() {
        let value = Value::parse(r#"{"mediaKind":"text"}"#).unwrap();
        assert_eq!(value.get("mediaKind").and_then(Value::as_str), Some("text"));
        assert_eq!(value.to_json_string().unwrap(), r#"{"mediaKind":"text"}"#);
    }
}
