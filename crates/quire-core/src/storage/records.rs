//! Row records
//!
//! Every table has an explicit record type. Rows are mapped at the database
//! boundary so nothing above `storage` sees a generic SQLite row.

use std::fmt;
use std::str::FromStr;

use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Map a result row (selected in the record's column order) to a value
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

impl FromRow for String {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        row.get(0)
    }
}

impl FromRow for i64 {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        row.get(0)
    }
}

impl FromRow for Option<String> {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        row.get(0)
    }
}

/// Discriminates file and folder nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Folder => "folder",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(NodeKind::File),
            "folder" => Ok(NodeKind::Folder),
            other => Err(format!("unknown node type '{}'", other)),
        }
    }
}

/// A row of the `nodes` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRow {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// JSON-serialized attribute object
    pub attributes: String,
}

impl NodeRow {
    pub const COLUMNS: &'static str = "id, type, attributes";

    /// Parse the `type` column
    pub fn kind(&self) -> Option<NodeKind> {
        self.node_type.parse().ok()
    }
}

impl FromRow for NodeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(NodeRow {
            id: row.get(0)?,
            node_type: row.get(1)?,
            attributes: row.get(2)?,
        })
    }
}

/// A row of the `child_bindings` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildBindingRow {
    pub parent_id: String,
    pub bind_id: String,
    pub name: String,
    pub child_id: String,
    pub idx: i64,
}

impl ChildBindingRow {
    pub const COLUMNS: &'static str = "parent_id, bind_id, name, child_id, idx";
}

impl FromRow for ChildBindingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ChildBindingRow {
            parent_id: row.get(0)?,
            bind_id: row.get(1)?,
            name: row.get(2)?,
            child_id: row.get(3)?,
            idx: row.get(4)?,
        })
    }
}

/// A row of the `files` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContentRow {
    pub id: String,
    pub inline_content: Option<String>,
    pub blob_path: Option<String>,
    pub media_type: String,
}

impl FileContentRow {
    pub const COLUMNS: &'static str = "id, inline_content, blob_path, media_type";
}

impl FromRow for FileContentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(FileContentRow {
            id: row.get(0)?,
            inline_content: row.get(1)?,
            blob_path: row.get(2)?,
            media_type: row.get(3)?,
        })
    }
}
