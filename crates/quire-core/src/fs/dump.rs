//! Streaming export and import of the node graph
//!
//! A dump is a sequence of frames: a 4-byte big-endian length followed by one
//! CBOR-encoded [`DumpRecord`]. The first record is a `Header`, the last an
//! `End` carrying the record counts. Every `Blob` record precedes the rows
//! that reference it, so a reader can store payloads as they arrive.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::{NodeFs, ROOT_ID};
use crate::blob::id_from_path;
use crate::storage::{
    ChildBindingRow, FileContentRow, NodeKind, NodeRow, StoreError, StoreResult, Tx,
    SCHEMA_VERSION,
};
use crate::value::Value;

/// Format tag written in every header
pub const DUMP_FORMAT: &str = "quire-dump";

/// Version of the frame and record layout
pub const DUMP_FORMAT_VERSION: u32 = 1;

/// Largest frame accepted when reading
const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// One self-describing unit of a dump stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpRecord {
    Header {
        format: String,
        format_version: u32,
        schema_version: i32,
        root_id: String,
        created_at: DateTime<Utc>,
    },
    Blob {
        path: String,
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
    },
    Node(NodeRow),
    Binding(ChildBindingRow),
    Content(FileContentRow),
    End {
        nodes: u64,
        bindings: u64,
        contents: u64,
        blobs: u64,
    },
}

/// Record counts of a dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub nodes: u64,
    pub bindings: u64,
    pub contents: u64,
    pub blobs: u64,
}

impl NodeFs {
    /// Write every node reachable from the root to `writer`
    ///
    /// The graph is walked breadth-first and each node's frames are written
    /// as soon as its rows are read, so memory use is bounded by one folder's
    /// bindings plus the walk frontier. Bindings whose child no longer exists
    /// are left out.
    pub async fn dump<W>(&self, writer: &mut W) -> StoreResult<DumpSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let schema_version = self.db().schema_version().await?;
        write_frame(
            writer,
            &DumpRecord::Header {
                format: DUMP_FORMAT.to_string(),
                format_version: DUMP_FORMAT_VERSION,
                schema_version,
                root_id: ROOT_ID.to_string(),
                created_at: Utc::now(),
            },
        )
        .await?;

        let mut summary = DumpSummary::default();
        let mut sent = HashSet::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([ROOT_ID.to_string()]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(node) = self.node_row(&id).await? else {
                continue;
            };
            let kind = node.kind().ok_or_else(|| {
                StoreError::Conversion(format!(
                    "node '{}' has unknown type '{}'",
                    node.id, node.node_type
                ))
            })?;

            for path in Value::parse(&node.attributes)?.blob_refs() {
                summary.blobs += self.write_blob(writer, &mut sent, path).await?;
            }
            write_frame(writer, &DumpRecord::Node(node)).await?;
            summary.nodes += 1;

            match kind {
                NodeKind::File => {
                    let content: Option<FileContentRow> = self
                        .db()
                        .select_one(
                            "SELECT id, inline_content, blob_path, media_type FROM files WHERE id = ?1",
                            [id.as_str()],
                        )
                        .await?;
                    if let Some(content) = content {
                        if let Some(path) = content.blob_path.clone() {
                            summary.blobs += self.write_blob(writer, &mut sent, path).await?;
                        }
                        write_frame(writer, &DumpRecord::Content(content)).await?;
                        summary.contents += 1;
                    }
                }
                NodeKind::Folder => {
                    let bindings: Vec<ChildBindingRow> = self
                        .db()
                        .select(
                            r#"
                            SELECT b.parent_id, b.bind_id, b.name, b.child_id, b.idx
                            FROM child_bindings b
                            JOIN nodes n ON n.id = b.child_id
                            WHERE b.parent_id = ?1
                            ORDER BY b.idx
                            "#,
                            [id.as_str()],
                        )
                        .await?;
                    for binding in bindings {
                        queue.push_back(binding.child_id.clone());
                        write_frame(writer, &DumpRecord::Binding(binding)).await?;
                        summary.bindings += 1;
                    }
                }
            }
        }

        write_frame(
            writer,
            &DumpRecord::End {
                nodes: summary.nodes,
                bindings: summary.bindings,
                contents: summary.contents,
                blobs: summary.blobs,
            },
        )
        .await?;
        writer.flush().await?;

        info!(
            nodes = summary.nodes,
            bindings = summary.bindings,
            contents = summary.contents,
            blobs = summary.blobs,
            "Dump written"
        );
        Ok(summary)
    }

    /// Rebuild a graph from a dump into this unopened filesystem
    ///
    /// Blob payloads are stored and rows inserted into an import session as
    /// they are read. The session is committed as the next database version
    /// only once the `End` record has been checked; a bad or truncated stream
    /// leaves the database untouched. Call [`NodeFs::open`] afterwards to use
    /// the graph.
    pub async fn undump<R>(&self, reader: &mut R) -> StoreResult<DumpSummary>
    where
        R: AsyncRead + Unpin + Send,
    {
        if self.db().is_open().await {
            return Err(StoreError::AlreadyOpen);
        }
        self.blobs().open().await?;

        match read_frame(reader).await? {
            Some(DumpRecord::Header {
                format,
                format_version,
                schema_version,
                root_id,
                ..
            }) => {
                if format != DUMP_FORMAT || format_version > DUMP_FORMAT_VERSION {
                    return Err(StoreError::Dump(format!(
                        "unsupported dump format {} v{}",
                        format, format_version
                    )));
                }
                if schema_version > SCHEMA_VERSION {
                    return Err(StoreError::Dump(format!(
                        "dump schema version {} is newer than supported version {}",
                        schema_version, SCHEMA_VERSION
                    )));
                }
                if root_id != ROOT_ID {
                    return Err(StoreError::Dump(format!("unexpected root id '{}'", root_id)));
                }
            }
            Some(_) => return Err(StoreError::Dump("stream does not start with a header".to_string())),
            None => return Err(StoreError::Dump("empty stream".to_string())),
        }

        let session = self.db().begin_import().await?;
        let mut summary = DumpSummary::default();
        let mut has_root = false;

        loop {
            let record = read_frame(reader)
                .await?
                .ok_or_else(|| StoreError::Dump("stream ended before the end record".to_string()))?;

            match record {
                DumpRecord::Blob { path, bytes } => {
                    let id = id_from_path(&path).ok_or_else(|| {
                        StoreError::Dump(format!("malformed blob path '{}'", path))
                    })?;
                    self.blobs().write(id, &bytes).await?;
                    summary.blobs += 1;
                }
                DumpRecord::Node(node) => {
                    has_root |= node.id == ROOT_ID && node.kind() == Some(NodeKind::Folder);
                    insert_node(&session.tx(), &node)?;
                    summary.nodes += 1;
                }
                DumpRecord::Binding(binding) => {
                    insert_binding(&session.tx(), &binding)?;
                    summary.bindings += 1;
                }
                DumpRecord::Content(content) => {
                    insert_content(&session.tx(), &content)?;
                    summary.contents += 1;
                }
                DumpRecord::End {
                    nodes,
                    bindings,
                    contents,
                    blobs,
                } => {
                    let expected = DumpSummary {
                        nodes,
                        bindings,
                        contents,
                        blobs,
                    };
                    if expected != summary {
                        return Err(StoreError::Dump(format!(
                            "record counts {:?} do not match end record {:?}",
                            summary, expected
                        )));
                    }
                    break;
                }
                DumpRecord::Header { .. } => {
                    return Err(StoreError::Dump("unexpected second header".to_string()))
                }
            }
        }

        if !has_root {
            return Err(StoreError::Dump("dump has no root folder".to_string()));
        }
        self.db().finish_import(session).await?;

        info!(
            nodes = summary.nodes,
            bindings = summary.bindings,
            contents = summary.contents,
            blobs = summary.blobs,
            "Dump restored"
        );
        Ok(summary)
    }

    /// Emit a blob record unless `path` was already sent; returns 1 if written
    ///
    /// Markers that do not name a stored blob travel inside their row as-is.
    async fn write_blob<W>(
        &self,
        writer: &mut W,
        sent: &mut HashSet<String>,
        path: String,
    ) -> StoreResult<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if sent.contains(&path) {
            return Ok(0);
        }
        let Some(id) = id_from_path(&path) else {
            debug!(path = %path, "Leaving foreign blob marker in place");
            return Ok(0);
        };
        let bytes = self.blobs().read(id).await?;
        debug!(path = %path, size = bytes.len(), "Dumping blob");

        let record = DumpRecord::Blob {
            path: path.clone(),
            bytes,
        };
        write_frame(writer, &record).await?;
        sent.insert(path);
        Ok(1)
    }
}

fn insert_node(tx: &Tx<'_>, node: &NodeRow) -> StoreResult<()> {
    tx.run(
        "INSERT INTO nodes (id, type, attributes) VALUES (?1, ?2, ?3)",
        params![node.id, node.node_type, node.attributes],
    )?;
    Ok(())
}

fn insert_content(tx: &Tx<'_>, content: &FileContentRow) -> StoreResult<()> {
    tx.run(
        "INSERT INTO files (id, inline_content, blob_path, media_type) VALUES (?1, ?2, ?3, ?4)",
        params![
            content.id,
            content.inline_content,
            content.blob_path,
            content.media_type
        ],
    )?;
    Ok(())
}

fn insert_binding(tx: &Tx<'_>, binding: &ChildBindingRow) -> StoreResult<()> {
    tx.run(
        "INSERT INTO child_bindings (parent_id, bind_id, name, child_id, idx) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            binding.parent_id,
            binding.bind_id,
            binding.name,
            binding.child_id,
            binding.idx
        ],
    )?;
    Ok(())
}

async fn write_frame<W>(writer: &mut W, record: &DumpRecord) -> StoreResult<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut buf = Vec::new();
    ciborium::into_writer(record, &mut buf).map_err(|e| StoreError::Dump(e.to_string()))?;
    let len = u32::try_from(buf.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_LEN)
        .ok_or_else(|| StoreError::Dump(format!("record of {} bytes is too large", buf.len())))?;

    writer.write_u32(len).await?;
    writer.write_all(&buf).await?;
    Ok(())
}

/// Read one frame, `None` on a clean end of stream
async fn read_frame<R>(reader: &mut R) -> StoreResult<Option<DumpRecord>>
where
    R: AsyncRead + Unpin + Send,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(StoreError::Dump(format!("frame of {} bytes exceeds limit", len)));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => StoreError::Dump("truncated frame".to_string()),
        _ => e.into(),
    })?;

    ciborium::from_reader(buf.as_slice())
        .map(Some)
        .map_err(|e| StoreError::Dump(format!("undecodable record: {}", e)))
}
