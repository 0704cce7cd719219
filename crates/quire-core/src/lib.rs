//! Quire Core Library
//!
//! This crate provides the storage engine behind Quire: a hierarchical graph
//! of files and folders kept in an embedded SQLite database, with large
//! payloads moved out to a blob store.
//!
//! # Architecture
//!
//! - **SQLite**: in-memory working copy, persisted as versioned snapshots
//! - **Blobs**: binary payloads addressed by owner and field path
//!
//! All reads are served from the in-memory database.
//!
//! # Quick Start
//!
//! ```text
//! let fs = NodeFs::with_config(&Config::load()?);
//! fs.open().await?;
//!
//! // Add a file
//! let file = fs.create_file("text").await?;
//! file.write("hello").await?;
//! fs.root().link("hello.txt", file.id()).await?;
//!
//! // List the root
//! let entries = fs.root().list().await?;
//! ```
//!
//! # Modules
//!
//! - `fs`: Node-graph filesystem (main entry point), dump/undump
//! - `storage`: Relational store adapter and persistence providers
//! - `blob`: Blob store trait and backends
//! - `externalize`: Moving binary payloads in and out of value trees
//! - `value`: Attribute value tree
//! - `config`: Application configuration

pub mod blob;
pub mod config;
pub mod externalize;
pub mod fs;
pub mod storage;
pub mod value;

pub use blob::{BlobStore, MemoryBlobStore, ProviderBlobStore};
pub use config::Config;
pub use externalize::{externalize, internalize};
pub use fs::{
    DirEntry, DumpSummary, FileData, FileHandle, FolderHandle, FsOptions, FsStats,
    MediaConverter, NodeFs, NodeHandle, ROOT_ID,
};
pub use storage::{
    Database, DirectoryProvider, MemoryProvider, NodeKind, PersistenceProvider, StoreError,
    StoreResult,
};
pub use value::Value;
