//! Storage layer
//!
//! Relational storage for the node graph and the I/O seam it persists through.
//!
//! ## Architecture
//!
//! - **SQLite**: in-memory working database, one connection per [`Database`]
//! - **Snapshots**: the whole database serialized and written through a
//!   [`PersistenceProvider`] under a monotonically increasing version
//!
//! The version marker is only moved after the new snapshot is durable, so a
//! crash at any point leaves the last committed snapshot loadable.

pub mod database;
pub mod error;
pub mod persistence;
pub mod records;
pub mod schema;

pub use database::{Database, ImportSession, Tx};
pub use error::{StoreError, StoreResult};
pub use persistence::{DirectoryProvider, MemoryProvider, PersistenceProvider};
pub use records::{ChildBindingRow, FileContentRow, FromRow, NodeKind, NodeRow};
pub use schema::{get_schema_version, init_schema, migrate, needs_migration, SCHEMA_VERSION};
