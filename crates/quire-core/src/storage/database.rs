//! Relational store adapter
//!
//! Owns one in-memory SQLite database and persists it as numbered
//! snapshots through a [`PersistenceProvider`]:
//!
//! - `<prefix>.version` - text marker naming the authoritative snapshot
//! - `<prefix>.db.<n>` - snapshot bytes for version `n`
//!
//! `persist()` writes the next snapshot, then moves the marker, then removes
//! the superseded snapshot. A marker written by this adapter therefore always
//! names a snapshot that exists.
//!
//! All entry points take the same async mutex, so transaction bodies and
//! snapshot writes from overlapping callers never interleave.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, Params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{StoreError, StoreResult};
use super::persistence::PersistenceProvider;
use super::records::FromRow;
use super::schema;

/// Live database plus the version of the snapshot it was last persisted as
struct DbState {
    conn: Connection,
    version: u64,
}

/// Versioned, snapshot-persisted SQLite database
pub struct Database {
    provider: Arc<dyn PersistenceProvider>,
    prefix: String,
    state: Mutex<Option<DbState>>,
    suspended: AtomicBool,
}

impl Database {
    /// Create an adapter storing its keys under `prefix`
    ///
    /// Nothing is read until [`Database::open`] is called.
    pub fn new(provider: Arc<dyn PersistenceProvider>, prefix: impl Into<String>) -> Self {
        Self {
            provider,
            prefix: prefix.into(),
            state: Mutex::new(None),
            suspended: AtomicBool::new(false),
        }
    }

    /// Name of the version marker entry
    pub fn marker_name(&self) -> String {
        format!("{}.version", self.prefix)
    }

    /// Name of the snapshot entry for `version`
    pub fn snapshot_name(&self, version: u64) -> String {
        format!("{}.db.{}", self.prefix, version)
    }

    /// Open the database
    ///
    /// Loads the snapshot named by the version marker and migrates it. If the
    /// marker or its snapshot is missing (or the marker is unparsable), a
    /// fresh database is created and persisted as version 1.
    /// Opening an open adapter does nothing.
    pub async fn open(&self) -> StoreResult<()> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let state = match self.load_current().await? {
            Some(state) => state,
            None => self.initialize().await?,
        };

        debug!(prefix = %self.prefix, version = state.version, "Database opened");
        *guard = Some(state);
        Ok(())
    }

    /// Whether `open()` has completed
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Drop the live database without persisting
    pub async fn close(&self) {
        if self.is_persistence_suspended() {
            warn!(prefix = %self.prefix, "Closing database with persistence suspended; unpersisted changes are lost");
        }
        *self.state.lock().await = None;
    }

    /// Version of the snapshot the live database was last persisted as
    pub async fn version(&self) -> StoreResult<u64> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        Ok(state.version)
    }

    /// Schema version of the live database
    pub async fn schema_version(&self) -> StoreResult<i32> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        Ok(schema::get_schema_version(&state.conn)?)
    }

    /// Run a query and map every row
    pub async fn select<R, P>(&self, sql: &str, params: P) -> StoreResult<Vec<R>>
    where
        R: FromRow,
        P: Params + Send,
    {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        query_rows(&state.conn, sql, params)
    }

    /// Run a query and map the first row, `None` if there are no rows
    pub async fn select_one<R, P>(&self, sql: &str, params: P) -> StoreResult<Option<R>>
    where
        R: FromRow,
        P: Params + Send,
    {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        query_first(&state.conn, sql, params)
    }

    /// Execute one mutating statement, returning the number of changed rows
    pub async fn run<P>(&self, sql: &str, params: P) -> StoreResult<usize>
    where
        P: Params + Send,
    {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        Ok(state.conn.execute(sql, params)?)
    }

    /// Run `f` inside a transaction
    ///
    /// Commits when `f` returns `Ok`. When `f` returns `Err`, rolls back and
    /// returns that same error.
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Tx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(StoreError::NotInitialized)?;
        run_transaction(&mut state.conn, f)
    }

    /// Write the live database as the next snapshot version
    ///
    /// Returns immediately while persistence is suspended.
    pub async fn persist(&self) -> StoreResult<()> {
        if self.is_persistence_suspended() {
            debug!(prefix = %self.prefix, "Persistence suspended, skipping snapshot");
            return Ok(());
        }

        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(StoreError::NotInitialized)?;

        let bytes = export_snapshot(&state.conn)?;
        let next = state.version + 1;
        self.commit_snapshot(Some(state.version), next, &bytes).await?;
        state.version = next;

        debug!(prefix = %self.prefix, version = next, size = bytes.len(), "Snapshot persisted");
        Ok(())
    }

    /// Stop `persist()` from writing until [`Database::resume_persistence`]
    pub fn suspend_persistence(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    /// Re-enable persistence and write a snapshot of everything deferred
    pub async fn resume_persistence(&self) -> StoreResult<()> {
        self.suspended.store(false, Ordering::SeqCst);
        if self.is_open().await {
            self.persist().await?;
        }
        Ok(())
    }

    pub fn is_persistence_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Populate a fresh database directly and persist it
    ///
    /// Only valid on an unopened adapter. `f` runs against a new database with
    /// the current schema; the result is persisted as the next version after
    /// whatever the marker currently names, and the adapter stays closed so
    /// that a later `open()` adopts it.
    pub async fn import<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Tx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let session = self.begin_import().await?;
        let value = f(&session.tx())?;
        self.finish_import(session).await?;
        Ok(value)
    }

    /// Start filling a fresh database incrementally
    ///
    /// Rows go in through [`ImportSession::tx`] inside one open transaction.
    /// [`Database::finish_import`] commits and persists them; dropping the
    /// session instead discards everything.
    pub async fn begin_import(&self) -> StoreResult<ImportSession> {
        if self.is_open().await {
            return Err(StoreError::AlreadyOpen);
        }

        let conn = fresh_connection()?;
        conn.execute_batch("BEGIN")?;
        debug!(prefix = %self.prefix, "Import started");
        Ok(ImportSession { conn })
    }

    /// Commit an import session and persist it as the next version
    pub async fn finish_import(&self, session: ImportSession) -> StoreResult<u64> {
        let guard = self.state.lock().await;
        if guard.is_some() {
            return Err(StoreError::AlreadyOpen);
        }

        session.conn.execute_batch("COMMIT")?;
        let bytes = export_snapshot(&session.conn)?;

        let current = self.read_marker().await?;
        let next = current.map_or(1, |v| v + 1);
        self.commit_snapshot(current, next, &bytes).await?;

        info!(prefix = %self.prefix, version = next, "Imported database snapshot");
        drop(guard);
        Ok(next)
    }

    // ==================== Private helpers ====================

    /// Read and parse the version marker
    ///
    /// An unparsable marker is logged and reported as absent.
    async fn read_marker(&self) -> StoreResult<Option<u64>> {
        let Some(text) = self.provider.read_text(&self.marker_name()).await? else {
            return Ok(None);
        };

        match parse_marker(&text) {
            Ok(version) => Ok(Some(version)),
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "Ignoring version marker");
                Ok(None)
            }
        }
    }

    /// Load the snapshot named by the marker, if both exist
    async fn load_current(&self) -> StoreResult<Option<DbState>> {
        let Some(version) = self.read_marker().await? else {
            return Ok(None);
        };

        let name = self.snapshot_name(version);
        let Some(bytes) = self.provider.read_file(&name).await? else {
            warn!(prefix = %self.prefix, version, "Version marker names a missing snapshot");
            return Ok(None);
        };

        let mut conn = load_snapshot(&name, &bytes)?;
        if schema::needs_migration(&conn) {
            let from = schema::get_schema_version(&conn)?;
            let applied = schema::migrate(&mut conn)?;
            info!(
                from,
                to = schema::SCHEMA_VERSION,
                steps = applied,
                "Migrated database schema"
            );
        }

        Ok(Some(DbState { conn, version }))
    }

    /// Create and persist a fresh version-1 database
    async fn initialize(&self) -> StoreResult<DbState> {
        let conn = fresh_connection()?;
        let bytes = export_snapshot(&conn)?;
        self.commit_snapshot(None, 1, &bytes).await?;

        info!(prefix = %self.prefix, "Initialized fresh database");
        Ok(DbState { conn, version: 1 })
    }

    /// Durable three-step snapshot commit
    ///
    /// 1. write the snapshot for `next`
    /// 2. point the marker at `next`
    /// 3. remove the snapshot for `current` (best effort)
    async fn commit_snapshot(
        &self,
        current: Option<u64>,
        next: u64,
        bytes: &[u8],
    ) -> StoreResult<()> {
        self.provider
            .write_file(&self.snapshot_name(next), bytes)
            .await?;
        self.provider
            .write_text(&self.marker_name(), &next.to_string())
            .await?;

        if let Some(old) = current.filter(|&old| old != next) {
            let old_name = self.snapshot_name(old);
            if let Err(e) = self.provider.remove_file(&old_name).await {
                warn!(snapshot = %old_name, error = %e, "Failed to remove superseded snapshot");
            }
        }

        Ok(())
    }
}

/// Query helpers available inside a transaction
pub struct Tx<'a> {
    conn: &'a Connection,
}

impl Tx<'_> {
    /// Run a query and map every row
    pub fn select<R: FromRow, P: Params>(&self, sql: &str, params: P) -> StoreResult<Vec<R>> {
        query_rows(self.conn, sql, params)
    }

    /// Run a query and map the first row, `None` if there are no rows
    pub fn select_one<R: FromRow, P: Params>(
        &self,
        sql: &str,
        params: P,
    ) -> StoreResult<Option<R>> {
        query_first(self.conn, sql, params)
    }

    /// Execute one mutating statement
    pub fn run<P: Params>(&self, sql: &str, params: P) -> StoreResult<usize> {
        Ok(self.conn.execute(sql, params)?)
    }
}

/// A fresh database being filled by [`Database::begin_import`]
pub struct ImportSession {
    conn: Connection,
}

impl ImportSession {
    /// Query helpers bound to the open import transaction
    pub fn tx(&self) -> Tx<'_> {
        Tx { conn: &self.conn }
    }
}

fn run_transaction<T, E, F>(conn: &mut Connection, f: F) -> Result<T, E>
where
    F: FnOnce(&Tx<'_>) -> Result<T, E>,
    E: From<StoreError>,
{
    let tx = conn.transaction().map_err(StoreError::from)?;
    let result = f(&Tx { conn: &tx });
    match result {
        Ok(value) => {
            tx.commit().map_err(StoreError::from)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(error = %rollback_err, "Rollback failed");
            }
            debug!("Transaction rolled back");
            Err(e)
        }
    }
}

fn query_rows<R: FromRow, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StoreResult<Vec<R>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| R::from_row(row))?
        .collect::<Result<Vec<R>, _>>()?;
    Ok(rows)
}

fn query_first<R: FromRow, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StoreResult<Option<R>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(R::from_row(row)?)),
        None => Ok(None),
    }
}

fn parse_marker(text: &str) -> StoreResult<u64> {
    text.trim()
        .parse::<u64>()
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| StoreError::InvalidVersionMarker(text.trim().to_string()))
}

/// A new in-memory database with the current schema
fn fresh_connection() -> StoreResult<Connection> {
    let mut conn = Connection::open_in_memory()?;
    schema::migrate(&mut conn)?;
    Ok(conn)
}

/// Serialize the live database to snapshot bytes
fn export_snapshot(conn: &Connection) -> StoreResult<Vec<u8>> {
    let staging = tempfile::NamedTempFile::new()?;
    conn.backup(DatabaseName::Main, staging.path(), None)?;
    Ok(std::fs::read(staging.path())?)
}

/// Load snapshot bytes into a new in-memory database
fn load_snapshot(name: &str, bytes: &[u8]) -> StoreResult<Connection> {
    let corrupt = |details: String| StoreError::CorruptSnapshot {
        name: name.to_string(),
        details,
    };

    let mut staging = tempfile::NamedTempFile::new()?;
    staging.write_all(bytes)?;
    staging.flush()?;

    let mut conn = Connection::open_in_memory()?;
    conn.restore(DatabaseName::Main, staging.path(), None::<fn(Progress)>)
        .map_err(|e| corrupt(e.to_string()))?;

    let has_nodes: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='nodes'")
        .and_then(|mut stmt| stmt.exists([]))
        .map_err(|e| corrupt(e.to_string()))?;
    if !has_nodes {
        return Err(corrupt("missing nodes table".to_string()));
    }

    Ok(conn)
}
