//! SQLite schema for the node graph
//!
//! The schema version lives in `PRAGMA user_version` so it travels inside
//! every snapshot. Fresh databases get the base schema (version 1) and are
//! then migrated forward like any loaded snapshot.

use rusqlite::{Connection, Result};
use tracing::info;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Base schema (version 1)
const BASE_SCHEMA: &str = r#"
    -- Folders and files
    CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        attributes TEXT NOT NULL DEFAULT '{}'
    );

    -- Named, ordered parent -> child edges
    CREATE TABLE IF NOT EXISTS child_bindings (
        parent_id TEXT NOT NULL,
        bind_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        child_id TEXT NOT NULL,
        idx INTEGER NOT NULL
    );

    -- File content, inline or externalized (exactly one is set)
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        inline_content TEXT,
        blob_path TEXT,
        media_type TEXT NOT NULL,
        CHECK ((inline_content IS NULL) <> (blob_path IS NULL))
    );
"#;

/// Forward migrations; entry `i` upgrades version `i + 1` to `i + 2`
const MIGRATIONS: &[&str] = &[
    // 1 -> 2: index binding lookups by parent and by child
    r#"
    CREATE INDEX IF NOT EXISTS idx_child_bindings_parent ON child_bindings(parent_id, idx);
    CREATE INDEX IF NOT EXISTS idx_child_bindings_child ON child_bindings(child_id);
    "#,
];

/// Create the base schema on an empty database
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(BASE_SCHEMA)?;
    conn.pragma_update(None, "user_version", 1)?;
    Ok(())
}

/// Get the schema version stored in the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Check if the schema is older than this build expects
pub fn needs_migration(conn: &Connection) -> bool {
    match get_schema_version(conn) {
        Ok(v) => v < SCHEMA_VERSION,
        Err(_) => true,
    }
}

/// Apply all pending migrations
///
/// Each step runs in its own transaction together with its version bump.
/// Returns the number of steps applied.
pub fn migrate(conn: &mut Connection) -> Result<usize> {
    let mut version = get_schema_version(conn)?;
    if version < 1 {
        init_schema(conn)?;
        version = 1;
    }

    let mut applied = 0;
    while version < SCHEMA_VERSION {
        let step = MIGRATIONS[(version - 1) as usize];
        let tx = conn.transaction()?;
        tx.execute_batch(step)?;
        tx.pragma_update(None, "user_version", version + 1)?;
        tx.commit()?;

        version += 1;
        applied += 1;
        info!(schema_version = version, "Applied schema migration");
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables = table_names(&conn);
        assert!(tables.contains(&"nodes".to_string()));
        assert!(tables.contains(&"child_bindings".to_string()));
        assert!(tables.contains(&"files".to_string()));
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_migrate_from_base() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert!(needs_migration(&conn));

        let applied = migrate(&mut conn).unwrap();
        assert_eq!(applied, (SCHEMA_VERSION - 1) as usize);
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(!needs_migration(&conn));

        // Already current: nothing to do
        assert_eq!(migrate(&mut conn).unwrap(), 0);
    }

    #[test]
    fn test_migrate_empty_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        migrate(&mut conn).unwrap();
        assert!(table_names(&conn).contains(&"nodes".to_string()));
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_indexes_exist_after_migration() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.contains(&"idx_child_bindings_parent".to_string()));
        assert!(indexes.contains(&"idx_child_bindings_child".to_string()));
    }

    #[test]
    fn test_content_check_constraint() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let both = conn.execute(
            "INSERT INTO files (id, inline_content, blob_path, media_type) VALUES ('a', 'x', 'blobs/a.bin', 'text/plain')",
            [],
        );
        assert!(both.is_err());

        let neither = conn.execute(
            "INSERT INTO files (id, inline_content, blob_path, media_type) VALUES ('b', NULL, NULL, 'text/plain')",
            [],
        );
        assert!(neither.is_err());

        conn.execute(
            "INSERT INTO files (id, inline_content, blob_path, media_type) VALUES ('c', 'hello', NULL, 'text/plain')",
            [],
        )
        .unwrap();
    }
}
