//! SQLite schema for the local durable store
//!
//! Five independently keyed queue tables (one per operation kind), the
//! cached read model, and the correlation table that maps offline tokens
//! to remote ids once their Create has drained.

use rusqlite::{Connection, Result};

use crate::models::OperationKind;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Last-known server projection, plus placeholders for unsynced creates
        CREATE TABLE IF NOT EXISTS cached_entities (
            key TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            state TEXT NOT NULL,
            data TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        );

        -- Offline correlation tokens resolved to remote ids
        CREATE TABLE IF NOT EXISTS correlations (
            token TEXT PRIMARY KEY,
            remote_id INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL
        );

        -- At most one drain pass per database, across processes
        CREATE TABLE IF NOT EXISTS drain_lease (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            owner TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        "#,
    )?;

    for kind in OperationKind::DRAIN_ORDER {
        conn.execute_batch(&queue_table_sql(kind.table()))?;
    }

    // Set schema version
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// DDL for one pending-operation queue.
///
/// `seq` is the FIFO order. `enqueued_at` is informational only, since the
/// device clock can step backwards between two enqueues.
fn queue_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            entity_id INTEGER,
            correlation TEXT,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_correlation ON {table}(correlation);
        "#
    )
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
