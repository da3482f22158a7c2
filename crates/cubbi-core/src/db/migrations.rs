//! Database migrations

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

/// Apply a list of statements atomically
fn apply(conn: &mut Connection, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.commit()?;
    Ok(())
}

/// Migration to version 1: cache collections, pending queue, metadata
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // Cached collections: JSON body plus extracted index columns
            "CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                owner_id TEXT,
                sort_key INTEGER NOT NULL,
                body TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner_id)",
            "CREATE INDEX IF NOT EXISTS idx_records_sort ON records(sort_key DESC)",
            "CREATE TABLE IF NOT EXISTS children (
                id TEXT PRIMARY KEY,
                owner_id TEXT,
                sort_key INTEGER NOT NULL,
                body TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                owner_id TEXT,
                sort_key INTEGER NOT NULL,
                body TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_incidents_owner ON incidents(owner_id)",
            // AUTOINCREMENT keeps sequence ids from ever being reused
            "CREATE TABLE IF NOT EXISTS pending_operations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                collection TEXT NOT NULL,
                target_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_pending_target ON pending_operations(collection, target_id)",
            // Hydration watermarks and other local-only metadata
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                last_sync INTEGER
            )",
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )?;

    tracing::info!("Migrated local cache to version 1");
    Ok(())
}

/// Migration to version 2: replay bookkeeping and identifier aliases
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS operation_failures (
                seq INTEGER PRIMARY KEY REFERENCES pending_operations(seq) ON DELETE CASCADE,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                rejected INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_operation_failures_rejected ON operation_failures(rejected)",
            "CREATE TABLE IF NOT EXISTS id_aliases (
                collection TEXT NOT NULL,
                client_id TEXT NOT NULL,
                server_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (collection, client_id)
            )",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )?;

    tracing::info!("Migrated local cache to version {CURRENT_VERSION}");
    Ok(())
}
