//! Durable queue of mutations awaiting remote confirmation

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{Collection, OperationKind, PendingOperation};
use crate::util::{compact_text, unix_millis_now};

const SELECT_OPERATIONS: &str = "SELECT p.seq, p.kind, p.collection, p.target_id, p.payload,
        p.enqueued_at, f.attempts, f.last_error, f.rejected
     FROM pending_operations p
     LEFT JOIN operation_failures f ON f.seq = p.seq";

/// Queue depth split by replayability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Every queued entry, rejected ones included
    pub total: usize,
    /// Entries the remote refused permanently
    pub rejected: usize,
}

/// Ordered, durable log of unconfirmed mutations.
///
/// Sequence ids come from an `AUTOINCREMENT` key, so they only grow, even
/// after entries are removed or the process restarts.
#[derive(Clone)]
pub struct PendingOperationLog {
    db: Database,
}

impl PendingOperationLog {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a mutation and return the stored entry
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        collection: Collection,
        target_id: &str,
        payload: &Value,
    ) -> Result<PendingOperation> {
        let enqueued_at = unix_millis_now();
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO pending_operations (kind, collection, target_id, payload, enqueued_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                kind.as_str(),
                collection.as_str(),
                target_id,
                serde_json::to_string(payload)?,
                enqueued_at
            ],
        )?;
        let seq = conn.last_insert_rowid();

        tracing::debug!("Queued {kind} on {collection}/{target_id} as #{seq}");
        Ok(PendingOperation {
            seq,
            kind,
            collection,
            target_id: target_id.to_string(),
            payload: payload.clone(),
            enqueued_at,
            attempts: 0,
            last_error: None,
            rejected: false,
        })
    }

    /// All entries in ascending sequence order
    pub async fn list_ordered(&self) -> Result<Vec<PendingOperation>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!("{SELECT_OPERATIONS} ORDER BY p.seq ASC"))?;
        let rows = stmt
            .query_map([], OperationRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(OperationRow::into_operation).collect()
    }

    pub async fn get(&self, seq: i64) -> Result<Option<PendingOperation>> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                &format!("{SELECT_OPERATIONS} WHERE p.seq = ?"),
                params![seq],
                OperationRow::from_row,
            )
            .optional()?;

        row.map(OperationRow::into_operation).transpose()
    }

    /// Delete one entry; absent entries are not an error
    pub async fn remove(&self, seq: i64) -> Result<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM operation_failures WHERE seq = ?", params![seq])?;
        tx.execute("DELETE FROM pending_operations WHERE seq = ?", params![seq])?;
        tx.commit()?;
        Ok(())
    }

    /// Empty the queue (the sequence counter is kept)
    pub async fn clear_all(&self) -> Result<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM operation_failures", [])?;
        tx.execute("DELETE FROM pending_operations", [])?;
        tx.commit()?;
        Ok(())
    }

    pub async fn depth(&self) -> Result<QueueDepth> {
        let conn = self.db.lock().await;
        let (total, rejected): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN f.rejected = 1 THEN 1 ELSE 0 END), 0)
             FROM pending_operations p
             LEFT JOIN operation_failures f ON f.seq = p.seq",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(QueueDepth {
            total: usize::try_from(total).unwrap_or_default(),
            rejected: usize::try_from(rejected).unwrap_or_default(),
        })
    }

    /// Count a failed replay; `rejected` parks the entry until retried
    pub async fn record_failure(&self, seq: i64, error: &str, rejected: bool) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO operation_failures (seq, attempts, last_error, rejected, updated_at)
             SELECT ?1, 1, ?2, ?3, ?4
             WHERE EXISTS (SELECT 1 FROM pending_operations WHERE seq = ?1)
             ON CONFLICT(seq) DO UPDATE SET
                 attempts = attempts + 1,
                 last_error = excluded.last_error,
                 rejected = excluded.rejected,
                 updated_at = excluded.updated_at",
            params![seq, compact_text(error), i32::from(rejected), unix_millis_now()],
        )?;
        Ok(())
    }

    /// Return a rejected entry to the replayable set
    pub async fn requeue(&self, seq: i64) -> Result<()> {
        let conn = self.db.lock().await;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM pending_operations WHERE seq = ?)",
            params![seq],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::NotFound(format!("pending operation #{seq}")));
        }

        conn.execute(
            "UPDATE operation_failures SET rejected = 0, updated_at = ? WHERE seq = ?",
            params![unix_millis_now(), seq],
        )?;
        Ok(())
    }

    /// Identifiers in `collection` that still have queued mutations
    pub async fn targets(&self, collection: Collection) -> Result<HashSet<String>> {
        let conn = self.db.lock().await;
        let mut stmt =
            conn.prepare("SELECT DISTINCT target_id FROM pending_operations WHERE collection = ?")?;
        let targets = stmt
            .query_map(params![collection.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(targets)
    }

    /// Whether any entry after `seq` targets one of `ids`
    pub async fn has_later_for(&self, collection: Collection, ids: &[&str], seq: i64) -> Result<bool> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT EXISTS(SELECT 1 FROM pending_operations
             WHERE collection = ? AND target_id = ? AND seq > ?)",
        )?;
        for id in ids {
            let found: bool =
                stmt.query_row(params![collection.as_str(), id, seq], |row| row.get(0))?;
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Raw row before enum/JSON decoding
struct OperationRow {
    seq: i64,
    kind: String,
    collection: String,
    target_id: String,
    payload: String,
    enqueued_at: i64,
    attempts: Option<i64>,
    last_error: Option<String>,
    rejected: Option<i64>,
}

impl OperationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            kind: row.get(1)?,
            collection: row.get(2)?,
            target_id: row.get(3)?,
            payload: row.get(4)?,
            enqueued_at: row.get(5)?,
            attempts: row.get(6)?,
            last_error: row.get(7)?,
            rejected: row.get(8)?,
        })
    }

    fn into_operation(self) -> Result<PendingOperation> {
        Ok(PendingOperation {
            seq: self.seq,
            kind: self.kind.parse()?,
            collection: self.collection.parse()?,
            target_id: self.target_id,
            payload: serde_json::from_str(&self.payload)?,
            enqueued_at: self.enqueued_at,
            attempts: self
                .attempts
                .map_or(0, |attempts| u32::try_from(attempts).unwrap_or(u32::MAX)),
            last_error: self.last_error,
            rejected: self.rejected.unwrap_or(0) != 0,
        })
    }
}
