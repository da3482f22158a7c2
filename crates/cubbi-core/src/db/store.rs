//! Local cache of synchronized collections

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{Collection, SyncEntity, SyncWatermark};
use crate::util::unix_millis_now;

/// Durable, typed document cache with lookups by id and by owning child.
///
/// Every write is committed before the call returns. Batches are atomic per
/// collection; nothing spans more than one collection table.
///
/// Clones share the same set of pinned rows.
#[derive(Clone)]
pub struct LocalStore {
    db: Database,
    pins: Arc<Mutex<HashSet<(Collection, String)>>>,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            pins: Arc::default(),
        }
    }

    /// Mark a row as in flight until the returned guard is dropped.
    ///
    /// Hydration leaves pinned rows alone.
    pub fn pin(&self, collection: Collection, id: &str) -> PinGuard {
        let key = (collection, id.to_string());
        self.lock_pins().insert(key.clone());
        PinGuard {
            pins: Arc::clone(&self.pins),
            key,
        }
    }

    /// Ids of the collection's rows currently pinned
    pub fn pinned(&self, collection: Collection) -> HashSet<String> {
        self.lock_pins()
            .iter()
            .filter(|(pinned, _)| *pinned == collection)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn lock_pins(&self) -> std::sync::MutexGuard<'_, HashSet<(Collection, String)>> {
        self.pins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upsert items by identifier (overwrite semantics)
    pub async fn put_many<E: SyncEntity>(&self, items: &[E]) -> Result<()> {
        self.apply_batch(items, &[]).await
    }

    /// Upsert a single item
    pub async fn put<E: SyncEntity>(&self, item: &E) -> Result<()> {
        self.apply_batch(std::slice::from_ref(item), &[]).await
    }

    /// All items in the collection, or those owned by `owner`, newest first
    pub async fn get_all<E: SyncEntity>(&self, owner: Option<&str>) -> Result<Vec<E>> {
        let conn = self.db.lock().await;
        let table = E::COLLECTION.as_str();

        let bodies = if let Some(owner) = owner {
            let mut stmt = conn.prepare(&format!(
                "SELECT body FROM {table} WHERE owner_id = ? ORDER BY sort_key DESC"
            ))?;
            let rows = stmt
                .query_map(params![owner], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        } else {
            let mut stmt =
                conn.prepare(&format!("SELECT body FROM {table} ORDER BY sort_key DESC"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(Error::from))
            .collect()
    }

    /// Point lookup by identifier
    pub async fn get<E: SyncEntity>(&self, id: &str) -> Result<Option<E>> {
        let conn = self.db.lock().await;
        let body: Option<String> = conn
            .query_row(
                &format!("SELECT body FROM {} WHERE id = ?", E::COLLECTION.as_str()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|body| serde_json::from_str(&body).map_err(Error::from))
            .transpose()
    }

    pub async fn contains(&self, collection: Collection, id: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        let exists = conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)",
                collection.as_str()
            ),
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Remove an item; absent items are not an error
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?", collection.as_str()),
            params![id],
        )?;
        Ok(())
    }

    /// Upsert and remove rows of one collection in a single transaction
    pub async fn apply_batch<E: SyncEntity>(&self, upserts: &[E], removals: &[String]) -> Result<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let table = E::COLLECTION.as_str();

        for id in removals {
            tx.execute(&format!("DELETE FROM {table} WHERE id = ?"), params![id])?;
        }
        for item in upserts {
            upsert_row(&tx, item)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Replace the row stored under `from` with `replacement` (keyed by its own id)
    pub async fn rename<E: SyncEntity>(&self, from: &str, replacement: &E) -> Result<()> {
        let removals = if from == replacement.id() {
            Vec::new()
        } else {
            vec![from.to_string()]
        };
        self.apply_batch(std::slice::from_ref(replacement), &removals)
            .await
    }

    /// Wipe every collection, the queue, aliases and metadata (sign-out).
    ///
    /// The queue's sequence counter survives so ids are never reused.
    pub async fn clear_all(&self) -> Result<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        for collection in Collection::ALL {
            tx.execute(&format!("DELETE FROM {}", collection.as_str()), [])?;
        }
        tx.execute("DELETE FROM operation_failures", [])?;
        tx.execute("DELETE FROM pending_operations", [])?;
        tx.execute("DELETE FROM id_aliases", [])?;
        tx.execute("DELETE FROM metadata", [])?;
        tx.commit()?;

        tracing::info!("Cleared local cache");
        Ok(())
    }

    /// Stamp the last successful hydration time of a collection
    pub async fn set_watermark(&self, collection: Collection, timestamp_ms: i64) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value, last_sync) VALUES (?, ?, ?)",
            params![
                collection.watermark_key(),
                timestamp_ms.to_string(),
                timestamp_ms
            ],
        )?;
        Ok(())
    }

    pub async fn watermark(&self, collection: Collection) -> Result<Option<SyncWatermark>> {
        let conn = self.db.lock().await;
        let last_sync: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_sync FROM metadata WHERE key = ?",
                params![collection.watermark_key()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(last_sync.flatten().map(|last_sync| SyncWatermark {
            collection,
            last_sync,
        }))
    }

    /// Remember that `client_id` was renamed to `server_id` by the remote
    pub async fn record_alias(
        &self,
        collection: Collection,
        client_id: &str,
        server_id: &str,
    ) -> Result<()> {
        if client_id == server_id {
            return Ok(());
        }
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO id_aliases (collection, client_id, server_id, created_at)
             VALUES (?, ?, ?, ?)",
            params![collection.as_str(), client_id, server_id, unix_millis_now()],
        )?;
        Ok(())
    }

    /// Server identifier a client identifier was renamed to, if any
    pub async fn resolve_alias(&self, collection: Collection, id: &str) -> Result<Option<String>> {
        let conn = self.db.lock().await;
        let server_id = conn
            .query_row(
                "SELECT server_id FROM id_aliases WHERE collection = ? AND client_id = ?",
                params![collection.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(server_id)
    }
}

/// Releases a [`LocalStore::pin`] on drop
pub struct PinGuard {
    pins: Arc<Mutex<HashSet<(Collection, String)>>>,
    key: (Collection, String),
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

fn upsert_row<E: SyncEntity>(conn: &Connection, item: &E) -> Result<()> {
    let body = serde_json::to_string(item)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (id, owner_id, sort_key, body) VALUES (?, ?, ?, ?)",
            E::COLLECTION.as_str()
        ),
        params![item.id(), item.owner_id(), item.sort_key(), body],
    )?;
    Ok(())
}
