//! Bulk refresh of the local cache from the remote store

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::SyncConfig;
use crate::db::{LocalStore, PendingOperationLog};
use crate::error::{Error, Result};
use crate::models::{Child, Collection, Incident, Record, SyncEntity};
use crate::remote::{RemoteDataGateway, SelectQuery};
use crate::util::unix_millis_now;

/// Outcome of hydrating one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HydrationReport {
    pub collection: Collection,
    /// Rows kept after the cap was applied
    pub fetched: usize,
    /// Rows written to the cache
    pub stored: usize,
    /// Local rows dropped because the remote no longer has them
    pub removed: usize,
    /// Rows left untouched because queued mutations target them
    pub protected: usize,
    /// Fetched rows that did not decode and were left out
    pub skipped: usize,
    /// Whether the fetched page covered the whole scope
    pub complete: bool,
}

/// Reports for a child's records and incidents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScopeHydration {
    pub records: HydrationReport,
    pub incidents: HydrationReport,
}

/// Pulls authoritative collections into the [`LocalStore`].
#[derive(Clone)]
pub struct CacheHydrator {
    store: LocalStore,
    log: PendingOperationLog,
    remote: Arc<dyn RemoteDataGateway>,
    config: SyncConfig,
}

impl CacheHydrator {
    pub fn new(
        store: LocalStore,
        log: PendingOperationLog,
        remote: Arc<dyn RemoteDataGateway>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            log,
            remote,
            config,
        }
    }

    /// Replace the children collection with the user's active children
    pub async fn hydrate_children(&self, user_id: &str) -> Result<HydrationReport> {
        let query = SelectQuery::new()
            .eq("user_id", user_id)
            .eq("is_active", true)
            .order_desc("created_at");
        self.hydrate::<Child>(&query, None, None).await
    }

    /// Refresh one child's records (newest first, capped) and incidents
    pub async fn hydrate_child_scope(&self, child_id: &str) -> Result<ScopeHydration> {
        let cap = self.config.record_hydration_cap;
        let records = SelectQuery::new()
            .eq("child_id", child_id)
            .order_desc("created_at")
            .limit(cap);
        let records = self.hydrate::<Record>(&records, Some(child_id), Some(cap)).await?;

        let incidents = SelectQuery::new()
            .eq("child_id", child_id)
            .order_desc("created_at");
        let incidents = self
            .hydrate::<Incident>(&incidents, Some(child_id), None)
            .await?;

        Ok(ScopeHydration { records, incidents })
    }

    async fn hydrate<E: SyncEntity>(
        &self,
        query: &SelectQuery,
        owner: Option<&str>,
        cap: Option<usize>,
    ) -> Result<HydrationReport> {
        let collection = E::COLLECTION;
        if self.remote.current_session().await.is_none() {
            return Err(Error::NoSession);
        }

        let rows = match self.remote.select_all(collection, query).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!("Hydration of {collection} failed; keeping cached rows: {error}");
                return Err(error.into());
            }
        };
        let page_len = rows.len();
        let mut undecodable: HashSet<String> = HashSet::new();
        let mut skipped = 0;
        let mut fetched = Vec::with_capacity(page_len);
        for row in rows {
            let raw_id = row.get("id").and_then(Value::as_str).map(str::to_string);
            match E::from_value(row) {
                Ok(entity) => fetched.push(entity),
                Err(error) => {
                    skipped += 1;
                    tracing::warn!("Skipping undecodable {collection} row: {error}");
                    undecodable.extend(raw_id);
                }
            }
        }

        let complete = cap.map_or(true, |cap| page_len < cap);
        fetched.sort_by_key(|entity| std::cmp::Reverse(entity.sort_key()));
        if let Some(cap) = cap {
            fetched.truncate(cap);
        }

        let protected = self.protected_ids(collection).await?;
        let fetched_ids: HashSet<&str> = fetched.iter().map(SyncEntity::id).collect();
        let oldest = fetched.last().map(SyncEntity::sort_key);

        let removals: Vec<String> = self
            .store
            .get_all::<E>(owner)
            .await?
            .into_iter()
            .filter(|local| {
                !fetched_ids.contains(local.id())
                    && !protected.contains(local.id())
                    && !undecodable.contains(local.id())
            })
            .filter(|local| complete || oldest.is_some_and(|oldest| local.sort_key() >= oldest))
            .map(|local| local.id().to_string())
            .collect();

        let fetched_count = fetched.len();
        let upserts: Vec<E> = fetched
            .iter()
            .filter(|entity| !protected.contains(entity.id()))
            .cloned()
            .collect();

        self.store.apply_batch(&upserts, &removals).await?;
        self.store
            .set_watermark(collection, unix_millis_now())
            .await?;

        let report = HydrationReport {
            collection,
            fetched: fetched_count,
            stored: upserts.len(),
            removed: removals.len(),
            protected: fetched_count - upserts.len(),
            skipped,
            complete,
        };
        tracing::info!(
            "Hydrated {collection}: {} stored, {} removed, {} protected",
            report.stored,
            report.removed,
            report.protected
        );
        Ok(report)
    }

    /// Ids (client and server) that queued mutations still target, plus
    /// optimistic rows whose first remote attempt is in flight
    async fn protected_ids(&self, collection: Collection) -> Result<HashSet<String>> {
        let targets = self.log.targets(collection).await?;
        let mut protected = self.store.pinned(collection);
        for target in targets {
            if let Some(server_id) = self.store.resolve_alias(collection, &target).await? {
                protected.insert(server_id);
            }
            protected.insert(target);
        }
        Ok(protected)
    }
}
