//! Mutation and reconciliation orchestrator.
//!
//! Every mutation is applied to the [`LocalStore`] first. When the remote is
//! reachable the engine confirms it right away; otherwise (or on failure) the
//! mutation is appended to the [`PendingOperationLog`] and replayed later by
//! [`SyncEngine::drain`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SyncStatus;
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{LocalStore, PendingOperationLog};
use crate::error::{Error, Result};
use crate::models::{
    Child, Collection, Incident, OperationKind, Patch, PendingOperation, Record, SyncEntity,
};
use crate::remote::{RemoteDataGateway, RemoteError, RemoteResult, RemoteSession};

/// How a mutation ended up after its remote attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Confirmation {
    /// The remote accepted the mutation
    Confirmed,
    /// Queued for replay (offline, no session, or a transient failure)
    Queued { seq: i64 },
    /// The remote refused it; the entry is parked until retried or discarded
    Rejected { seq: i64, reason: String },
}

impl Confirmation {
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Client and server identifiers of a mutated entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub client_id: String,
    /// Known once the remote confirmed the entity
    pub server_id: Option<String>,
}

impl Identity {
    /// The key the entity is currently stored under
    pub fn current(&self) -> &str {
        self.server_id.as_deref().unwrap_or(&self.client_id)
    }
}

/// Result of a create, update or delete
#[derive(Debug, Clone)]
pub struct MutationOutcome<E> {
    /// Locally stored state after the mutation (`None` for deletes)
    pub value: Option<E>,
    pub confirmation: Confirmation,
    pub identity: Identity,
}

/// Counters for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub confirmed: usize,
    /// Transient failures left in the queue
    pub failed: usize,
    /// Entries the remote refused during this pass
    pub rejected: usize,
    /// Entries held back behind an unconfirmed create of the same record
    pub deferred: usize,
    /// Connectivity dropped before the queue was exhausted
    pub interrupted: bool,
    /// No pass ran (offline, no session, or a drain already in progress)
    pub skipped: bool,
}

impl DrainReport {
    const fn skipped() -> Self {
        Self {
            attempted: 0,
            confirmed: 0,
            failed: 0,
            rejected: 0,
            deferred: 0,
            interrupted: false,
            skipped: true,
        }
    }
}

/// Handle over the background listener and backstop poll.
///
/// Both tasks stop when the handle is dropped.
pub struct SyncHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    store: LocalStore,
    log: PendingOperationLog,
    connectivity: ConnectivityMonitor,
    remote: Arc<dyn RemoteDataGateway>,
    config: SyncConfig,
    drain_lock: Arc<Mutex<()>>,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        log: PendingOperationLog,
        connectivity: ConnectivityMonitor,
        remote: Arc<dyn RemoteDataGateway>,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            log,
            connectivity,
            remote,
            config,
            drain_lock: Arc::new(Mutex::new(())),
            status: Arc::new(status),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn log(&self) -> &PendingOperationLog {
        &self.log
    }

    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Session to use for a remote attempt, if the remote is reachable at all
    async fn reachable_session(&self) -> Option<RemoteSession> {
        if !self.connectivity.current() {
            return None;
        }
        self.remote.current_session().await
    }

    /// Follow a client id to the server id it was confirmed as
    pub async fn resolve_id(&self, collection: Collection, id: &str) -> Result<String> {
        Ok(self
            .store
            .resolve_alias(collection, id)
            .await?
            .unwrap_or_else(|| id.to_string()))
    }

    /// Create an entity from a draft.
    ///
    /// The optimistic copy is stored under a client id before any remote
    /// call is made.
    pub async fn create<E: SyncEntity>(&self, draft: E::Draft) -> Result<MutationOutcome<E>> {
        self.create_in::<E>(draft, None).await
    }

    /// Create inside an owner scope; the owner fills the draft's owner field
    /// when it was left empty.
    pub async fn create_in<E: SyncEntity>(
        &self,
        draft: E::Draft,
        owner: Option<&str>,
    ) -> Result<MutationOutcome<E>> {
        let mut entity = E::from_draft(draft);
        if entity.owner_id().is_none() {
            if let Some(owner) = owner {
                entity.set_owner_id(owner);
            }
        }
        let session = self.reachable_session().await;
        let creator = match &session {
            Some(session) => Some(session.user.clone()),
            None => self.remote.current_session().await.map(|session| session.user),
        };
        if let Some(user) = &creator {
            entity.stamp_creator(user);
        }

        let _in_flight = self.store.pin(E::COLLECTION, entity.id());
        self.store.put(&entity).await?;
        let client_id = entity.id().to_string();
        let payload = entity.insert_payload()?;
        tracing::debug!("Applied create of {}/{client_id} locally", E::COLLECTION);

        let failure = if session.is_some() {
            match self.remote.insert(E::COLLECTION, &payload).await {
                Ok(row) => {
                    let stored = self.confirm_create::<E>(&client_id, row, 0).await?;
                    self.refresh_status().await?;
                    let server_id = stored.as_ref().map(|entity| entity.id().to_string());
                    return Ok(MutationOutcome {
                        value: stored,
                        confirmation: Confirmation::Confirmed,
                        identity: Identity {
                            client_id,
                            server_id,
                        },
                    });
                }
                Err(error) => Some(error),
            }
        } else {
            None
        };

        let confirmation = self
            .queue(
                OperationKind::Create,
                E::COLLECTION,
                &client_id,
                &payload,
                failure.as_ref(),
            )
            .await?;
        Ok(MutationOutcome {
            value: Some(entity),
            confirmation,
            identity: Identity {
                client_id,
                server_id: None,
            },
        })
    }

    /// Apply a partial update to the entity stored under `id`
    pub async fn update<E: SyncEntity>(&self, id: &str, patch: Patch) -> Result<MutationOutcome<E>> {
        patch.validate()?;
        let target = self.resolve_id(E::COLLECTION, id).await?;
        let current = self
            .store
            .get::<E>(&target)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}/{id}", E::COLLECTION)))?;

        let updated = patch.apply_to(&current)?;
        self.store.put(&updated).await?;
        let payload = patch.to_value();
        tracing::debug!("Applied update of {}/{target} locally", E::COLLECTION);

        let identity = identity_for(id, &target);
        let failure = if self.can_send_now(E::COLLECTION, id, &target).await? {
            match self.remote.update(E::COLLECTION, &target, &payload).await {
                Ok(row) => {
                    let value = match E::from_value(row) {
                        Ok(server) => {
                            self.store.put(&server).await?;
                            server
                        }
                        Err(error) => {
                            tracing::warn!(
                                "Keeping local copy of {}/{target}: undecodable server row: {error}",
                                E::COLLECTION
                            );
                            updated
                        }
                    };
                    self.refresh_status().await?;
                    return Ok(MutationOutcome {
                        value: Some(value),
                        confirmation: Confirmation::Confirmed,
                        identity,
                    });
                }
                Err(error) => Some(error),
            }
        } else {
            None
        };

        let confirmation = self
            .queue(
                OperationKind::Update,
                E::COLLECTION,
                &target,
                &payload,
                failure.as_ref(),
            )
            .await?;
        Ok(MutationOutcome {
            value: Some(updated),
            confirmation,
            identity,
        })
    }

    /// Remove the entity stored under `id`; absent entities are not an error
    pub async fn delete<E: SyncEntity>(&self, id: &str) -> Result<MutationOutcome<E>> {
        let target = self.resolve_id(E::COLLECTION, id).await?;
        self.store.delete(E::COLLECTION, &target).await?;
        tracing::debug!("Applied delete of {}/{target} locally", E::COLLECTION);

        let identity = identity_for(id, &target);
        let failure = if self.can_send_now(E::COLLECTION, id, &target).await? {
            match self.remote.delete(E::COLLECTION, &target).await {
                Ok(()) => {
                    self.refresh_status().await?;
                    return Ok(MutationOutcome {
                        value: None,
                        confirmation: Confirmation::Confirmed,
                        identity,
                    });
                }
                Err(error) => Some(error),
            }
        } else {
            None
        };

        let confirmation = self
            .queue(
                OperationKind::Delete,
                E::COLLECTION,
                &target,
                &Value::Null,
                failure.as_ref(),
            )
            .await?;
        Ok(MutationOutcome {
            value: None,
            confirmation,
            identity,
        })
    }

    /// Whether a mutation may go straight to the remote.
    ///
    /// Entries already queued for the same record must be replayed first.
    async fn can_send_now(&self, collection: Collection, id: &str, target: &str) -> Result<bool> {
        if self.reachable_session().await.is_none() {
            return Ok(false);
        }
        let queued = self.log.has_later_for(collection, &[id, target], 0).await?;
        Ok(!queued)
    }

    /// Append a mutation to the queue, recording the failure that sent it there
    async fn queue(
        &self,
        kind: OperationKind,
        collection: Collection,
        target: &str,
        payload: &Value,
        failure: Option<&RemoteError>,
    ) -> Result<Confirmation> {
        let entry = self.log.enqueue(kind, collection, target, payload).await?;
        let confirmation = match failure {
            None => Confirmation::Queued { seq: entry.seq },
            Some(error) => {
                let rejected = !error.is_retryable();
                self.log
                    .record_failure(entry.seq, &error.to_string(), rejected)
                    .await?;
                if rejected {
                    tracing::warn!("Remote rejected {kind} on {collection}/{target}: {error}");
                    Confirmation::Rejected {
                        seq: entry.seq,
                        reason: error.to_string(),
                    }
                } else {
                    tracing::debug!("Queued {kind} on {collection}/{target} after: {error}");
                    Confirmation::Queued { seq: entry.seq }
                }
            }
        };
        self.refresh_status().await?;
        Ok(confirmation)
    }

    /// Swap the optimistic copy of a confirmed create for its server identity.
    ///
    /// Returns what is stored afterwards, or `None` when the local copy was
    /// deleted in the meantime (the server copy is not resurrected). A server
    /// row that does not decode still renames the local copy to its `id`.
    async fn confirm_create<E: SyncEntity>(
        &self,
        client_id: &str,
        row: Value,
        after_seq: i64,
    ) -> Result<Option<E>> {
        let raw_id = row.get("id").and_then(Value::as_str).map(str::to_string);
        let server = match E::from_value(row) {
            Ok(server) => Some(server),
            Err(error) => {
                tracing::warn!(
                    "Keeping local copy of {}/{client_id}: undecodable server row: {error}",
                    E::COLLECTION
                );
                None
            }
        };
        let Some(server_id) = server
            .as_ref()
            .map(|server| server.id().to_string())
            .or(raw_id)
        else {
            tracing::warn!(
                "Server row for {}/{client_id} carries no id; keeping the client id",
                E::COLLECTION
            );
            return self.store.get::<E>(client_id).await;
        };
        self.store
            .record_alias(E::COLLECTION, client_id, &server_id)
            .await?;

        let Some(mut local) = self.store.get::<E>(client_id).await? else {
            tracing::debug!("{}/{client_id} was deleted before confirmation", E::COLLECTION);
            return Ok(None);
        };

        let edits_pending = self
            .log
            .has_later_for(E::COLLECTION, &[client_id, server_id.as_str()], after_seq)
            .await?;
        let stored = match server {
            Some(server) if !edits_pending => server,
            _ => {
                local.set_id(server_id.clone());
                local
            }
        };
        self.store.rename(client_id, &stored).await?;
        tracing::debug!("Confirmed {}/{client_id} as {server_id}", E::COLLECTION);
        Ok(Some(stored))
    }

    /// Store the server's view of an updated row unless newer local edits are queued
    async fn confirm_update<E: SyncEntity>(
        &self,
        entry: &PendingOperation,
        target: &str,
        row: Value,
    ) -> Result<()> {
        if self
            .log
            .has_later_for(E::COLLECTION, &[entry.target_id.as_str(), target], entry.seq)
            .await?
        {
            return Ok(());
        }
        if self.store.get::<E>(target).await?.is_none() {
            return Ok(());
        }
        match E::from_value(row) {
            Ok(server) => self.store.put(&server).await,
            Err(error) => {
                tracing::warn!(
                    "Keeping local copy of {}/{target}: undecodable server row: {error}",
                    E::COLLECTION
                );
                Ok(())
            }
        }
    }

    /// Send one queue entry to the remote; deletes answer with `Value::Null`
    async fn send(&self, entry: &PendingOperation, target: &str) -> RemoteResult<Value> {
        let collection = entry.collection;
        match entry.kind {
            OperationKind::Create => self.remote.insert(collection, &entry.payload).await,
            OperationKind::Update => {
                self.remote
                    .update(collection, target, &entry.payload)
                    .await
            }
            OperationKind::Delete => self
                .remote
                .delete(collection, target)
                .await
                .map(|()| Value::Null),
        }
    }

    /// Reconcile the local cache with what the remote accepted
    async fn apply_confirmed(&self, entry: &PendingOperation, target: &str, row: Value) -> Result<()> {
        match (entry.kind, entry.collection) {
            (OperationKind::Create, Collection::Records) => {
                self.confirm_create::<Record>(&entry.target_id, row, entry.seq)
                    .await?;
            }
            (OperationKind::Create, Collection::Children) => {
                self.confirm_create::<Child>(&entry.target_id, row, entry.seq)
                    .await?;
            }
            (OperationKind::Create, Collection::Incidents) => {
                self.confirm_create::<Incident>(&entry.target_id, row, entry.seq)
                    .await?;
            }
            (OperationKind::Update, Collection::Records) => {
                self.confirm_update::<Record>(entry, target, row).await?;
            }
            (OperationKind::Update, Collection::Children) => {
                self.confirm_update::<Child>(entry, target, row).await?;
            }
            (OperationKind::Update, Collection::Incidents) => {
                self.confirm_update::<Incident>(entry, target, row).await?;
            }
            (OperationKind::Delete, collection) => self.store.delete(collection, target).await?,
        }
        Ok(())
    }

    /// Replay the queue in sequence order.
    ///
    /// Each entry succeeds or fails on its own; only entries behind an
    /// unconfirmed create of the same record are held back. A second drain
    /// requested while one is running is skipped.
    pub async fn drain(&self) -> Result<DrainReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            tracing::debug!("Drain already in progress");
            return Ok(DrainReport::skipped());
        };
        if !self.connectivity.current() {
            tracing::debug!("Skipping drain while offline");
            return Ok(DrainReport::skipped());
        }
        if self.remote.current_session().await.is_none() {
            tracing::debug!("Skipping drain without a session");
            return Ok(DrainReport::skipped());
        }

        self.set_syncing(true);
        let result = self.replay_queue().await;
        self.set_syncing(false);
        self.refresh_status().await?;

        let report = result?;
        tracing::info!(
            "Drain finished: {} confirmed, {} failed, {} rejected, {} deferred",
            report.confirmed,
            report.failed,
            report.rejected,
            report.deferred
        );
        Ok(report)
    }

    async fn replay_queue(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut blocked: HashSet<(Collection, String)> = HashSet::new();

        for entry in self.log.list_ordered().await? {
            if !entry.is_replayable() {
                if entry.kind == OperationKind::Create {
                    blocked.insert((entry.collection, entry.target_id.clone()));
                }
                continue;
            }
            if !self.connectivity.current() {
                tracing::info!("Connectivity lost; leaving remaining entries queued");
                report.interrupted = true;
                break;
            }

            let target = self.resolve_id(entry.collection, &entry.target_id).await?;
            if blocked.contains(&(entry.collection, entry.target_id.clone()))
                || blocked.contains(&(entry.collection, target.clone()))
            {
                report.deferred += 1;
                continue;
            }

            report.attempted += 1;
            match self.send(&entry, &target).await {
                Ok(row) => {
                    self.log.remove(entry.seq).await?;
                    report.confirmed += 1;
                    if let Err(error) = self.apply_confirmed(&entry, &target, row).await {
                        tracing::warn!(
                            "#{} was accepted remotely but {}/{target} was not reconciled locally: {error}",
                            entry.seq,
                            entry.collection
                        );
                    }
                }
                Err(error) => {
                    let rejected = !error.is_retryable();
                    self.log
                        .record_failure(entry.seq, &error.to_string(), rejected)
                        .await?;
                    if rejected {
                        report.rejected += 1;
                    } else {
                        report.failed += 1;
                    }
                    tracing::warn!(
                        "Replay of #{} ({} on {}/{}) failed: {error}",
                        entry.seq,
                        entry.kind,
                        entry.collection,
                        target
                    );
                    if entry.kind == OperationKind::Create {
                        blocked.insert((entry.collection, entry.target_id.clone()));
                    }
                }
            }
        }
        Ok(report)
    }

    /// Return a rejected entry to the replayable set
    pub async fn retry_rejected(&self, seq: i64) -> Result<()> {
        self.log.requeue(seq).await?;
        tracing::info!("Requeued pending operation #{seq}");
        self.refresh_status().await?;
        Ok(())
    }

    /// Drop a queue entry for good.
    ///
    /// Discarding a create also drops its optimistic local copy and every
    /// later entry aimed at the same client id.
    pub async fn discard(&self, seq: i64) -> Result<PendingOperation> {
        let entry = self
            .log
            .get(seq)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pending operation #{seq}")))?;
        self.log.remove(seq).await?;

        if entry.kind == OperationKind::Create {
            for later in self.log.list_ordered().await? {
                if later.seq > seq
                    && later.collection == entry.collection
                    && later.target_id == entry.target_id
                {
                    self.log.remove(later.seq).await?;
                }
            }
            self.store
                .delete(entry.collection, &entry.target_id)
                .await?;
        }

        tracing::info!(
            "Discarded pending operation #{seq} ({} on {}/{})",
            entry.kind,
            entry.collection,
            entry.target_id
        );
        self.refresh_status().await?;
        Ok(entry)
    }

    /// Recompute the status from the queue and connectivity, then publish it
    pub async fn refresh_status(&self) -> Result<SyncStatus> {
        let depth = self.log.depth().await?;
        let is_syncing = self.status.borrow().is_syncing;
        let status = SyncStatus::new(self.connectivity.current(), is_syncing, depth);
        self.status.send_replace(status);
        Ok(status)
    }

    fn set_syncing(&self, is_syncing: bool) {
        self.status.send_modify(|status| {
            *status = SyncStatus {
                is_syncing,
                state: crate::state::SyncState::derive(
                    status.is_online,
                    is_syncing,
                    status.pending_count,
                    status.rejected_count,
                ),
                ..*status
            };
        });
    }

    /// Current status, freshly read from the queue
    pub async fn status(&self) -> Result<SyncStatus> {
        self.refresh_status().await
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Spawn the transition listener and the backstop poll.
    pub fn start(&self) -> SyncHandle {
        let listener = {
            let engine = self.clone();
            let mut online = self.connectivity.subscribe();
            tokio::spawn(async move {
                while online.changed().await.is_ok() {
                    let is_online = *online.borrow_and_update();
                    if let Err(error) = engine.refresh_status().await {
                        tracing::warn!("Failed to refresh sync status: {error}");
                    }
                    if is_online {
                        if let Err(error) = engine.drain().await {
                            tracing::warn!("Drain after reconnect failed: {error}");
                        }
                    }
                }
            })
        };

        let poll = {
            let engine = self.clone();
            let period = self.config.poll_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    match engine.refresh_status().await {
                        Ok(status) if status.is_online && status.replayable_count() > 0 => {
                            if let Err(error) = engine.drain().await {
                                tracing::warn!("Backstop drain failed: {error}");
                            }
                        }
                        Ok(_) => {}
                        Err(error) => tracing::warn!("Backstop poll failed: {error}"),
                    }
                }
            })
        };

        SyncHandle {
            tasks: vec![listener, poll],
        }
    }
}

fn identity_for(requested: &str, target: &str) -> Identity {
    Identity {
        client_id: requested.to_string(),
        server_id: (requested != target).then(|| target.to_string()),
    }
}
