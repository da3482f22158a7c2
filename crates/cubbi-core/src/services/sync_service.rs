//! Facade wiring the cache, queue, connectivity, engine and hydrator.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{Database, LocalStore, PendingOperationLog};
use crate::error::{Error, Result};
use crate::models::{Child, Collection, Incident, Patch, PendingOperation, Record, SyncEntity};
use crate::remote::RemoteDataGateway;
use crate::sync::{
    spawn_change_observer, CacheHydrator, DrainReport, HydrationReport, MutationOutcome,
    RemoteChange, ScopeHydration, SyncEngine, SyncHandle, SyncStatus,
};

/// Entry point for clients: one instance per signed-in device profile.
#[derive(Clone)]
pub struct SyncService {
    engine: SyncEngine,
    hydrator: CacheHydrator,
    remote: Arc<dyn RemoteDataGateway>,
}

impl SyncService {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteDataGateway>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Self {
        let store = LocalStore::new(db.clone());
        let log = PendingOperationLog::new(db);
        let engine = SyncEngine::new(
            store.clone(),
            log.clone(),
            connectivity,
            Arc::clone(&remote),
            config,
        );
        let hydrator = CacheHydrator::new(store, log, Arc::clone(&remote), config);
        Self {
            engine,
            hydrator,
            remote,
        }
    }

    /// Open the service over a database file (created if missing).
    pub fn open_path(
        path: impl AsRef<Path>,
        remote: Arc<dyn RemoteDataGateway>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Result<Self> {
        let db = Database::open(path)?;
        Ok(Self::new(db, remote, connectivity, config))
    }

    /// In-memory service (primarily for tests).
    pub fn open_in_memory(
        remote: Arc<dyn RemoteDataGateway>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Result<Self> {
        Ok(Self::new(
            Database::open_in_memory()?,
            remote,
            connectivity,
            config,
        ))
    }

    pub const fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub const fn hydrator(&self) -> &CacheHydrator {
        &self.hydrator
    }

    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        self.engine.connectivity()
    }

    /// Records of one child
    pub fn records(&self, child_id: impl Into<String>) -> ScopedCollection<Record> {
        ScopedCollection::new(self.clone(), Some(child_id.into()))
    }

    /// Incidents of one child
    pub fn incidents(&self, child_id: impl Into<String>) -> ScopedCollection<Incident> {
        ScopedCollection::new(self.clone(), Some(child_id.into()))
    }

    /// Children visible to the signed-in user
    pub fn children(&self) -> ScopedCollection<Child> {
        ScopedCollection::new(self.clone(), None)
    }

    pub async fn offline_sync_status(&self) -> Result<SyncStatus> {
        self.engine.status().await
    }

    /// Drain the queue now
    pub async fn sync_now(&self) -> Result<DrainReport> {
        self.engine.drain().await
    }

    /// Start the reconnect listener and the backstop poll.
    pub fn start_background(&self) -> SyncHandle {
        self.engine.start()
    }

    /// Hydrate the signed-in user's children
    pub async fn hydrate_children(&self) -> Result<HydrationReport> {
        let session = self
            .remote
            .current_session()
            .await
            .ok_or(Error::NoSession)?;
        self.hydrator.hydrate_children(&session.user.id).await
    }

    pub async fn hydrate_child_scope(&self, child_id: &str) -> Result<ScopeHydration> {
        self.hydrator.hydrate_child_scope(child_id).await
    }

    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        self.engine.log().list_ordered().await
    }

    pub async fn retry_rejected(&self, seq: i64) -> Result<()> {
        self.engine.retry_rejected(seq).await
    }

    pub async fn discard(&self, seq: i64) -> Result<PendingOperation> {
        self.engine.discard(seq).await
    }

    /// Re-hydrate on remote change notifications until the sender closes
    pub fn observe_remote_changes(&self, changes: mpsc::Receiver<RemoteChange>) -> JoinHandle<()> {
        spawn_change_observer(self.hydrator.clone(), changes)
    }

    /// Wipe every cached collection and the queue.
    ///
    /// The queue's sequence counter is kept, so ids stay unique for the install.
    pub async fn sign_out(&self) -> Result<()> {
        self.engine.store().clear_all().await?;
        self.engine.log().clear_all().await?;
        self.engine.refresh_status().await?;
        tracing::info!("Local cache cleared");
        Ok(())
    }
}

/// Cached items plus the connectivity flag, as rendered by a list view
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot<E> {
    /// Newest first
    pub items: Vec<E>,
    pub is_online: bool,
    /// Set when the refetch behind this snapshot failed and cached rows were kept
    pub stale: bool,
}

/// One collection, optionally scoped to an owning child.
pub struct ScopedCollection<E> {
    service: SyncService,
    owner: Option<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for ScopedCollection<E> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            owner: self.owner.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: SyncEntity> ScopedCollection<E> {
    const fn new(service: SyncService, owner: Option<String>) -> Self {
        Self {
            service,
            owner,
            _entity: PhantomData,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Current cache contents
    pub async fn snapshot(&self) -> Result<CollectionSnapshot<E>> {
        self.read(false).await
    }

    async fn read(&self, stale: bool) -> Result<CollectionSnapshot<E>> {
        let items = self
            .service
            .engine
            .store()
            .get_all::<E>(self.owner.as_deref())
            .await?;
        Ok(CollectionSnapshot {
            items,
            is_online: self.service.connectivity().current(),
            stale,
        })
    }

    /// Create in this scope; the scope's child fills an empty owner field.
    pub async fn create(&self, draft: E::Draft) -> Result<MutationOutcome<E>> {
        self.service
            .engine
            .create_in::<E>(draft, self.owner.as_deref())
            .await
    }

    pub async fn update(&self, id: &str, patch: Patch) -> Result<MutationOutcome<E>> {
        self.service.engine.update::<E>(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<MutationOutcome<E>> {
        self.service.engine.delete::<E>(id).await
    }

    /// Re-hydrate the scope, then read the cache.
    ///
    /// Remote failures and a missing session leave the cache as it was and
    /// mark the snapshot stale; local failures are returned.
    pub async fn refetch(&self) -> Result<CollectionSnapshot<E>> {
        let hydrated = match (E::COLLECTION, self.owner.as_deref()) {
            (Collection::Children, _) | (_, None) => {
                self.service.hydrate_children().await.map(|_| ())
            }
            (Collection::Records | Collection::Incidents, Some(child_id)) => {
                self.service.hydrate_child_scope(child_id).await.map(|_| ())
            }
        };

        match hydrated {
            Ok(()) => self.read(false).await,
            Err(error @ (Error::Remote(_) | Error::NoSession)) => {
                tracing::warn!("Refetch of {} failed: {error}", E::COLLECTION);
                self.read(true).await
            }
            Err(error) => Err(error),
        }
    }
}
