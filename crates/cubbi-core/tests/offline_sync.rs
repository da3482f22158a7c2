//! End-to-end offline/online behavior of the sync service against an
//! in-memory remote.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cubbi_core::connectivity::ConnectivityMonitor;
use cubbi_core::models::{Collection, NewRecord, OperationKind, Patch, Record, RecordKind};
use cubbi_core::remote::{
    CallKind, MemoryGateway, RemoteDataGateway, RemoteError, RemoteResult, RemoteSession,
    SelectQuery,
};
use cubbi_core::{Confirmation, SyncConfig, SyncService, SyncState};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

struct Fixture {
    service: SyncService,
    remote: MemoryGateway,
}

impl Fixture {
    fn new(online: bool) -> Self {
        Self::with_config(online, SyncConfig::default())
    }

    fn with_config(online: bool, config: SyncConfig) -> Self {
        let remote = MemoryGateway::signed_in("u1");
        let service = SyncService::open_in_memory(
            Arc::new(remote.clone()),
            ConnectivityMonitor::new(online),
            config,
        )
        .unwrap();
        Self { service, remote }
    }

    fn go_online(&self) {
        self.service.connectivity().set_online(true);
    }

    async fn pending_count(&self) -> usize {
        self.service
            .offline_sync_status()
            .await
            .unwrap()
            .pending_count
    }

    async fn local_records(&self, child: &str) -> Vec<Record> {
        self.service.records(child).snapshot().await.unwrap().items
    }

    fn remote_records(&self) -> Vec<Record> {
        self.remote
            .rows(Collection::Records)
            .into_iter()
            .map(|row| serde_json::from_value(row).unwrap())
            .collect()
    }
}

fn symptom(title: &str) -> NewRecord {
    NewRecord::new(RecordKind::Symptom, title).child("c1")
}

#[tokio::test]
async fn offline_create_is_visible_with_temporary_id() {
    let fixture = Fixture::new(false);
    let outcome = fixture
        .service
        .records("c1")
        .create(symptom("Febre"))
        .await
        .unwrap();

    let items = fixture.local_records("c1").await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, outcome.identity.client_id);
    assert_eq!(items[0].title, "Febre");
    assert_eq!(outcome.identity.server_id, None);
    assert_eq!(fixture.pending_count().await, 1);
}

#[tokio::test]
async fn reconnect_drain_swaps_in_server_id() {
    let fixture = Fixture::new(false);
    let outcome = fixture
        .service
        .records("c1")
        .create(symptom("Febre"))
        .await
        .unwrap();
    let client_id = outcome.identity.client_id;

    fixture.go_online();
    let report = fixture.service.sync_now().await.unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(fixture.pending_count().await, 0);

    let items = fixture.local_records("c1").await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "srv-1");
    assert_eq!(
        fixture
            .service
            .engine()
            .resolve_id(Collection::Records, &client_id)
            .await
            .unwrap(),
        "srv-1"
    );
}

#[tokio::test]
async fn offline_create_then_edit_replays_both_in_order() {
    let fixture = Fixture::new(false);
    let records = fixture.service.records("c1");
    let created = records.create(symptom("Febre")).await.unwrap();
    records
        .update(
            &created.identity.client_id,
            Patch::new().set("notes", "primeira nota"),
        )
        .await
        .unwrap();
    records
        .update(
            &created.identity.client_id,
            Patch::new().set("notes", "nota final"),
        )
        .await
        .unwrap();

    fixture.go_online();
    fixture.service.sync_now().await.unwrap();

    assert_eq!(fixture.remote.calls_of(CallKind::Insert).len(), 1);
    let updates = fixture.remote.calls_of(CallKind::Update);
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|call| call.target.as_deref() == Some("srv-1")));

    let remote_row = fixture.remote.row(Collection::Records, "srv-1").unwrap();
    assert_eq!(remote_row["notes"], "nota final");
    let local = fixture.local_records("c1").await;
    assert_eq!(local[0].notes.as_deref(), Some("nota final"));
}

#[tokio::test]
async fn hydration_drops_stale_rows_only_inside_the_page() {
    let fixture = Fixture::with_config(true, SyncConfig::default().with_record_hydration_cap(2));
    let now = chrono::Utc::now();
    let row = |id: &str, hours_ago: i64| {
        json!({
            "id": id,
            "type": "symptom",
            "title": id,
            "child_id": "c1",
            "created_at": (now - chrono::Duration::hours(hours_ago)).to_rfc3339(),
        })
    };
    fixture
        .remote
        .seed(Collection::Records, [row("a", 1), row("b", 4), row("gone", 2), row("old", 90)]);
    fixture
        .service
        .hydrate_child_scope("c1")
        .await
        .unwrap();
    assert_eq!(fixture.local_records("c1").await.len(), 2);

    // Another device deletes "gone"; "old" was never in the window.
    fixture.remote.remove_row(Collection::Records, "gone");
    let mut stale_old: Record = serde_json::from_value(row("old", 90)).unwrap();
    stale_old.notes = Some("cached long ago".into());
    fixture.service.engine().store().put(&stale_old).await.unwrap();

    let snapshot = fixture.service.records("c1").refetch().await.unwrap();
    let ids: Vec<&str> = snapshot.items.iter().map(|record| record.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "old"]);
}

#[tokio::test]
async fn repeated_failed_replay_keeps_entry_queued() {
    let fixture = Fixture::new(false);
    fixture
        .service
        .records("c1")
        .create(symptom("Vômito"))
        .await
        .unwrap();
    fixture.remote.fail_always(RemoteError::Network("unreachable".into()));
    fixture.go_online();

    for _ in 0..3 {
        let report = fixture.service.sync_now().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(fixture.pending_count().await, 1);
    }

    let pending = fixture.service.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 3);
    assert!(!pending[0].rejected);
    assert_eq!(pending[0].last_error.as_deref(), Some("Network failure: unreachable"));
}

#[tokio::test]
async fn create_is_visible_regardless_of_connectivity() {
    for online in [false, true] {
        let fixture = Fixture::new(online);
        let outcome = fixture
            .service
            .records("c1")
            .create(symptom("Tosse"))
            .await
            .unwrap();
        let items = fixture.local_records("c1").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, outcome.identity.current());
    }
}

#[tokio::test]
async fn offline_history_converges_with_remote() {
    let fixture = Fixture::new(false);
    let records = fixture.service.records("c1");

    let a = records.create(symptom("A")).await.unwrap().identity.client_id;
    let b = records.create(symptom("B")).await.unwrap().identity.client_id;
    records
        .update(&a, Patch::new().set("temperature", 38.2))
        .await
        .unwrap();
    records.delete(&b).await.unwrap();
    let c = records.create(symptom("C")).await.unwrap().identity.client_id;
    records
        .update(&a, Patch::new().set("notes", "baixou"))
        .await
        .unwrap();
    records
        .update(&c, Patch::new().set("title", "C revisado"))
        .await
        .unwrap();
    assert_eq!(fixture.pending_count().await, 7);

    fixture.go_online();
    let report = fixture.service.sync_now().await.unwrap();
    assert_eq!(report.confirmed, 7);

    let mut local = fixture.local_records("c1").await;
    let mut remote = fixture.remote_records();
    local.sort_by(|a, b| a.id.cmp(&b.id));
    remote.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(local, remote);
    assert_eq!(local.len(), 2);
    let a_final = local.iter().find(|record| record.title == "A").unwrap();
    assert_eq!(a_final.temperature, Some(38.2));
    assert_eq!(a_final.notes.as_deref(), Some("baixou"));
}

#[tokio::test]
async fn create_update_delete_of_one_record_leaves_nothing_behind() {
    let fixture = Fixture::new(false);
    let records = fixture.service.records("c1");
    let id = records.create(symptom("R")).await.unwrap().identity.client_id;
    records
        .update(&id, Patch::new().set("notes", "x"))
        .await
        .unwrap();
    records.delete(&id).await.unwrap();

    fixture.go_online();
    fixture.service.sync_now().await.unwrap();

    let kinds: Vec<CallKind> = fixture.remote.calls().iter().map(|call| call.kind).collect();
    assert_eq!(kinds, vec![CallKind::Insert, CallKind::Update, CallKind::Delete]);
    assert!(fixture.remote.rows(Collection::Records).is_empty());
    assert!(fixture.local_records("c1").await.is_empty());
    assert_eq!(fixture.pending_count().await, 0);
}

#[tokio::test]
async fn sequence_ids_grow_across_restart_and_sign_out() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("cubbi.db");
    let open = || {
        SyncService::open_path(
            &path,
            Arc::new(MemoryGateway::signed_in("u1")),
            ConnectivityMonitor::new(false),
            SyncConfig::default(),
        )
        .unwrap()
    };

    let queued_seq = |confirmation: Confirmation| match confirmation {
        Confirmation::Queued { seq } => seq,
        other => panic!("expected queued entry, got {other:?}"),
    };

    let first = {
        let service = open();
        let outcome = service.records("c1").create(symptom("1")).await.unwrap();
        queued_seq(outcome.confirmation)
    };

    let service = open();
    assert_eq!(service.pending_operations().await.unwrap().len(), 1);
    let second = queued_seq(
        service
            .records("c1")
            .create(symptom("2"))
            .await
            .unwrap()
            .confirmation,
    );
    assert!(second > first);

    service.sign_out().await.unwrap();
    let third = queued_seq(
        service
            .records("c1")
            .create(symptom("3"))
            .await
            .unwrap()
            .confirmation,
    );
    assert!(third > second);
}

#[tokio::test]
async fn one_failed_entry_does_not_block_the_rest() {
    let fixture = Fixture::new(false);
    let records = fixture.service.records("c1");
    let mut seqs = Vec::new();
    for title in ["1", "2", "3", "4", "5"] {
        let outcome = records.create(symptom(title)).await.unwrap();
        let Confirmation::Queued { seq } = outcome.confirmation else {
            panic!("expected queued create");
        };
        seqs.push(seq);
    }

    fixture.go_online();
    fixture.remote.fail_on_calls(&[2], &RemoteError::Timeout);
    let report = fixture.service.sync_now().await.unwrap();
    assert_eq!(report.attempted, 5);
    assert_eq!(report.confirmed, 4);
    assert_eq!(report.failed, 1);

    let outcomes: Vec<bool> = fixture
        .remote
        .calls()
        .iter()
        .map(|call| call.succeeded)
        .collect();
    assert_eq!(outcomes, vec![true, false, true, true, true]);
    let titles: Vec<String> = fixture
        .remote
        .calls()
        .iter()
        .map(|call| call.payload["title"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(titles, vec!["1", "2", "3", "4", "5"]);

    let remaining: Vec<i64> = fixture
        .service
        .pending_operations()
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.seq)
        .collect();
    assert_eq!(remaining, vec![seqs[1]]);
}

#[tokio::test]
async fn rejected_create_parks_its_followers() {
    let fixture = Fixture::new(false);
    let records = fixture.service.records("c1");
    let doomed = records.create(symptom("negado")).await.unwrap();
    records
        .update(&doomed.identity.client_id, Patch::new().set("notes", "x"))
        .await
        .unwrap();
    records.create(symptom("ok")).await.unwrap();

    fixture.go_online();
    fixture
        .remote
        .fail_on_calls(&[1], &RemoteError::from_status(403, "row-level security"));
    let report = fixture.service.sync_now().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.confirmed, 1);

    let status = fixture.service.offline_sync_status().await.unwrap();
    assert_eq!(status.pending_count, 2);
    assert_eq!(status.rejected_count, 1);
    assert_eq!(status.state, SyncState::Error);

    // A later drain does not retry the rejected create.
    fixture.remote.clear_calls();
    let report = fixture.service.sync_now().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.deferred, 1);
    assert!(fixture.remote.calls().is_empty());

    let pending = fixture.service.pending_operations().await.unwrap();
    assert_eq!(pending[0].kind, OperationKind::Create);
    fixture.service.retry_rejected(pending[0].seq).await.unwrap();
    let report = fixture.service.sync_now().await.unwrap();
    assert_eq!(report.confirmed, 2);
    assert_eq!(fixture.pending_count().await, 0);
}

/// Gateway that reports the network gone after its first mutation
struct FlakyLink {
    inner: MemoryGateway,
    monitor: ConnectivityMonitor,
}

#[async_trait]
impl RemoteDataGateway for FlakyLink {
    async fn insert(&self, collection: Collection, payload: &Value) -> RemoteResult<Value> {
        let row = self.inner.insert(collection, payload).await;
        self.monitor.set_online(false);
        row
    }

    async fn update(&self, collection: Collection, id: &str, patch: &Value) -> RemoteResult<Value> {
        self.inner.update(collection, id, patch).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        self.inner.delete(collection, id).await
    }

    async fn select_all(
        &self,
        collection: Collection,
        query: &SelectQuery,
    ) -> RemoteResult<Vec<Value>> {
        self.inner.select_all(collection, query).await
    }

    async fn current_session(&self) -> Option<RemoteSession> {
        self.inner.current_session().await
    }
}

#[tokio::test]
async fn drain_stops_when_connectivity_drops() {
    let monitor = ConnectivityMonitor::new(false);
    let inner = MemoryGateway::signed_in("u1");
    let service = SyncService::open_in_memory(
        Arc::new(FlakyLink {
            inner: inner.clone(),
            monitor: monitor.clone(),
        }),
        monitor.clone(),
        SyncConfig::default(),
    )
    .unwrap();
    for title in ["1", "2", "3"] {
        service.records("c1").create(symptom(title)).await.unwrap();
    }

    monitor.set_online(true);
    let report = service.sync_now().await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.confirmed, 1);
    assert_eq!(service.pending_operations().await.unwrap().len(), 2);
    assert_eq!(inner.rows(Collection::Records).len(), 1);
}

/// Gateway whose insert answers carry a symptom type this client does not know
struct NewerServer {
    inner: MemoryGateway,
    title: &'static str,
}

#[async_trait]
impl RemoteDataGateway for NewerServer {
    async fn insert(&self, collection: Collection, payload: &Value) -> RemoteResult<Value> {
        let mut row = self.inner.insert(collection, payload).await?;
        if row["title"] == self.title {
            row["symptom_type"] = json!("febre_alta");
        }
        Ok(row)
    }

    async fn update(&self, collection: Collection, id: &str, patch: &Value) -> RemoteResult<Value> {
        self.inner.update(collection, id, patch).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        self.inner.delete(collection, id).await
    }

    async fn select_all(
        &self,
        collection: Collection,
        query: &SelectQuery,
    ) -> RemoteResult<Vec<Value>> {
        self.inner.select_all(collection, query).await
    }

    async fn current_session(&self) -> Option<RemoteSession> {
        self.inner.current_session().await
    }
}

fn newer_server(online: bool) -> (SyncService, MemoryGateway) {
    let inner = MemoryGateway::signed_in("u1");
    let service = SyncService::open_in_memory(
        Arc::new(NewerServer {
            inner: inner.clone(),
            title: "A",
        }),
        ConnectivityMonitor::new(online),
        SyncConfig::default(),
    )
    .unwrap();
    (service, inner)
}

#[tokio::test]
async fn undecodable_insert_answer_still_confirms_the_entry() {
    let (service, inner) = newer_server(false);
    let a = service.records("c1").create(symptom("A")).await.unwrap();
    service.records("c1").create(symptom("B")).await.unwrap();

    service.connectivity().set_online(true);
    let report = service.sync_now().await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.confirmed, 2);
    assert!(service.pending_operations().await.unwrap().is_empty());
    assert_eq!(inner.rows(Collection::Records).len(), 2);

    let report = service.sync_now().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(inner.calls_of(CallKind::Insert).len(), 2);

    let a_id = service
        .engine()
        .resolve_id(Collection::Records, &a.identity.client_id)
        .await
        .unwrap();
    assert_eq!(a_id, "srv-1");
    let mut local: Vec<String> = service
        .records("c1")
        .snapshot()
        .await
        .unwrap()
        .items
        .into_iter()
        .map(|record| record.id)
        .collect();
    local.sort();
    assert_eq!(local, vec!["srv-1", "srv-2"]);
}

#[tokio::test]
async fn undecodable_insert_answer_online_keeps_local_copy() {
    let (service, inner) = newer_server(true);
    let outcome = service.records("c1").create(symptom("A")).await.unwrap();

    assert_eq!(outcome.confirmation, Confirmation::Confirmed);
    assert_eq!(outcome.identity.server_id.as_deref(), Some("srv-1"));
    let stored = outcome.value.unwrap();
    assert_eq!(stored.id, "srv-1");
    assert_eq!(stored.title, "A");
    assert!(service.pending_operations().await.unwrap().is_empty());
    assert_eq!(inner.rows(Collection::Records).len(), 1);
}

#[tokio::test]
async fn background_listener_drains_on_reconnect() {
    let fixture = Fixture::with_config(
        false,
        SyncConfig::default().with_poll_interval(Duration::from_secs(3600)),
    );
    fixture
        .service
        .records("c1")
        .create(symptom("Febre"))
        .await
        .unwrap();
    let handle = fixture.service.start_background();

    fixture.go_online();
    let mut status = fixture.service.engine().watch_status();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = *status.borrow_and_update();
            if current.is_online && current.pending_count == 0 && !current.is_syncing {
                break;
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(fixture.local_records("c1").await[0].id, "srv-1");
    handle.shutdown();
}

#[tokio::test]
async fn backstop_poll_drains_without_a_transition() {
    let fixture = Fixture::with_config(
        true,
        SyncConfig::default().with_poll_interval(Duration::from_millis(20)),
    );
    fixture.remote.set_session(None);
    fixture
        .service
        .records("c1")
        .create(symptom("Febre"))
        .await
        .unwrap();
    assert_eq!(fixture.pending_count().await, 1);

    let handle = fixture.service.start_background();
    fixture.remote.set_session(Some(cubbi_core::models::SessionUser {
        id: "u1".into(),
        email: None,
    }));

    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.pending_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    drop(handle);
    assert_eq!(fixture.remote.rows(Collection::Records).len(), 1);
}
