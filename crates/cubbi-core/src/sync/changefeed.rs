//! Observer for remote change notifications.
//!
//! Changes pushed by the backend (writes from other devices or caregivers)
//! only trigger a re-hydration; they never touch the mutation queue.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::CacheHydrator;

/// A remote write reported by the backend's change feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteChange {
    Record { child_id: String },
    Incident { child_id: String },
    Child { user_id: String },
}

/// Re-hydrate the affected scope for every change received.
///
/// The task ends when every sender is dropped.
pub fn spawn_change_observer(
    hydrator: CacheHydrator,
    mut changes: mpsc::Receiver<RemoteChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            tracing::debug!("Remote change: {change:?}");
            let result = match &change {
                RemoteChange::Record { child_id } | RemoteChange::Incident { child_id } => {
                    hydrator.hydrate_child_scope(child_id).await.map(|_| ())
                }
                RemoteChange::Child { user_id } => {
                    hydrator.hydrate_children(user_id).await.map(|_| ())
                }
            };
            if let Err(error) = result {
                tracing::warn!("Refresh after {change:?} failed: {error}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::SyncConfig;
    use crate::db::{Database, LocalStore, PendingOperationLog};
    use crate::models::{Collection, Record};
    use crate::remote::{MemoryGateway, RemoteError};
    use serde_json::json;

    #[tokio::test]
    async fn changes_trigger_hydration() {
        let db = Database::open_in_memory().unwrap();
        let store = LocalStore::new(db.clone());
        let remote = MemoryGateway::signed_in("u1");
        remote.seed(
            Collection::Records,
            [json!({
                "id": "srv-1",
                "type": "medication",
                "title": "Paracetamol",
                "child_id": "c1",
                "created_at": "2025-05-01T09:00:00Z",
            })],
        );
        let hydrator = CacheHydrator::new(
            store.clone(),
            PendingOperationLog::new(db),
            Arc::new(remote.clone()),
            SyncConfig::default(),
        );

        let (sender, receiver) = mpsc::channel(4);
        let observer = spawn_change_observer(hydrator, receiver);

        remote.fail_on_calls(&[1], &RemoteError::Timeout);
        sender
            .send(RemoteChange::Record {
                child_id: "c1".into(),
            })
            .await
            .unwrap();
        sender
            .send(RemoteChange::Incident {
                child_id: "c1".into(),
            })
            .await
            .unwrap();
        drop(sender);
        observer.await.unwrap();

        let records = store.get_all::<Record>(Some("c1")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Paracetamol");
    }
}
