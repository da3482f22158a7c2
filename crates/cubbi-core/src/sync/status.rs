//! Observable sync status

use serde::Serialize;

use crate::db::QueueDepth;
use crate::state::SyncState;

/// Snapshot of connectivity and queue depth shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    /// Every queued entry, rejected ones included
    pub pending_count: usize,
    pub rejected_count: usize,
    pub state: SyncState,
}

impl SyncStatus {
    pub const fn new(is_online: bool, is_syncing: bool, depth: QueueDepth) -> Self {
        Self {
            is_online,
            is_syncing,
            pending_count: depth.total,
            rejected_count: depth.rejected,
            state: SyncState::derive(is_online, is_syncing, depth.total, depth.rejected),
        }
    }

    /// Entries a drain would actually replay
    pub const fn replayable_count(&self) -> usize {
        self.pending_count.saturating_sub(self.rejected_count)
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new(false, false, QueueDepth::default())
    }
}
