//! Shared cross-platform state types.

use serde::{Deserialize, Serialize};

/// Unified sync state used by every client surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Offline,
    Syncing,
    Pending,
    Synced,
    Error,
}

impl SyncState {
    /// Summarize connectivity and queue depth into a single state.
    pub const fn derive(
        is_online: bool,
        is_syncing: bool,
        pending_count: usize,
        rejected_count: usize,
    ) -> Self {
        if !is_online {
            Self::Offline
        } else if is_syncing {
            Self::Syncing
        } else if rejected_count > 0 {
            Self::Error
        } else if pending_count > 0 {
            Self::Pending
        } else {
            Self::Synced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_wins_over_everything() {
        assert_eq!(SyncState::derive(false, true, 3, 1), SyncState::Offline);
    }

    #[test]
    fn rejected_entries_surface_as_error() {
        assert_eq!(SyncState::derive(true, false, 2, 1), SyncState::Error);
        assert_eq!(SyncState::derive(true, false, 2, 0), SyncState::Pending);
        assert_eq!(SyncState::derive(true, false, 0, 0), SyncState::Synced);
    }
}
