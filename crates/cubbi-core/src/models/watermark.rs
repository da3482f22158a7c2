//! Hydration watermark model

use serde::{Deserialize, Serialize};

use super::Collection;

/// Last successful hydration of a collection (informational only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub collection: Collection,
    /// Unix ms
    pub last_sync: i64,
}

impl SyncWatermark {
    /// Age of the watermark relative to `now_ms`, in milliseconds
    pub const fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.last_sync)
    }
}
