//! Pending (unconfirmed) mutation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Collection;
use crate::error::Error;

/// Kind of queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown operation kind: {other}"))),
        }
    }
}

/// A durable queue entry awaiting remote confirmation.
///
/// The queued mutation (`kind`, `collection`, `target_id`, `payload`) is
/// immutable once enqueued. Replay bookkeeping (`attempts`, `last_error`,
/// `rejected`) is tracked beside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Replay order; ascending and never reused
    pub seq: i64,
    pub kind: OperationKind,
    pub collection: Collection,
    /// Entity the mutation targets (client id for unconfirmed creates)
    pub target_id: String,
    /// Create: full entity; update: patch object; delete: null
    pub payload: Value,
    /// Enqueue time (Unix ms)
    pub enqueued_at: i64,
    /// Failed replay attempts so far
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Permanently refused by the remote; skipped by drains until retried
    pub rejected: bool,
}

impl PendingOperation {
    pub const fn is_replayable(&self) -> bool {
        !self.rejected
    }
}
