//! Remote data gateway contract and its implementations.
//!
//! The hosted backend is reached through [`RemoteDataGateway`]. The engine
//! only sees JSON rows; typed decoding happens at the edges.

mod memory;
mod postgrest;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Collection, SessionUser};

pub use memory::{CallKind, MemoryGateway, RemoteCall};
pub use postgrest::PostgrestGateway;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Remote request timed out")]
    Timeout,
    #[error("Remote server error: {message} ({status})")]
    Server { status: u16, message: String },
    #[error("Remote rejected the request: {message} ({status})")]
    Rejected { status: u16, message: String },
    #[error("Remote session is missing or expired")]
    Unauthenticated,
    #[error("Invalid remote response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Classify an HTTP failure status.
    ///
    /// 408, 429 and 5xx are transient; 401 means the session is gone; any
    /// other status is a permanent rejection of this request.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthenticated,
            408 | 429 | 500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Whether replaying the same request later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Server { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Authenticated session reported by the gateway
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub access_token: String,
    pub user: SessionUser,
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteSession")
            .field("access_token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

/// Filter, ordering and limit for [`RemoteDataGateway::select_all`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    /// Equality filters (column, value)
    pub filters: Vec<(String, Value)>,
    /// Ordering column and whether it is descending
    pub order_by: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some((column.into(), true));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Client of the hosted backend's relational store.
#[async_trait]
pub trait RemoteDataGateway: Send + Sync {
    /// Insert a row and return the stored row (with its server id)
    async fn insert(&self, collection: Collection, payload: &Value) -> RemoteResult<Value>;

    /// Patch the row with `id` and return its new state
    async fn update(&self, collection: Collection, id: &str, patch: &Value) -> RemoteResult<Value>;

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()>;

    async fn select_all(&self, collection: Collection, query: &SelectQuery)
        -> RemoteResult<Vec<Value>>;

    async fn current_session(&self) -> Option<RemoteSession>;
}

/// Gateway used when no remote is configured: nothing is ever reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnreachableGateway;

impl UnreachableGateway {
    fn unreachable() -> RemoteError {
        RemoteError::Network("no remote store is configured".to_string())
    }
}

#[async_trait]
impl RemoteDataGateway for UnreachableGateway {
    async fn insert(&self, _collection: Collection, _payload: &Value) -> RemoteResult<Value> {
        Err(Self::unreachable())
    }

    async fn update(&self, _collection: Collection, _id: &str, _patch: &Value) -> RemoteResult<Value> {
        Err(Self::unreachable())
    }

    async fn delete(&self, _collection: Collection, _id: &str) -> RemoteResult<()> {
        Err(Self::unreachable())
    }

    async fn select_all(
        &self,
        _collection: Collection,
        _query: &SelectQuery,
    ) -> RemoteResult<Vec<Value>> {
        Err(Self::unreachable())
    }

    async fn current_session(&self) -> Option<RemoteSession> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(RemoteError::from_status(503, "down").is_retryable());
        assert!(RemoteError::from_status(429, "slow down").is_retryable());
        assert!(RemoteError::from_status(408, "timeout").is_retryable());
        assert!(!RemoteError::from_status(403, "rls").is_retryable());
        assert!(!RemoteError::from_status(422, "invalid").is_retryable());
        assert_eq!(
            RemoteError::from_status(401, "jwt expired"),
            RemoteError::Unauthenticated
        );
        assert!(RemoteError::Timeout.is_retryable());
        assert!(!RemoteError::InvalidResponse("garbage".into()).is_retryable());
    }

    #[test]
    fn session_debug_redacts_token() {
        let session = RemoteSession {
            access_token: "secret".to_string(),
            user: SessionUser {
                id: "u1".to_string(),
                email: None,
            },
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn select_query_builder() {
        let query = SelectQuery::new()
            .eq("child_id", "c1")
            .order_desc("created_at")
            .limit(10);
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.order_by, Some(("created_at".to_string(), true)));
        assert_eq!(query.limit, Some(10));
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_retryably() {
        let gateway = UnreachableGateway;
        let error = gateway.delete(Collection::Records, "r1").await.unwrap_err();
        assert!(error.is_retryable());
        assert!(gateway.current_session().await.is_none());
    }
}
