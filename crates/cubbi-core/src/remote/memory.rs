//! In-process remote store for tests and offline demos

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{RemoteDataGateway, RemoteError, RemoteResult, RemoteSession, SelectQuery};
use crate::models::{Collection, SessionUser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Insert,
    Update,
    Delete,
    Select,
}

/// One request received by a [`MemoryGateway`], successful or not
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub kind: CallKind,
    pub collection: Collection,
    /// Row id for updates and deletes
    pub target: Option<String>,
    pub payload: Value,
    pub succeeded: bool,
}

#[derive(Default)]
struct MemoryState {
    rows: HashMap<Collection, Vec<Value>>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    fail_always: Option<RemoteError>,
    /// Absolute call numbers (1-based) that must fail
    fail_on: HashMap<usize, RemoteError>,
    session: Option<RemoteSession>,
}

impl MemoryState {
    /// Log a call and decide whether it fails
    fn admit(
        &mut self,
        kind: CallKind,
        collection: Collection,
        target: Option<&str>,
        payload: &Value,
    ) -> RemoteResult<()> {
        let number = self.calls.len() + 1;
        let failure = self
            .fail_on
            .remove(&number)
            .or_else(|| self.fail_always.clone());
        self.calls.push(RemoteCall {
            kind,
            collection,
            target: target.map(str::to_string),
            payload: payload.clone(),
            succeeded: failure.is_none(),
        });
        failure.map_or(Ok(()), Err)
    }

    fn table(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.rows.entry(collection).or_default()
    }
}

/// Remote store kept in memory.
///
/// Assigns `srv-<n>` identifiers, applies equality filters, ordering and
/// limits, and records every call. Failures can be injected for all calls or
/// for specific upcoming ones.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGateway {
    /// A gateway without a session
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway with an active session for `user_id`
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let gateway = Self::new();
        gateway.set_session(Some(SessionUser {
            id: user_id.into(),
            email: None,
        }));
        gateway
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_session(&self, user: Option<SessionUser>) {
        self.state().session = user.map(|user| RemoteSession {
            access_token: format!("memory-token-{}", user.id),
            user,
        });
    }

    /// Make every call fail with `error` until [`Self::recover`]
    pub fn fail_always(&self, error: RemoteError) {
        self.state().fail_always = Some(error);
    }

    /// Make the n-th upcoming calls fail (1 is the next call)
    pub fn fail_on_calls(&self, upcoming: &[usize], error: &RemoteError) {
        let mut state = self.state();
        let base = state.calls.len();
        for offset in upcoming {
            state.fail_on.insert(base + offset, error.clone());
        }
    }

    pub fn recover(&self) {
        let mut state = self.state();
        state.fail_always = None;
        state.fail_on.clear();
    }

    /// Insert rows as-is, bypassing the call log
    pub fn seed(&self, collection: Collection, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.state();
        let table = state.table(collection);
        for row in rows {
            let id = row_id(&row).map(str::to_string);
            table.retain(|existing| id.is_none() || row_id(existing) != id.as_deref());
            table.push(row);
        }
    }

    /// Drop a row without logging a call (a write from another device)
    pub fn remove_row(&self, collection: Collection, id: &str) {
        self.state()
            .table(collection)
            .retain(|row| row_id(row) != Some(id));
    }

    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.state()
            .rows
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row(&self, collection: Collection, id: &str) -> Option<Value> {
        self.rows(collection)
            .into_iter()
            .find(|row| row_id(row) == Some(id))
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Calls of one kind, in arrival order
    pub fn calls_of(&self, kind: CallKind) -> Vec<RemoteCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state();
        state.calls.clear();
        state.fail_on.clear();
    }
}

#[async_trait]
impl RemoteDataGateway for MemoryGateway {
    async fn insert(&self, collection: Collection, payload: &Value) -> RemoteResult<Value> {
        let mut state = self.state();
        state.admit(CallKind::Insert, collection, None, payload)?;

        let Value::Object(mut row) = payload.clone() else {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "insert payload must be an object".to_string(),
            });
        };
        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);
        row.insert("id".to_string(), Value::String(id));
        row.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let row = Value::Object(row);
        state.table(collection).push(row.clone());
        Ok(row)
    }

    async fn update(&self, collection: Collection, id: &str, patch: &Value) -> RemoteResult<Value> {
        let mut state = self.state();
        state.admit(CallKind::Update, collection, Some(id), patch)?;

        let Value::Object(fields) = patch else {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "update patch must be an object".to_string(),
            });
        };
        let row = state
            .table(collection)
            .iter_mut()
            .find(|row| row_id(row) == Some(id))
            .ok_or_else(|| RemoteError::Rejected {
                status: 404,
                message: format!("{collection}/{id} does not exist"),
            })?;
        if let Value::Object(existing) = row {
            for (field, value) in fields {
                if field != "id" {
                    existing.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.admit(CallKind::Delete, collection, Some(id), &Value::Null)?;
        state.table(collection).retain(|row| row_id(row) != Some(id));
        Ok(())
    }

    async fn select_all(
        &self,
        collection: Collection,
        query: &SelectQuery,
    ) -> RemoteResult<Vec<Value>> {
        let mut state = self.state();
        state.admit(CallKind::Select, collection, None, &Value::Null)?;

        let mut rows: Vec<Value> = state
            .table(collection)
            .iter()
            .filter(|row| {
                query
                    .filters
                    .iter()
                    .all(|(column, expected)| row.get(column) == Some(expected))
            })
            .cloned()
            .collect();

        if let Some((column, descending)) = &query.order_by {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(column), b.get(column));
                if *descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn current_session(&self) -> Option<RemoteSession> {
        self.state().session.clone()
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

/// Order JSON scalars: timestamps chronologically, numbers numerically,
/// other strings lexically, missing values first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
