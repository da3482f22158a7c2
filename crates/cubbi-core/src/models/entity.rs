//! Shared behavior of synchronized entities

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Collection;
use crate::error::{Error, Result};

/// Identity of the signed-in user, used to stamp new entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
}

/// An entity that lives in a local collection and is mirrored remotely.
///
/// Entities are stored as JSON documents keyed by [`SyncEntity::id`], with
/// the owner key and creation time extracted into indexed columns.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection this entity belongs to
    const COLLECTION: Collection;

    /// Remote column holding the owning child, if the collection is scoped
    const OWNER_FIELD: Option<&'static str> = None;

    /// Caller-supplied payload for `create`
    type Draft: Send;

    /// Build an optimistic entity with a fresh client identifier
    fn from_draft(draft: Self::Draft) -> Self;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Owning child identifier (secondary index key)
    fn owner_id(&self) -> Option<&str> {
        None
    }

    fn set_owner_id(&mut self, _owner: &str) {}

    fn created_at(&self) -> DateTime<Utc>;

    /// Fill creator fields from the active session when the draft left them empty
    fn stamp_creator(&mut self, _user: &SessionUser) {}

    /// Ordering key for recency queries (Unix ms)
    fn sort_key(&self) -> i64 {
        self.created_at().timestamp_millis()
    }

    /// Payload sent to the remote insert: the entity without its client id.
    fn insert_payload(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("id");
        }
        Ok(value)
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Partial update expressed as a JSON object of column → new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Map<String, Value>);

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field; `None` values clear the column.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Build a patch from an arbitrary JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidInput(format!(
                "Patch must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Reject empty patches and attempts to rewrite the identifier.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::InvalidInput("Patch has no fields".into()));
        }
        if self.0.contains_key("id") {
            return Err(Error::InvalidInput(
                "Patch cannot change an entity identifier".into(),
            ));
        }
        Ok(())
    }

    /// Apply this patch on top of an entity, returning the merged copy.
    pub fn apply_to<E: SyncEntity>(&self, entity: &E) -> Result<E> {
        self.validate()?;
        let mut value = serde_json::to_value(entity)?;
        let Value::Object(map) = &mut value else {
            return Err(Error::InvalidInput(format!(
                "{} entity is not a JSON object",
                E::COLLECTION
            )));
        };
        for (field, new_value) in &self.0 {
            map.insert(field.clone(), new_value.clone());
        }
        E::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRecord, Record, RecordKind};
    use serde_json::json;

    fn sample() -> Record {
        Record::from_draft(NewRecord::new(RecordKind::Symptom, "Febre").child("c1"))
    }

    #[test]
    fn patch_overwrites_selected_fields() {
        let record = sample();
        let patched = Patch::new()
            .set("notes", "deu dipirona")
            .set("temperature", 38.4)
            .apply_to(&record)
            .unwrap();

        assert_eq!(patched.id, record.id);
        assert_eq!(patched.notes.as_deref(), Some("deu dipirona"));
        assert_eq!(patched.temperature, Some(38.4));
        assert_eq!(patched.title, "Febre");
    }

    #[test]
    fn patch_can_clear_optional_fields() {
        let mut record = sample();
        record.notes = Some("old".into());
        let patched = Patch::new()
            .set("notes", Value::Null)
            .apply_to(&record)
            .unwrap();
        assert_eq!(patched.notes, None);
    }

    #[test]
    fn patch_rejects_identifier_changes() {
        let record = sample();
        let error = Patch::new().set("id", "other").apply_to(&record).unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn patch_rejects_non_objects() {
        assert!(Patch::from_value(json!([1, 2])).is_err());
        assert!(Patch::from_value(json!({"title": "x"})).is_ok());
    }

    #[test]
    fn insert_payload_omits_client_id() {
        let record = sample();
        let payload = record.insert_payload().unwrap();
        assert!(payload.get("id").is_none());
        assert_eq!(payload["title"], "Febre");
        assert!(payload.get("created_at").is_some());
    }
}
