//! Health record model (symptom or medication event)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, SessionUser, SyncEntity};
use crate::util::new_client_id;

/// Temperature (°C) at or above which a reading counts as fever
pub const FEVER_THRESHOLD: f64 = 37.8;

/// Kind of logged event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Symptom,
    Medication,
}

/// Symptom sub-type, using the backend's stored values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymptomType {
    Febre,
    Tosse,
    CongestaoNasal,
    Diarreia,
    Vomito,
    DorCabeca,
    DorBarriga,
    Irritacao,
    FaltaApetite,
    Outro,
}

/// A logged health event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable cache key (client id until the server assigns its own)
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub title: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub child_id: Option<String>,
    #[serde(default)]
    pub symptom_type: Option<SymptomType>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub reminder_enabled: Option<bool>,
    #[serde(default)]
    pub reminder_interval_hours: Option<u32>,
    #[serde(default)]
    pub next_dose_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub incident_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

impl Record {
    /// Whether the recorded temperature reaches the fever threshold
    pub fn is_fever(&self) -> bool {
        self.temperature.is_some_and(|t| t >= FEVER_THRESHOLD)
    }
}

/// Fields a caller supplies to create a record
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub kind: RecordKind,
    pub title: String,
    pub details: String,
    pub notes: Option<String>,
    pub child_id: Option<String>,
    pub symptom_type: Option<SymptomType>,
    pub temperature: Option<f64>,
    pub reminder_interval_hours: Option<u32>,
    pub photo_url: Option<String>,
    pub incident_id: Option<String>,
}

impl NewRecord {
    pub fn new(kind: RecordKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            details: String::new(),
            notes: None,
            child_id: None,
            symptom_type: None,
            temperature: None,
            reminder_interval_hours: None,
            photo_url: None,
            incident_id: None,
        }
    }

    #[must_use]
    pub fn child(mut self, child_id: impl Into<String>) -> Self {
        self.child_id = Some(child_id.into());
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    #[must_use]
    pub const fn symptom(mut self, symptom: SymptomType) -> Self {
        self.symptom_type = Some(symptom);
        self
    }

    #[must_use]
    pub const fn temperature(mut self, celsius: f64) -> Self {
        self.temperature = Some(celsius);
        self
    }

    /// Enable a medication reminder every `hours`
    #[must_use]
    pub const fn reminder_every(mut self, hours: u32) -> Self {
        self.reminder_interval_hours = Some(hours);
        self
    }

    #[must_use]
    pub fn incident(mut self, incident_id: impl Into<String>) -> Self {
        self.incident_id = Some(incident_id.into());
        self
    }
}

impl SyncEntity for Record {
    const COLLECTION: Collection = Collection::Records;
    const OWNER_FIELD: Option<&'static str> = Some("child_id");

    type Draft = NewRecord;

    fn from_draft(draft: NewRecord) -> Self {
        let now = Utc::now();
        let reminder_enabled = (draft.kind == RecordKind::Medication
            && draft.reminder_interval_hours.is_some())
        .then_some(true);
        let next_dose_at = reminder_enabled
            .and(draft.reminder_interval_hours)
            .map(|hours| now + chrono::Duration::hours(i64::from(hours)));

        Self {
            id: new_client_id(),
            kind: draft.kind,
            title: draft.title,
            details: draft.details,
            notes: draft.notes,
            created_at: now,
            child_id: draft.child_id,
            symptom_type: draft.symptom_type,
            temperature: draft.temperature,
            reminder_enabled,
            reminder_interval_hours: reminder_enabled.and(draft.reminder_interval_hours),
            next_dose_at,
            photo_url: draft.photo_url,
            incident_id: draft.incident_id,
            user_id: None,
            user_email: None,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> Option<&str> {
        self.child_id.as_deref()
    }

    fn set_owner_id(&mut self, owner: &str) {
        self.child_id = Some(owner.to_string());
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn stamp_creator(&mut self, user: &SessionUser) {
        if self.user_id.is_none() {
            self.user_id = Some(user.id.clone());
        }
        if self.user_email.is_none() {
            self.user_email.clone_from(&user.email);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn draft_gets_client_id_and_timestamp() {
        let record = Record::from_draft(NewRecord::new(RecordKind::Symptom, "Tosse").child("c1"));
        assert!(!record.id.is_empty());
        assert_eq!(record.owner_id(), Some("c1"));
        assert!(record.created_at <= Utc::now());
    }

    #[test]
    fn medication_reminder_schedules_next_dose() {
        let record = Record::from_draft(
            NewRecord::new(RecordKind::Medication, "Dipirona").reminder_every(6),
        );
        assert_eq!(record.reminder_enabled, Some(true));
        assert_eq!(record.reminder_interval_hours, Some(6));
        let next = record.next_dose_at.unwrap();
        assert_eq!((next - record.created_at).num_hours(), 6);
    }

    #[test]
    fn symptom_ignores_reminder_interval() {
        let record =
            Record::from_draft(NewRecord::new(RecordKind::Symptom, "Febre").reminder_every(6));
        assert_eq!(record.reminder_enabled, None);
        assert_eq!(record.next_dose_at, None);
    }

    #[test]
    fn deserializes_backend_row() {
        let row = json!({
            "id": "srv-1",
            "type": "symptom",
            "title": "Febre",
            "details": "38.5°C",
            "created_at": "2025-03-01T10:00:00+00:00",
            "child_id": "c1",
            "symptom_type": "febre",
            "temperature": 38.5,
            "reminder_enabled": false,
            "user_id": "u1",
            "extra_column": "ignored"
        });
        let record = Record::from_value(row).unwrap();
        assert_eq!(record.kind, RecordKind::Symptom);
        assert_eq!(record.symptom_type, Some(SymptomType::Febre));
        assert!(record.is_fever());
        assert_eq!(record.notes, None);
    }

    #[test]
    fn stamp_creator_keeps_explicit_values() {
        let mut record = Record::from_draft(NewRecord::new(RecordKind::Symptom, "Tosse"));
        record.user_id = Some("explicit".into());
        record.stamp_creator(&SessionUser {
            id: "session-user".into(),
            email: Some("pai@example.com".into()),
        });
        assert_eq!(record.user_id.as_deref(), Some("explicit"));
        assert_eq!(record.user_email.as_deref(), Some("pai@example.com"));
    }
}
