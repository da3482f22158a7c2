//! Incident (episode) model grouping related records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, SessionUser, SyncEntity};
use crate::util::new_client_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Active,
    Monitoring,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
}

/// A grouping of related records (an episode of illness)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub child_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: IncidentStatus,
    pub severity: IncidentSeverity,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Fields a caller supplies to open an incident
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncident {
    pub child_id: String,
    pub title: String,
    pub description: Option<String>,
    pub severity: IncidentSeverity,
}

impl NewIncident {
    pub fn new(child_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            title: title.into(),
            description: None,
            severity: IncidentSeverity::Low,
        }
    }

    #[must_use]
    pub const fn severity(mut self, severity: IncidentSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl SyncEntity for Incident {
    const COLLECTION: Collection = Collection::Incidents;
    const OWNER_FIELD: Option<&'static str> = Some("child_id");

    type Draft = NewIncident;

    fn from_draft(draft: NewIncident) -> Self {
        let now = Utc::now();
        Self {
            id: new_client_id(),
            child_id: draft.child_id,
            title: draft.title,
            description: draft.description,
            status: IncidentStatus::Active,
            severity: draft.severity,
            started_at: now,
            resolved_at: None,
            created_at: now,
            created_by: None,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.child_id)
    }

    fn set_owner_id(&mut self, owner: &str) {
        self.child_id = owner.to_string();
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn stamp_creator(&mut self, user: &SessionUser) {
        if self.created_by.is_none() {
            self.created_by = Some(user.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_incident_starts_active() {
        let incident = Incident::from_draft(
            NewIncident::new("c1", "Gripe").severity(IncidentSeverity::Medium),
        );
        assert_eq!(incident.status, IncidentStatus::Active);
        assert_eq!(incident.severity, IncidentSeverity::Medium);
        assert_eq!(incident.owner_id(), Some("c1"));
        assert_eq!(incident.started_at, incident.created_at);
    }
}
