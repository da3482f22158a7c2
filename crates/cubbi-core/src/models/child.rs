//! Child profile model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, SessionUser, SyncEntity};
use crate::util::new_client_id;

/// A profile representing the subject of care
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Owner account that created the profile
    #[serde(default)]
    pub user_id: Option<String>,
}

const fn default_active() -> bool {
    true
}

/// Fields a caller supplies to create a child profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChild {
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl NewChild {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            birth_date: None,
            notes: None,
        }
    }

    #[must_use]
    pub const fn born(mut self, date: NaiveDate) -> Self {
        self.birth_date = Some(date);
        self
    }
}

impl SyncEntity for Child {
    const COLLECTION: Collection = Collection::Children;

    type Draft = NewChild;

    fn from_draft(draft: NewChild) -> Self {
        Self {
            id: new_client_id(),
            name: draft.name,
            birth_date: draft.birth_date,
            photo_url: None,
            notes: draft.notes,
            created_at: Utc::now(),
            is_active: true,
            user_id: None,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn stamp_creator(&mut self, user: &SessionUser) {
        if self.user_id.is_none() {
            self.user_id = Some(user.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_active_flag_defaults_to_true() {
        let child: Child = serde_json::from_value(json!({
            "id": "c1",
            "name": "Ana",
            "birth_date": "2021-05-04",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(child.is_active);
        assert_eq!(child.birth_date, NaiveDate::from_ymd_opt(2021, 5, 4));
        assert_eq!(child.owner_id(), None);
    }
}
