//! Named local/remote collections

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A synchronized collection. Names match the backend tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Records,
    Children,
    Incidents,
}

impl Collection {
    pub const ALL: [Self; 3] = [Self::Records, Self::Children, Self::Incidents];

    /// Backend table / local table name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::Children => "children",
            Self::Incidents => "incidents",
        }
    }

    /// Metadata key under which the hydration watermark is stored
    pub fn watermark_key(self) -> String {
        format!("lastSync-{}", self.as_str())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "records" => Ok(Self::Records),
            "children" => Ok(Self::Children),
            "incidents" => Ok(Self::Incidents),
            other => Err(Error::InvalidInput(format!("Unknown collection: {other}"))),
        }
    }
}
