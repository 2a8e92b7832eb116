//! Learning entity — indexed lessons with supersession chains.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ParseEnumError;

// ---------------------------------------------------------------------------
// LearningCategory
// ---------------------------------------------------------------------------

/// Category of a learning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningCategory {
    Technical,
    Process,
    Domain,
    Architectural,
    Team,
}

impl LearningCategory {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Process => "process",
            Self::Domain => "domain",
            Self::Architectural => "architectural",
            Self::Team => "team",
        }
    }
}

impl fmt::Display for LearningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "technical" => Ok(Self::Technical),
            "process" => Ok(Self::Process),
            "domain" => Ok(Self::Domain),
            "architectural" => Ok(Self::Architectural),
            "team" => Ok(Self::Team),
            other => Err(ParseEnumError::new(
                other,
                "technical, process, domain, architectural, team",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Learning
// ---------------------------------------------------------------------------

/// An indexed learning.
///
/// Invariant: a learning is active iff it has not been superseded; the
/// service clears `is_active` whenever it sets `superseded_by`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Learning {
    pub id: i64,
    pub topic: String,
    pub category: LearningCategory,
    pub learning: String,
    pub context: Option<String>,
    pub source_type: Option<String>,
    pub epic_num: Option<i64>,
    pub story_num: Option<i64>,
    /// Relevance in `[0, 1]`.
    pub relevance_score: f64,
    pub is_active: bool,
    /// Id of the learning that supersedes this one, when inactive.
    pub superseded_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
