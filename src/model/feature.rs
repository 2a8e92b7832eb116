//! Feature entity — top-level unit of product scope.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ParseEnumError;

/// Highest allowed scale level (0 chore … 4 greenfield).
pub const MAX_SCALE_LEVEL: u8 = 4;

// ---------------------------------------------------------------------------
// FeatureScope
// ---------------------------------------------------------------------------

/// Whether a feature belongs to the MVP or is a standalone feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureScope {
    Mvp,
    Feature,
}

impl FeatureScope {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mvp => "mvp",
            Self::Feature => "feature",
        }
    }
}

impl fmt::Display for FeatureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mvp" => Ok(Self::Mvp),
            "feature" => Ok(Self::Feature),
            other => Err(ParseEnumError::new(other, "mvp, feature")),
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    Planning,
    Active,
    Complete,
    Archived,
}

impl FeatureStatus {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "active" => Ok(Self::Active),
            "complete" => Ok(Self::Complete),
            "archived" => Ok(Self::Archived),
            other => Err(ParseEnumError::new(
                other,
                "planning, active, complete, archived",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Feature
// ---------------------------------------------------------------------------

/// A feature row.
///
/// Invariants (enforced by the service layer and database CHECKs):
/// `name` is unique; `scale_level ≤ 4`; `completed_at` is set iff
/// `status == Complete` (the database trigger stamps it on transition).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Feature {
    pub id: i64,
    pub name: String,
    pub scope: FeatureScope,
    pub status: FeatureStatus,
    pub scale_level: u8,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_strings() {
        for scope in [FeatureScope::Mvp, FeatureScope::Feature] {
            assert_eq!(scope.as_str().parse::<FeatureScope>().unwrap(), scope);
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            FeatureStatus::Planning,
            FeatureStatus::Active,
            FeatureStatus::Complete,
            FeatureStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<FeatureStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let err = "epic".parse::<FeatureScope>().unwrap_err();
        assert!(format!("{err}").contains("epic"));
    }

    #[test]
    fn status_serde_uses_lowercase() {
        let json = serde_json::to_string(&FeatureStatus::Planning).unwrap();
        assert_eq!(json, "\"planning\"");
    }
}
