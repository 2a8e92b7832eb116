//! Epic entity and progress math.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ParseEnumError;

// ---------------------------------------------------------------------------
// EpicStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an epic.
///
/// Once `Completed`, an epic only leaves that state through an explicit
/// transition (reopening); the coordinator never moves it backwards on its
/// own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    Planning,
    InProgress,
    Completed,
}

impl EpicStatus {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for EpicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpicStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(ParseEnumError::new(
                other,
                "planning, in_progress, completed",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Epic
// ---------------------------------------------------------------------------

/// An epic row.
///
/// Invariant: `completed_stories ≤ total_stories`;
/// `progress_percentage == progress(total_stories, completed_stories)`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Epic {
    pub epic_num: i64,
    pub title: String,
    pub status: EpicStatus,
    pub total_stories: i64,
    pub completed_stories: i64,
    pub progress_percentage: f64,
    /// Name of the owning feature, when the epic belongs to one.
    pub feature: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Progress percentage for a completed/total pair: `round(100·c/t)`, or 0
/// when there are no stories.
pub fn progress(total_stories: i64, completed_stories: i64) -> f64 {
    if total_stories <= 0 {
        0.0
    } else {
        (completed_stories as f64 / total_stories as f64 * 100.0).round()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            EpicStatus::Planning,
            EpicStatus::InProgress,
            EpicStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<EpicStatus>().unwrap(), status);
        }
    }

    #[test]
    fn in_progress_serde_uses_snake_case() {
        let json = serde_json::to_string(&EpicStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn progress_of_empty_epic_is_zero() {
        assert_eq!(progress(0, 0), 0.0);
    }

    #[test]
    fn progress_rounds() {
        assert_eq!(progress(2, 1), 50.0);
        assert_eq!(progress(3, 1), 33.0);
        assert_eq!(progress(3, 2), 67.0);
        assert_eq!(progress(2, 2), 100.0);
    }
}
