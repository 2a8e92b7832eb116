//! Story entity, status machine, and priority levels.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ParseEnumError;

// ---------------------------------------------------------------------------
// StoryStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a story.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Pending,
    InProgress,
    Blocked,
    Testing,
    Review,
    Completed,
}

impl StoryStatus {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Testing => "testing",
            Self::Review => "review",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoryStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "testing" => Ok(Self::Testing),
            "review" => Ok(Self::Review),
            "completed" => Ok(Self::Completed),
            other => Err(ParseEnumError::new(
                other,
                "pending, in_progress, blocked, testing, review, completed",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Story priority, P0 (highest) through P3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P0" | "p0" => Ok(Self::P0),
            "P1" | "p1" => Ok(Self::P1),
            "P2" | "p2" => Ok(Self::P2),
            "P3" | "p3" => Ok(Self::P3),
            other => Err(ParseEnumError::new(other, "P0, P1, P2, P3")),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::P2
    }
}

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

/// A story row, keyed by `(epic_num, story_num)`.
///
/// Invariants: `story_num` unique within its epic; `blocked_reason` is
/// present iff `status == Blocked`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Story {
    pub id: i64,
    pub epic_num: i64,
    pub story_num: i64,
    pub title: String,
    pub status: StoryStatus,
    pub assignee: Option<String>,
    pub priority: Priority,
    pub estimate_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub blocked_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    /// Story id in `epic.story` form (e.g. `"1.2"`).
    pub fn story_id(&self) -> String {
        format!("{}.{}", self.epic_num, self.story_num)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
