//! Action item entity — follow-ups captured from ceremonies and reviews.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ParseEnumError;

// ---------------------------------------------------------------------------
// ActionItemPriority
// ---------------------------------------------------------------------------

/// Priority of an action item. `Critical` items are eligible for promotion
/// to stories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionItemPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl ActionItemPriority {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for ActionItemPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionItemPriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(ParseEnumError::new(other, "critical, high, medium, low")),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionItemStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an action item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionItemStatus {
    Pending,
    InProgress,
    Completed,
}

impl ActionItemStatus {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ActionItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionItemStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(ParseEnumError::new(other, "pending, in_progress, completed")),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionItem
// ---------------------------------------------------------------------------

/// An action item row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionItem {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: ActionItemPriority,
    pub status: ActionItemStatus,
    pub epic_num: Option<i64>,
    pub story_num: Option<i64>,
    pub assignee: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl ActionItem {
    /// Whether this item has been promoted to a story (recorded in metadata
    /// by the promotion operation).
    pub fn is_promoted(&self) -> bool {
        self.metadata
            .get("promoted_story")
            .is_some_and(|v| !v.is_null())
    }

    /// The review date recorded by a deferral (`metadata.deferred_until`),
    /// when one is set.
    pub fn deferred_until(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get("deferred_until")
            .and_then(|v| v.as_str())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips_through_strings() {
        for p in [
            ActionItemPriority::Critical,
            ActionItemPriority::High,
            ActionItemPriority::Medium,
            ActionItemPriority::Low,
        ] {
            assert_eq!(p.as_str().parse::<ActionItemPriority>().unwrap(), p);
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            ActionItemStatus::Pending,
            ActionItemStatus::InProgress,
            ActionItemStatus::Completed,
        ] {
            assert_eq!(s.as_str().parse::<ActionItemStatus>().unwrap(), s);
        }
    }

    #[test]
    fn is_promoted_reads_metadata() {
        let mut item = ActionItem {
            id: 1,
            title: "t".to_owned(),
            description: None,
            priority: ActionItemPriority::Critical,
            status: ActionItemStatus::Pending,
            epic_num: Some(2),
            story_num: None,
            assignee: None,
            due_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: serde_json::Value::Null,
        };
        assert!(!item.is_promoted());

        item.metadata = serde_json::json!({ "promoted_story": "2.4" });
        assert!(item.is_promoted());
    }

    #[test]
    fn deferred_until_reads_metadata() {
        let mut item = ActionItem {
            id: 1,
            title: "t".to_owned(),
            description: None,
            priority: ActionItemPriority::Low,
            status: ActionItemStatus::Pending,
            epic_num: None,
            story_num: None,
            assignee: None,
            due_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: serde_json::Value::Null,
        };
        assert!(item.deferred_until().is_none());

        item.metadata = serde_json::json!({ "deferred_until": "2026-08-31T10:30:00+00:00" });
        let review = item.deferred_until().expect("deferral parses");
        assert_eq!(review.to_rfc3339(), "2026-08-31T10:30:00+00:00");

        // Unparseable values read as no deferral.
        item.metadata = serde_json::json!({ "deferred_until": "soon" });
        assert!(item.deferred_until().is_none());
    }
}
