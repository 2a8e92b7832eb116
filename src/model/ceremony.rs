//! Ceremony entity — recorded summaries of retrospectives, standups,
//! planning and review sessions.
//!
//! `ceremony_type` is a free-form string rather than an enum: teams name
//! their own ceremonies and the engine does not interpret them.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A recorded ceremony summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Ceremony {
    pub id: i64,
    /// Kind of ceremony, e.g. `"retrospective"`, `"standup"`, `"planning"`.
    pub ceremony_type: String,
    pub summary: String,
    pub participants: Option<String>,
    pub decisions: Option<String>,
    pub action_items: Option<String>,
    pub held_at: DateTime<Utc>,
    pub epic_num: Option<i64>,
    pub story_num: Option<i64>,
    pub metadata: serde_json::Value,
}
