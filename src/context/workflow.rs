//! Workflow execution context.
//!
//! [`WorkflowContext`] is an immutable record: every transformer returns a
//! new value and refreshes `updated_at`. Document bodies are deliberately
//! NOT part of the context — caching lives in
//! [`ContextCache`](crate::context::cache::ContextCache) so serialized
//! snapshots never drag document content along.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::ParseEnumError;

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl WorkflowStatus {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            other => Err(ParseEnumError::new(
                other,
                "running, completed, failed, paused",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// PhaseTransition
// ---------------------------------------------------------------------------

/// One completed phase in a workflow's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// The phase that was left.
    pub phase: String,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// Seconds spent in the phase, measured from the previous transition.
    /// `None` for the first entry.
    pub duration_seconds: Option<f64>,
}

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

/// Immutable per-run execution context.
///
/// Invariants: `phase_history` only grows; `updated_at >= created_at`;
/// `epic_num` and `story_num` (when present) are positive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub workflow_id: Uuid,
    pub epic_num: i64,
    pub story_num: Option<i64>,
    pub feature: String,
    pub workflow_name: String,
    pub current_phase: String,
    pub phase_history: Vec<PhaseTransition>,
    pub decisions: BTreeMap<String, serde_json::Value>,
    pub artifacts: Vec<String>,
    pub errors: Vec<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub tags: Vec<String>,
}

impl WorkflowContext {
    /// Create a fresh running context in the `initialization` phase.
    pub fn new(
        epic_num: i64,
        story_num: Option<i64>,
        feature: impl Into<String>,
        workflow_name: impl Into<String>,
    ) -> Result<Self> {
        if epic_num < 1 {
            return Err(EngineError::domain(format!(
                "epic_num must be positive, got {epic_num}"
            )));
        }
        if let Some(story) = story_num {
            if story < 1 {
                return Err(EngineError::domain(format!(
                    "story_num must be positive, got {story}"
                )));
            }
        }

        let now = Utc::now();
        Ok(Self {
            workflow_id: Uuid::new_v4(),
            epic_num,
            story_num,
            feature: feature.into(),
            workflow_name: workflow_name.into(),
            current_phase: "initialization".to_owned(),
            phase_history: Vec::new(),
            decisions: BTreeMap::new(),
            artifacts: Vec::new(),
            errors: Vec::new(),
            status: WorkflowStatus::Running,
            created_at: now,
            updated_at: now,
            metadata: serde_json::Value::Null,
            tags: Vec::new(),
        })
    }

    /// Story id in `epic.story` form, or just `epic` for epic-level runs.
    pub fn story_id(&self) -> String {
        match self.story_num {
            Some(story) => format!("{}.{story}", self.epic_num),
            None => self.epic_num.to_string(),
        }
    }

    // -- pure transformers --------------------------------------------------

    /// Generic copy-with: apply `changes` to a clone and refresh
    /// `updated_at`.
    #[must_use]
    pub fn with(&self, changes: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        changes(&mut next);
        next.updated_at = Utc::now();
        next
    }

    /// Record a decision.
    #[must_use]
    pub fn add_decision(&self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.with(|ctx| {
            ctx.decisions.insert(name.into(), value);
        })
    }

    /// Record a produced artifact path.
    #[must_use]
    pub fn add_artifact(&self, path: impl Into<String>) -> Self {
        self.with(|ctx| ctx.artifacts.push(path.into()))
    }

    /// Record an error encountered by the run.
    #[must_use]
    pub fn add_error(&self, error: impl Into<String>) -> Self {
        self.with(|ctx| ctx.errors.push(error.into()))
    }

    /// Change the run status.
    #[must_use]
    pub fn with_status(&self, status: WorkflowStatus) -> Self {
        self.with(|ctx| ctx.status = status)
    }

    /// Move to a new phase, appending the phase being left to
    /// `phase_history` with its duration (time since the previous
    /// transition; `None` for the first).
    #[must_use]
    pub fn transition_phase(&self, phase: impl Into<String>) -> Self {
        let now = Utc::now();
        let duration_seconds = self.phase_history.last().map(|last| {
            (now - last.timestamp).num_milliseconds() as f64 / 1000.0
        });

        let transition = PhaseTransition {
            phase: self.current_phase.clone(),
            timestamp: now,
            duration_seconds,
        };

        self.with(|ctx| {
            ctx.phase_history.push(transition);
            ctx.current_phase = phase.into();
        })
    }

    // -- serialization ------------------------------------------------------

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(EngineError::from)
    }

    /// Deserialize from JSON produced by [`WorkflowContext::to_json`].
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(EngineError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(12, Some(3), "document-lifecycle", "implement_story").unwrap()
    }

    #[test]
    fn new_context_starts_running_in_initialization() {
        let ctx = ctx();
        assert_eq!(ctx.status, WorkflowStatus::Running);
        assert_eq!(ctx.current_phase, "initialization");
        assert!(ctx.phase_history.is_empty());
        assert_eq!(ctx.story_id(), "12.3");
        assert!(ctx.updated_at >= ctx.created_at);
    }

    #[test]
    fn epic_level_story_id_has_no_dot() {
        let ctx = WorkflowContext::new(7, None, "f", "plan_epic").unwrap();
        assert_eq!(ctx.story_id(), "7");
    }

    #[test]
    fn invalid_numbers_rejected() {
        assert!(WorkflowContext::new(0, None, "f", "w").is_err());
        assert!(WorkflowContext::new(1, Some(0), "f", "w").is_err());
    }

    #[test]
    fn transformers_do_not_mutate_original() {
        let original = ctx();
        let with_decision = original.add_decision("use_sqlite", serde_json::json!(true));

        assert!(original.decisions.is_empty());
        assert_eq!(
            with_decision.decisions.get("use_sqlite"),
            Some(&serde_json::json!(true))
        );
        assert!(with_decision.updated_at >= original.updated_at);
    }

    #[test]
    fn add_artifact_and_error_append() {
        let ctx = ctx()
            .add_artifact("src/login.rs")
            .add_artifact("tests/login.rs")
            .add_error("flaky network");
        assert_eq!(ctx.artifacts.len(), 2);
        assert_eq!(ctx.errors, vec!["flaky network".to_owned()]);
    }

    #[test]
    fn transition_phase_appends_previous_phase() {
        let ctx = ctx().transition_phase("implementation");
        assert_eq!(ctx.current_phase, "implementation");
        assert_eq!(ctx.phase_history.len(), 1);
        assert_eq!(ctx.phase_history[0].phase, "initialization");
        assert!(ctx.phase_history[0].duration_seconds.is_none());

        let ctx = ctx.transition_phase("review");
        assert_eq!(ctx.phase_history.len(), 2);
        assert_eq!(ctx.phase_history[1].phase, "implementation");
        assert!(ctx.phase_history[1].duration_seconds.is_some());
    }

    #[test]
    fn phase_history_grows_only_forward() {
        let mut ctx = ctx();
        for (i, phase) in ["a", "b", "c"].iter().enumerate() {
            ctx = ctx.transition_phase(*phase);
            assert_eq!(ctx.phase_history.len(), i + 1);
        }
        let timestamps: Vec<_> = ctx.phase_history.iter().map(|t| t.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted, "entries appended in time order");
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let ctx = ctx()
            .add_decision("approach", serde_json::json!("incremental"))
            .add_artifact("src/a.rs")
            .transition_phase("implementation")
            .with_status(WorkflowStatus::Paused);

        let json = ctx.to_json().unwrap();
        let back = WorkflowContext::from_json(&json).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<WorkflowStatus>().unwrap(), status);
        }
    }
}
