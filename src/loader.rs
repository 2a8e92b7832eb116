//! Fast context lookups for agent operations.
//!
//! Read-only views over the state store, shaped for high-frequency agent
//! queries: an epic with its stories and per-status counts, a story with
//! its parent epic, and a whole-project overview for agent
//! initialization. Everything here is a handful of indexed lookups.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::config::DEFAULT_DB_PATH;
use crate::coordinator::StateCoordinator;
use crate::error::{EngineError, Result};
use crate::model::{Epic, EpicStatus, Story, StoryStatus};

/// Per-status story counts for one epic.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct StoryCounts {
    pub total_stories: usize,
    pub completed_stories: usize,
    pub in_progress_stories: usize,
    pub blocked_stories: usize,
    pub progress_percentage: f64,
}

impl StoryCounts {
    fn from_stories(stories: &[Story]) -> Self {
        let total = stories.len();
        let count = |status: StoryStatus| stories.iter().filter(|s| s.status == status).count();
        let completed = count(StoryStatus::Completed);
        Self {
            total_stories: total,
            completed_stories: completed,
            in_progress_stories: count(StoryStatus::InProgress),
            blocked_stories: count(StoryStatus::Blocked),
            progress_percentage: if total > 0 {
                completed as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

/// An epic with its stories and counts.
#[derive(Clone, Debug, Serialize)]
pub struct EpicContext {
    pub epic: Epic,
    pub stories: Vec<Story>,
    pub summary: StoryCounts,
}

/// A story with its parent epic.
#[derive(Clone, Debug, Serialize)]
pub struct StoryContext {
    pub story: Story,
    pub epic: Option<Epic>,
}

/// Whole-project overview for agent initialization.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectAnalysis {
    pub has_database: bool,
    pub epic_count: usize,
    pub story_count: usize,
    /// Epics not yet completed, by number.
    pub active_epics: Vec<i64>,
}

/// Read-only fast lookups over the coordinator.
pub struct FastContextLoader<'a> {
    coordinator: &'a StateCoordinator,
}

impl<'a> FastContextLoader<'a> {
    pub fn new(coordinator: &'a StateCoordinator) -> Self {
        Self { coordinator }
    }

    /// Epic with stories and per-status counts.
    pub fn epic_context(&self, epic_num: i64) -> Result<EpicContext> {
        let started = Instant::now();
        let epic = self
            .coordinator
            .epics
            .get(epic_num)?
            .ok_or_else(|| EngineError::not_found(format!("epic {epic_num}")))?;
        let stories = self.coordinator.stories.list_by_epic(epic_num)?;
        let summary = StoryCounts::from_stories(&stories);

        tracing::debug!(
            epic = epic_num,
            stories = stories.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "epic context loaded"
        );
        Ok(EpicContext {
            epic,
            stories,
            summary,
        })
    }

    /// Story with its parent epic (when the epic row exists).
    pub fn story_context(&self, epic_num: i64, story_num: i64) -> Result<StoryContext> {
        let started = Instant::now();
        let story = self
            .coordinator
            .stories
            .get(epic_num, story_num)?
            .ok_or_else(|| {
                EngineError::not_found(format!("story {epic_num}.{story_num}"))
            })?;
        let epic = self.coordinator.epics.get(epic_num)?;

        tracing::debug!(
            epic = epic_num,
            story = story_num,
            duration_ms = started.elapsed().as_millis() as u64,
            "story context loaded"
        );
        Ok(StoryContext { story, epic })
    }

    /// Every story belonging to an epic that is not yet completed.
    pub fn active_stories(&self) -> Result<Vec<Story>> {
        let mut stories = Vec::new();
        for epic in self.coordinator.epics.list()? {
            if epic.status == EpicStatus::Completed {
                continue;
            }
            stories.extend(self.coordinator.stories.list_by_epic(epic.epic_num)?);
        }
        Ok(stories)
    }

    /// Scan a project root for its database and summarize what's in it.
    ///
    /// When the database is missing the analysis reports a new project;
    /// the coordinator is not consulted.
    pub fn analyze_project(&self, project_root: &Path) -> Result<ProjectAnalysis> {
        let has_database = project_root.join(DEFAULT_DB_PATH).exists();
        if !has_database {
            return Ok(ProjectAnalysis {
                has_database: false,
                epic_count: 0,
                story_count: 0,
                active_epics: Vec::new(),
            });
        }

        let epics = self.coordinator.epics.list()?;
        let active_epics: Vec<i64> = epics
            .iter()
            .filter(|e| e.status != EpicStatus::Completed)
            .map(|e| e.epic_num)
            .collect();
        let mut story_count = 0usize;
        for epic_num in &active_epics {
            story_count += self.coordinator.stories.list_by_epic(*epic_num)?.len();
        }

        Ok(ProjectAnalysis {
            has_database: true,
            epic_count: active_epics.len(),
            story_count,
            active_epics,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
