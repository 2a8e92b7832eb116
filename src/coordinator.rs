//! State coordinator — facade over the entity services.
//!
//! Owns one [`StateStore`] and exposes the six services plus the
//! cross-entity operations that must see a consistent snapshot: story
//! creation/completion with epic roll-ups, and the aggregate epic/feature
//! state reads. Cross-entity work runs inside a single store transaction.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::model::{Epic, EpicStatus, Feature, Story, StoryStatus};
use crate::services::{
    ActionItemService, CeremonyService, EpicService, FeatureService, LearningService, NewEpic,
    NewFeature, NewStory, ProgressUpdate, StoryService,
};
use crate::store::StateStore;

// ---------------------------------------------------------------------------
// Aggregate views
// ---------------------------------------------------------------------------

/// An epic together with all of its stories.
#[derive(Clone, Debug, Serialize)]
pub struct EpicState {
    pub epic: Epic,
    pub stories: Vec<Story>,
}

/// Story counts for one epic inside a feature roll-up.
#[derive(Clone, Debug, Serialize)]
pub struct EpicSummary {
    pub epic_num: i64,
    pub title: String,
    pub status: EpicStatus,
    pub story_count: usize,
    pub completed_count: usize,
}

/// A feature with its epics and completion totals.
#[derive(Clone, Debug, Serialize)]
pub struct FeatureState {
    pub feature: Feature,
    pub epics: Vec<Epic>,
    pub epic_summaries: Vec<EpicSummary>,
    pub total_stories: usize,
    pub completed_stories: usize,
    pub completion_pct: f64,
}

// ---------------------------------------------------------------------------
// StateCoordinator
// ---------------------------------------------------------------------------

/// Facade coordinating all state services.
pub struct StateCoordinator {
    store: Arc<StateStore>,
    pub features: FeatureService,
    pub epics: EpicService,
    pub stories: StoryService,
    pub action_items: ActionItemService,
    pub ceremonies: CeremonyService,
    pub learnings: LearningService,
}

impl StateCoordinator {
    /// Build a coordinator over an already-opened store.
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            features: FeatureService::new(Arc::clone(&store)),
            epics: EpicService::new(Arc::clone(&store)),
            stories: StoryService::new(Arc::clone(&store)),
            action_items: ActionItemService::new(Arc::clone(&store)),
            ceremonies: CeremonyService::new(Arc::clone(&store)),
            learnings: LearningService::new(Arc::clone(&store)),
            store,
        }
    }

    /// Open (and migrate) the database at `db_path`, then build a
    /// coordinator over it.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let store = Arc::new(StateStore::open_and_migrate(db_path.as_ref())?);
        Ok(Self::new(store))
    }

    /// The shared store handle.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    // -- epic operations ----------------------------------------------------

    /// Create a new epic. Delegates to [`EpicService`].
    pub fn create_epic(&self, new: &NewEpic) -> Result<Epic> {
        self.epics.create(new)
    }

    /// The epic and all of its stories, read in one transaction.
    pub fn get_epic_state(&self, epic_num: i64) -> Result<EpicState> {
        self.store.transaction(|tx| {
            let epic = EpicService::get_in(tx, epic_num)?
                .ok_or_else(|| EngineError::not_found(format!("epic {epic_num}")))?;
            let stories = StoryService::list_by_epic_in(tx, epic_num)?;
            Ok(EpicState { epic, stories })
        })
    }

    // -- story operations ---------------------------------------------------

    /// Create a story; when `auto_update_epic`, increment the parent epic's
    /// `total_stories` in the same transaction.
    pub fn create_story(&self, new: &NewStory, auto_update_epic: bool) -> Result<Story> {
        self.store
            .transaction(|tx| Self::create_story_in(tx, new, auto_update_epic))
    }

    pub(crate) fn create_story_in(
        tx: &rusqlite::Connection,
        new: &NewStory,
        auto_update_epic: bool,
    ) -> Result<Story> {
        let story = StoryService::create_in(tx, new)?;

        if auto_update_epic {
            let epic = EpicService::get_in(tx, new.epic_num)?
                .ok_or_else(|| EngineError::not_found(format!("epic {}", new.epic_num)))?;
            EpicService::update_progress_in(
                tx,
                new.epic_num,
                ProgressUpdate {
                    total_stories: Some(epic.total_stories + 1),
                    ..ProgressUpdate::default()
                },
            )?;
            tracing::info!(
                epic = new.epic_num,
                new_total = epic.total_stories + 1,
                "epic total_stories incremented"
            );
        }

        Ok(story)
    }

    /// Complete a story; when `auto_update_epic`, increment the parent
    /// epic's `completed_stories` and auto-transition its status:
    /// `planning → in_progress` on the first completion, and
    /// `→ completed` once every story is done.
    ///
    /// Re-completing an already-completed story refreshes `actual_hours`
    /// but does not move the epic counters again.
    pub fn complete_story(
        &self,
        epic_num: i64,
        story_num: i64,
        actual_hours: Option<f64>,
        auto_update_epic: bool,
    ) -> Result<Story> {
        self.store.transaction(|tx| {
            Self::complete_story_in(tx, epic_num, story_num, actual_hours, auto_update_epic)
        })
    }

    pub(crate) fn complete_story_in(
        tx: &rusqlite::Connection,
        epic_num: i64,
        story_num: i64,
        actual_hours: Option<f64>,
        auto_update_epic: bool,
    ) -> Result<Story> {
        let already_completed = StoryService::get_in(tx, epic_num, story_num)?
            .ok_or_else(|| EngineError::not_found(format!("story {epic_num}.{story_num}")))?
            .status
            == StoryStatus::Completed;

        let story = StoryService::complete_in(tx, epic_num, story_num, actual_hours)?;

        if auto_update_epic && !already_completed {
            let epic = EpicService::get_in(tx, epic_num)?
                .ok_or_else(|| EngineError::not_found(format!("epic {epic_num}")))?;

            let completed = epic.completed_stories + 1;
            let mut status = epic.status;
            if status == EpicStatus::Planning && completed > 0 {
                status = EpicStatus::InProgress;
            }
            if completed >= epic.total_stories && epic.total_stories > 0 {
                status = EpicStatus::Completed;
            }

            EpicService::update_progress_in(
                tx,
                epic_num,
                ProgressUpdate {
                    completed_stories: Some(completed),
                    status: Some(status),
                    ..ProgressUpdate::default()
                },
            )?;
            tracing::info!(
                epic = epic_num,
                completed_stories = completed,
                total_stories = epic.total_stories,
                status = %status,
                "epic progress auto-updated"
            );
        }

        Ok(story)
    }

    // -- feature operations -------------------------------------------------

    /// Create a feature. Delegates to [`FeatureService`].
    pub fn create_feature(&self, new: &NewFeature) -> Result<Feature> {
        self.features.create(new)
    }

    /// The feature, its epics, per-epic story counts, and completion
    /// totals — all read in one transaction.
    pub fn get_feature_state(&self, name: &str) -> Result<FeatureState> {
        self.store.transaction(|tx| {
            let feature = FeatureService::get_in(tx, name)?
                .ok_or_else(|| EngineError::not_found(format!("feature '{name}'")))?;
            let epics = EpicService::list_by_feature_in(tx, name)?;

            let mut epic_summaries = Vec::with_capacity(epics.len());
            let mut total_stories = 0usize;
            let mut completed_stories = 0usize;

            for epic in &epics {
                let stories = StoryService::list_by_epic_in(tx, epic.epic_num)?;
                let story_count = stories.len();
                let completed_count = stories
                    .iter()
                    .filter(|s| s.status == StoryStatus::Completed)
                    .count();

                epic_summaries.push(EpicSummary {
                    epic_num: epic.epic_num,
                    title: epic.title.clone(),
                    status: epic.status,
                    story_count,
                    completed_count,
                });
                total_stories += story_count;
                completed_stories += completed_count;
            }

            let completion_pct = if total_stories > 0 {
                completed_stories as f64 / total_stories as f64 * 100.0
            } else {
                0.0
            };

            Ok(FeatureState {
                feature,
                epics,
                epic_summaries,
                total_stories,
                completed_stories,
                completion_pct,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
