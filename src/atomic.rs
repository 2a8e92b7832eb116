//! Atomic state manager — the transactional envelope.
//!
//! Every public operation follows the same state machine:
//!
//! 1. pre-check: the git working tree must be clean;
//! 2. checkpoint: record the current HEAD revision;
//! 3. filesystem writes, then database writes, inside one store
//!    transaction;
//! 4. `git add -A` + commit.
//!
//! Any failure after the checkpoint hard-resets the working tree to the
//! checkpoint and lets the store transaction unwind, so either all three
//! stores move together or none of them do. If the rollback itself fails
//! the caller gets a [`EngineError::TransactionRollback`] carrying both
//! errors — that is the one state requiring manual intervention.
//!
//! Commit messages follow `<type>(<scope>): <subject>` with an optional
//! body; callers may override the generated message.

use std::path::{Path, PathBuf};
use std::time::Instant;

use keel_git::Git;
use rusqlite::Connection;

use crate::config::{EngineConfig, PathTemplates, slugify};
use crate::coordinator::StateCoordinator;
use crate::error::{EngineError, Result};
use crate::model::{Epic, Feature, Story, StoryStatus};
use crate::services::{EpicService, FeatureService, NewEpic, NewFeature, NewStory, StoryService};
use crate::structure::{self, DocumentStructureManager};

// ---------------------------------------------------------------------------
// Operation parameters
// ---------------------------------------------------------------------------

/// Parameters for [`AtomicStateManager::create_epic`].
#[derive(Clone, Debug)]
pub struct CreateEpic {
    pub epic: NewEpic,
    /// Epic definition file, project-relative. Defaults to the epic
    /// overview template (feature layout) or `docs/epics/epic-<N>.md`
    /// (legacy flat layout).
    pub file_path: Option<PathBuf>,
    /// Body of the epic definition file.
    pub content: String,
    pub commit_message: Option<String>,
}

/// Parameters for [`AtomicStateManager::create_story`].
#[derive(Clone, Debug)]
pub struct CreateStory {
    pub story: NewStory,
    /// Story file, project-relative. Defaults to the `story_location`
    /// template when the parent epic belongs to a feature, else to the
    /// legacy flat `docs/stories/story-<E>.<S>.md`.
    pub file_path: Option<PathBuf>,
    /// Body of the story file.
    pub content: String,
    pub auto_update_epic: bool,
    pub commit_message: Option<String>,
}

/// Parameters for [`AtomicStateManager::transition_story`].
#[derive(Clone, Debug)]
pub struct TransitionStory {
    pub epic_num: i64,
    pub story_num: i64,
    pub new_status: StoryStatus,
    pub actual_hours: Option<f64>,
    pub blocked_reason: Option<String>,
    pub auto_update_epic: bool,
    pub commit_message: Option<String>,
}

// ---------------------------------------------------------------------------
// AtomicStateManager
// ---------------------------------------------------------------------------

/// Coordinates filesystem, database, and git mutations as single
/// transactions.
///
/// Operations on the same working tree must not run concurrently from
/// multiple processes; the clean-tree pre-check plus git's own index lock
/// serialize them in practice.
pub struct AtomicStateManager {
    project_root: PathBuf,
    git: Git,
    coordinator: StateCoordinator,
    structure: DocumentStructureManager,
    templates: PathTemplates,
    auto_commit: bool,
}

impl AtomicStateManager {
    /// Open the manager for a project root, loading `.gao-dev/config.toml`
    /// (defaults when absent) and the state database it names.
    pub fn open(project_root: impl Into<PathBuf>) -> Result<Self> {
        let project_root = project_root.into();
        let config = EngineConfig::load_for_project(&project_root)?;
        Self::with_config(project_root, &config)
    }

    /// Open the manager with an explicit configuration.
    pub fn with_config(project_root: PathBuf, config: &EngineConfig) -> Result<Self> {
        let git = Git::new(&project_root);
        if !git.is_repo() {
            return Err(EngineError::domain(format!(
                "{} is not a git repository; the state engine requires one",
                project_root.display()
            )));
        }

        let coordinator = StateCoordinator::open(project_root.join(&config.state.db_path))?;
        let structure =
            DocumentStructureManager::new(&project_root, config.templates.clone());

        tracing::info!(
            project = %project_root.display(),
            db_path = %config.state.db_path,
            auto_commit = config.state.auto_commit,
            "atomic state manager ready"
        );

        Ok(Self {
            project_root,
            git,
            coordinator,
            structure,
            templates: config.templates.clone(),
            auto_commit: config.state.auto_commit,
        })
    }

    /// The underlying coordinator, for reads and non-atomic operations.
    pub fn coordinator(&self) -> &StateCoordinator {
        &self.coordinator
    }

    /// The git handle for this project.
    pub fn git(&self) -> &Git {
        &self.git
    }

    /// The project root.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    // -- operations ---------------------------------------------------------

    /// Create a feature: folder structure + registry row + commit.
    pub fn create_feature(
        &self,
        new: &NewFeature,
        commit_message: Option<&str>,
    ) -> Result<Feature> {
        // Validate before touching any store: a bad parameter must not
        // trigger filesystem writes or a rollback.
        let scale_level = u8::try_from(new.scale_level)
            .ok()
            .filter(|level| *level <= crate::model::feature::MAX_SCALE_LEVEL)
            .ok_or_else(|| {
                EngineError::domain(format!(
                    "scale_level must be 0-{}, got {}",
                    crate::model::feature::MAX_SCALE_LEVEL,
                    new.scale_level
                ))
            })?;

        let message = commit_message.map_or_else(
            || {
                format!(
                    "feat({name}): create feature\n\nFeature '{name}' created at scale level {level}.",
                    name = new.name,
                    level = new.scale_level
                )
            },
            ToOwned::to_owned,
        );

        self.run_atomic(format!("create_feature {}", new.name), &message, true, |tx| {
            self.structure.initialize_feature_folder(
                &new.name,
                scale_level,
                new.description.as_deref(),
            )?;

            let mut with_path = new.clone();
            let prd_rel = self.templates.prd_path(&new.name)?;
            with_path.metadata = merge_file_path(&new.metadata, &prd_rel);
            FeatureService::create_in(tx, &with_path)
        })
    }

    /// Create an epic: definition file + state row + commit.
    pub fn create_epic(&self, params: &CreateEpic) -> Result<Epic> {
        let epic = &params.epic;
        let message = params.commit_message.clone().unwrap_or_else(|| {
            format!(
                "feat(epic-{num}): create {title}\n\nEpic {num} created with {stories} stories.",
                num = epic.epic_num,
                title = epic.title,
                stories = epic.total_stories
            )
        });

        self.run_atomic(format!("create_epic {}", epic.epic_num), &message, false, |tx| {
            let rel_path = match &params.file_path {
                Some(path) => path.clone(),
                None => self.default_epic_path(epic)?,
            };
            structure::write_file(&self.project_root.join(&rel_path), &params.content)?;

            let mut with_path = epic.clone();
            with_path.metadata = merge_file_path(&epic.metadata, &rel_path);
            EpicService::create_in(tx, &with_path)
        })
    }

    /// Create a story: story file + state row (+ epic total roll-up) +
    /// commit.
    pub fn create_story(&self, params: &CreateStory) -> Result<Story> {
        let story = &params.story;
        let message = params.commit_message.clone().unwrap_or_else(|| {
            format!(
                "feat(story-{e}.{s}): create {title}\n\nStory {e}.{s} created in Epic {e}.",
                e = story.epic_num,
                s = story.story_num,
                title = story.title
            )
        });

        self.run_atomic(
            format!("create_story {}.{}", story.epic_num, story.story_num),
            &message,
            false,
            |tx| {
                let rel_path = match &params.file_path {
                    Some(path) => path.clone(),
                    None => self.default_story_path(tx, story.epic_num, story.story_num)?,
                };
                structure::write_file(&self.project_root.join(&rel_path), &params.content)?;

                let mut with_path = story.clone();
                with_path.metadata = merge_file_path(&story.metadata, &rel_path);
                StateCoordinator::create_story_in(tx, &with_path, params.auto_update_epic)
            },
        )
    }

    /// Transition a story's status. No file changes; the commit may be
    /// empty.
    pub fn transition_story(&self, params: &TransitionStory) -> Result<Story> {
        let message = params.commit_message.clone().unwrap_or_else(|| {
            format!(
                "chore(story-{e}.{s}): transition to {status}\n\nStory {e}.{s} status changed to {status}.",
                e = params.epic_num,
                s = params.story_num,
                status = params.new_status
            )
        });

        self.run_atomic(
            format!(
                "transition_story {}.{} -> {}",
                params.epic_num, params.story_num, params.new_status
            ),
            &message,
            true,
            |tx| {
                if params.new_status == StoryStatus::Completed {
                    StateCoordinator::complete_story_in(
                        tx,
                        params.epic_num,
                        params.story_num,
                        params.actual_hours,
                        params.auto_update_epic,
                    )
                } else {
                    StoryService::transition_in(
                        tx,
                        params.epic_num,
                        params.story_num,
                        params.new_status,
                        params.blocked_reason.as_deref(),
                    )
                }
            },
        )
    }

    // -- envelope -----------------------------------------------------------

    /// Run one atomic operation: pre-check, checkpoint, `work` (filesystem
    /// and database writes against the open transaction), commit, and
    /// rollback on failure.
    fn run_atomic<T>(
        &self,
        operation: String,
        commit_message: &str,
        allow_empty: bool,
        work: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let started = Instant::now();
        tracing::info!(operation = %operation, "atomic operation starting");

        let status = self.git.status()?;
        if !status.is_clean() {
            return Err(EngineError::WorkingTreeDirty {
                detail: format!("{} dirty path(s)", status.dirty_paths().len()),
            });
        }
        let checkpoint = self.git.head_revision()?;

        let result = self.coordinator.store().transaction(|tx| {
            let value = work(tx)?;
            if self.auto_commit {
                self.git.add_all()?;
                let revision = self.git.commit(commit_message, allow_empty)?;
                tracing::info!(operation = %operation, revision = %revision, "atomic commit created");
            }
            Ok(value)
        });

        match result {
            Ok(value) => {
                tracing::info!(
                    operation = %operation,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "atomic operation succeeded"
                );
                Ok(value)
            }
            Err(original) => {
                tracing::error!(
                    operation = %operation,
                    error = %original,
                    "atomic operation failed, rolling back"
                );
                match self.git.reset_hard(&checkpoint) {
                    Ok(()) => {
                        tracing::info!(
                            operation = %operation,
                            checkpoint = %checkpoint,
                            "rollback successful"
                        );
                        Err(EngineError::Operation {
                            operation,
                            source: Box::new(original),
                        })
                    }
                    Err(rollback_err) => {
                        tracing::error!(
                            operation = %operation,
                            error = %rollback_err,
                            "rollback FAILED"
                        );
                        Err(EngineError::TransactionRollback {
                            operation,
                            original: original.to_string(),
                            rollback: rollback_err.to_string(),
                        })
                    }
                }
            }
        }
    }

    // -- path defaults ------------------------------------------------------

    fn default_epic_path(&self, epic: &NewEpic) -> Result<PathBuf> {
        match &epic.feature {
            Some(feature) => self.templates.epic_dir(feature, epic.epic_num, &slugify(&epic.title))
                .map(|dir| dir.join("README.md")),
            None => Ok(PathBuf::from(format!("docs/epics/epic-{}.md", epic.epic_num))),
        }
    }

    fn default_story_path(
        &self,
        conn: &Connection,
        epic_num: i64,
        story_num: i64,
    ) -> Result<PathBuf> {
        let epic = EpicService::get_in(conn, epic_num)?;
        match epic.as_ref().and_then(|e| e.feature.clone()) {
            Some(feature) => {
                let slug = epic
                    .as_ref()
                    .map(|e| slugify(&e.title))
                    .unwrap_or_default();
                self.templates.story_path(&feature, epic_num, &slug, story_num)
            }
            None => Ok(PathBuf::from(format!(
                "docs/stories/story-{epic_num}.{story_num}.md"
            ))),
        }
    }
}

fn merge_file_path(metadata: &serde_json::Value, rel_path: &Path) -> serde_json::Value {
    let mut merged = if metadata.is_null() {
        serde_json::json!({})
    } else {
        metadata.clone()
    };
    if let Some(obj) = merged.as_object_mut() {
        obj.insert(
            "file_path".to_owned(),
            serde_json::Value::String(rel_path.to_string_lossy().into_owned()),
        );
    }
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_file_path_into_null_metadata() {
        let merged = merge_file_path(&serde_json::Value::Null, Path::new("docs/a.md"));
        assert_eq!(
            merged.get("file_path").and_then(|v| v.as_str()),
            Some("docs/a.md")
        );
    }

    #[test]
    fn merge_file_path_preserves_existing_keys() {
        let merged = merge_file_path(&serde_json::json!({"k": 1}), Path::new("docs/a.md"));
        assert_eq!(merged.get("k").and_then(serde_json::Value::as_i64), Some(1));
        assert!(merged.get("file_path").is_some());
    }
}
