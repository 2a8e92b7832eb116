//! Migration engine — phased backfill from file-only projects into the
//! state database.
//!
//! Four phases, each checkpointed with an empty commit:
//!
//! 1. create the state tables (registry-tracked schema migrations);
//! 2. backfill epics from `epic-*.md` files under `docs/`;
//! 3. backfill stories from `story-*.md` files, inferring status from each
//!    file's last commit message;
//! 4. validate that every discovered file has a database row.
//!
//! Phases run strictly in order. On failure the engine deletes the
//! migration branch, hard-resets to the original revision, and reports a
//! [`MigrationResult`] with `success = false`. Running the engine twice on
//! a migrated project is a no-op success: the schema runner skips applied
//! migrations and the backfills skip existing rows.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use keel_git::Git;
use serde::Serialize;

use crate::coordinator::StateCoordinator;
use crate::error::{EngineError, Result};
use crate::model::{EpicStatus, Priority, StoryStatus};
use crate::services::{NewEpic, NewStory};

/// Branch used to isolate migration checkpoints.
pub const MIGRATION_BRANCH: &str = "migration/hybrid-architecture";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of a migration run.
#[derive(Clone, Debug, Serialize)]
pub struct MigrationResult {
    pub success: bool,
    /// Last phase that completed (0 when none did).
    pub phase_completed: u8,
    pub epics_count: usize,
    pub stories_count: usize,
    /// Checkpoint revisions by phase name (`"original"`, `"phase_1"`, …).
    pub checkpoints: BTreeMap<String, String>,
    pub summary: String,
    pub error: Option<String>,
    pub rollback_performed: bool,
}

impl MigrationResult {
    fn failed() -> Self {
        Self {
            success: false,
            phase_completed: 0,
            epics_count: 0,
            stories_count: 0,
            checkpoints: BTreeMap::new(),
            summary: String::new(),
            error: None,
            rollback_performed: false,
        }
    }
}

/// What a migration would do, computed without mutating anything.
#[derive(Clone, Debug, Serialize)]
pub struct MigrationPlan {
    pub epic_files: Vec<PathBuf>,
    pub story_files: Vec<PathBuf>,
}

/// Epic metadata parsed from an `epic-<N>.md` file.
#[derive(Clone, Debug)]
pub(crate) struct ParsedEpic {
    pub epic_num: i64,
    pub title: String,
    pub status: EpicStatus,
    pub total_stories: i64,
    /// Project-relative file path.
    pub rel_path: PathBuf,
}

/// Story metadata parsed from a `story-<E>.<S>.md` file.
#[derive(Clone, Debug)]
pub(crate) struct ParsedStory {
    pub epic_num: i64,
    pub story_num: i64,
    pub title: String,
    pub assignee: Option<String>,
    pub priority: Priority,
    pub estimate_hours: Option<f64>,
    /// Project-relative file path.
    pub rel_path: PathBuf,
}

// ---------------------------------------------------------------------------
// MigrationEngine
// ---------------------------------------------------------------------------

/// Orchestrates the four-phase migration with git checkpoints.
pub struct MigrationEngine<'a> {
    project_root: PathBuf,
    git: Git,
    coordinator: &'a StateCoordinator,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(project_root: impl Into<PathBuf>, coordinator: &'a StateCoordinator) -> Self {
        let project_root = project_root.into();
        Self {
            git: Git::new(&project_root),
            project_root,
            coordinator,
        }
    }

    /// What the backfill phases would pick up, without mutating anything.
    pub fn plan(&self) -> Result<MigrationPlan> {
        Ok(MigrationPlan {
            epic_files: self.find_files("epic-*.md")?,
            story_files: self.find_files("story-*.md")?,
        })
    }

    /// Run the full migration.
    ///
    /// `create_branch` isolates the checkpoints on
    /// [`MIGRATION_BRANCH`]; `auto_merge` merges it back (`--no-ff`) on
    /// success.
    pub fn migrate(&self, create_branch: bool, auto_merge: bool) -> MigrationResult {
        tracing::info!(create_branch, auto_merge, "starting hybrid migration");
        let mut result = MigrationResult::failed();
        let mut original_branch: Option<String> = None;

        let run = (|| -> Result<()> {
            self.preflight()?;

            let branch = self.git.current_branch().map_err(EngineError::from)?;
            original_branch = Some(branch);
            result
                .checkpoints
                .insert("original".to_owned(), self.git.head_revision()?);

            if create_branch {
                self.create_migration_branch()?;
            }

            self.phase_1_create_tables()?;
            result
                .checkpoints
                .insert("phase_1".to_owned(), self.git.head_revision()?);
            result.phase_completed = 1;

            result.epics_count = self.phase_2_backfill_epics()?;
            result
                .checkpoints
                .insert("phase_2".to_owned(), self.git.head_revision()?);
            result.phase_completed = 2;

            result.stories_count = self.phase_3_backfill_stories()?;
            result
                .checkpoints
                .insert("phase_3".to_owned(), self.git.head_revision()?);
            result.phase_completed = 3;

            self.phase_4_validate()?;
            result
                .checkpoints
                .insert("phase_4".to_owned(), self.git.head_revision()?);
            result.phase_completed = 4;

            Ok(())
        })();

        match run {
            Ok(()) => {
                result.success = true;
                result.summary = format!(
                    "Migration complete: {} epics, {} stories migrated to hybrid architecture",
                    result.epics_count, result.stories_count
                );

                if auto_merge {
                    if let Some(branch) = original_branch.as_deref() {
                        if create_branch {
                            match self.merge_migration_branch(branch) {
                                Ok(()) => {
                                    result.summary.push_str(&format!(" (merged to {branch})"));
                                }
                                Err(err) => {
                                    tracing::error!(error = %err, "auto-merge failed");
                                    result.success = false;
                                    result.error = Some(err.to_string());
                                    result.summary =
                                        format!("Migration completed but merge failed: {err}");
                                }
                            }
                        }
                    }
                }

                tracing::info!(
                    epics = result.epics_count,
                    stories = result.stories_count,
                    "migration finished"
                );
                result
            }
            Err(err) => {
                tracing::error!(phase = result.phase_completed, error = %err, "migration failed");
                result.error = Some(err.to_string());

                let rollback = self.rollback(
                    result.checkpoints.get("original").map(String::as_str),
                    original_branch.as_deref(),
                    create_branch,
                );
                match rollback {
                    Ok(()) => {
                        result.rollback_performed = true;
                        result.summary = format!(
                            "Migration failed at phase {}, rollback successful",
                            result.phase_completed + 1
                        );
                    }
                    Err(rollback_err) => {
                        tracing::error!(error = %rollback_err, "migration rollback failed");
                        result.summary = format!(
                            "Migration failed at phase {}, rollback also failed: {rollback_err}",
                            result.phase_completed + 1
                        );
                    }
                }
                result
            }
        }
    }

    // -- phases -------------------------------------------------------------

    fn phase_1_create_tables(&self) -> Result<()> {
        tracing::info!("phase 1: creating state tables");
        self.coordinator
            .store()
            .apply_migrations()
            .map_err(|e| phase_err(1, &e))?;

        self.checkpoint(
            "chore(migration): Phase 1 - Create state tables\n\n\
             Created state, feature, workflow-context, and usage tables.\n\n\
             Migration to hybrid architecture in progress.",
        )
        .map_err(|e| phase_err(1, &e))
    }

    fn phase_2_backfill_epics(&self) -> Result<usize> {
        tracing::info!("phase 2: backfilling epics");
        let run = || -> Result<usize> {
            let mut migrated = 0usize;
            for file in self.find_files("epic-*.md")? {
                let Some(parsed) = self.parse_epic_file(&file) else {
                    continue;
                };
                let exists = self
                    .coordinator
                    .epics
                    .get(parsed.epic_num)?
                    .is_some();
                if exists {
                    tracing::debug!(epic = parsed.epic_num, "epic already migrated, skipping");
                    continue;
                }

                self.coordinator.create_epic(&NewEpic {
                    epic_num: parsed.epic_num,
                    title: parsed.title.clone(),
                    status: parsed.status,
                    total_stories: parsed.total_stories,
                    feature: None,
                    metadata: serde_json::json!({
                        "file_path": parsed.rel_path.to_string_lossy()
                    }),
                })?;
                migrated += 1;
                tracing::info!(epic = parsed.epic_num, title = %parsed.title, "epic migrated");
            }
            Ok(migrated)
        };

        let migrated = run().map_err(|e| phase_err(2, &e))?;
        self.checkpoint(&format!(
            "chore(migration): Phase 2 - Backfill {migrated} epics\n\n\
             Migrated {migrated} epic records from filesystem to database.\n\n\
             Migration to hybrid architecture in progress."
        ))
        .map_err(|e| phase_err(2, &e))?;
        Ok(migrated)
    }

    fn phase_3_backfill_stories(&self) -> Result<usize> {
        tracing::info!("phase 3: backfilling stories");
        let run = || -> Result<usize> {
            let mut migrated = 0usize;
            for file in self.find_files("story-*.md")? {
                let Some(parsed) = self.parse_story_file(&file) else {
                    continue;
                };
                let exists = self
                    .coordinator
                    .stories
                    .get(parsed.epic_num, parsed.story_num)?
                    .is_some();
                if exists {
                    tracing::debug!(
                        story = %format!("{}.{}", parsed.epic_num, parsed.story_num),
                        "story already migrated, skipping"
                    );
                    continue;
                }

                let status = infer_status_from_git(&self.git, &parsed.rel_path);
                self.coordinator.create_story(
                    &NewStory {
                        status,
                        assignee: parsed.assignee.clone(),
                        priority: parsed.priority,
                        estimate_hours: parsed.estimate_hours,
                        metadata: serde_json::json!({
                            "file_path": parsed.rel_path.to_string_lossy()
                        }),
                        ..NewStory::new(parsed.epic_num, parsed.story_num, parsed.title.clone())
                    },
                    // Epic totals come from the epic files themselves.
                    false,
                )?;
                migrated += 1;
                tracing::info!(
                    epic = parsed.epic_num,
                    story = parsed.story_num,
                    status = %status,
                    "story migrated"
                );
            }
            Ok(migrated)
        };

        let migrated = run().map_err(|e| phase_err(3, &e))?;
        self.checkpoint(&format!(
            "chore(migration): Phase 3 - Backfill {migrated} stories\n\n\
             Migrated {migrated} story records from filesystem to database.\n\
             Story states inferred from git history.\n\n\
             Migration to hybrid architecture in progress."
        ))
        .map_err(|e| phase_err(3, &e))?;
        Ok(migrated)
    }

    fn phase_4_validate(&self) -> Result<()> {
        tracing::info!("phase 4: validating migration");
        let run = || -> Result<(usize, usize)> {
            let mut missing = Vec::new();

            let epic_files = self.find_files("epic-*.md")?;
            for file in &epic_files {
                if let Some(parsed) = self.parse_epic_file(file) {
                    if self.coordinator.epics.get(parsed.epic_num)?.is_none() {
                        missing.push(format!("Epic {} missing from database", parsed.epic_num));
                    }
                }
            }

            let story_files = self.find_files("story-*.md")?;
            for file in &story_files {
                if let Some(parsed) = self.parse_story_file(file) {
                    if self
                        .coordinator
                        .stories
                        .get(parsed.epic_num, parsed.story_num)?
                        .is_none()
                    {
                        missing.push(format!(
                            "Story {}.{} missing from database",
                            parsed.epic_num, parsed.story_num
                        ));
                    }
                }
            }

            if missing.is_empty() {
                Ok((epic_files.len(), story_files.len()))
            } else {
                Err(EngineError::store(format!(
                    "validation found {} missing records:\n{}",
                    missing.len(),
                    missing.join("\n")
                )))
            }
        };

        let (epics, stories) = run().map_err(|e| phase_err(4, &e))?;
        self.checkpoint(&format!(
            "chore(migration): Phase 4 - Validate migration completeness\n\n\
             Validated {epics} epics and {stories} stories.\n\
             All files have corresponding database records.\n\n\
             Migration to hybrid architecture complete."
        ))
        .map_err(|e| phase_err(4, &e))
    }

    // -- branch and rollback handling ----------------------------------------

    fn preflight(&self) -> Result<()> {
        if !self.git.is_repo() {
            return Err(EngineError::domain("not a git repository"));
        }
        if !self.git.is_working_tree_clean()? {
            return Err(EngineError::WorkingTreeDirty {
                detail: "commit or stash before migration".to_owned(),
            });
        }
        tracing::info!("migration preflight checks passed");
        Ok(())
    }

    fn create_migration_branch(&self) -> Result<()> {
        // Drop any leftover branch from a previous attempt.
        let _ = self.git.delete_branch(MIGRATION_BRANCH, true);
        self.git.create_branch(MIGRATION_BRANCH, true)?;
        tracing::info!(branch = MIGRATION_BRANCH, "migration branch created");
        Ok(())
    }

    fn merge_migration_branch(&self, target: &str) -> Result<()> {
        self.git.checkout(target)?;
        self.git.merge(
            MIGRATION_BRANCH,
            true,
            Some(&format!(
                "Merge {MIGRATION_BRANCH} into {target}\n\nMigration complete."
            )),
        )?;
        self.git.delete_branch(MIGRATION_BRANCH, false)?;
        tracing::info!(target, "migration branch merged");
        Ok(())
    }

    fn rollback(
        &self,
        checkpoint: Option<&str>,
        original_branch: Option<&str>,
        created_branch: bool,
    ) -> Result<()> {
        tracing::warn!(checkpoint, original_branch, "rolling back migration");

        if created_branch {
            if let Some(branch) = original_branch {
                self.git.checkout(branch)?;
            }
            if let Err(err) = self.git.delete_branch(MIGRATION_BRANCH, true) {
                tracing::warn!(error = %err, "migration branch delete failed");
            }
        }
        if let Some(revision) = checkpoint {
            self.git.reset_hard(revision)?;
        }
        tracing::info!("migration rollback complete");
        Ok(())
    }

    fn checkpoint(&self, message: &str) -> Result<()> {
        let revision = self.git.commit(message, true)?;
        tracing::info!(revision = %revision, "migration checkpoint created");
        Ok(())
    }

    // -- discovery and parsing ----------------------------------------------

    /// Discover files matching `pattern` anywhere under `docs/`, sorted.
    fn find_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let docs = self.project_root.join("docs");
        if !docs.is_dir() {
            return Ok(Vec::new());
        }

        let glob_pattern = docs.join("**").join(pattern);
        let glob_pattern = glob_pattern.to_string_lossy();
        let mut files: Vec<PathBuf> = glob::glob(&glob_pattern)
            .map_err(|e| EngineError::domain(format!("bad glob pattern: {e}")))?
            .filter_map(std::result::Result::ok)
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    pub(crate) fn parse_epic_file(&self, path: &Path) -> Option<ParsedEpic> {
        let name = path.file_stem()?.to_str()?;
        let epic_num: i64 = name.strip_prefix("epic-")?.parse().ok()?;

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "epic file unreadable");
                return None;
            }
        };

        let title = parse_heading_title(&content, "Epic")
            .unwrap_or_else(|| format!("Epic {epic_num}"));
        let status = parse_field(&content, "Status")
            .and_then(|s| s.to_ascii_lowercase().parse::<EpicStatus>().ok())
            .unwrap_or(EpicStatus::Planning);
        let total_stories = parse_field(&content, "Total Stories")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Some(ParsedEpic {
            epic_num,
            title,
            status,
            total_stories,
            rel_path: self.relativize(path),
        })
    }

    pub(crate) fn parse_story_file(&self, path: &Path) -> Option<ParsedStory> {
        let name = path.file_stem()?.to_str()?;
        let (epic_raw, story_raw) = name.strip_prefix("story-")?.split_once('.')?;
        let epic_num: i64 = epic_raw.parse().ok()?;
        let story_num: i64 = story_raw.parse().ok()?;

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "story file unreadable");
                return None;
            }
        };

        let title = parse_heading_title(&content, "Story")
            .unwrap_or_else(|| format!("Story {epic_num}.{story_num}"));
        let assignee = parse_field(&content, "Owner");
        let priority = parse_field(&content, "Priority")
            .and_then(|p| p.parse().ok())
            .unwrap_or_default();
        let estimate_hours = parse_field(&content, "Estimate").and_then(|e| e.parse().ok());

        Some(ParsedStory {
            epic_num,
            story_num,
            title,
            assignee,
            priority,
            estimate_hours,
            rel_path: self.relativize(path),
        })
    }

    fn relativize(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.project_root)
            .map_or_else(|_| path.to_path_buf(), Path::to_path_buf)
    }
}

// ---------------------------------------------------------------------------
// Shared parsing and inference helpers
// ---------------------------------------------------------------------------

/// Infer a story's status from the last commit touching its file.
///
/// complete/done/finished/`feat(` → completed; wip/progress/working/
/// `chore(` → in_progress; anything else (including no history) →
/// pending.
pub(crate) fn infer_status_from_git(git: &Git, rel_path: &Path) -> StoryStatus {
    const COMPLETED: [&str; 4] = ["complete", "done", "finished", "feat("];
    const IN_PROGRESS: [&str; 4] = ["wip", "progress", "working", "chore("];

    match git.last_commit_for_path(rel_path) {
        Ok(Some(info)) => {
            let message = info.message.to_ascii_lowercase();
            if COMPLETED.iter().any(|k| message.contains(k)) {
                StoryStatus::Completed
            } else if IN_PROGRESS.iter().any(|k| message.contains(k)) {
                StoryStatus::InProgress
            } else {
                StoryStatus::Pending
            }
        }
        Ok(None) => StoryStatus::Pending,
        Err(err) => {
            tracing::warn!(path = %rel_path.display(), error = %err, "state inference failed");
            StoryStatus::Pending
        }
    }
}

/// Title from the first `# <kind> <number>[: title]` heading.
pub(crate) fn parse_heading_title(content: &str, kind: &str) -> Option<String> {
    for line in content.lines() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('#') else {
            continue;
        };
        let rest = rest.trim_start();

        // Only the first heading counts.
        if rest.len() < kind.len() || !rest[..kind.len()].eq_ignore_ascii_case(kind) {
            return None;
        }
        let after = rest[kind.len()..].trim_start();
        let num_end = after
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(after.len());
        if num_end == 0 {
            return None;
        }
        let tail = after[num_end..].trim_start_matches([':', ' ', '\t']).trim();
        return if tail.is_empty() {
            None
        } else {
            Some(tail.to_owned())
        };
    }
    None
}

/// First word after a `**<field>**:` marker, searched case-insensitively.
pub(crate) fn parse_field(content: &str, field: &str) -> Option<String> {
    let needle = format!("**{}**:", field.to_ascii_lowercase());
    for line in content.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(idx) = lower.find(&needle) {
            let after = &line[idx + needle.len()..];
            return after.split_whitespace().next().map(ToOwned::to_owned);
        }
    }
    None
}

fn phase_err(phase: u8, err: &EngineError) -> EngineError {
    EngineError::Migration {
        phase,
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_title_variants() {
        assert_eq!(
            parse_heading_title("# Epic 3: User Auth\n\nbody", "Epic"),
            Some("User Auth".to_owned())
        );
        assert_eq!(
            parse_heading_title("# epic 3 User Auth", "Epic"),
            Some("User Auth".to_owned())
        );
        assert_eq!(parse_heading_title("# Epic 3", "Epic"), None);
        assert_eq!(parse_heading_title("# Overview", "Epic"), None);
        assert_eq!(
            parse_heading_title("intro text\n# Story 1.2: Login\n", "Story"),
            Some("Login".to_owned())
        );
    }

    #[test]
    fn field_parsing_is_case_insensitive() {
        let content = "# Epic 1\n\n**Status**: in_progress\n**Total Stories**: 5\n";
        assert_eq!(parse_field(content, "Status"), Some("in_progress".to_owned()));
        assert_eq!(parse_field(content, "Total Stories"), Some("5".to_owned()));
        assert_eq!(parse_field(content, "Owner"), None);

        let shouty = "**STATUS**: Done\n";
        assert_eq!(parse_field(shouty, "Status"), Some("Done".to_owned()));
    }

    #[test]
    fn estimate_field_takes_first_token() {
        let content = "**Estimate**: 8.5 hours\n";
        assert_eq!(parse_field(content, "Estimate"), Some("8.5".to_owned()));
    }
}
