//! Consistency engine — detects and repairs divergence between the
//! filesystem, the state database, and git history.
//!
//! Four divergence classes:
//!
//! - **uncommitted changes** — dirty working tree; reported, never
//!   repaired automatically;
//! - **orphaned records** — a row whose `metadata.file_path` no longer
//!   exists on disk (and git confirms deletion or never tracked it);
//! - **unregistered files** — `epic-*.md` / `story-*.md` on disk with no
//!   matching row;
//! - **state mismatches** — story status in the database differs from the
//!   status inferred from the file's last commit message.
//!
//! Repair treats the filesystem as the source of truth: orphan rows are
//! deleted, unregistered files inserted, stale statuses updated. Per-issue
//! failures are logged and skipped; the repair call fails only when nothing
//! could be repaired.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keel_git::Git;
use serde::Serialize;

use crate::coordinator::StateCoordinator;
use crate::error::{EngineError, Result};
use crate::migration::{infer_status_from_git, parse_heading_title};
use crate::model::{EpicStatus, StoryStatus};
use crate::services::{NewEpic, NewStory};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Divergence class of a [`ConsistencyIssue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Uncommitted,
    OrphanedRecord,
    UnregisteredFile,
    StateMismatch,
}

/// How serious an issue is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// One detected inconsistency.
#[derive(Clone, Debug, Serialize)]
pub struct ConsistencyIssue {
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub description: String,
    pub file_path: Option<PathBuf>,
    pub epic_num: Option<i64>,
    pub story_num: Option<i64>,
    pub db_state: Option<StoryStatus>,
    pub git_state: Option<StoryStatus>,
}

/// Result of a [`ConsistencyEngine::check`].
#[derive(Clone, Debug, Serialize)]
pub struct ConsistencyReport {
    pub timestamp: DateTime<Utc>,
    pub uncommitted_changes: Vec<PathBuf>,
    pub orphaned_records: Vec<ConsistencyIssue>,
    pub unregistered_files: Vec<ConsistencyIssue>,
    pub state_mismatches: Vec<ConsistencyIssue>,
}

impl ConsistencyReport {
    /// Total number of detected issues across all classes.
    pub fn total_issues(&self) -> usize {
        self.uncommitted_changes.len()
            + self.orphaned_records.len()
            + self.unregistered_files.len()
            + self.state_mismatches.len()
    }

    /// Whether any issue was detected.
    pub fn has_issues(&self) -> bool {
        self.total_issues() > 0
    }

    /// Every repairable issue (everything except uncommitted changes).
    pub fn repairable_issues(&self) -> impl Iterator<Item = &ConsistencyIssue> {
        self.orphaned_records
            .iter()
            .chain(&self.unregistered_files)
            .chain(&self.state_mismatches)
    }
}

/// Result of a [`ConsistencyEngine::repair`].
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RepairSummary {
    pub repaired: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// ConsistencyEngine
// ---------------------------------------------------------------------------

/// Compares filesystem, database, and git history.
pub struct ConsistencyEngine<'a> {
    project_root: PathBuf,
    git: Git,
    coordinator: &'a StateCoordinator,
}

impl<'a> ConsistencyEngine<'a> {
    pub fn new(project_root: impl Into<PathBuf>, coordinator: &'a StateCoordinator) -> Self {
        let project_root = project_root.into();
        Self {
            git: Git::new(&project_root),
            project_root,
            coordinator,
        }
    }

    /// Run all four checks and assemble a report.
    pub fn check(&self) -> Result<ConsistencyReport> {
        tracing::info!("checking file/database/git consistency");

        let report = ConsistencyReport {
            timestamp: Utc::now(),
            uncommitted_changes: self.check_uncommitted()?,
            orphaned_records: self.check_orphaned()?,
            unregistered_files: self.check_unregistered()?,
            state_mismatches: self.check_state_mismatches()?,
        };

        tracing::info!(
            total = report.total_issues(),
            uncommitted = report.uncommitted_changes.len(),
            orphaned = report.orphaned_records.len(),
            unregistered = report.unregistered_files.len(),
            mismatches = report.state_mismatches.len(),
            "consistency check complete"
        );
        Ok(report)
    }

    /// Repair the issues in `report`, filesystem as source of truth.
    ///
    /// Uncommitted changes are never repaired. Individual failures are
    /// logged and skipped; the call errors only when there were repairable
    /// issues and none succeeded. An empty commit records the repair
    /// unless `create_commit` is false.
    pub fn repair(&self, report: &ConsistencyReport, create_commit: bool) -> Result<RepairSummary> {
        tracing::info!(total = report.total_issues(), "repairing consistency issues");

        if !report.uncommitted_changes.is_empty() {
            tracing::warn!(
                count = report.uncommitted_changes.len(),
                "uncommitted changes present; commit them before repairing"
            );
        }

        let mut summary = RepairSummary {
            repaired: 0,
            failed: 0,
        };
        for issue in report.repairable_issues() {
            match self.repair_issue(issue) {
                Ok(()) => summary.repaired += 1,
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(
                        issue = %issue.description,
                        error = %err,
                        "issue repair failed, continuing"
                    );
                }
            }
        }

        if summary.repaired == 0 && summary.failed > 0 {
            return Err(EngineError::ConsistencyRepair {
                message: format!("all {} repair attempts failed", summary.failed),
            });
        }

        if create_commit && summary.repaired > 0 {
            let message = format!(
                "chore(consistency): repair {} consistency issues\n\n\
                 Repaired:\n\
                 - Orphaned records: {}\n\
                 - Unregistered files: {}\n\
                 - State mismatches: {}\n",
                summary.repaired,
                report.orphaned_records.len(),
                report.unregistered_files.len(),
                report.state_mismatches.len(),
            );
            // Repairs only touch the (ignored) state database, so the
            // commit is empty by construction; staging nothing keeps any
            // unrelated dirty files out of it.
            self.git.commit(&message, true)?;
        }

        tracing::info!(
            repaired = summary.repaired,
            failed = summary.failed,
            "consistency repair complete"
        );
        Ok(summary)
    }

    // -- checks -------------------------------------------------------------

    fn check_uncommitted(&self) -> Result<Vec<PathBuf>> {
        let status = self.git.status()?;
        let dirty = status.dirty_paths();
        if !dirty.is_empty() {
            tracing::warn!(count = dirty.len(), "uncommitted changes detected");
        }
        Ok(dirty)
    }

    fn check_orphaned(&self) -> Result<Vec<ConsistencyIssue>> {
        let mut issues = Vec::new();

        for epic in self.coordinator.epics.list()? {
            let Some(rel_path) = metadata_file_path(&epic.metadata) else {
                continue;
            };
            if self.is_orphaned(&rel_path)? {
                issues.push(ConsistencyIssue {
                    kind: IssueKind::OrphanedRecord,
                    severity: IssueSeverity::Error,
                    description: format!("Epic {} file deleted from filesystem", epic.epic_num),
                    file_path: Some(rel_path),
                    epic_num: Some(epic.epic_num),
                    story_num: None,
                    db_state: None,
                    git_state: None,
                });
            }
        }

        for story in self.coordinator.stories.list()? {
            let Some(rel_path) = metadata_file_path(&story.metadata) else {
                continue;
            };
            if self.is_orphaned(&rel_path)? {
                issues.push(ConsistencyIssue {
                    kind: IssueKind::OrphanedRecord,
                    severity: IssueSeverity::Error,
                    description: format!(
                        "Story {} file deleted from filesystem",
                        story.story_id()
                    ),
                    file_path: Some(rel_path),
                    epic_num: Some(story.epic_num),
                    story_num: Some(story.story_num),
                    db_state: None,
                    git_state: None,
                });
            }
        }

        if !issues.is_empty() {
            tracing::warn!(count = issues.len(), "orphaned records detected");
        }
        Ok(issues)
    }

    fn check_unregistered(&self) -> Result<Vec<ConsistencyIssue>> {
        let mut issues = Vec::new();

        for file in self.find_docs("epic-*.md")? {
            let Some(epic_num) = epic_num_from_name(&file) else {
                continue;
            };
            if self.coordinator.epics.get(epic_num)?.is_none() {
                issues.push(ConsistencyIssue {
                    kind: IssueKind::UnregisteredFile,
                    severity: IssueSeverity::Warning,
                    description: format!(
                        "Epic file {} not registered in database",
                        file_name(&file)
                    ),
                    file_path: Some(self.relativize(&file)),
                    epic_num: Some(epic_num),
                    story_num: None,
                    db_state: None,
                    git_state: None,
                });
            }
        }

        for file in self.find_docs("story-*.md")? {
            let Some((epic_num, story_num)) = story_nums_from_name(&file) else {
                continue;
            };
            if self.coordinator.stories.get(epic_num, story_num)?.is_none() {
                issues.push(ConsistencyIssue {
                    kind: IssueKind::UnregisteredFile,
                    severity: IssueSeverity::Warning,
                    description: format!(
                        "Story file {} not registered in database",
                        file_name(&file)
                    ),
                    file_path: Some(self.relativize(&file)),
                    epic_num: Some(epic_num),
                    story_num: Some(story_num),
                    db_state: None,
                    git_state: None,
                });
            }
        }

        if !issues.is_empty() {
            tracing::warn!(count = issues.len(), "unregistered files detected");
        }
        Ok(issues)
    }

    fn check_state_mismatches(&self) -> Result<Vec<ConsistencyIssue>> {
        let mut issues = Vec::new();

        for story in self.coordinator.stories.list()? {
            let Some(rel_path) = metadata_file_path(&story.metadata) else {
                continue;
            };
            if !self.project_root.join(&rel_path).exists() {
                continue;
            }

            let git_state = infer_status_from_git(&self.git, &rel_path);
            if git_state != story.status {
                issues.push(ConsistencyIssue {
                    kind: IssueKind::StateMismatch,
                    severity: IssueSeverity::Warning,
                    description: format!("Story {} state mismatch", story.story_id()),
                    file_path: Some(rel_path),
                    epic_num: Some(story.epic_num),
                    story_num: Some(story.story_num),
                    db_state: Some(story.status),
                    git_state: Some(git_state),
                });
            }
        }

        if !issues.is_empty() {
            tracing::warn!(count = issues.len(), "state mismatches detected");
        }
        Ok(issues)
    }

    // -- repairs ------------------------------------------------------------

    fn repair_issue(&self, issue: &ConsistencyIssue) -> Result<()> {
        match issue.kind {
            IssueKind::OrphanedRecord => self.repair_orphaned(issue),
            IssueKind::UnregisteredFile => self.repair_unregistered(issue),
            IssueKind::StateMismatch => self.repair_state_mismatch(issue),
            IssueKind::Uncommitted => Ok(()),
        }
    }

    fn repair_orphaned(&self, issue: &ConsistencyIssue) -> Result<()> {
        match (issue.epic_num, issue.story_num) {
            (Some(epic), Some(story)) => {
                self.coordinator.stories.delete(epic, story)?;
                tracing::info!(epic, story, "orphaned story removed");
            }
            (Some(epic), None) => {
                self.coordinator.epics.delete(epic)?;
                tracing::info!(epic, "orphaned epic removed");
            }
            _ => {}
        }
        Ok(())
    }

    fn repair_unregistered(&self, issue: &ConsistencyIssue) -> Result<()> {
        let rel_path = issue
            .file_path
            .as_ref()
            .ok_or_else(|| EngineError::domain("unregistered issue missing file path"))?;
        let full = self.project_root.join(rel_path);
        let content = std::fs::read_to_string(&full)?;
        let metadata = serde_json::json!({ "file_path": rel_path.to_string_lossy() });

        match (issue.epic_num, issue.story_num) {
            (Some(epic_num), Some(story_num)) => {
                let title = parse_heading_title(&content, "Story")
                    .unwrap_or_else(|| format!("Story {epic_num}.{story_num}"));
                let status = infer_status_from_git(&self.git, rel_path);
                self.coordinator.create_story(
                    &NewStory {
                        status,
                        metadata,
                        ..NewStory::new(epic_num, story_num, title)
                    },
                    false,
                )?;
                tracing::info!(epic = epic_num, story = story_num, status = %status, "unregistered story added");
            }
            (Some(epic_num), None) => {
                let title = parse_heading_title(&content, "Epic")
                    .unwrap_or_else(|| format!("Epic {epic_num}"));
                self.coordinator.create_epic(&NewEpic {
                    status: EpicStatus::Planning,
                    metadata,
                    ..NewEpic::new(epic_num, title)
                })?;
                tracing::info!(epic = epic_num, "unregistered epic added");
            }
            _ => {}
        }
        Ok(())
    }

    fn repair_state_mismatch(&self, issue: &ConsistencyIssue) -> Result<()> {
        let (Some(epic), Some(story), Some(git_state)) =
            (issue.epic_num, issue.story_num, issue.git_state)
        else {
            return Ok(());
        };
        self.coordinator
            .stories
            .transition(epic, story, git_state, None)?;
        tracing::info!(
            epic,
            story,
            old_state = ?issue.db_state,
            new_state = %git_state,
            "story state updated to match git"
        );
        Ok(())
    }

    // -- helpers ------------------------------------------------------------

    fn is_orphaned(&self, rel_path: &Path) -> Result<bool> {
        if self.project_root.join(rel_path).exists() {
            return Ok(false);
        }
        let deleted = self.git.file_deleted_in_history(rel_path)?;
        let tracked = self.git.is_file_tracked(rel_path)?;
        Ok(deleted || !tracked)
    }

    fn find_docs(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let docs = self.project_root.join("docs");
        if !docs.is_dir() {
            return Ok(Vec::new());
        }
        let glob_pattern = docs.join("**").join(pattern);
        let mut files: Vec<PathBuf> = glob::glob(&glob_pattern.to_string_lossy())
            .map_err(|e| EngineError::domain(format!("bad glob pattern: {e}")))?
            .filter_map(std::result::Result::ok)
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    fn relativize(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.project_root)
            .map_or_else(|_| path.to_path_buf(), Path::to_path_buf)
    }
}

fn metadata_file_path(metadata: &serde_json::Value) -> Option<PathBuf> {
    metadata
        .get("file_path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
}

fn epic_num_from_name(path: &Path) -> Option<i64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("epic-")?
        .parse()
        .ok()
}

fn story_nums_from_name(path: &Path) -> Option<(i64, i64)> {
    let (epic, story) = path
        .file_stem()?
        .to_str()?
        .strip_prefix("story-")?
        .split_once('.')?;
    Some((epic.parse().ok()?, story.parse().ok()?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_file_path_extraction() {
        assert_eq!(
            metadata_file_path(&serde_json::json!({"file_path": "docs/a.md"})),
            Some(PathBuf::from("docs/a.md"))
        );
        assert_eq!(metadata_file_path(&serde_json::Value::Null), None);
    }

    #[test]
    fn filename_number_parsing() {
        assert_eq!(epic_num_from_name(Path::new("docs/epics/epic-12.md")), Some(12));
        assert_eq!(epic_num_from_name(Path::new("docs/epics/epic-x.md")), None);
        assert_eq!(
            story_nums_from_name(Path::new("docs/stories/story-1.3.md")),
            Some((1, 3))
        );
        assert_eq!(story_nums_from_name(Path::new("docs/stories/story-1.md")), None);
    }

    #[test]
    fn report_totals_and_repairable() {
        let issue = ConsistencyIssue {
            kind: IssueKind::StateMismatch,
            severity: IssueSeverity::Warning,
            description: "d".to_owned(),
            file_path: None,
            epic_num: Some(1),
            story_num: Some(1),
            db_state: Some(StoryStatus::Pending),
            git_state: Some(StoryStatus::Completed),
        };
        let report = ConsistencyReport {
            timestamp: Utc::now(),
            uncommitted_changes: vec![PathBuf::from("dirty.md")],
            orphaned_records: vec![],
            unregistered_files: vec![],
            state_mismatches: vec![issue],
        };
        assert_eq!(report.total_issues(), 2);
        assert!(report.has_issues());
        // Uncommitted changes are not repairable.
        assert_eq!(report.repairable_issues().count(), 1);
    }
}
