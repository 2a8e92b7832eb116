//! Subprocess-backed git repository handle.
//!
//! [`Git`] shells out to the `git` binary for every operation. The engine
//! depends on the exact behavior of the user's installed git (hooks, config,
//! lfs filters), so a subprocess is the honest backend: what the engine
//! commits is what `git` itself would commit.
//!
//! Failures propagate with the git command and stderr attached; there are no
//! retries. The caller supplies working-directory scoping via [`Git::new`].

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GitError;
use crate::types::{CommitInfo, WorkTreeStatus};

/// Handle to a local git repository rooted at a fixed directory.
///
/// All operations run `git` with the repository root as the working
/// directory. The handle itself holds no open resources and is cheap to
/// clone.
#[derive(Clone, Debug)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    /// Create a handle for the repository at `root`.
    ///
    /// Does not verify that `root` is a repository; use [`Git::is_repo`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The repository root this handle operates on.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a git command and return its stdout on success.
    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(GitError::Command {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
                exit_code: output.status.code(),
            })
        }
    }

    /// Run a git command where a non-zero exit is an expected answer, not an
    /// error. Returns whether the command succeeded.
    fn run_check(&self, args: &[&str]) -> Result<bool, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()?;
        Ok(output.status.success())
    }

    // -- queries ------------------------------------------------------------

    /// Whether the root directory is inside a git repository.
    pub fn is_repo(&self) -> bool {
        self.run_check(&["rev-parse", "--git-dir"]).unwrap_or(false)
    }

    /// Whether the working tree has no staged, unstaged, or untracked entries.
    pub fn is_working_tree_clean(&self) -> Result<bool, GitError> {
        Ok(self.status()?.is_clean())
    }

    /// Parse `git status --porcelain` into staged/unstaged/untracked lists.
    pub fn status(&self) -> Result<WorkTreeStatus, GitError> {
        let raw = self.run(&["status", "--porcelain"])?;
        Ok(parse_porcelain_status(&raw))
    }

    /// The commit id HEAD currently points at.
    pub fn head_revision(&self) -> Result<String, GitError> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_owned())
    }

    /// The name of the currently checked-out branch (empty when detached).
    pub fn current_branch(&self) -> Result<String, GitError> {
        Ok(self.run(&["branch", "--show-current"])?.trim().to_owned())
    }

    // -- mutations ----------------------------------------------------------

    /// Stage every change in the working tree (`git add -A`).
    pub fn add_all(&self) -> Result<(), GitError> {
        self.run(&["add", "-A"])?;
        Ok(())
    }

    /// Create a commit and return the new HEAD revision.
    ///
    /// `allow_empty` permits commits with no staged changes, which the engine
    /// uses for status-only transitions and migration checkpoints.
    pub fn commit(&self, message: &str, allow_empty: bool) -> Result<String, GitError> {
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(&args)?;
        let revision = self.head_revision()?;
        tracing::debug!(revision = %revision, "git commit created");
        Ok(revision)
    }

    /// Hard-reset the working tree and HEAD to `revision`.
    pub fn reset_hard(&self, revision: &str) -> Result<(), GitError> {
        self.run(&["reset", "--hard", revision])?;
        tracing::debug!(revision = %revision, "git reset --hard");
        Ok(())
    }

    /// Create a branch, optionally checking it out.
    pub fn create_branch(&self, name: &str, checkout: bool) -> Result<(), GitError> {
        if checkout {
            self.run(&["checkout", "-b", name])?;
        } else {
            self.run(&["branch", name])?;
        }
        Ok(())
    }

    /// Delete a branch (`-D` when `force`).
    pub fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, name])?;
        Ok(())
    }

    /// Check out an existing branch.
    pub fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["checkout", branch])?;
        Ok(())
    }

    /// Merge `branch` into the current branch.
    ///
    /// `no_ff` forces a merge commit; `message` overrides the default merge
    /// commit message.
    pub fn merge(&self, branch: &str, no_ff: bool, message: Option<&str>) -> Result<(), GitError> {
        let mut args = vec!["merge"];
        if no_ff {
            args.push("--no-ff");
        }
        if let Some(msg) = message {
            args.push("-m");
            args.push(msg);
        }
        args.push(branch);
        self.run(&args)?;
        Ok(())
    }

    // -- file history -------------------------------------------------------

    /// Metadata of the most recent commit touching `path`, or `None` when the
    /// path has no history.
    pub fn last_commit_for_path(&self, path: &Path) -> Result<Option<CommitInfo>, GitError> {
        let path_str = path.to_string_lossy();
        let raw = self.run(&[
            "log",
            "-1",
            "--format=%H%x1f%an%x1f%at%x1f%B",
            "--",
            path_str.as_ref(),
        ])?;
        Ok(parse_commit_record(&raw))
    }

    /// Whether any commit in history deleted `path`.
    pub fn file_deleted_in_history(&self, path: &Path) -> Result<bool, GitError> {
        let path_str = path.to_string_lossy();
        let raw = self.run(&[
            "log",
            "--diff-filter=D",
            "--max-count=1",
            "--format=%H",
            "--",
            path_str.as_ref(),
        ])?;
        Ok(!raw.trim().is_empty())
    }

    /// Whether `path` is tracked in the index.
    pub fn is_file_tracked(&self, path: &Path) -> Result<bool, GitError> {
        let path_str = path.to_string_lossy();
        self.run_check(&["ls-files", "--error-unmatch", "--", path_str.as_ref()])
    }
}

// ---------------------------------------------------------------------------
// Porcelain parsers
// ---------------------------------------------------------------------------

/// Parse `git status --porcelain` v1 output.
///
/// Each non-empty line is `XY path` where `X` is the index status, `Y` the
/// working-tree status, and the path starts at byte 3. `??` lines are
/// untracked; any other non-space `X` marks a staged change and non-space `Y`
/// an unstaged one (a single path can be both). Rename lines keep only the
/// new path.
fn parse_porcelain_status(raw: &str) -> WorkTreeStatus {
    let mut status = WorkTreeStatus::default();

    for line in raw.lines() {
        // Minimum valid line: "XY p" (2 status bytes + space + 1 path char).
        if line.len() < 4 {
            continue;
        }
        let bytes = line.as_bytes();
        let (index, worktree) = (bytes[0] as char, bytes[1] as char);

        let path_str = &line[3..];
        // Rename entries: "R  old -> new" — record the new path.
        let path_str = path_str
            .rsplit_once(" -> ")
            .map_or(path_str, |(_, new)| new);
        // Strip quotes git adds around paths with special characters.
        let path_str = path_str
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(path_str);
        if path_str.is_empty() {
            continue;
        }
        let path = PathBuf::from(path_str);

        if index == '?' && worktree == '?' {
            status.untracked.push(path);
            continue;
        }
        if index != ' ' && index != '?' {
            status.staged.push(path.clone());
        }
        if worktree != ' ' && worktree != '?' {
            status.unstaged.push(path);
        }
    }

    status
}

/// Parse one `%H%x1f%an%x1f%at%x1f%B` log record.
fn parse_commit_record(raw: &str) -> Option<CommitInfo> {
    let raw = raw.trim_end_matches('\n');
    if raw.is_empty() {
        return None;
    }
    let mut fields = raw.splitn(4, '\u{1f}');
    let revision = fields.next()?.trim().to_owned();
    let author = fields.next()?.to_owned();
    let timestamp = fields.next()?.trim().parse::<i64>().ok()?;
    let message = fields.next()?.trim_end().to_owned();
    if revision.is_empty() {
        return None;
    }
    Some(CommitInfo {
        revision,
        message,
        author,
        timestamp,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
