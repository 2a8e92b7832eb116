//! Value types used in [`Git`](crate::Git) signatures.

use std::path::PathBuf;

// ---------------------------------------------------------------------------
// WorkTreeStatus
// ---------------------------------------------------------------------------

/// Snapshot of the working tree, parsed from `git status --porcelain`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkTreeStatus {
    /// Paths with staged (index) changes.
    pub staged: Vec<PathBuf>,
    /// Paths with unstaged working-tree changes.
    pub unstaged: Vec<PathBuf>,
    /// Untracked paths (porcelain `??`).
    pub untracked: Vec<PathBuf>,
}

impl WorkTreeStatus {
    /// Whether the working tree has no staged, unstaged, or untracked entries.
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.unstaged.is_empty() && self.untracked.is_empty()
    }

    /// All dirty paths, in porcelain order, without deduplication across
    /// categories (a path can be both staged and unstaged).
    pub fn dirty_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(self.staged.len() + self.unstaged.len() + self.untracked.len());
        paths.extend(self.staged.iter().cloned());
        paths.extend(self.unstaged.iter().cloned());
        paths.extend(self.untracked.iter().cloned());
        paths
    }
}

// ---------------------------------------------------------------------------
// CommitInfo
// ---------------------------------------------------------------------------

/// Metadata about a single commit, as returned by
/// [`Git::last_commit_for_path`](crate::Git::last_commit_for_path).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    /// Full 40-hex commit id.
    pub revision: String,
    /// Full commit message (subject and body).
    pub message: String,
    /// Author name.
    pub author: String,
    /// Author timestamp, seconds since the Unix epoch.
    pub timestamp: i64,
}

impl CommitInfo {
    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_status_reports_clean() {
        assert!(WorkTreeStatus::default().is_clean());
    }

    #[test]
    fn dirty_status_reports_dirty() {
        let status = WorkTreeStatus {
            staged: vec![PathBuf::from("a.md")],
            ..WorkTreeStatus::default()
        };
        assert!(!status.is_clean());
        assert_eq!(status.dirty_paths(), vec![PathBuf::from("a.md")]);
    }

    #[test]
    fn dirty_paths_keeps_category_order() {
        let status = WorkTreeStatus {
            staged: vec![PathBuf::from("s.md")],
            unstaged: vec![PathBuf::from("u.md")],
            untracked: vec![PathBuf::from("n.md")],
        };
        assert_eq!(
            status.dirty_paths(),
            vec![
                PathBuf::from("s.md"),
                PathBuf::from("u.md"),
                PathBuf::from("n.md")
            ]
        );
    }

    #[test]
    fn commit_subject_is_first_line() {
        let info = CommitInfo {
            revision: "a".repeat(40),
            message: "feat(story-1.1): create Login\n\nbody".to_owned(),
            author: "Test".to_owned(),
            timestamp: 1_700_000_000,
        };
        assert_eq!(info.subject(), "feat(story-1.1): create Login");
    }

    #[test]
    fn commit_subject_of_empty_message() {
        let info = CommitInfo {
            revision: "b".repeat(40),
            message: String::new(),
            author: "Test".to_owned(),
            timestamp: 0,
        };
        assert_eq!(info.subject(), "");
    }
}
