//! Error types for git operations.
//!
//! [`GitError`] is the single error type returned by all [`Git`](crate::Git)
//! methods. Command failures carry the exact git invocation and its stderr so
//! callers can surface actionable messages without re-running anything.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`Git`](crate::Git) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A git subprocess exited with a non-zero status.
    #[error("`{command}` failed: {stderr}")]
    Command {
        /// The git command that was run (e.g. `"git commit -m …"`).
        command: String,
        /// Captured stderr from git, trimmed.
        stderr: String,
        /// The process exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// The target directory is not inside a git repository.
    #[error("not a git repository: {}", path.display())]
    NotARepository {
        /// The directory that was checked.
        path: PathBuf,
    },

    /// An I/O error occurred (process spawn, pipe read, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_display_includes_stderr() {
        let err = GitError::Command {
            command: "git commit -m test".to_owned(),
            stderr: "nothing to commit".to_owned(),
            exit_code: Some(1),
        };
        let msg = format!("{err}");
        assert!(msg.contains("git commit"));
        assert!(msg.contains("nothing to commit"));
    }

    #[test]
    fn not_a_repository_display_includes_path() {
        let err = GitError::NotARepository {
            path: PathBuf::from("/tmp/elsewhere"),
        };
        assert!(format!("{err}").contains("/tmp/elsewhere"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::other("spawn failed");
        let err: GitError = io.into();
        assert!(matches!(err, GitError::Io(_)));
    }
}
