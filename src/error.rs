//! Engine error types.
//!
//! Defines [`EngineError`], the unified error type for all state-engine
//! operations. Messages are written for the operator driving the CLI: each
//! variant says what went wrong and, where the engine cannot fix it, what to
//! do next.
//!
//! Propagation policy: services raise validation and store errors; the
//! coordinator re-raises them untouched; the atomic manager catches anything
//! after its checkpoint, rolls back, and wraps the original error with the
//! operation name. The migration and consistency engines aggregate errors
//! into result objects instead of propagating.

use std::fmt;

use keel_git::GitError;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified error type for state-engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// The git working tree has uncommitted changes; atomic operations
    /// refuse to start. No automatic remedy.
    WorkingTreeDirty {
        /// Summary of what is dirty.
        detail: String,
    },

    /// An out-of-range parameter, unique-constraint violation, or disallowed
    /// status transition. Surfaced before any mutation, so no rollback is
    /// involved.
    DomainValidation {
        /// What failed validation.
        message: String,
    },

    /// A filesystem read or write failed. Inside an atomic operation this
    /// triggers rollback.
    Io(std::io::Error),

    /// A SQL or constraint failure in the state database.
    Store {
        /// Description from the database layer.
        message: String,
    },

    /// A git operation failed. Inside an atomic operation this triggers
    /// rollback.
    VersionControl(GitError),

    /// An entity or persisted context was not found by its key.
    NotFound {
        /// What was looked up (e.g. `"epic 4"`, `"context 9b1f…"`).
        entity: String,
    },

    /// An atomic operation failed *and* the subsequent rollback failed.
    /// The three stores may be inconsistent; manual intervention required.
    TransactionRollback {
        /// The operation that originally failed.
        operation: String,
        /// The original error message.
        original: String,
        /// The error raised while rolling back.
        rollback: String,
    },

    /// An atomic operation failed after its checkpoint; rollback succeeded.
    /// Wraps the original error with operation context.
    Operation {
        /// The operation that failed (e.g. `"create_story 1.2"`).
        operation: String,
        /// The underlying error.
        source: Box<EngineError>,
    },

    /// A migration phase failed.
    Migration {
        /// The phase that failed (1-4).
        phase: u8,
        /// Description of the failure.
        message: String,
    },

    /// Consistency repair could not fix any of the reported issues.
    ConsistencyRepair {
        /// Description of the failures.
        message: String,
    },
}

impl EngineError {
    /// A [`EngineError::DomainValidation`] with the given message.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::DomainValidation {
            message: message.into(),
        }
    }

    /// A [`EngineError::NotFound`] for the given entity description.
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    /// A [`EngineError::Store`] with the given message.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkingTreeDirty { detail } => {
                write!(
                    f,
                    "git working tree has uncommitted changes: {detail}\n  To fix: commit or stash your changes, then retry."
                )
            }
            Self::DomainValidation { message } => {
                write!(f, "validation failed: {message}")
            }
            Self::Io(err) => {
                write!(f, "filesystem error: {err}")
            }
            Self::Store { message } => {
                write!(f, "state database error: {message}")
            }
            Self::VersionControl(err) => {
                write!(f, "git operation failed: {err}")
            }
            Self::NotFound { entity } => {
                write!(f, "{entity} not found")
            }
            Self::TransactionRollback {
                operation,
                original,
                rollback,
            } => {
                write!(
                    f,
                    "{operation} failed AND rollback failed — the working tree, database, and git history may be inconsistent.\n  Original error: {original}\n  Rollback error: {rollback}\n  Manual intervention required: inspect `git status` and the state database before retrying."
                )
            }
            Self::Operation { operation, source } => {
                write!(f, "{operation} failed (rolled back): {source}")
            }
            Self::Migration { phase, message } => {
                write!(f, "migration phase {phase} failed: {message}")
            }
            Self::ConsistencyRepair { message } => {
                write!(f, "consistency repair failed: {message}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::VersionControl(err) => Some(err),
            Self::Operation { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<GitError> for EngineError {
    fn from(err: GitError) -> Self {
        Self::VersionControl(err)
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store {
            message: format!("JSON serialization failed: {err}"),
        }
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_working_tree_dirty() {
        let err = EngineError::WorkingTreeDirty {
            detail: "2 unstaged files".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("uncommitted changes"));
        assert!(msg.contains("2 unstaged files"));
        assert!(msg.contains("commit or stash"));
    }

    #[test]
    fn display_domain_validation() {
        let err = EngineError::domain("scale_level must be 0-4, got 7");
        let msg = format!("{err}");
        assert!(msg.contains("validation failed"));
        assert!(msg.contains("scale_level"));
    }

    #[test]
    fn display_not_found() {
        let err = EngineError::not_found("epic 4");
        assert_eq!(format!("{err}"), "epic 4 not found");
    }

    #[test]
    fn display_transaction_rollback_mentions_both_errors() {
        let err = EngineError::TransactionRollback {
            operation: "create_story 1.2".to_owned(),
            original: "disk full".to_owned(),
            rollback: "reset refused".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("create_story 1.2"));
        assert!(msg.contains("disk full"));
        assert!(msg.contains("reset refused"));
        assert!(msg.contains("Manual intervention"));
    }

    #[test]
    fn display_operation_wraps_source() {
        let err = EngineError::Operation {
            operation: "create_epic 3".to_owned(),
            source: Box::new(EngineError::domain("duplicate epic_num")),
        };
        let msg = format!("{err}");
        assert!(msg.contains("create_epic 3"));
        assert!(msg.contains("rolled back"));
        assert!(msg.contains("duplicate epic_num"));
    }

    #[test]
    fn operation_source_chain() {
        let err = EngineError::Operation {
            operation: "op".to_owned(),
            source: Box::new(EngineError::store("locked")),
        };
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn from_io_error() {
        let err: EngineError = std::io::Error::other("denied").into();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn from_rusqlite_error() {
        let err: EngineError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, EngineError::Store { .. }));
    }
}
