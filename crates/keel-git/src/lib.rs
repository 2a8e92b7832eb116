//! Git abstraction layer for keel.
//!
//! This crate defines [`Git`], the single handle through which the rest of
//! keel talks to version control. The handle shells out to the installed
//! `git` binary and parses porcelain output; no other keel crate invokes git
//! directly.
//!
//! # Crate layout
//!
//! - [`repo`] — the [`Git`] handle and its operations.
//! - [`types`] — value types used in signatures ([`WorkTreeStatus`],
//!   [`CommitInfo`]).
//! - [`error`] — the [`GitError`] enum returned by all operations.

pub mod error;
pub mod repo;
pub mod types;

// Re-export the handle and common types at the crate root for ergonomic
// imports: `use keel_git::{Git, GitError};`
pub use error::GitError;
pub use repo::Git;
pub use types::{CommitInfo, WorkTreeStatus};
