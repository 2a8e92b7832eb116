//! keel — development-lifecycle state engine.
//!
//! Maintains the authoritative record of a project's decomposition
//! (features, epics, stories) across three stores that must never drift:
//! the document tree on disk, the embedded state database, and the git
//! history. Every mutation is a transaction over all three.
//!
//! # Module map
//!
//! - [`atomic`] — the transactional envelope (fs + db + git or nothing);
//! - [`coordinator`] + [`services`] — the data model and CRUD layer;
//! - [`migration`] — phased backfill from file-only projects;
//! - [`consistency`] — divergence detection and repair;
//! - [`context`] — per-run workflow contexts, cache, usage and lineage;
//! - [`structure`] / [`validate`] — feature folder layouts and checks;
//! - [`store`] — the SQLite state store and schema migrations;
//! - [`config`] — typed configuration and path templates.

pub mod atomic;
pub mod config;
pub mod consistency;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod loader;
pub mod migration;
pub mod model;
pub mod services;
pub mod store;
pub mod structure;
pub mod telemetry;
pub mod validate;

pub use atomic::AtomicStateManager;
pub use consistency::ConsistencyEngine;
pub use coordinator::StateCoordinator;
pub use error::{EngineError, Result};
pub use migration::MigrationEngine;
pub use store::StateStore;
