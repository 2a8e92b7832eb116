//! CLI command implementations.
//!
//! Each module maps engine results onto exit codes: 0 for success (or a
//! clean check), 1 for domain errors, violations, detected issues, or
//! failed repairs.

pub mod action_items;
pub mod consistency;
pub mod context_cmd;
pub mod feature;
pub mod migrate;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};

use keel::config::EngineConfig;
use keel::coordinator::StateCoordinator;
use keel::store::StateStore;

/// A located project: its root and loaded configuration.
pub struct Project {
    pub root: PathBuf,
    pub config: EngineConfig,
}

impl Project {
    /// Resolve the project root and load its configuration.
    pub fn locate(root: PathBuf) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("project root {} not found", root.display()))?;
        let config = EngineConfig::load_for_project(&root)?;
        Ok(Self { root, config })
    }

    /// Absolute path of the state database.
    pub fn db_path(&self) -> PathBuf {
        self.root.join(&self.config.state.db_path)
    }

    /// Whether the state database exists (the project is initialized).
    pub fn is_initialized(&self) -> bool {
        self.db_path().exists()
    }

    /// Open the state store, creating and migrating it if necessary.
    pub fn open_store(&self) -> Result<Arc<StateStore>> {
        Ok(Arc::new(StateStore::open_and_migrate(self.db_path())?))
    }

    /// Open a coordinator over the existing database; fails when the
    /// project has not been initialized yet.
    pub fn open_coordinator(&self) -> Result<StateCoordinator> {
        if !self.is_initialized() {
            bail!(
                "project not initialized: {} does not exist.\n  Run `keel create-feature` or `keel migrate` first.",
                self.db_path().display()
            );
        }
        Ok(StateCoordinator::new(self.open_store()?))
    }
}

/// Print a value as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
