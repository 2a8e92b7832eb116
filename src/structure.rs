//! Document structure manager.
//!
//! Creates scale-appropriate feature folder layouts and seed documents:
//!
//! | scale | layout |
//! |---|---|
//! | 0 | nothing |
//! | 1 | `docs/bugs/` |
//! | 2 | feature folder, lightweight PRD, CHANGELOG, README, `QA/` |
//! | 3 | + ARCHITECTURE, full PRD, `epics/`, `retrospectives/` |
//! | 4 | + `ceremonies/`, MIGRATION_GUIDE |
//!
//! The seeded PRD is registered with an external document registry when one
//! is injected; registry failures are logged and never fatal. When embedded
//! in the atomic envelope `auto_commit` must be false so the envelope owns
//! the commit.

use std::path::{Path, PathBuf};

use keel_git::Git;

use crate::config::{PathTemplates, TemplateVars};
use crate::error::Result;

// ---------------------------------------------------------------------------
// DocumentRegistry collaborator
// ---------------------------------------------------------------------------

/// External document-registry collaborator.
///
/// The engine only talks *to* the registry; it never calls back. An
/// unavailable registry degrades to a warning.
pub trait DocumentRegistry {
    /// Register a seeded document.
    fn register(
        &self,
        path: &Path,
        doc_type: &str,
        feature: &str,
        metadata: &serde_json::Value,
    ) -> Result<()>;

    /// Resolve the canonical path for a document type within a feature.
    /// Registries that don't index by type can leave the default (no
    /// answer).
    fn lookup(&self, doc_type: &str, feature: &str) -> Result<Option<PathBuf>> {
        let _ = (doc_type, feature);
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// DocumentStructureManager
// ---------------------------------------------------------------------------

/// Creates feature folder structures under the project root.
pub struct DocumentStructureManager {
    project_root: PathBuf,
    templates: PathTemplates,
    auto_commit: bool,
    registry: Option<Box<dyn DocumentRegistry>>,
}

impl DocumentStructureManager {
    pub fn new(project_root: impl Into<PathBuf>, templates: PathTemplates) -> Self {
        Self {
            project_root: project_root.into(),
            templates,
            auto_commit: false,
            registry: None,
        }
    }

    /// Enable or disable self-committing. Must stay off inside the atomic
    /// envelope.
    #[must_use]
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Inject a document registry to receive seeded PRDs.
    #[must_use]
    pub fn with_registry(mut self, registry: Box<dyn DocumentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Path of the feature folder for `feature_name`.
    pub fn feature_dir(&self, feature_name: &str) -> PathBuf {
        self.project_root
            .join(&self.templates.features_dir)
            .join(feature_name)
    }

    /// Create the folder structure for a feature at the given scale level.
    ///
    /// Returns the created folder, or `None` for scale 0 (chores get no
    /// folder). Existing files are left untouched, so re-running is safe.
    pub fn initialize_feature_folder(
        &self,
        feature_name: &str,
        scale_level: u8,
        description: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        tracing::info!(feature = feature_name, scale_level, "initializing feature folder");

        if scale_level == 0 {
            tracing::info!(feature = feature_name, "scale 0: no folder created");
            return Ok(None);
        }

        if scale_level == 1 {
            let bugs_dir = self.project_root.join(&self.templates.bugs_dir);
            std::fs::create_dir_all(&bugs_dir)?;
            if self.auto_commit {
                let git = Git::new(&self.project_root);
                git.add_all()?;
                git.commit("docs(bugs): initialize bugs directory", true)?;
            }
            tracing::info!(path = %bugs_dir.display(), "bugs directory created");
            return Ok(Some(bugs_dir));
        }

        // Scale 2+: the feature folder proper.
        let feature_path = self.feature_dir(feature_name);
        std::fs::create_dir_all(&feature_path)?;
        std::fs::create_dir_all(feature_path.join("QA"))?;

        let desc = description.unwrap_or("No description yet.");
        self.seed_file(
            &feature_path.join("PRD.md"),
            &if scale_level >= 3 {
                full_prd(feature_name, desc)
            } else {
                lightweight_prd(feature_name, desc)
            },
        )?;
        self.seed_file(&feature_path.join("CHANGELOG.md"), &changelog(feature_name))?;
        self.seed_file(
            &feature_path.join("README.md"),
            &readme(feature_name, desc, scale_level),
        )?;

        if scale_level >= 3 {
            std::fs::create_dir_all(feature_path.join("epics"))?;
            std::fs::create_dir_all(feature_path.join("retrospectives"))?;
            self.seed_file(
                &feature_path.join("ARCHITECTURE.md"),
                &architecture(feature_name),
            )?;
        }

        if scale_level >= 4 {
            std::fs::create_dir_all(feature_path.join("ceremonies"))?;
            self.seed_file(
                &feature_path.join("MIGRATION_GUIDE.md"),
                &migration_guide(feature_name),
            )?;
        }

        self.register_prd(feature_name, scale_level, &feature_path);

        if self.auto_commit {
            let git = Git::new(&self.project_root);
            git.add_all()?;
            git.commit(
                &format!(
                    "docs({feature_name}): initialize feature folder (Level {scale_level})\n\n\
                     Created feature structure with scale level {scale_level}."
                ),
                true,
            )?;
            tracing::info!(feature = feature_name, "feature folder committed");
        }

        Ok(Some(feature_path))
    }

    /// Write the seed story/epic file bodies dictated by the path
    /// templates. Used by the atomic envelope, which owns the commit.
    pub fn write_story_file(
        &self,
        feature: &str,
        epic: i64,
        epic_name: &str,
        story: i64,
        body: &str,
    ) -> Result<PathBuf> {
        let rel = PathTemplates::render(
            &self.templates.story_location,
            &TemplateVars::story(feature, epic, epic_name, story),
        )?;
        let full = self.project_root.join(&rel);
        write_file(&full, body)?;
        Ok(rel)
    }

    fn seed_file(&self, path: &Path, content: &str) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        write_file(path, content)
    }

    fn register_prd(&self, feature_name: &str, scale_level: u8, feature_path: &Path) {
        let Some(registry) = &self.registry else {
            return;
        };
        let result = registry.register(
            &feature_path.join("PRD.md"),
            "prd",
            feature_name,
            &serde_json::json!({ "feature": feature_name, "scale_level": scale_level }),
        );
        if let Err(err) = result {
            // The registry is a best-effort collaborator.
            tracing::warn!(feature = feature_name, error = %err, "document registry unavailable");
        }
    }
}

/// Write a file, creating parent directories.
pub(crate) fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    tracing::debug!(path = %path.display(), size = content.len(), "file written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Seed templates
// ---------------------------------------------------------------------------

fn lightweight_prd(feature: &str, description: &str) -> String {
    format!(
        "# PRD: {feature}\n\n## Summary\n\n{description}\n\n## Goals\n\n- TBD\n\n## Out of Scope\n\n- TBD\n"
    )
}

fn full_prd(feature: &str, description: &str) -> String {
    format!(
        "# PRD: {feature}\n\n## Summary\n\n{description}\n\n## Goals\n\n- TBD\n\n\
         ## User Stories\n\n- TBD\n\n## Acceptance Criteria\n\n- TBD\n\n\
         ## Out of Scope\n\n- TBD\n\n## Risks\n\n- TBD\n"
    )
}

fn architecture(feature: &str) -> String {
    format!(
        "# Architecture: {feature}\n\n## Overview\n\nTBD\n\n## Components\n\n- TBD\n\n## Decisions\n\n- TBD\n"
    )
}

fn changelog(feature: &str) -> String {
    format!("# Changelog: {feature}\n\nAll notable changes to this feature.\n")
}

fn readme(feature: &str, description: &str, scale_level: u8) -> String {
    format!(
        "# {feature}\n\n{description}\n\nScale level: {scale_level}\n\n\
         ## Layout\n\n- `PRD.md` — product requirements\n- `QA/` — test notes and reports\n"
    )
}

fn migration_guide(feature: &str) -> String {
    format!("# Migration Guide: {feature}\n\n## Breaking Changes\n\n- TBD\n\n## Steps\n\n1. TBD\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn manager(root: &Path) -> DocumentStructureManager {
        DocumentStructureManager::new(root, PathTemplates::default())
    }

    #[test]
    fn scale_0_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let created = manager(tmp.path())
            .initialize_feature_folder("chore", 0, None)
            .unwrap();
        assert!(created.is_none());
        assert!(!tmp.path().join("docs").exists());
    }

    #[test]
    fn scale_1_creates_bugs_dir() {
        let tmp = TempDir::new().unwrap();
        let created = manager(tmp.path())
            .initialize_feature_folder("fix-login", 1, None)
            .unwrap();
        assert_eq!(created, Some(tmp.path().join("docs/bugs")));
        assert!(tmp.path().join("docs/bugs").is_dir());
    }

    #[test]
    fn scale_2_creates_lightweight_layout() {
        let tmp = TempDir::new().unwrap();
        let created = manager(tmp.path())
            .initialize_feature_folder("search", 2, Some("Full-text search"))
            .unwrap()
            .expect("folder created");

        assert!(created.join("PRD.md").is_file());
        assert!(created.join("CHANGELOG.md").is_file());
        assert!(created.join("README.md").is_file());
        assert!(created.join("QA").is_dir());
        assert!(!created.join("ARCHITECTURE.md").exists());
        assert!(!created.join("epics").exists());

        let prd = std::fs::read_to_string(created.join("PRD.md")).unwrap();
        assert!(prd.contains("Full-text search"));
        assert!(!prd.contains("Acceptance Criteria"), "lightweight template");
    }

    #[test]
    fn scale_3_adds_architecture_and_epics() {
        let tmp = TempDir::new().unwrap();
        let created = manager(tmp.path())
            .initialize_feature_folder("payments", 3, None)
            .unwrap()
            .expect("folder created");

        assert!(created.join("ARCHITECTURE.md").is_file());
        assert!(created.join("epics").is_dir());
        assert!(created.join("retrospectives").is_dir());
        assert!(!created.join("ceremonies").exists());

        let prd = std::fs::read_to_string(created.join("PRD.md")).unwrap();
        assert!(prd.contains("Acceptance Criteria"), "full template");
    }

    #[test]
    fn scale_4_adds_ceremonies_and_migration_guide() {
        let tmp = TempDir::new().unwrap();
        let created = manager(tmp.path())
            .initialize_feature_folder("platform", 4, None)
            .unwrap()
            .expect("folder created");

        assert!(created.join("ceremonies").is_dir());
        assert!(created.join("MIGRATION_GUIDE.md").is_file());
    }

    #[test]
    fn rerun_keeps_existing_files() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path());
        let created = mgr
            .initialize_feature_folder("stable", 2, None)
            .unwrap()
            .unwrap();

        std::fs::write(created.join("PRD.md"), "# hand-edited\n").unwrap();
        mgr.initialize_feature_folder("stable", 2, None).unwrap();

        let prd = std::fs::read_to_string(created.join("PRD.md")).unwrap();
        assert_eq!(prd, "# hand-edited\n");
    }

    #[test]
    fn write_story_file_follows_template() {
        let tmp = TempDir::new().unwrap();
        let rel = manager(tmp.path())
            .write_story_file("auth", 3, "login", 1, "# Story 3.1: Login\n")
            .unwrap();
        assert_eq!(
            rel,
            PathBuf::from("docs/features/auth/epics/3-login/stories/story-3.1.md")
        );
        assert!(tmp.path().join(rel).is_file());
    }

    struct RecordingRegistry {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl DocumentRegistry for RecordingRegistry {
        fn register(
            &self,
            path: &Path,
            doc_type: &str,
            _feature: &str,
            _metadata: &serde_json::Value,
        ) -> Result<()> {
            if self.fail {
                return Err(crate::error::EngineError::store("registry offline"));
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("{doc_type}:{}", path.display()));
            Ok(())
        }
    }

    #[test]
    fn prd_is_registered_with_registry() {
        let tmp = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mgr = manager(tmp.path()).with_registry(Box::new(RecordingRegistry {
            calls: Arc::clone(&calls),
            fail: false,
        }));

        mgr.initialize_feature_folder("tracked", 2, None).unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("prd:"));
    }

    #[test]
    fn registry_failure_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path()).with_registry(Box::new(RecordingRegistry {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }));

        // Folder creation succeeds even though the registry errors.
        let created = mgr.initialize_feature_folder("resilient", 2, None).unwrap();
        assert!(created.is_some());
    }
}
