//! Engine configuration (`.gao-dev/config.toml`).
//!
//! Typed configuration records with serde defaults: a missing file means
//! all defaults, unknown fields are rejected. Path templates live in one
//! registry ([`PathTemplates`]) and are rendered through a single
//! substitution function.
//!
//! Template variables: `feature_name`, `epic`, `epic_name`, `story`,
//! `date`. By convention file templates end in `_location` or `_overview`
//! and directory templates end in `_folder` or `_dir`.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::EngineError;

/// Default location of the state database, relative to the project root.
pub const DEFAULT_DB_PATH: &str = ".gao-dev/documents.db";

/// Default location of the config file, relative to the project root.
pub const CONFIG_PATH: &str = ".gao-dev/config.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration.
///
/// Parsed from `.gao-dev/config.toml`. Missing fields use defaults.
/// Missing file → all defaults (no error).
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// State database settings.
    #[serde(default)]
    pub state: StateConfig,

    /// Document cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Path template registry.
    #[serde(default)]
    pub templates: PathTemplates,
}

impl EngineConfig {
    /// Load configuration from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError {
            path: Some(path.to_path_buf()),
            message: format!("failed to read: {e}"),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })
    }

    /// Load the configuration for a project root
    /// (`<root>/.gao-dev/config.toml`).
    pub fn load_for_project(project_root: &Path) -> Result<Self, ConfigError> {
        Self::load(&project_root.join(CONFIG_PATH))
    }
}

/// A configuration file could not be read or parsed.
#[derive(Debug)]
pub struct ConfigError {
    /// Path to the offending file, when known.
    pub path: Option<PathBuf>,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "config error in '{}': {}", path.display(), self.message),
            None => write!(f, "config error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        Self::DomainValidation {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// StateConfig
// ---------------------------------------------------------------------------

/// State database settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Database path, relative to the project root.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Whether atomic operations commit to git (default: true).
    #[serde(default = "default_auto_commit")]
    pub auto_commit: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            auto_commit: default_auto_commit(),
        }
    }
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_owned()
}

const fn default_auto_commit() -> bool {
    true
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

/// Document cache settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Default time-to-live for cached documents, in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Maximum number of cached documents before LRU eviction.
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl_seconds(),
            max_size: default_cache_max_size(),
        }
    }
}

const fn default_cache_ttl_seconds() -> u64 {
    300
}

const fn default_cache_max_size() -> usize {
    100
}

// ---------------------------------------------------------------------------
// PathTemplates
// ---------------------------------------------------------------------------

/// Registry of every path template the engine renders.
///
/// Naming convention: file templates end in `_location` or `_overview`;
/// directory templates end in `_folder` or `_dir`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathTemplates {
    #[serde(default = "default_features_dir")]
    pub features_dir: String,
    #[serde(default = "default_bugs_dir")]
    pub bugs_dir: String,
    #[serde(default = "default_prd_location")]
    pub prd_location: String,
    #[serde(default = "default_architecture_location")]
    pub architecture_location: String,
    #[serde(default = "default_readme_location")]
    pub readme_location: String,
    #[serde(default = "default_changelog_location")]
    pub changelog_location: String,
    #[serde(default = "default_migration_guide_location")]
    pub migration_guide_location: String,
    #[serde(default = "default_epic_folder")]
    pub epic_folder: String,
    #[serde(default = "default_epic_overview")]
    pub epic_overview: String,
    #[serde(default = "default_story_location")]
    pub story_location: String,
    #[serde(default = "default_story_context_location")]
    pub story_context_location: String,
    #[serde(default = "default_qa_folder")]
    pub qa_folder: String,
    #[serde(default = "default_retrospectives_folder")]
    pub retrospectives_folder: String,
    #[serde(default = "default_ceremonies_folder")]
    pub ceremonies_folder: String,
    #[serde(default = "default_coding_standards_location")]
    pub coding_standards_location: String,
    #[serde(default = "default_global_prd_location")]
    pub global_prd_location: String,
    #[serde(default = "default_global_architecture_location")]
    pub global_architecture_location: String,
}

impl Default for PathTemplates {
    fn default() -> Self {
        Self {
            features_dir: default_features_dir(),
            bugs_dir: default_bugs_dir(),
            prd_location: default_prd_location(),
            architecture_location: default_architecture_location(),
            readme_location: default_readme_location(),
            changelog_location: default_changelog_location(),
            migration_guide_location: default_migration_guide_location(),
            epic_folder: default_epic_folder(),
            epic_overview: default_epic_overview(),
            story_location: default_story_location(),
            story_context_location: default_story_context_location(),
            qa_folder: default_qa_folder(),
            retrospectives_folder: default_retrospectives_folder(),
            ceremonies_folder: default_ceremonies_folder(),
            coding_standards_location: default_coding_standards_location(),
            global_prd_location: default_global_prd_location(),
            global_architecture_location: default_global_architecture_location(),
        }
    }
}

fn default_features_dir() -> String {
    "docs/features".to_owned()
}
fn default_bugs_dir() -> String {
    "docs/bugs".to_owned()
}
fn default_prd_location() -> String {
    "docs/features/{{feature_name}}/PRD.md".to_owned()
}
fn default_architecture_location() -> String {
    "docs/features/{{feature_name}}/ARCHITECTURE.md".to_owned()
}
fn default_readme_location() -> String {
    "docs/features/{{feature_name}}/README.md".to_owned()
}
fn default_changelog_location() -> String {
    "docs/features/{{feature_name}}/CHANGELOG.md".to_owned()
}
fn default_migration_guide_location() -> String {
    "docs/features/{{feature_name}}/MIGRATION_GUIDE.md".to_owned()
}
fn default_epic_folder() -> String {
    "docs/features/{{feature_name}}/epics/{{epic}}-{{epic_name}}".to_owned()
}
fn default_epic_overview() -> String {
    "docs/features/{{feature_name}}/epics/{{epic}}-{{epic_name}}/README.md".to_owned()
}
fn default_story_location() -> String {
    "docs/features/{{feature_name}}/epics/{{epic}}-{{epic_name}}/stories/story-{{epic}}.{{story}}.md"
        .to_owned()
}
fn default_story_context_location() -> String {
    "docs/features/{{feature_name}}/epics/{{epic}}-{{epic_name}}/context/story-{{epic}}.{{story}}.xml"
        .to_owned()
}
fn default_qa_folder() -> String {
    "docs/features/{{feature_name}}/QA".to_owned()
}
fn default_retrospectives_folder() -> String {
    "docs/features/{{feature_name}}/retrospectives".to_owned()
}
fn default_ceremonies_folder() -> String {
    "docs/features/{{feature_name}}/ceremonies".to_owned()
}
fn default_coding_standards_location() -> String {
    "docs/CODING_STANDARDS.md".to_owned()
}
fn default_global_prd_location() -> String {
    "docs/PRD.md".to_owned()
}
fn default_global_architecture_location() -> String {
    "docs/ARCHITECTURE.md".to_owned()
}

// ---------------------------------------------------------------------------
// Template rendering
// ---------------------------------------------------------------------------

/// Values substituted into a path template.
#[derive(Clone, Debug, Default)]
pub struct TemplateVars<'a> {
    pub feature_name: Option<&'a str>,
    pub epic: Option<i64>,
    pub epic_name: Option<&'a str>,
    pub story: Option<i64>,
    pub date: Option<NaiveDate>,
}

impl<'a> TemplateVars<'a> {
    /// Vars for feature-level templates.
    pub fn feature(feature_name: &'a str) -> Self {
        Self {
            feature_name: Some(feature_name),
            ..Self::default()
        }
    }

    /// Vars for epic-level templates.
    pub fn epic(feature_name: &'a str, epic: i64, epic_name: &'a str) -> Self {
        Self {
            feature_name: Some(feature_name),
            epic: Some(epic),
            epic_name: Some(epic_name),
            ..Self::default()
        }
    }

    /// Vars for story-level templates.
    pub fn story(feature_name: &'a str, epic: i64, epic_name: &'a str, story: i64) -> Self {
        Self {
            feature_name: Some(feature_name),
            epic: Some(epic),
            epic_name: Some(epic_name),
            story: Some(story),
            ..Self::default()
        }
    }
}

impl PathTemplates {
    /// Render one template from the registry with the given variables.
    ///
    /// Every `{{var}}` must resolve; a leftover placeholder is a
    /// validation error (it would silently produce a literal `{{...}}`
    /// directory otherwise).
    pub fn render(template: &str, vars: &TemplateVars<'_>) -> crate::error::Result<PathBuf> {
        let mut out = template.to_owned();
        if let Some(feature) = vars.feature_name {
            out = out.replace("{{feature_name}}", feature);
        }
        if let Some(epic) = vars.epic {
            out = out.replace("{{epic}}", &epic.to_string());
        }
        if let Some(name) = vars.epic_name {
            out = out.replace("{{epic_name}}", name);
        }
        if let Some(story) = vars.story {
            out = out.replace("{{story}}", &story.to_string());
        }
        if let Some(date) = vars.date {
            out = out.replace("{{date}}", &date.format("%Y-%m-%d").to_string());
        }

        if out.contains("{{") {
            return Err(EngineError::domain(format!(
                "unresolved variable in path template '{template}' (rendered: '{out}')"
            )));
        }
        Ok(PathBuf::from(out))
    }

    /// Project-relative path of a feature's PRD.
    pub fn prd_path(&self, feature: &str) -> crate::error::Result<PathBuf> {
        Self::render(&self.prd_location, &TemplateVars::feature(feature))
    }

    /// Project-relative path of a story file.
    pub fn story_path(
        &self,
        feature: &str,
        epic: i64,
        epic_name: &str,
        story: i64,
    ) -> crate::error::Result<PathBuf> {
        Self::render(
            &self.story_location,
            &TemplateVars::story(feature, epic, epic_name, story),
        )
    }

    /// Project-relative path of an epic folder.
    pub fn epic_dir(
        &self,
        feature: &str,
        epic: i64,
        epic_name: &str,
    ) -> crate::error::Result<PathBuf> {
        Self::render(
            &self.epic_folder,
            &TemplateVars::epic(feature, epic, epic_name),
        )
    }
}

/// Turn a title into the slug used in epic folder names
/// (`3-user-auth` style).
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
