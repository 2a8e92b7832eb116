//! Feature path validation.
//!
//! Stateless checks over the on-disk feature layout. These deliberately
//! hold no references to the store or the registry — they look at the
//! filesystem and report violations as plain strings.

use std::path::Path;

/// Required files at the root of every feature folder.
const REQUIRED_FILES: [&str; 3] = ["PRD.md", "README.md", "CHANGELOG.md"];

/// Required folders at the root of every feature folder.
const REQUIRED_FOLDERS: [&str; 2] = ["epics", "QA"];

/// Whether `path` lies inside the feature folder for `feature_name`.
pub fn validate_feature_path(path: &Path, feature_name: &str, features_dir: &Path) -> bool {
    let feature_root = features_dir.join(feature_name);
    path.starts_with(&feature_root)
}

/// Extract the feature name from a path under the features directory.
///
/// `docs/features/user-auth/PRD.md` → `Some("user-auth")`.
pub fn extract_feature_from_path(path: &Path, features_dir: &Path) -> Option<String> {
    let rel = path.strip_prefix(features_dir).ok()?;
    let first = rel.components().next()?;
    first.as_os_str().to_str().map(ToOwned::to_owned)
}

/// Validate a feature folder's structure. Returns violation messages
/// (empty when compliant).
///
/// Checks: the folder exists; required files and folders are present;
/// the legacy `epics.md` file and root-level `stories/` folder are gone
/// (stories are co-located inside `epics/<n>-<name>/stories/`).
pub fn validate_structure(feature_path: &Path) -> Vec<String> {
    let mut violations = Vec::new();

    if !feature_path.is_dir() {
        violations.push(format!(
            "Feature folder does not exist: {}",
            feature_path.display()
        ));
        return violations;
    }

    for required in REQUIRED_FILES {
        if !feature_path.join(required).is_file() {
            violations.push(format!("Missing required file: {required}"));
        }
    }

    for required in REQUIRED_FOLDERS {
        let folder = feature_path.join(required);
        if !folder.exists() {
            violations.push(format!("Missing required folder: {required}/"));
        } else if !folder.is_dir() {
            violations.push(format!("{required} is a file, should be a folder"));
        }
    }

    if feature_path.join("epics.md").is_file() {
        violations.push(
            "Using old epics.md format (should be epics/ folder with co-located stories)"
                .to_owned(),
        );
    }

    if feature_path.join("stories").is_dir() {
        violations.push(
            "Using old stories/ folder at root (stories should be co-located inside epics/{epic-name}/stories/)"
                .to_owned(),
        );
    }

    violations
}

/// Validate an epic folder (`<number>-<name>` co-located pattern).
///
/// Checks: the folder name starts with the epic number; `README.md`
/// (the epic definition) and `stories/` exist.
pub fn validate_epic_structure(epic_path: &Path) -> Vec<String> {
    let mut violations = Vec::new();

    if !epic_path.is_dir() {
        violations.push(format!("Epic folder does not exist: {}", epic_path.display()));
        return violations;
    }

    let name = epic_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let well_formed = name
        .split_once('-')
        .is_some_and(|(num, rest)| !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty());
    if !well_formed {
        violations.push(format!(
            "Epic folder '{name}' does not follow the {{number}}-{{name}} pattern"
        ));
    }

    if !epic_path.join("README.md").is_file() {
        violations.push("Missing epic definition: README.md".to_owned());
    }
    if !epic_path.join("stories").is_dir() {
        violations.push("Missing required folder: stories/".to_owned());
    }

    violations
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
