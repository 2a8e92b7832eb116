//! `validate-structure`.

use anyhow::Result;
use clap::Args;

use keel::validate::validate_structure;

use super::Project;

#[derive(Args)]
pub struct ValidateStructureArgs {
    /// Validate a single feature's folder
    #[arg(long, conflicts_with = "all")]
    pub feature: Option<String>,

    /// Validate every folder under docs/features/
    #[arg(long)]
    pub all: bool,
}

pub fn run(project: &Project, args: &ValidateStructureArgs) -> Result<i32> {
    let features_dir = project.root.join(&project.config.templates.features_dir);

    let targets: Vec<(String, std::path::PathBuf)> = if let Some(name) = &args.feature {
        vec![(name.clone(), features_dir.join(name))]
    } else {
        // --all (also the default when no feature is given).
        let mut found = Vec::new();
        if features_dir.is_dir() {
            for entry in std::fs::read_dir(&features_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    found.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
                }
            }
        }
        found.sort();
        found
    };

    if targets.is_empty() {
        println!("No feature folders to validate.");
        return Ok(0);
    }

    let mut total_violations = 0usize;
    for (name, path) in &targets {
        let violations = validate_structure(path);
        if violations.is_empty() {
            println!("{name}: ok");
        } else {
            println!("{name}: {} violation(s)", violations.len());
            for violation in &violations {
                println!("  - {violation}");
            }
            total_violations += violations.len();
        }
    }

    Ok(i32::from(total_violations > 0))
}
