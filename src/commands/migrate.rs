//! `migrate`.

use anyhow::Result;
use clap::Args;

use keel::MigrationEngine;

use super::Project;

#[derive(Args)]
pub struct MigrateArgs {
    /// Show what would be migrated without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Run directly on the current branch instead of
    /// migration/hybrid-architecture
    #[arg(long)]
    pub no_branch: bool,

    /// Merge the migration branch back (--no-ff) on success
    #[arg(long)]
    pub auto_merge: bool,
}

pub fn run(project: &Project, args: &MigrateArgs) -> Result<i32> {
    let store = project.open_store()?;
    let coordinator = keel::StateCoordinator::new(store);
    let engine = MigrationEngine::new(&project.root, &coordinator);

    if args.dry_run {
        let plan = engine.plan()?;
        println!(
            "Would migrate {} epic file(s) and {} story file(s):",
            plan.epic_files.len(),
            plan.story_files.len()
        );
        for file in plan.epic_files.iter().chain(&plan.story_files) {
            println!("  {}", file.display());
        }
        return Ok(0);
    }

    let result = engine.migrate(!args.no_branch, args.auto_merge);
    println!("{}", result.summary);
    if let Some(error) = &result.error {
        eprintln!("error: {error}");
    }
    for (phase, revision) in &result.checkpoints {
        println!("  checkpoint {phase}: {}", &revision[..revision.len().min(12)]);
    }

    Ok(i32::from(!result.success))
}
