//! `consistency-check` and `consistency-repair`.

use anyhow::Result;
use clap::Args;

use keel::ConsistencyEngine;
use keel::consistency::ConsistencyReport;

use super::Project;

#[derive(Args)]
pub struct CheckArgs {
    /// Print every issue, not just the summary
    #[arg(long)]
    pub verbose: bool,
}

pub fn check(project: &Project, args: &CheckArgs) -> Result<i32> {
    let coordinator = project.open_coordinator()?;
    let engine = ConsistencyEngine::new(&project.root, &coordinator);
    let report = engine.check()?;

    print_summary(&report);
    if args.verbose {
        for path in &report.uncommitted_changes {
            println!("  [warning] uncommitted: {}", path.display());
        }
        for issue in report.repairable_issues() {
            println!("  [{:?}] {}", issue.severity, issue.description);
        }
    }

    Ok(i32::from(report.has_issues()))
}

#[derive(Args)]
pub struct RepairArgs {
    /// Skip the repair commit
    #[arg(long)]
    pub no_commit: bool,

    /// Show what would be repaired without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

pub fn repair(project: &Project, args: &RepairArgs) -> Result<i32> {
    let coordinator = project.open_coordinator()?;
    let engine = ConsistencyEngine::new(&project.root, &coordinator);
    let report = engine.check()?;

    if !report.has_issues() {
        println!("No consistency issues found; nothing to repair.");
        return Ok(0);
    }

    if args.dry_run {
        println!("Would repair {} issue(s):", report.repairable_issues().count());
        for issue in report.repairable_issues() {
            println!("  - {}", issue.description);
        }
        return Ok(0);
    }

    match engine.repair(&report, !args.no_commit) {
        Ok(summary) => {
            println!(
                "Repaired {} issue(s), {} failed.",
                summary.repaired, summary.failed
            );
            Ok(0)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(1)
        }
    }
}

fn print_summary(report: &ConsistencyReport) {
    if !report.has_issues() {
        println!("No consistency issues found.");
        return;
    }
    println!("Found {} issue(s):", report.total_issues());
    println!("  uncommitted changes: {}", report.uncommitted_changes.len());
    println!("  orphaned records:    {}", report.orphaned_records.len());
    println!("  unregistered files:  {}", report.unregistered_files.len());
    println!("  state mismatches:    {}", report.state_mismatches.len());
}
