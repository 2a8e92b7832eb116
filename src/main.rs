use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{action_items, consistency, context_cmd, feature, migrate, validate};

/// Development-lifecycle state engine
///
/// keel keeps three stores in lockstep for a single project: the document
/// tree under docs/, the state database (.gao-dev/documents.db), and the
/// git history. Every mutation is atomic across all three — it commits
/// everywhere or rolls back everywhere.
///
/// QUICK START:
///
///   keel create-feature user-auth --scale-level 3
///   keel list-features
///   keel validate-structure --feature user-auth
///
///   # Adopt an existing file-only project:
///   keel migrate
///
///   # Detect and repair drift between files, database, and git:
///   keel consistency-check
///   keel consistency-repair
#[derive(Parser)]
#[command(name = "keel")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'keel <command> --help' for more information on a specific command.")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true, default_value = ".", env = "KEEL_PROJECT")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a feature: folder structure + state row + commit
    CreateFeature(feature::CreateFeatureArgs),

    /// List registered features
    ListFeatures(feature::ListFeaturesArgs),

    /// Validate feature folder structure
    ValidateStructure(validate::ValidateStructureArgs),

    /// Migrate a file-only project to the hybrid architecture
    Migrate(migrate::MigrateArgs),

    /// Detect drift between files, database, and git
    ConsistencyCheck(consistency::CheckArgs),

    /// Repair detected drift (filesystem is the source of truth)
    ConsistencyRepair(consistency::RepairArgs),

    /// Manage action items
    #[command(subcommand)]
    ActionItems(action_items::ActionItemCommands),

    /// Inspect workflow contexts, usage, and lineage
    #[command(subcommand)]
    Context(context_cmd::ContextCommands),
}

fn main() {
    keel::telemetry::init();
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let project = commands::Project::locate(cli.project)?;
    match cli.command {
        Commands::CreateFeature(args) => feature::create(&project, &args),
        Commands::ListFeatures(args) => feature::list(&project, &args),
        Commands::ValidateStructure(args) => validate::run(&project, &args),
        Commands::Migrate(args) => migrate::run(&project, &args),
        Commands::ConsistencyCheck(args) => consistency::check(&project, &args),
        Commands::ConsistencyRepair(args) => consistency::repair(&project, &args),
        Commands::ActionItems(command) => action_items::run(&project, command),
        Commands::Context(command) => context_cmd::run(&project, command),
    }
}
