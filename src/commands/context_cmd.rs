//! `context` subcommands — workflow-context and lineage introspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use uuid::Uuid;

use keel::context::{
    ArtifactType, ContextFilters, EngineContext, ReportFormat, WorkflowStatus,
};

use super::{Project, print_json};

#[derive(Subcommand)]
pub enum ContextCommands {
    /// Show one persisted workflow context
    Show(ShowArgs),
    /// List persisted workflow contexts
    List(ListArgs),
    /// Show the document-access history
    History(HistoryArgs),
    /// Show which documents informed an artifact
    Lineage(LineageArgs),
    /// Cache and usage statistics
    Stats,
    /// Clear the in-process document cache
    ClearCache,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Workflow id (UUID)
    pub workflow_id: Uuid,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long)]
    pub epic: Option<i64>,
    #[arg(long)]
    pub story: Option<i64>,
    #[arg(long)]
    pub feature: Option<String>,
    /// Filter by status (running | completed | failed | paused)
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args)]
pub struct HistoryArgs {
    /// Filter by semantic key (prd, architecture, …)
    #[arg(long)]
    pub key: Option<String>,
    /// Filter by workflow id
    #[arg(long)]
    pub workflow: Option<Uuid>,
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args)]
pub struct LineageArgs {
    /// Artifact type (epic | story | task | code | test | doc | other)
    pub artifact_type: String,
    /// Artifact id (e.g. "3.1")
    pub artifact_id: String,
    /// Render an epic-level report instead (markdown | json)
    #[arg(long)]
    pub report: Option<String>,
    /// Epic for --report
    #[arg(long)]
    pub epic: Option<i64>,
}

pub fn run(project: &Project, command: ContextCommands) -> Result<i32> {
    let coordinator = project.open_coordinator()?;
    let engine = EngineContext::new(coordinator.store().clone(), &project.config.cache);

    match command {
        ContextCommands::Show(args) => match engine.persistence.load(&args.workflow_id) {
            Ok(context) => {
                println!("{}", context.to_json()?);
                Ok(0)
            }
            Err(err) => {
                eprintln!("error: {err}");
                Ok(1)
            }
        },
        ContextCommands::List(args) => {
            let status = match args.status.as_deref().map(str::parse::<WorkflowStatus>) {
                Some(Err(err)) => {
                    eprintln!("error: {err}");
                    return Ok(1);
                }
                Some(Ok(status)) => Some(status),
                None => None,
            };
            let filters = ContextFilters {
                epic_num: args.epic,
                story_num: args.story,
                feature: args.feature.as_deref(),
                workflow_name: None,
                status,
            };
            let contexts = engine.persistence.search(&filters, args.limit, 0)?;
            if contexts.is_empty() {
                println!("No workflow contexts found.");
            } else {
                for context in &contexts {
                    println!(
                        "{}  story={} workflow={} phase={} status={}",
                        context.workflow_id,
                        context.story_id(),
                        context.workflow_name,
                        context.current_phase,
                        context.status
                    );
                }
            }
            Ok(0)
        }
        ContextCommands::History(args) => {
            let records = engine.usage.history(
                args.key.as_deref(),
                args.workflow.as_ref(),
                args.limit,
            )?;
            if records.is_empty() {
                println!("No usage records found.");
            } else {
                for record in &records {
                    println!(
                        "{}  {}  hash={} cache_hit={}",
                        record.accessed_at.to_rfc3339(),
                        record.context_key,
                        record.content_hash,
                        record.cache_hit
                    );
                }
            }
            Ok(0)
        }
        ContextCommands::Lineage(args) => {
            if let Some(format) = args.report.as_deref() {
                let Some(epic) = args.epic else {
                    eprintln!("error: --report requires --epic");
                    return Ok(1);
                };
                let format = match format {
                    "markdown" => ReportFormat::Markdown,
                    "json" => ReportFormat::Json,
                    other => {
                        eprintln!("error: unknown report format '{other}'");
                        return Ok(1);
                    }
                };
                println!("{}", engine.lineage.report(epic, format)?);
                return Ok(0);
            }

            let artifact_type: ArtifactType = match args.artifact_type.parse() {
                Ok(kind) => kind,
                Err(err) => {
                    eprintln!("error: {err}");
                    return Ok(1);
                }
            };
            let lineage = engine
                .lineage
                .context_lineage(artifact_type, &args.artifact_id)?;
            if lineage.is_empty() {
                eprintln!(
                    "no lineage recorded for {artifact_type} {}",
                    args.artifact_id
                );
                return Ok(1);
            }
            print_json(&serde_json::json!({ "lineage": lineage }))?;
            Ok(0)
        }
        ContextCommands::Stats => {
            print_json(&serde_json::json!({
                "cache": engine.cache.statistics(),
                "usage_hit_rate": engine.usage.hit_rate(None)?,
            }))?;
            Ok(0)
        }
        ContextCommands::ClearCache => {
            engine.cache.clear();
            println!("Document cache cleared.");
            Ok(0)
        }
    }
}
