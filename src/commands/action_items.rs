//! `action-items` subcommands.

use anyhow::Result;
use clap::{Args, Subcommand};

use keel::model::ActionItemPriority;

use super::{Project, print_json};

#[derive(Subcommand)]
pub enum ActionItemCommands {
    /// List action items
    List(ListArgs),
    /// Promote a critical action item into a story
    Promote(PromoteArgs),
    /// Mark an action item completed
    Complete(CompleteArgs),
    /// Defer an action item by recording a review date in its metadata
    Defer(DeferArgs),
    /// Auto-complete stale low-priority action items
    Cleanup(CleanupArgs),
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter by epic number
    #[arg(long)]
    pub epic: Option<i64>,

    /// Filter by priority (critical | high | medium | low)
    #[arg(long)]
    pub priority: Option<String>,

    /// Only items that are not completed
    #[arg(long)]
    pub pending: bool,

    /// Output format (text | json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Args)]
pub struct PromoteArgs {
    /// Action item id
    pub id: i64,

    /// Target epic (defaults to the item's epic)
    #[arg(long)]
    pub epic: Option<i64>,

    /// Bypass the one-promotion-per-epic limit
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct CompleteArgs {
    /// Action item id
    pub id: i64,

    /// Why it was completed
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args)]
pub struct DeferArgs {
    /// Action item id
    pub id: i64,

    /// Days to defer before the next review
    #[arg(long, default_value_t = 30)]
    pub days: u64,
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Complete low-priority pending items created more than this many
    /// days ago
    #[arg(long, default_value_t = 30)]
    pub days: u64,

    /// Show what would be completed without doing it
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(project: &Project, command: ActionItemCommands) -> Result<i32> {
    let coordinator = project.open_coordinator()?;
    let service = &coordinator.action_items;

    match command {
        ActionItemCommands::List(args) => {
            let priority = match args.priority.as_deref().map(str::parse::<ActionItemPriority>) {
                Some(Err(err)) => {
                    eprintln!("error: {err}");
                    return Ok(1);
                }
                Some(Ok(priority)) => Some(priority),
                None => None,
            };
            let items = service.list(args.epic, priority, args.pending)?;
            if args.format == "json" {
                print_json(&serde_json::json!({ "action_items": items }))?;
            } else if items.is_empty() {
                println!("No action items found.");
            } else {
                for item in &items {
                    let promoted = if item.is_promoted() { " [promoted]" } else { "" };
                    println!(
                        "#{}  [{}] [{}] {}{}",
                        item.id, item.priority, item.status, item.title, promoted
                    );
                }
            }
            Ok(0)
        }
        ActionItemCommands::Promote(args) => {
            match service.promote_to_story(args.id, args.epic, args.force) {
                Ok((item, story)) => {
                    println!(
                        "Action item #{} promoted to story {} ('{}').",
                        item.id,
                        story.story_id(),
                        story.title
                    );
                    Ok(0)
                }
                Err(err) => {
                    eprintln!("error: {err}");
                    Ok(1)
                }
            }
        }
        ActionItemCommands::Complete(args) => {
            match service.complete(args.id, args.reason.as_deref()) {
                Ok(item) => {
                    println!("Action item #{} completed.", item.id);
                    Ok(0)
                }
                Err(err) => {
                    eprintln!("error: {err}");
                    Ok(1)
                }
            }
        }
        ActionItemCommands::Defer(args) => match service.defer(args.id, args.days) {
            Ok(item) => {
                let review = item
                    .deferred_until()
                    .map_or_else(String::new, |ts| ts.format("%Y-%m-%d").to_string());
                println!(
                    "Action item #{} deferred for {} day(s) (review after {review}).",
                    item.id, args.days
                );
                Ok(0)
            }
            Err(err) => {
                eprintln!("error: {err}");
                Ok(1)
            }
        },
        ActionItemCommands::Cleanup(args) => {
            if args.dry_run {
                let stale = service.stale_low_priority(args.days)?;
                println!(
                    "Would auto-complete {} low-priority item(s):",
                    stale.len()
                );
                for item in &stale {
                    println!(
                        "  #{}: {} (created {})",
                        item.id,
                        item.title,
                        item.created_at.format("%Y-%m-%d")
                    );
                }
                return Ok(0);
            }

            let completed = service.cleanup(args.days)?;
            println!("Auto-completed {completed} stale low-priority action item(s).");
            Ok(0)
        }
    }
}
