//! `create-feature` and `list-features`.

use anyhow::Result;
use clap::Args;

use keel::AtomicStateManager;
use keel::model::{FeatureScope, FeatureStatus};
use keel::services::NewFeature;

use super::{Project, print_json};

#[derive(Args)]
pub struct CreateFeatureArgs {
    /// Feature name (unique, e.g. "user-auth" or "mvp")
    pub name: String,

    /// How elaborate the document structure should be
    /// (0 chore, 1 bug, 2 small, 3 medium, 4 greenfield)
    #[arg(long, default_value_t = 2)]
    pub scale_level: i64,

    /// Whether this belongs to the MVP or is a standalone feature
    #[arg(long, default_value = "feature")]
    pub scope: String,

    /// Short description seeded into the PRD
    #[arg(long)]
    pub description: Option<String>,

    /// Owner recorded on the feature
    #[arg(long)]
    pub owner: Option<String>,
}

pub fn create(project: &Project, args: &CreateFeatureArgs) -> Result<i32> {
    let scope: FeatureScope = match args.scope.parse() {
        Ok(scope) => scope,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(1);
        }
    };

    let manager = AtomicStateManager::with_config(project.root.clone(), &project.config)?;
    let new = NewFeature {
        description: args.description.clone(),
        owner: args.owner.clone(),
        ..NewFeature::new(args.name.clone(), scope, args.scale_level)
    };

    match manager.create_feature(&new, None) {
        Ok(feature) => {
            println!(
                "Feature '{}' created (scope: {}, scale level: {}).",
                feature.name, feature.scope, feature.scale_level
            );
            println!("  docs: docs/features/{}/", feature.name);
            Ok(0)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(1)
        }
    }
}

#[derive(Args)]
pub struct ListFeaturesArgs {
    /// Filter by scope (mvp | feature)
    #[arg(long)]
    pub scope: Option<String>,

    /// Filter by status (planning | active | complete | archived)
    #[arg(long)]
    pub status: Option<String>,

    /// Output format (text | json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

pub fn list(project: &Project, args: &ListFeaturesArgs) -> Result<i32> {
    let coordinator = project.open_coordinator()?;

    let scope = args
        .scope
        .as_deref()
        .map(str::parse::<FeatureScope>)
        .transpose();
    let status = args
        .status
        .as_deref()
        .map(str::parse::<FeatureStatus>)
        .transpose();
    let (scope, status) = match (scope, status) {
        (Ok(scope), Ok(status)) => (scope, status),
        (Err(err), _) | (_, Err(err)) => {
            eprintln!("error: {err}");
            return Ok(1);
        }
    };

    let features = coordinator.features.list(scope, status)?;
    if args.format == "json" {
        print_json(&serde_json::json!({ "features": features }))?;
    } else if features.is_empty() {
        println!("No features found.");
    } else {
        for feature in &features {
            println!(
                "{}  scope={} status={} scale={}{}",
                feature.name,
                feature.scope,
                feature.status,
                feature.scale_level,
                feature
                    .owner
                    .as_deref()
                    .map(|o| format!(" owner={o}"))
                    .unwrap_or_default()
            );
        }
    }
    Ok(0)
}
