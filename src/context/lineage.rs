//! Lineage tracker — which document versions informed which artifacts.
//!
//! Each row links an artifact (epic, story, code file, test, …) to the
//! document version (content hash) that was in front of the workflow when
//! the artifact was produced. Lineage queries order documents by the
//! authoring hierarchy: prd → architecture → epic → story → code → test →
//! doc → other. Stale detection compares recorded hashes against the
//! current ones.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::ParseEnumError;
use crate::store::{self, StateStore};

// ---------------------------------------------------------------------------
// ArtifactType
// ---------------------------------------------------------------------------

/// Kind of tracked artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Epic,
    Story,
    Task,
    Code,
    Test,
    Doc,
    Other,
}

impl ArtifactType {
    /// The string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Story => "story",
            Self::Task => "task",
            Self::Code => "code",
            Self::Test => "test",
            Self::Doc => "doc",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "epic" => Ok(Self::Epic),
            "story" => Ok(Self::Story),
            "task" => Ok(Self::Task),
            "code" => Ok(Self::Code),
            "test" => Ok(Self::Test),
            "doc" => Ok(Self::Doc),
            "other" => Ok(Self::Other),
            other => Err(ParseEnumError::new(
                other,
                "epic, story, task, code, test, doc, other",
            )),
        }
    }
}

/// Position of a document type in the authoring hierarchy; unknown types
/// sort last.
fn doc_type_rank(doc_type: Option<&str>) -> usize {
    const ORDER: [&str; 8] = [
        "prd",
        "architecture",
        "epic",
        "story",
        "code",
        "test",
        "doc",
        "other",
    ];
    doc_type
        .and_then(|t| ORDER.iter().position(|known| *known == t))
        .unwrap_or(ORDER.len())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One lineage row.
#[derive(Clone, Debug, Serialize)]
pub struct LineageRecord {
    pub id: i64,
    pub artifact_type: ArtifactType,
    pub artifact_id: String,
    pub document_id: Option<i64>,
    pub document_path: Option<String>,
    pub document_type: Option<String>,
    /// Content hash of the document at time of use.
    pub document_version: String,
    pub workflow_id: Option<Uuid>,
    pub workflow_name: Option<String>,
    pub epic: Option<i64>,
    pub story: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

/// Parameters for [`LineageTracker::record`].
#[derive(Clone, Debug)]
pub struct NewLineageRecord<'a> {
    pub artifact_type: ArtifactType,
    pub artifact_id: &'a str,
    pub document_version: &'a str,
    pub document_id: Option<i64>,
    pub document_path: Option<&'a str>,
    pub document_type: Option<&'a str>,
    pub workflow_id: Option<Uuid>,
    pub workflow_name: Option<&'a str>,
    pub epic: Option<i64>,
    pub story: Option<&'a str>,
}

impl<'a> NewLineageRecord<'a> {
    /// A minimal record linking an artifact to a document version.
    pub fn new(artifact_type: ArtifactType, artifact_id: &'a str, document_version: &'a str) -> Self {
        Self {
            artifact_type,
            artifact_id,
            document_version,
            document_id: None,
            document_path: None,
            document_type: None,
            workflow_id: None,
            workflow_name: None,
            epic: None,
            story: None,
        }
    }
}

/// A usage that references an outdated document version.
#[derive(Clone, Debug, Serialize)]
pub struct StaleUsage {
    #[serde(flatten)]
    pub record: LineageRecord,
    pub current_version: String,
}

/// Output format for lineage reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
}

// ---------------------------------------------------------------------------
// LineageTracker
// ---------------------------------------------------------------------------

/// Append-only lineage attribution over `context_usage`.
#[derive(Clone)]
pub struct LineageTracker {
    store: Arc<StateStore>,
}

impl LineageTracker {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Append one lineage row. Returns its id.
    pub fn record(&self, new: &NewLineageRecord<'_>) -> Result<i64> {
        self.store.with(|conn| {
            conn.execute(
                "INSERT INTO context_usage
                     (artifact_type, artifact_id, document_id, document_path, document_type,
                      document_version, workflow_id, workflow_name, epic, story, accessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    new.artifact_type.as_str(),
                    new.artifact_id,
                    new.document_id,
                    new.document_path,
                    new.document_type,
                    new.document_version,
                    new.workflow_id.map(|id| id.to_string()),
                    new.workflow_name,
                    new.epic,
                    new.story,
                    store::ts_param(Utc::now()),
                ],
            )?;
            let id = conn.last_insert_rowid();
            tracing::debug!(
                artifact_type = %new.artifact_type,
                artifact_id = new.artifact_id,
                document_type = new.document_type,
                "lineage recorded"
            );
            Ok(id)
        })
    }

    /// All context used for one artifact, most recent access first.
    pub fn artifact_context(
        &self,
        artifact_type: ArtifactType,
        artifact_id: &str,
    ) -> Result<Vec<LineageRecord>> {
        self.store.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM context_usage
                 WHERE artifact_type = ?1 AND artifact_id = ?2
                 ORDER BY accessed_at DESC, id DESC",
            )?;
            let rows = stmt.query_map(
                params![artifact_type.as_str(), artifact_id],
                row_to_record,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Everything a workflow run looked at, in access order.
    pub fn workflow_context(&self, workflow_id: &Uuid) -> Result<Vec<LineageRecord>> {
        self.store.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM context_usage
                 WHERE workflow_id = ?1 ORDER BY accessed_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([workflow_id.to_string()], row_to_record)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Lineage chain for an artifact, ordered root-first by the document
    /// hierarchy (prd → architecture → epic → story → code → test → doc →
    /// other).
    pub fn context_lineage(
        &self,
        artifact_type: ArtifactType,
        artifact_id: &str,
    ) -> Result<Vec<LineageRecord>> {
        let mut records = self.artifact_context(artifact_type, artifact_id)?;
        records.sort_by_key(|r| doc_type_rank(r.document_type.as_deref()));
        Ok(records)
    }

    /// Records whose stored `document_version` differs from the current
    /// hash of the same `document_id`.
    pub fn detect_stale_usage(
        &self,
        current_versions: &HashMap<i64, String>,
    ) -> Result<Vec<StaleUsage>> {
        self.store.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM context_usage
                 WHERE document_id IS NOT NULL
                 ORDER BY accessed_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([], row_to_record)?;

            let mut stale = Vec::new();
            for record in rows {
                let record = record?;
                let Some(doc_id) = record.document_id else {
                    continue;
                };
                if let Some(current) = current_versions.get(&doc_id) {
                    if *current != record.document_version {
                        stale.push(StaleUsage {
                            record,
                            current_version: current.clone(),
                        });
                    }
                }
            }
            Ok(stale)
        })
    }

    /// Render a lineage report for one epic.
    pub fn report(&self, epic: i64, format: ReportFormat) -> Result<String> {
        let records = self.store.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM context_usage
                 WHERE epic = ?1
                 ORDER BY artifact_type, artifact_id, accessed_at DESC",
            )?;
            let rows = stmt.query_map([epic], row_to_record)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })?;

        match format {
            ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "epic": epic,
                "usage_records": records,
            }))
            .map_err(EngineError::from),
            ReportFormat::Markdown => Ok(markdown_report(epic, &records)),
        }
    }
}

fn markdown_report(epic: i64, records: &[LineageRecord]) -> String {
    let mut lines = vec![
        format!("# Context Lineage Report - Epic {epic}"),
        String::new(),
        "## Document Flow".to_owned(),
        String::new(),
    ];

    // Documents grouped by type, hierarchy order, deduplicated by path.
    let mut by_type: Vec<(&str, Vec<&LineageRecord>)> = Vec::new();
    for record in records {
        let doc_type = record.document_type.as_deref().unwrap_or("unknown");
        match by_type.iter_mut().find(|(t, _)| *t == doc_type) {
            Some((_, group)) => group.push(record),
            None => by_type.push((doc_type, vec![record])),
        }
    }
    by_type.sort_by_key(|entry| doc_type_rank(Some(entry.0)));

    for (doc_type, group) in &by_type {
        lines.push(format!("### {}", doc_type.to_uppercase()));
        let mut seen = Vec::new();
        for record in group {
            let path = record.document_path.as_deref().unwrap_or("unknown");
            if seen.contains(&path) {
                continue;
            }
            seen.push(path);
            let version = short_hash(&record.document_version);
            lines.push(format!("- {path} (version: {version})"));
        }
        lines.push(String::new());
    }

    lines.push("## Artifacts".to_owned());
    lines.push(String::new());

    let mut artifact_ids: Vec<(&ArtifactType, &str)> = Vec::new();
    for record in records {
        let key = (&record.artifact_type, record.artifact_id.as_str());
        if !artifact_ids.contains(&key) {
            artifact_ids.push(key);
        }
    }

    for (artifact_type, artifact_id) in artifact_ids {
        lines.push(format!(
            "### {} {artifact_id}",
            capitalize(artifact_type.as_str())
        ));
        lines.push("Used context:".to_owned());
        for record in records
            .iter()
            .filter(|r| r.artifact_type == *artifact_type && r.artifact_id == artifact_id)
        {
            let doc_type = record.document_type.as_deref().unwrap_or("unknown");
            let path = record.document_path.as_deref().unwrap_or("unknown");
            let version = short_hash(&record.document_version);
            lines.push(format!("- {doc_type}: {path} (v{version})"));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<LineageRecord> {
    let workflow_id: Option<String> = row.get("workflow_id")?;
    let workflow_id = workflow_id
        .map(|raw| {
            raw.parse::<Uuid>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;
    Ok(LineageRecord {
        id: row.get("id")?,
        artifact_type: store::enum_col(row, "artifact_type")?,
        artifact_id: row.get("artifact_id")?,
        document_id: row.get("document_id")?,
        document_path: row.get("document_path")?,
        document_type: row.get("document_type")?,
        document_version: row.get("document_version")?,
        workflow_id,
        workflow_name: row.get("workflow_name")?,
        epic: row.get("epic")?,
        story: row.get("story")?,
        accessed_at: store::ts_col(row, "accessed_at")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
