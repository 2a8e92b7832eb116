//! Context persistence — versioned workflow-context snapshots.
//!
//! Contexts are stored as JSON blobs keyed by `workflow_id`. Every save of
//! an existing id increments `version`, so the sequence for one workflow is
//! strictly monotonic starting at 1. Indexed columns (epic, story, feature,
//! status, timestamps) are duplicated out of the blob for queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use uuid::Uuid;

use crate::context::workflow::{WorkflowContext, WorkflowStatus};
use crate::error::{EngineError, Result};
use crate::store::{self, StateStore};

/// Summary row for version listings.
#[derive(Clone, Debug, Serialize)]
pub struct ContextVersion {
    pub workflow_id: Uuid,
    pub version: i64,
    pub status: WorkflowStatus,
    pub current_phase: String,
    pub updated_at: DateTime<Utc>,
}

/// Filters for [`ContextPersistence::search`]. Unset fields match
/// everything.
#[derive(Clone, Debug, Default)]
pub struct ContextFilters<'a> {
    pub epic_num: Option<i64>,
    pub story_num: Option<i64>,
    pub feature: Option<&'a str>,
    pub workflow_name: Option<&'a str>,
    pub status: Option<WorkflowStatus>,
}

/// Versioned storage for [`WorkflowContext`] snapshots.
#[derive(Clone)]
pub struct ContextPersistence {
    store: Arc<StateStore>,
}

impl ContextPersistence {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Save a context. Returns the stored version (1 for a new id,
    /// previous + 1 on every later save).
    pub fn save(&self, context: &WorkflowContext) -> Result<i64> {
        self.store.with(|conn| {
            let blob = serde_json::to_string(context)?;
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT version FROM workflow_context WHERE workflow_id = ?1",
                    [context.workflow_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            let version = match existing {
                Some(previous) => {
                    let version = previous + 1;
                    conn.execute(
                        "UPDATE workflow_context
                         SET epic_num = ?1, story_num = ?2, feature = ?3, workflow_name = ?4,
                             current_phase = ?5, status = ?6, context_data = ?7, version = ?8,
                             updated_at = ?9
                         WHERE workflow_id = ?10",
                        params![
                            context.epic_num,
                            context.story_num,
                            context.feature,
                            context.workflow_name,
                            context.current_phase,
                            context.status.as_str(),
                            blob,
                            version,
                            store::ts_param(Utc::now()),
                            context.workflow_id.to_string(),
                        ],
                    )?;
                    version
                }
                None => {
                    conn.execute(
                        "INSERT INTO workflow_context
                             (workflow_id, epic_num, story_num, feature, workflow_name,
                              current_phase, status, context_data, version, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10)",
                        params![
                            context.workflow_id.to_string(),
                            context.epic_num,
                            context.story_num,
                            context.feature,
                            context.workflow_name,
                            context.current_phase,
                            context.status.as_str(),
                            blob,
                            store::ts_param(context.created_at),
                            store::ts_param(context.updated_at),
                        ],
                    )?;
                    1
                }
            };

            tracing::debug!(
                workflow_id = %context.workflow_id,
                version,
                "workflow context saved"
            );
            Ok(version)
        })
    }

    /// Load a context by id. Missing id is a [`EngineError::NotFound`].
    pub fn load(&self, workflow_id: &Uuid) -> Result<WorkflowContext> {
        self.store.with(|conn| {
            let blob: Option<String> = conn
                .query_row(
                    "SELECT context_data FROM workflow_context WHERE workflow_id = ?1",
                    [workflow_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match blob {
                Some(blob) => WorkflowContext::from_json(&blob),
                None => Err(EngineError::not_found(format!("context {workflow_id}"))),
            }
        })
    }

    /// Stored version of a context, when it exists.
    pub fn version_of(&self, workflow_id: &Uuid) -> Result<Option<i64>> {
        self.store.with(|conn| {
            conn.query_row(
                "SELECT version FROM workflow_context WHERE workflow_id = ?1",
                [workflow_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(EngineError::from)
        })
    }

    /// Most recent context for an epic (and optionally a story).
    pub fn latest(&self, epic_num: i64, story_num: Option<i64>) -> Result<Option<WorkflowContext>> {
        self.latest_where(epic_num, story_num, None)
    }

    /// Most recent context for an epic/story with the given status.
    pub fn latest_by_status(
        &self,
        epic_num: i64,
        story_num: Option<i64>,
        status: WorkflowStatus,
    ) -> Result<Option<WorkflowContext>> {
        self.latest_where(epic_num, story_num, Some(status))
    }

    fn latest_where(
        &self,
        epic_num: i64,
        story_num: Option<i64>,
        status: Option<WorkflowStatus>,
    ) -> Result<Option<WorkflowContext>> {
        self.store.with(|conn| {
            let mut sql = String::from(
                "SELECT context_data FROM workflow_context WHERE epic_num = ?",
            );
            let mut args: Vec<String> = vec![epic_num.to_string()];
            match story_num {
                Some(story) => {
                    sql.push_str(" AND story_num = ?");
                    args.push(story.to_string());
                }
                None => sql.push_str(" AND story_num IS NULL"),
            }
            if let Some(status) = status {
                sql.push_str(" AND status = ?");
                args.push(status.as_str().to_owned());
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT 1");

            let blob: Option<String> = conn
                .query_row(&sql, rusqlite::params_from_iter(args.iter()), |row| {
                    row.get(0)
                })
                .optional()?;
            blob.map(|b| WorkflowContext::from_json(&b)).transpose()
        })
    }

    /// All contexts for an epic, newest first.
    pub fn by_epic(&self, epic_num: i64) -> Result<Vec<WorkflowContext>> {
        self.collect_blobs(
            "SELECT context_data FROM workflow_context
             WHERE epic_num = ?1 ORDER BY created_at DESC, id DESC",
            [epic_num.to_string()],
        )
    }

    /// All contexts for a feature, newest first.
    pub fn by_feature(&self, feature: &str) -> Result<Vec<WorkflowContext>> {
        self.collect_blobs(
            "SELECT context_data FROM workflow_context
             WHERE feature = ?1 ORDER BY created_at DESC, id DESC",
            [feature.to_owned()],
        )
    }

    /// Filtered search with paging, newest first.
    pub fn search(
        &self,
        filters: &ContextFilters<'_>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowContext>> {
        self.store.with(|conn| {
            let mut sql = String::from("SELECT context_data FROM workflow_context WHERE 1=1");
            let mut args: Vec<String> = Vec::new();
            if let Some(epic) = filters.epic_num {
                sql.push_str(" AND epic_num = ?");
                args.push(epic.to_string());
            }
            if let Some(story) = filters.story_num {
                sql.push_str(" AND story_num = ?");
                args.push(story.to_string());
            }
            if let Some(feature) = filters.feature {
                sql.push_str(" AND feature = ?");
                args.push(feature.to_owned());
            }
            if let Some(name) = filters.workflow_name {
                sql.push_str(" AND workflow_name = ?");
                args.push(name.to_owned());
            }
            if let Some(status) = filters.status {
                sql.push_str(" AND status = ?");
                args.push(status.as_str().to_owned());
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
            args.push(limit.to_string());
            args.push(offset.to_string());

            let mut stmt = conn.prepare(&sql)?;
            let blobs = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            blobs
                .collect::<rusqlite::Result<Vec<_>>>()?
                .iter()
                .map(|b| WorkflowContext::from_json(b))
                .collect()
        })
    }

    /// Version summaries for an epic (and optionally a story), newest
    /// first.
    pub fn versions(&self, epic_num: i64, story_num: Option<i64>) -> Result<Vec<ContextVersion>> {
        self.store.with(|conn| {
            let mut sql = String::from(
                "SELECT workflow_id, version, status, current_phase, updated_at
                 FROM workflow_context WHERE epic_num = ?",
            );
            let mut args: Vec<String> = vec![epic_num.to_string()];
            match story_num {
                Some(story) => {
                    sql.push_str(" AND story_num = ?");
                    args.push(story.to_string());
                }
                None => sql.push_str(" AND story_num IS NULL"),
            }
            sql.push_str(" ORDER BY updated_at DESC, id DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_version)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Delete a stored context. Returns whether a row was removed.
    pub fn delete(&self, workflow_id: &Uuid) -> Result<bool> {
        self.store.with(|conn| {
            let removed = conn.execute(
                "DELETE FROM workflow_context WHERE workflow_id = ?1",
                [workflow_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    fn collect_blobs(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<WorkflowContext>> {
        self.store.with(|conn: &Connection| {
            let mut stmt = conn.prepare(sql)?;
            let blobs = stmt.query_map(args, |row| row.get::<_, String>(0))?;
            blobs
                .collect::<rusqlite::Result<Vec<_>>>()?
                .iter()
                .map(|b| WorkflowContext::from_json(b))
                .collect()
        })
    }
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<ContextVersion> {
    let raw_id: String = row.get("workflow_id")?;
    let workflow_id = raw_id.parse::<Uuid>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ContextVersion {
        workflow_id,
        version: row.get("version")?,
        status: store::enum_col(row, "status")?,
        current_phase: row.get("current_phase")?,
        updated_at: store::ts_col(row, "updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn persistence() -> ContextPersistence {
        ContextPersistence::new(Arc::new(StateStore::in_memory().unwrap()))
    }

    fn ctx(epic: i64, story: Option<i64>) -> WorkflowContext {
        WorkflowContext::new(epic, story, "auth", "implement_story").unwrap()
    }

    #[test]
    fn save_load_round_trip() {
        let persistence = persistence();
        let ctx = ctx(1, Some(2)).add_decision("db", serde_json::json!("sqlite"));

        assert_eq!(persistence.save(&ctx).unwrap(), 1);
        let loaded = persistence.load(&ctx.workflow_id).unwrap();
        assert_eq!(loaded, ctx);
    }

    #[test]
    fn versions_increment_monotonically() {
        let persistence = persistence();
        let mut ctx = ctx(1, Some(1));

        for expected in 1..=4 {
            ctx = ctx.transition_phase(format!("phase-{expected}"));
            assert_eq!(persistence.save(&ctx).unwrap(), expected);
        }
        assert_eq!(persistence.version_of(&ctx.workflow_id).unwrap(), Some(4));
    }

    #[test]
    fn load_missing_is_context_not_found() {
        let err = persistence().load(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn latest_prefers_most_recent() {
        let persistence = persistence();
        let older = ctx(1, Some(1));
        let newer = ctx(1, Some(1));
        persistence.save(&older).unwrap();
        persistence.save(&newer).unwrap();

        let latest = persistence.latest(1, Some(1)).unwrap().expect("latest exists");
        assert_eq!(latest.workflow_id, newer.workflow_id);

        // Epic-level query only sees story-less contexts.
        assert!(persistence.latest(1, None).unwrap().is_none());
        let epic_level = ctx(1, None);
        persistence.save(&epic_level).unwrap();
        assert_eq!(
            persistence.latest(1, None).unwrap().unwrap().workflow_id,
            epic_level.workflow_id
        );
    }

    #[test]
    fn latest_by_status_filters() {
        let persistence = persistence();
        let running = ctx(2, Some(1));
        let failed = ctx(2, Some(1)).with_status(WorkflowStatus::Failed);
        persistence.save(&running).unwrap();
        persistence.save(&failed).unwrap();

        let found = persistence
            .latest_by_status(2, Some(1), WorkflowStatus::Failed)
            .unwrap()
            .expect("failed context exists");
        assert_eq!(found.workflow_id, failed.workflow_id);

        assert!(persistence
            .latest_by_status(2, Some(1), WorkflowStatus::Paused)
            .unwrap()
            .is_none());
    }

    #[test]
    fn by_epic_and_by_feature() {
        let persistence = persistence();
        persistence.save(&ctx(1, Some(1))).unwrap();
        persistence.save(&ctx(1, Some(2))).unwrap();
        persistence.save(&ctx(2, None)).unwrap();

        assert_eq!(persistence.by_epic(1).unwrap().len(), 2);
        assert_eq!(persistence.by_feature("auth").unwrap().len(), 3);
        assert!(persistence.by_feature("other").unwrap().is_empty());
    }

    #[test]
    fn search_with_filters_and_paging() {
        let persistence = persistence();
        for story in 1..=5 {
            persistence.save(&ctx(3, Some(story))).unwrap();
        }

        let filters = ContextFilters {
            epic_num: Some(3),
            ..ContextFilters::default()
        };
        assert_eq!(persistence.search(&filters, 10, 0).unwrap().len(), 5);
        assert_eq!(persistence.search(&filters, 2, 0).unwrap().len(), 2);
        assert_eq!(persistence.search(&filters, 10, 4).unwrap().len(), 1);

        let none = ContextFilters {
            epic_num: Some(3),
            status: Some(WorkflowStatus::Failed),
            ..ContextFilters::default()
        };
        assert!(persistence.search(&none, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn versions_lists_summaries() {
        let persistence = persistence();
        let mut a = ctx(4, Some(1));
        persistence.save(&a).unwrap();
        a = a.transition_phase("implementation");
        persistence.save(&a).unwrap();
        persistence.save(&ctx(4, Some(1))).unwrap();

        let versions = persistence.versions(4, Some(1)).unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().any(|v| v.version == 2));
    }

    #[test]
    fn delete_removes_row() {
        let persistence = persistence();
        let ctx = ctx(5, None);
        persistence.save(&ctx).unwrap();

        assert!(persistence.delete(&ctx.workflow_id).unwrap());
        assert!(!persistence.delete(&ctx.workflow_id).unwrap());
        assert!(persistence.load(&ctx.workflow_id).is_err());
    }
}
