//! Context usage tracker — append-only audit of document accesses.
//!
//! One row per resolved document: which semantic key, which content hash,
//! whether the cache served it, and which workflow/epic/story asked.
//! Answers questions like "what context informed this run" and "which
//! runs used an outdated epic definition".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::store::{self, StateStore};

/// One recorded document access.
#[derive(Clone, Debug, Serialize)]
pub struct UsageRecord {
    pub id: i64,
    pub context_key: String,
    pub content_hash: String,
    pub cache_hit: bool,
    pub workflow_id: Option<Uuid>,
    pub epic: Option<i64>,
    pub story: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

/// Aggregated usage of one content version of a context key.
#[derive(Clone, Debug, Serialize)]
pub struct VersionUsage {
    pub content_hash: String,
    pub uses: i64,
    pub first_used: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Parameters for [`ContextUsageTracker::record`].
#[derive(Clone, Debug)]
pub struct UsageEvent<'a> {
    pub context_key: &'a str,
    pub content_hash: &'a str,
    pub cache_hit: bool,
    pub workflow_id: Option<Uuid>,
    pub epic: Option<i64>,
    pub story: Option<&'a str>,
}

/// Append-only usage log over `context_key_usage`.
#[derive(Clone)]
pub struct ContextUsageTracker {
    store: Arc<StateStore>,
}

impl ContextUsageTracker {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Append one usage row.
    pub fn record(&self, event: &UsageEvent<'_>) -> Result<i64> {
        self.store.with(|conn| {
            conn.execute(
                "INSERT INTO context_key_usage
                     (context_key, content_hash, cache_hit, workflow_id, epic, story, accessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.context_key,
                    event.content_hash,
                    event.cache_hit,
                    event.workflow_id.map(|id| id.to_string()),
                    event.epic,
                    event.story,
                    store::ts_param(Utc::now()),
                ],
            )?;
            let id = conn.last_insert_rowid();
            tracing::debug!(
                context_key = event.context_key,
                cache_hit = event.cache_hit,
                "context usage recorded"
            );
            Ok(id)
        })
    }

    /// Usage history, newest first, optionally filtered by key and/or
    /// workflow.
    pub fn history(
        &self,
        context_key: Option<&str>,
        workflow_id: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<UsageRecord>> {
        self.store.with(|conn| {
            let mut sql = String::from("SELECT * FROM context_key_usage WHERE 1=1");
            let mut args: Vec<String> = Vec::new();
            if let Some(key) = context_key {
                sql.push_str(" AND context_key = ?");
                args.push(key.to_owned());
            }
            if let Some(id) = workflow_id {
                sql.push_str(" AND workflow_id = ?");
                args.push(id.to_string());
            }
            sql.push_str(" ORDER BY accessed_at DESC, id DESC LIMIT ?");
            args.push(limit.to_string());

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_record)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Distinct content versions seen for a context key, most recent
    /// first.
    pub fn version_history(&self, context_key: &str) -> Result<Vec<VersionUsage>> {
        self.store.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT content_hash, count(*) AS uses,
                        min(accessed_at) AS first_used, max(accessed_at) AS last_used
                 FROM context_key_usage
                 WHERE context_key = ?1
                 GROUP BY content_hash
                 ORDER BY last_used DESC",
            )?;
            let rows = stmt.query_map([context_key], |row| {
                Ok(VersionUsage {
                    content_hash: row.get("content_hash")?,
                    uses: row.get("uses")?,
                    first_used: store::ts_col(row, "first_used")?,
                    last_used: store::ts_col(row, "last_used")?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Cache hit rate over all recorded accesses, in `[0, 1]`.
    pub fn hit_rate(&self, context_key: Option<&str>) -> Result<f64> {
        self.store.with(|conn| {
            let (total, hits): (i64, i64) = match context_key {
                Some(key) => conn.query_row(
                    "SELECT count(*), coalesce(sum(cache_hit), 0)
                     FROM context_key_usage WHERE context_key = ?1",
                    [key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?,
                None => conn.query_row(
                    "SELECT count(*), coalesce(sum(cache_hit), 0) FROM context_key_usage",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?,
            };
            if total == 0 {
                Ok(0.0)
            } else {
                Ok(hits as f64 / total as f64)
            }
        })
    }

    /// Prune usage rows. With `older_than_days` only rows recorded before
    /// the cutoff are removed; without it, everything goes. Returns the
    /// number of rows removed.
    pub fn clear_history(&self, older_than_days: Option<u64>) -> Result<usize> {
        self.store.with(|conn| {
            let removed = match older_than_days {
                Some(days) => {
                    let cutoff = Utc::now() - chrono::Duration::days(days as i64);
                    conn.execute(
                        "DELETE FROM context_key_usage WHERE accessed_at < ?1",
                        [store::ts_param(cutoff)],
                    )?
                }
                None => conn.execute("DELETE FROM context_key_usage", [])?,
            };
            tracing::info!(removed, "usage history pruned");
            Ok(removed)
        })
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
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
    Ok(UsageRecord {
        id: row.get("id")?,
        context_key: row.get("context_key")?,
        content_hash: row.get("content_hash")?,
        cache_hit: row.get::<_, i64>("cache_hit")? != 0,
        workflow_id,
        epic: row.get("epic")?,
        story: row.get("story")?,
        accessed_at: store::ts_col(row, "accessed_at")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ContextUsageTracker {
        ContextUsageTracker::new(Arc::new(StateStore::in_memory().unwrap()))
    }

    fn event<'a>(key: &'a str, hash: &'a str, hit: bool) -> UsageEvent<'a> {
        UsageEvent {
            context_key: key,
            content_hash: hash,
            cache_hit: hit,
            workflow_id: None,
            epic: Some(3),
            story: Some("3.1"),
        }
    }

    #[test]
    fn record_and_read_history() {
        let tracker = tracker();
        let workflow_id = Uuid::new_v4();
        tracker
            .record(&UsageEvent {
                workflow_id: Some(workflow_id),
                ..event("epic_definition", "abc123", true)
            })
            .unwrap();
        tracker.record(&event("prd", "def456", false)).unwrap();

        let all = tracker.history(None, None, 10).unwrap();
        assert_eq!(all.len(), 2);

        let by_key = tracker.history(Some("prd"), None, 10).unwrap();
        assert_eq!(by_key.len(), 1);
        assert!(!by_key[0].cache_hit);

        let by_workflow = tracker.history(None, Some(&workflow_id), 10).unwrap();
        assert_eq!(by_workflow.len(), 1);
        assert_eq!(by_workflow[0].context_key, "epic_definition");
    }

    #[test]
    fn version_history_groups_by_hash() {
        let tracker = tracker();
        tracker.record(&event("prd", "v1", false)).unwrap();
        tracker.record(&event("prd", "v1", true)).unwrap();
        tracker.record(&event("prd", "v2", false)).unwrap();

        let versions = tracker.version_history("prd").unwrap();
        assert_eq!(versions.len(), 2);
        let v1 = versions.iter().find(|v| v.content_hash == "v1").unwrap();
        assert_eq!(v1.uses, 2);
    }

    #[test]
    fn hit_rate_counts_hits_over_total() {
        let tracker = tracker();
        assert_eq!(tracker.hit_rate(None).unwrap(), 0.0);

        tracker.record(&event("prd", "h", true)).unwrap();
        tracker.record(&event("prd", "h", true)).unwrap();
        tracker.record(&event("prd", "h", false)).unwrap();
        tracker.record(&event("architecture", "x", false)).unwrap();

        let rate = tracker.hit_rate(Some("prd")).unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((tracker.hit_rate(None).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn clear_history_prunes() {
        let tracker = tracker();
        tracker.record(&event("prd", "h", false)).unwrap();
        tracker.record(&event("prd", "h", true)).unwrap();

        // Nothing is older than 30 days.
        assert_eq!(tracker.clear_history(Some(30)).unwrap(), 0);
        // Unbounded clear removes everything.
        assert_eq!(tracker.clear_history(None).unwrap(), 2);
        assert!(tracker.history(None, None, 10).unwrap().is_empty());
    }
}
