//! Learning index service.
//!
//! Learnings form supersession chains: indexing a better lesson and calling
//! [`LearningService::supersede`] deactivates the old one and links it to
//! its replacement. Search only surfaces active learnings unless asked
//! otherwise.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{EngineError, Result};
use crate::model::{Learning, LearningCategory};
use crate::store::{self, StateStore};

/// Parameters for [`LearningService::index`].
#[derive(Clone, Debug)]
pub struct NewLearning {
    pub topic: String,
    pub category: LearningCategory,
    pub learning: String,
    pub context: Option<String>,
    pub source_type: Option<String>,
    pub epic_num: Option<i64>,
    pub story_num: Option<i64>,
    pub relevance_score: f64,
    pub metadata: serde_json::Value,
}

impl NewLearning {
    pub fn new(
        topic: impl Into<String>,
        category: LearningCategory,
        learning: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            category,
            learning: learning.into(),
            context: None,
            source_type: None,
            epic_num: None,
            story_num: None,
            relevance_score: 1.0,
            metadata: serde_json::Value::Null,
        }
    }
}

/// CRUD and supersession over `learning_index`.
#[derive(Clone)]
pub struct LearningService {
    store: Arc<StateStore>,
}

impl LearningService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Index a new active learning.
    pub fn index(&self, new: &NewLearning) -> Result<Learning> {
        self.store.with(|conn| Self::index_in(conn, new))
    }

    pub(crate) fn index_in(conn: &Connection, new: &NewLearning) -> Result<Learning> {
        if new.topic.trim().is_empty() {
            return Err(EngineError::domain("learning topic must not be empty"));
        }
        if !(0.0..=1.0).contains(&new.relevance_score) {
            return Err(EngineError::domain(format!(
                "relevance_score must be within [0, 1], got {}",
                new.relevance_score
            )));
        }

        conn.execute(
            "INSERT INTO learning_index
                 (topic, category, learning, context, source_type, epic_num,
                  story_num, relevance_score, is_active, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10)",
            params![
                new.topic,
                new.category.as_str(),
                new.learning,
                new.context,
                new.source_type,
                new.epic_num,
                new.story_num,
                new.relevance_score,
                store::ts_param(Utc::now()),
                store::json_param(&new.metadata),
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(id, topic = %new.topic, category = %new.category, "learning indexed");
        Self::get_in(conn, id)?
            .ok_or_else(|| EngineError::store("learning vanished after insert"))
    }

    /// Look up a learning by id.
    pub fn get(&self, id: i64) -> Result<Option<Learning>> {
        self.store.with(|conn| Self::get_in(conn, id))
    }

    pub(crate) fn get_in(conn: &Connection, id: i64) -> Result<Option<Learning>> {
        conn.query_row(
            "SELECT * FROM learning_index WHERE id = ?1",
            [id],
            row_to_learning,
        )
        .optional()
        .map_err(EngineError::from)
    }

    /// Mark `old_id` as superseded by `new_id`, deactivating it.
    pub fn supersede(&self, old_id: i64, new_id: i64) -> Result<Learning> {
        self.store.transaction(|tx| {
            if old_id == new_id {
                return Err(EngineError::domain(
                    "a learning cannot supersede itself",
                ));
            }
            Self::get_in(tx, new_id)?
                .ok_or_else(|| EngineError::not_found(format!("learning {new_id}")))?;
            Self::get_in(tx, old_id)?
                .ok_or_else(|| EngineError::not_found(format!("learning {old_id}")))?;

            tx.execute(
                "UPDATE learning_index SET superseded_by = ?1, is_active = 0 WHERE id = ?2",
                [new_id, old_id],
            )?;

            tracing::info!(old_id, new_id, "learning superseded");
            Self::get_in(tx, old_id)?
                .ok_or_else(|| EngineError::not_found(format!("learning {old_id}")))
        })
    }

    /// Search learnings by topic substring and category, most relevant
    /// first.
    pub fn search(
        &self,
        topic: Option<&str>,
        category: Option<LearningCategory>,
        active_only: bool,
        limit: usize,
    ) -> Result<Vec<Learning>> {
        self.store.with(|conn| {
            let mut sql = String::from("SELECT * FROM learning_index WHERE 1=1");
            let mut args: Vec<String> = Vec::new();
            if let Some(topic) = topic {
                sql.push_str(" AND topic LIKE ?");
                args.push(format!("%{topic}%"));
            }
            if let Some(category) = category {
                sql.push_str(" AND category = ?");
                args.push(category.as_str().to_owned());
            }
            if active_only {
                sql.push_str(" AND is_active = 1");
            }
            sql.push_str(" ORDER BY relevance_score DESC, created_at DESC LIMIT ?");
            args.push(limit.to_string());

            let mut stmt = conn.prepare(&sql)?;
            let rows =
                stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_learning)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }
}

fn row_to_learning(row: &Row<'_>) -> rusqlite::Result<Learning> {
    Ok(Learning {
        id: row.get("id")?,
        topic: row.get("topic")?,
        category: store::enum_col(row, "category")?,
        learning: row.get("learning")?,
        context: row.get("context")?,
        source_type: row.get("source_type")?,
        epic_num: row.get("epic_num")?,
        story_num: row.get("story_num")?,
        relevance_score: row.get("relevance_score")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        superseded_by: row.get("superseded_by")?,
        created_at: store::ts_col(row, "created_at")?,
        metadata: store::json_col(row, "metadata")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> LearningService {
        LearningService::new(Arc::new(StateStore::in_memory().unwrap()))
    }

    #[test]
    fn index_and_get_round_trip() {
        let svc = service();
        let indexed = svc
            .index(&NewLearning::new(
                "sqlite-locking",
                LearningCategory::Technical,
                "Serialize writers behind one connection.",
            ))
            .unwrap();
        assert!(indexed.is_active);
        assert!(indexed.superseded_by.is_none());

        let fetched = svc.get(indexed.id).unwrap().expect("learning exists");
        assert_eq!(fetched, indexed);
    }

    #[test]
    fn relevance_score_bounds_enforced() {
        let svc = service();
        for bad in [-0.1, 1.1] {
            let err = svc
                .index(&NewLearning {
                    relevance_score: bad,
                    ..NewLearning::new("t", LearningCategory::Process, "l")
                })
                .unwrap_err();
            assert!(matches!(err, EngineError::DomainValidation { .. }), "{bad}");
        }
    }

    #[test]
    fn supersede_deactivates_and_links() {
        let svc = service();
        let old = svc
            .index(&NewLearning::new("retry", LearningCategory::Technical, "retry 3 times"))
            .unwrap();
        let new = svc
            .index(&NewLearning::new("retry", LearningCategory::Technical, "use backoff"))
            .unwrap();

        let superseded = svc.supersede(old.id, new.id).unwrap();
        assert!(!superseded.is_active);
        assert_eq!(superseded.superseded_by, Some(new.id));

        // The replacement stays active.
        assert!(svc.get(new.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn supersede_self_rejected() {
        let svc = service();
        let l = svc
            .index(&NewLearning::new("t", LearningCategory::Team, "l"))
            .unwrap();
        let err = svc.supersede(l.id, l.id).unwrap_err();
        assert!(matches!(err, EngineError::DomainValidation { .. }));
    }

    #[test]
    fn supersede_missing_is_not_found() {
        let svc = service();
        let l = svc
            .index(&NewLearning::new("t", LearningCategory::Team, "l"))
            .unwrap();
        assert!(matches!(
            svc.supersede(l.id, 999).unwrap_err(),
            EngineError::NotFound { .. }
        ));
    }

    #[test]
    fn search_filters_and_orders() {
        let svc = service();
        svc.index(&NewLearning {
            relevance_score: 0.5,
            ..NewLearning::new("cache sizing", LearningCategory::Technical, "small caches")
        })
        .unwrap();
        let strong = svc
            .index(&NewLearning::new("cache keys", LearningCategory::Technical, "stable keys"))
            .unwrap();
        let old = svc
            .index(&NewLearning::new("standups", LearningCategory::Process, "keep them short"))
            .unwrap();
        let newer = svc
            .index(&NewLearning::new("standups", LearningCategory::Process, "async standups"))
            .unwrap();
        svc.supersede(old.id, newer.id).unwrap();

        let caches = svc.search(Some("cache"), None, true, 10).unwrap();
        assert_eq!(caches.len(), 2);
        assert_eq!(caches[0].id, strong.id, "highest relevance first");

        let active_process = svc
            .search(None, Some(LearningCategory::Process), true, 10)
            .unwrap();
        assert_eq!(active_process.len(), 1);
        assert_eq!(active_process[0].id, newer.id);

        let all_process = svc
            .search(None, Some(LearningCategory::Process), false, 10)
            .unwrap();
        assert_eq!(all_process.len(), 2);
    }
}
