//! Epic state service.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{EngineError, Result};
use crate::model::epic::progress;
use crate::model::{Epic, EpicStatus};
use crate::store::{self, StateStore};

/// Parameters for [`EpicService::create`].
#[derive(Clone, Debug)]
pub struct NewEpic {
    pub epic_num: i64,
    pub title: String,
    pub status: EpicStatus,
    pub total_stories: i64,
    pub feature: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewEpic {
    /// An epic in `planning` with no stories.
    pub fn new(epic_num: i64, title: impl Into<String>) -> Self {
        Self {
            epic_num,
            title: title.into(),
            status: EpicStatus::Planning,
            total_stories: 0,
            feature: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Partial update for [`EpicService::update_progress`]. `None` fields keep
/// their current value; `progress_percentage` is always recomputed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgressUpdate {
    pub total_stories: Option<i64>,
    pub completed_stories: Option<i64>,
    pub status: Option<EpicStatus>,
}

/// CRUD over `epic_state`.
#[derive(Clone)]
pub struct EpicService {
    store: Arc<StateStore>,
}

impl EpicService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Insert a new epic. Duplicate `epic_num` is a domain error.
    pub fn create(&self, new: &NewEpic) -> Result<Epic> {
        self.store.with(|conn| Self::create_in(conn, new))
    }

    pub(crate) fn create_in(conn: &Connection, new: &NewEpic) -> Result<Epic> {
        if new.epic_num < 1 {
            return Err(EngineError::domain(format!(
                "epic_num must be >= 1, got {}",
                new.epic_num
            )));
        }
        if new.total_stories < 0 {
            return Err(EngineError::domain("total_stories must not be negative"));
        }

        let now = store::ts_param(Utc::now());
        let inserted = conn.execute(
            "INSERT INTO epic_state
                 (epic_num, title, status, total_stories, completed_stories,
                  progress_percentage, feature, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6, ?7, ?7)",
            params![
                new.epic_num,
                new.title,
                new.status.as_str(),
                new.total_stories,
                new.feature,
                store::json_param(&new.metadata),
                now,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(err) if store::is_unique_violation(&err) => {
                return Err(EngineError::domain(format!(
                    "epic {} already exists",
                    new.epic_num
                )));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(epic = new.epic_num, title = %new.title, "epic created");
        Self::get_in(conn, new.epic_num)?
            .ok_or_else(|| EngineError::store("epic vanished after insert"))
    }

    /// Look up an epic by number.
    pub fn get(&self, epic_num: i64) -> Result<Option<Epic>> {
        self.store.with(|conn| Self::get_in(conn, epic_num))
    }

    pub(crate) fn get_in(conn: &Connection, epic_num: i64) -> Result<Option<Epic>> {
        conn.query_row(
            "SELECT * FROM epic_state WHERE epic_num = ?1",
            [epic_num],
            row_to_epic,
        )
        .optional()
        .map_err(EngineError::from)
    }

    /// All epics ordered by number.
    pub fn list(&self) -> Result<Vec<Epic>> {
        self.store.with(Self::list_in)
    }

    pub(crate) fn list_in(conn: &Connection) -> Result<Vec<Epic>> {
        let mut stmt = conn.prepare("SELECT * FROM epic_state ORDER BY epic_num")?;
        let rows = stmt.query_map([], row_to_epic)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(EngineError::from)
    }

    /// Epics belonging to a feature, ordered by number.
    pub fn list_by_feature(&self, feature: &str) -> Result<Vec<Epic>> {
        self.store.with(|conn| Self::list_by_feature_in(conn, feature))
    }

    pub(crate) fn list_by_feature_in(conn: &Connection, feature: &str) -> Result<Vec<Epic>> {
        let mut stmt =
            conn.prepare("SELECT * FROM epic_state WHERE feature = ?1 ORDER BY epic_num")?;
        let rows = stmt.query_map([feature], row_to_epic)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(EngineError::from)
    }

    /// Apply a progress update, recomputing `progress_percentage`.
    ///
    /// Rejects updates that would leave `completed_stories > total_stories`.
    pub fn update_progress(&self, epic_num: i64, update: ProgressUpdate) -> Result<Epic> {
        self.store
            .with(|conn| Self::update_progress_in(conn, epic_num, update))
    }

    pub(crate) fn update_progress_in(
        conn: &Connection,
        epic_num: i64,
        update: ProgressUpdate,
    ) -> Result<Epic> {
        let current = Self::get_in(conn, epic_num)?
            .ok_or_else(|| EngineError::not_found(format!("epic {epic_num}")))?;

        let total = update.total_stories.unwrap_or(current.total_stories);
        let completed = update.completed_stories.unwrap_or(current.completed_stories);
        let status = update.status.unwrap_or(current.status);

        if total < 0 || completed < 0 {
            return Err(EngineError::domain("story counts must not be negative"));
        }
        if completed > total {
            return Err(EngineError::domain(format!(
                "completed_stories ({completed}) cannot exceed total_stories ({total})"
            )));
        }

        conn.execute(
            "UPDATE epic_state
             SET total_stories = ?1, completed_stories = ?2, progress_percentage = ?3,
                 status = ?4, updated_at = ?5
             WHERE epic_num = ?6",
            params![
                total,
                completed,
                progress(total, completed),
                status.as_str(),
                store::ts_param(Utc::now()),
                epic_num,
            ],
        )?;

        tracing::info!(
            epic = epic_num,
            total_stories = total,
            completed_stories = completed,
            status = %status,
            "epic progress updated"
        );
        Self::get_in(conn, epic_num)?
            .ok_or_else(|| EngineError::not_found(format!("epic {epic_num}")))
    }

    /// Transition an epic's status without touching counts.
    pub fn transition(&self, epic_num: i64, status: EpicStatus) -> Result<Epic> {
        self.update_progress(
            epic_num,
            ProgressUpdate {
                status: Some(status),
                ..ProgressUpdate::default()
            },
        )
    }

    /// Delete an epic row.
    pub fn delete(&self, epic_num: i64) -> Result<bool> {
        self.store.with(|conn| Self::delete_in(conn, epic_num))
    }

    pub(crate) fn delete_in(conn: &Connection, epic_num: i64) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM epic_state WHERE epic_num = ?1", [epic_num])?;
        Ok(deleted > 0)
    }
}

fn row_to_epic(row: &Row<'_>) -> rusqlite::Result<Epic> {
    Ok(Epic {
        epic_num: row.get("epic_num")?,
        title: row.get("title")?,
        status: store::enum_col(row, "status")?,
        total_stories: row.get("total_stories")?,
        completed_stories: row.get("completed_stories")?,
        progress_percentage: row.get("progress_percentage")?,
        feature: row.get("feature")?,
        metadata: store::json_col(row, "metadata")?,
        created_at: store::ts_col(row, "created_at")?,
        updated_at: store::ts_col(row, "updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
