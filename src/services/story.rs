//! Story state service.
//!
//! Stories are keyed by `(epic_num, story_num)`. Transitions enforce the
//! blocked-reason invariant; `complete` is the specialization that also
//! records actual hours.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{EngineError, Result};
use crate::model::{Priority, Story, StoryStatus};
use crate::store::{self, StateStore};

/// Parameters for [`StoryService::create`].
#[derive(Clone, Debug)]
pub struct NewStory {
    pub epic_num: i64,
    pub story_num: i64,
    pub title: String,
    pub status: StoryStatus,
    pub assignee: Option<String>,
    pub priority: Priority,
    pub estimate_hours: Option<f64>,
    pub metadata: serde_json::Value,
}

impl NewStory {
    /// A pending P2 story.
    pub fn new(epic_num: i64, story_num: i64, title: impl Into<String>) -> Self {
        Self {
            epic_num,
            story_num,
            title: title.into(),
            status: StoryStatus::Pending,
            assignee: None,
            priority: Priority::default(),
            estimate_hours: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// CRUD over `story_state`.
#[derive(Clone)]
pub struct StoryService {
    store: Arc<StateStore>,
}

impl StoryService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Insert a new story. A duplicate `(epic, story)` pair is a domain
    /// error.
    pub fn create(&self, new: &NewStory) -> Result<Story> {
        self.store.with(|conn| Self::create_in(conn, new))
    }

    pub(crate) fn create_in(conn: &Connection, new: &NewStory) -> Result<Story> {
        if new.epic_num < 1 || new.story_num < 1 {
            return Err(EngineError::domain(format!(
                "story numbers must be >= 1, got {}.{}",
                new.epic_num, new.story_num
            )));
        }

        let now = store::ts_param(Utc::now());
        let inserted = conn.execute(
            "INSERT INTO story_state
                 (epic_num, story_num, title, status, assignee, priority,
                  estimate_hours, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                new.epic_num,
                new.story_num,
                new.title,
                new.status.as_str(),
                new.assignee,
                new.priority.as_str(),
                new.estimate_hours,
                store::json_param(&new.metadata),
                now,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(err) if store::is_unique_violation(&err) => {
                return Err(EngineError::domain(format!(
                    "story {}.{} already exists",
                    new.epic_num, new.story_num
                )));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            epic = new.epic_num,
            story = new.story_num,
            title = %new.title,
            "story created"
        );
        Self::get_in(conn, new.epic_num, new.story_num)?
            .ok_or_else(|| EngineError::store("story vanished after insert"))
    }

    /// Look up a story by its composite key.
    pub fn get(&self, epic_num: i64, story_num: i64) -> Result<Option<Story>> {
        self.store
            .with(|conn| Self::get_in(conn, epic_num, story_num))
    }

    pub(crate) fn get_in(
        conn: &Connection,
        epic_num: i64,
        story_num: i64,
    ) -> Result<Option<Story>> {
        conn.query_row(
            "SELECT * FROM story_state WHERE epic_num = ?1 AND story_num = ?2",
            [epic_num, story_num],
            row_to_story,
        )
        .optional()
        .map_err(EngineError::from)
    }

    /// All stories ordered by `(epic, story)`.
    pub fn list(&self) -> Result<Vec<Story>> {
        self.store.with(Self::list_in)
    }

    pub(crate) fn list_in(conn: &Connection) -> Result<Vec<Story>> {
        let mut stmt =
            conn.prepare("SELECT * FROM story_state ORDER BY epic_num, story_num")?;
        let rows = stmt.query_map([], row_to_story)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(EngineError::from)
    }

    /// Stories of one epic ordered by story number.
    pub fn list_by_epic(&self, epic_num: i64) -> Result<Vec<Story>> {
        self.store.with(|conn| Self::list_by_epic_in(conn, epic_num))
    }

    pub(crate) fn list_by_epic_in(conn: &Connection, epic_num: i64) -> Result<Vec<Story>> {
        let mut stmt = conn
            .prepare("SELECT * FROM story_state WHERE epic_num = ?1 ORDER BY story_num")?;
        let rows = stmt.query_map([epic_num], row_to_story)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(EngineError::from)
    }

    /// Stories in a given status, ordered by `(epic, story)`.
    pub fn list_by_status(&self, status: StoryStatus) -> Result<Vec<Story>> {
        self.store.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM story_state WHERE status = ?1 ORDER BY epic_num, story_num",
            )?;
            let rows = stmt.query_map([status.as_str()], row_to_story)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Transition a story to `new_status`.
    ///
    /// `Blocked` requires a `blocked_reason`; any other target status clears
    /// it.
    pub fn transition(
        &self,
        epic_num: i64,
        story_num: i64,
        new_status: StoryStatus,
        blocked_reason: Option<&str>,
    ) -> Result<Story> {
        self.store.with(|conn| {
            Self::transition_in(conn, epic_num, story_num, new_status, blocked_reason)
        })
    }

    pub(crate) fn transition_in(
        conn: &Connection,
        epic_num: i64,
        story_num: i64,
        new_status: StoryStatus,
        blocked_reason: Option<&str>,
    ) -> Result<Story> {
        if new_status == StoryStatus::Blocked && blocked_reason.is_none() {
            return Err(EngineError::domain(format!(
                "blocking story {epic_num}.{story_num} requires a blocked_reason"
            )));
        }
        let reason = if new_status == StoryStatus::Blocked {
            blocked_reason
        } else {
            None
        };

        let changed = conn.execute(
            "UPDATE story_state
             SET status = ?1, blocked_reason = ?2, updated_at = ?3
             WHERE epic_num = ?4 AND story_num = ?5",
            params![
                new_status.as_str(),
                reason,
                store::ts_param(Utc::now()),
                epic_num,
                story_num,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::not_found(format!(
                "story {epic_num}.{story_num}"
            )));
        }

        tracing::info!(
            epic = epic_num,
            story = story_num,
            status = %new_status,
            "story transitioned"
        );
        Self::get_in(conn, epic_num, story_num)?.ok_or_else(|| {
            EngineError::not_found(format!("story {epic_num}.{story_num}"))
        })
    }

    /// Mark a story completed, recording actual hours when given.
    pub fn complete(
        &self,
        epic_num: i64,
        story_num: i64,
        actual_hours: Option<f64>,
    ) -> Result<Story> {
        self.store
            .with(|conn| Self::complete_in(conn, epic_num, story_num, actual_hours))
    }

    pub(crate) fn complete_in(
        conn: &Connection,
        epic_num: i64,
        story_num: i64,
        actual_hours: Option<f64>,
    ) -> Result<Story> {
        let changed = conn.execute(
            "UPDATE story_state
             SET status = 'completed', actual_hours = ?1, blocked_reason = NULL, updated_at = ?2
             WHERE epic_num = ?3 AND story_num = ?4",
            params![
                actual_hours,
                store::ts_param(Utc::now()),
                epic_num,
                story_num,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::not_found(format!(
                "story {epic_num}.{story_num}"
            )));
        }

        tracing::info!(epic = epic_num, story = story_num, "story completed");
        Self::get_in(conn, epic_num, story_num)?.ok_or_else(|| {
            EngineError::not_found(format!("story {epic_num}.{story_num}"))
        })
    }

    /// Delete a story row.
    pub fn delete(&self, epic_num: i64, story_num: i64) -> Result<bool> {
        self.store.with(|conn| Self::delete_in(conn, epic_num, story_num))
    }

    pub(crate) fn delete_in(conn: &Connection, epic_num: i64, story_num: i64) -> Result<bool> {
        let deleted = conn.execute(
            "DELETE FROM story_state WHERE epic_num = ?1 AND story_num = ?2",
            [epic_num, story_num],
        )?;
        Ok(deleted > 0)
    }

    /// Highest story number in an epic, or 0 when the epic has none.
    pub(crate) fn max_story_num_in(conn: &Connection, epic_num: i64) -> Result<i64> {
        conn.query_row(
            "SELECT COALESCE(MAX(story_num), 0) FROM story_state WHERE epic_num = ?1",
            [epic_num],
            |row| row.get(0),
        )
        .map_err(EngineError::from)
    }
}

fn row_to_story(row: &Row<'_>) -> rusqlite::Result<Story> {
    Ok(Story {
        id: row.get("id")?,
        epic_num: row.get("epic_num")?,
        story_num: row.get("story_num")?,
        title: row.get("title")?,
        status: store::enum_col(row, "status")?,
        assignee: row.get("assignee")?,
        priority: store::enum_col(row, "priority")?,
        estimate_hours: row.get("estimate_hours")?,
        actual_hours: row.get("actual_hours")?,
        blocked_reason: row.get("blocked_reason")?,
        metadata: store::json_col(row, "metadata")?,
        created_at: store::ts_col(row, "created_at")?,
        updated_at: store::ts_col(row, "updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> StoryService {
        StoryService::new(Arc::new(StateStore::in_memory().unwrap()))
    }

    #[test]
    fn create_and_get_round_trip() {
        let svc = service();
        let created = svc
            .create(&NewStory {
                assignee: Some("amelia".to_owned()),
                priority: Priority::P0,
                estimate_hours: Some(8.0),
                ..NewStory::new(1, 1, "Login endpoint")
            })
            .unwrap();

        assert_eq!(created.status, StoryStatus::Pending);
        assert_eq!(created.story_id(), "1.1");

        let fetched = svc.get(1, 1).unwrap().expect("story exists");
        assert_eq!(fetched, created);
        assert!(svc.get(1, 9).unwrap().is_none());
    }

    #[test]
    fn duplicate_key_is_domain_error() {
        let svc = service();
        svc.create(&NewStory::new(1, 1, "first")).unwrap();
        let err = svc.create(&NewStory::new(1, 1, "second")).unwrap_err();
        assert!(format!("{err}").contains("1.1 already exists"));

        // Same story number under another epic is fine.
        svc.create(&NewStory::new(2, 1, "other epic")).unwrap();
    }

    #[test]
    fn story_numbers_must_be_positive() {
        let err = service().create(&NewStory::new(1, 0, "bad")).unwrap_err();
        assert!(matches!(err, EngineError::DomainValidation { .. }));
    }

    #[test]
    fn blocked_requires_reason() {
        let svc = service();
        svc.create(&NewStory::new(1, 1, "t")).unwrap();

        let err = svc
            .transition(1, 1, StoryStatus::Blocked, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::DomainValidation { .. }));

        let blocked = svc
            .transition(1, 1, StoryStatus::Blocked, Some("waiting on API keys"))
            .unwrap();
        assert_eq!(blocked.status, StoryStatus::Blocked);
        assert_eq!(blocked.blocked_reason.as_deref(), Some("waiting on API keys"));
    }

    #[test]
    fn unblocking_clears_reason() {
        let svc = service();
        svc.create(&NewStory::new(1, 1, "t")).unwrap();
        svc.transition(1, 1, StoryStatus::Blocked, Some("stuck")).unwrap();

        let resumed = svc
            .transition(1, 1, StoryStatus::InProgress, None)
            .unwrap();
        assert_eq!(resumed.status, StoryStatus::InProgress);
        assert!(resumed.blocked_reason.is_none());
    }

    #[test]
    fn complete_sets_actual_hours() {
        let svc = service();
        svc.create(&NewStory::new(1, 1, "t")).unwrap();

        let done = svc.complete(1, 1, Some(7.5)).unwrap();
        assert_eq!(done.status, StoryStatus::Completed);
        assert_eq!(done.actual_hours, Some(7.5));
    }

    #[test]
    fn transition_missing_story_is_not_found() {
        let err = service()
            .transition(9, 9, StoryStatus::InProgress, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn list_by_epic_and_status() {
        let svc = service();
        svc.create(&NewStory::new(1, 1, "a")).unwrap();
        svc.create(&NewStory::new(1, 2, "b")).unwrap();
        svc.create(&NewStory::new(2, 1, "c")).unwrap();
        svc.complete(1, 2, None).unwrap();

        let epic1 = svc.list_by_epic(1).unwrap();
        assert_eq!(epic1.len(), 2);
        assert_eq!(epic1[0].story_num, 1);

        let completed = svc.list_by_status(StoryStatus::Completed).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].story_id(), "1.2");

        assert_eq!(svc.list().unwrap().len(), 3);
    }

    #[test]
    fn max_story_num_counts_per_epic() {
        let svc = service();
        svc.create(&NewStory::new(1, 1, "a")).unwrap();
        svc.create(&NewStory::new(1, 4, "b")).unwrap();

        svc.store
            .with(|conn| {
                assert_eq!(StoryService::max_story_num_in(conn, 1)?, 4);
                assert_eq!(StoryService::max_story_num_in(conn, 2)?, 0);
                Ok(())
            })
            .unwrap();
    }
}
