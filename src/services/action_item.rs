//! Action item service.
//!
//! Action items are follow-ups captured from ceremonies and reviews. A
//! critical item can be promoted into a story; each epic allows one
//! promotion, and `force` overrides the limit. Forced promotions still
//! count toward the limit, so every promotion after the first needs
//! `force` again.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{EngineError, Result};
use crate::model::{ActionItem, ActionItemPriority, ActionItemStatus, Priority, Story};
use crate::store::{self, StateStore};

use super::story::{NewStory, StoryService};

/// Parameters for [`ActionItemService::create`].
#[derive(Clone, Debug)]
pub struct NewActionItem {
    pub title: String,
    pub description: Option<String>,
    pub priority: ActionItemPriority,
    pub epic_num: Option<i64>,
    pub story_num: Option<i64>,
    pub assignee: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub metadata: serde_json::Value,
}

impl NewActionItem {
    /// A pending medium-priority item.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: ActionItemPriority::Medium,
            epic_num: None,
            story_num: None,
            assignee: None,
            due_date: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// CRUD and promotion over `action_items`.
#[derive(Clone)]
pub struct ActionItemService {
    store: Arc<StateStore>,
}

impl ActionItemService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Insert a new pending action item.
    pub fn create(&self, new: &NewActionItem) -> Result<ActionItem> {
        self.store.with(|conn| Self::create_in(conn, new))
    }

    pub(crate) fn create_in(conn: &Connection, new: &NewActionItem) -> Result<ActionItem> {
        if new.title.trim().is_empty() {
            return Err(EngineError::domain("action item title must not be empty"));
        }

        let now = store::ts_param(Utc::now());
        conn.execute(
            "INSERT INTO action_items
                 (title, description, priority, status, epic_num, story_num,
                  assignee, due_date, created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8, ?8, ?9)",
            params![
                new.title,
                new.description,
                new.priority.as_str(),
                new.epic_num,
                new.story_num,
                new.assignee,
                new.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
                now,
                store::json_param(&new.metadata),
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(id, title = %new.title, "action item created");
        Self::get_in(conn, id)?
            .ok_or_else(|| EngineError::store("action item vanished after insert"))
    }

    /// Look up an action item by id.
    pub fn get(&self, id: i64) -> Result<Option<ActionItem>> {
        self.store.with(|conn| Self::get_in(conn, id))
    }

    pub(crate) fn get_in(conn: &Connection, id: i64) -> Result<Option<ActionItem>> {
        conn.query_row("SELECT * FROM action_items WHERE id = ?1", [id], row_to_item)
            .optional()
            .map_err(EngineError::from)
    }

    /// List items, optionally filtered by epic, priority, or pending-only,
    /// newest first.
    pub fn list(
        &self,
        epic_num: Option<i64>,
        priority: Option<ActionItemPriority>,
        pending_only: bool,
    ) -> Result<Vec<ActionItem>> {
        self.store.with(|conn| {
            let mut sql = String::from("SELECT * FROM action_items WHERE 1=1");
            let mut args: Vec<String> = Vec::new();
            if let Some(epic) = epic_num {
                sql.push_str(" AND epic_num = ?");
                args.push(epic.to_string());
            }
            if let Some(priority) = priority {
                sql.push_str(" AND priority = ?");
                args.push(priority.as_str().to_owned());
            }
            if pending_only {
                sql.push_str(" AND status != 'completed'");
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_item)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Items not yet completed, optionally filtered by assignee.
    pub fn get_active(&self, assignee: Option<&str>) -> Result<Vec<ActionItem>> {
        self.store.with(|conn| {
            let mut sql =
                String::from("SELECT * FROM action_items WHERE status != 'completed'");
            let mut args: Vec<String> = Vec::new();
            if let Some(who) = assignee {
                sql.push_str(" AND assignee = ?");
                args.push(who.to_owned());
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_item)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Mark an item completed; an optional reason lands in metadata.
    pub fn complete(&self, id: i64, reason: Option<&str>) -> Result<ActionItem> {
        self.store.with(|conn| {
            let item = Self::get_in(conn, id)?
                .ok_or_else(|| EngineError::not_found(format!("action item {id}")))?;

            let mut metadata = if item.metadata.is_null() {
                serde_json::json!({})
            } else {
                item.metadata.clone()
            };
            if let (Some(reason), Some(obj)) = (reason, metadata.as_object_mut()) {
                obj.insert(
                    "completion_reason".to_owned(),
                    serde_json::Value::String(reason.to_owned()),
                );
            }

            conn.execute(
                "UPDATE action_items
                 SET status = 'completed', metadata = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![
                    store::json_param(&metadata),
                    store::ts_param(Utc::now()),
                    id
                ],
            )?;

            tracing::info!(id, "action item completed");
            Self::get_in(conn, id)?
                .ok_or_else(|| EngineError::not_found(format!("action item {id}")))
        })
    }

    /// Defer an item: record `metadata.deferred_until` (now plus `days`)
    /// for later review. Status and due date are untouched.
    pub fn defer(&self, id: i64, days: u64) -> Result<ActionItem> {
        self.store.with(|conn| {
            let item = Self::get_in(conn, id)?
                .ok_or_else(|| EngineError::not_found(format!("action item {id}")))?;

            let deferred_until = Utc::now() + chrono::Duration::days(days as i64);
            let mut metadata = if item.metadata.is_null() {
                serde_json::json!({})
            } else {
                item.metadata.clone()
            };
            if let Some(obj) = metadata.as_object_mut() {
                obj.insert(
                    "deferred_until".to_owned(),
                    serde_json::Value::String(store::ts_param(deferred_until)),
                );
            }

            conn.execute(
                "UPDATE action_items SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    store::json_param(&metadata),
                    store::ts_param(Utc::now()),
                    id
                ],
            )?;

            tracing::info!(id, deferred_until = %deferred_until, "action item deferred");
            Self::get_in(conn, id)?
                .ok_or_else(|| EngineError::not_found(format!("action item {id}")))
        })
    }

    /// Items [`ActionItemService::cleanup`] would auto-complete:
    /// low-priority pending/in-progress items created before the cutoff.
    pub fn stale_low_priority(&self, days: u64) -> Result<Vec<ActionItem>> {
        self.store.with(|conn| {
            let cutoff = Utc::now() - chrono::Duration::days(days as i64);
            let mut stmt = conn.prepare(
                "SELECT * FROM action_items
                 WHERE status IN ('pending', 'in_progress')
                   AND priority = 'low'
                   AND created_at < ?1
                 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map([store::ts_param(cutoff)], row_to_item)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Auto-complete stale low-priority items: pending or in-progress,
    /// `low` priority, created more than `days` days ago. Nothing is
    /// ever deleted. Returns how many items were completed.
    pub fn cleanup(&self, days: u64) -> Result<usize> {
        self.store.with(|conn| {
            let cutoff = Utc::now() - chrono::Duration::days(days as i64);
            let completed = conn.execute(
                "UPDATE action_items
                 SET status = 'completed', updated_at = ?1
                 WHERE status IN ('pending', 'in_progress')
                   AND priority = 'low'
                   AND created_at < ?2",
                params![store::ts_param(Utc::now()), store::ts_param(cutoff)],
            )?;
            tracing::info!(completed, days, "stale low-priority action items auto-completed");
            Ok(completed)
        })
    }

    /// Promote a critical action item into a story under `epic_num`.
    ///
    /// Each epic allows one promotion. `force` bypasses the limit; the
    /// forced promotion still counts, so the next promotion for the same
    /// epic needs `force` again.
    pub fn promote_to_story(
        &self,
        id: i64,
        epic_num: Option<i64>,
        force: bool,
    ) -> Result<(ActionItem, Story)> {
        self.store.transaction(|tx| {
            let item = Self::get_in(tx, id)?
                .ok_or_else(|| EngineError::not_found(format!("action item {id}")))?;

            if item.priority != ActionItemPriority::Critical {
                return Err(EngineError::domain(format!(
                    "only critical action items can be promoted; item {id} is {}",
                    item.priority
                )));
            }
            if item.is_promoted() {
                return Err(EngineError::domain(format!(
                    "action item {id} was already promoted"
                )));
            }

            let epic_num = epic_num.or(item.epic_num).ok_or_else(|| {
                EngineError::domain(format!(
                    "action item {id} has no epic; pass a target epic for promotion"
                ))
            })?;

            let promoted_in_epic: i64 = tx.query_row(
                "SELECT count(*) FROM action_items
                 WHERE epic_num = ?1
                   AND json_extract(metadata, '$.promoted_story') IS NOT NULL",
                [epic_num],
                |row| row.get(0),
            )?;
            if promoted_in_epic > 0 && !force {
                return Err(EngineError::domain(format!(
                    "epic {epic_num} already has a promoted action item; use force to promote another"
                )));
            }

            let story_num = StoryService::max_story_num_in(tx, epic_num)? + 1;
            let story = StoryService::create_in(
                tx,
                &NewStory {
                    assignee: item.assignee.clone(),
                    priority: Priority::P0,
                    metadata: serde_json::json!({ "promoted_from_action_item": id }),
                    ..NewStory::new(epic_num, story_num, item.title.clone())
                },
            )?;

            let mut metadata = if item.metadata.is_null() {
                serde_json::json!({})
            } else {
                item.metadata.clone()
            };
            if let Some(obj) = metadata.as_object_mut() {
                obj.insert(
                    "promoted_story".to_owned(),
                    serde_json::Value::String(story.story_id()),
                );
                obj.insert("promoted_forced".to_owned(), serde_json::Value::Bool(force));
            }

            tx.execute(
                "UPDATE action_items
                 SET status = 'completed', epic_num = ?1, metadata = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    epic_num,
                    store::json_param(&metadata),
                    store::ts_param(Utc::now()),
                    id
                ],
            )?;

            tracing::info!(id, story = %story.story_id(), force, "action item promoted to story");
            let updated = Self::get_in(tx, id)?
                .ok_or_else(|| EngineError::not_found(format!("action item {id}")))?;
            Ok((updated, story))
        })
    }
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ActionItem> {
    Ok(ActionItem {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        priority: store::enum_col(row, "priority")?,
        status: store::enum_col(row, "status")?,
        epic_num: row.get("epic_num")?,
        story_num: row.get("story_num")?,
        assignee: row.get("assignee")?,
        due_date: store::opt_date_col(row, "due_date")?,
        created_at: store::ts_col(row, "created_at")?,
        updated_at: store::ts_col(row, "updated_at")?,
        metadata: store::json_col(row, "metadata")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ActionItemService {
        ActionItemService::new(Arc::new(StateStore::in_memory().unwrap()))
    }

    fn critical(title: &str, epic: i64) -> NewActionItem {
        NewActionItem {
            priority: ActionItemPriority::Critical,
            epic_num: Some(epic),
            ..NewActionItem::new(title)
        }
    }

    #[test]
    fn create_get_and_list() {
        let svc = service();
        let item = svc
            .create(&NewActionItem {
                description: Some("flaky auth test".to_owned()),
                assignee: Some("kim".to_owned()),
                ..NewActionItem::new("Fix flaky test")
            })
            .unwrap();
        assert_eq!(item.status, ActionItemStatus::Pending);

        assert_eq!(svc.list(None, None, false).unwrap().len(), 1);
        assert!(svc.get(item.id + 1).unwrap().is_none());
    }

    #[test]
    fn complete_records_reason() {
        let svc = service();
        let item = svc.create(&NewActionItem::new("t")).unwrap();

        let done = svc.complete(item.id, Some("fixed upstream")).unwrap();
        assert_eq!(done.status, ActionItemStatus::Completed);
        assert_eq!(
            done.metadata.get("completion_reason").and_then(|v| v.as_str()),
            Some("fixed upstream")
        );

        // Completed items drop out of active listings.
        assert!(svc.get_active(None).unwrap().is_empty());
    }

    #[test]
    fn defer_records_deferred_until_in_metadata() {
        let svc = service();
        let item = svc
            .create(&NewActionItem {
                due_date: Some(NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()),
                ..NewActionItem::new("t")
            })
            .unwrap();

        let deferred = svc.defer(item.id, 30).unwrap();
        let review_after = deferred.deferred_until().expect("deferral recorded");
        let days_ahead = (review_after - Utc::now()).num_days();
        assert!((29..=30).contains(&days_ahead), "{days_ahead}");

        // Status and due date are untouched.
        assert_eq!(deferred.status, ActionItemStatus::Pending);
        assert_eq!(deferred.due_date, item.due_date);
    }

    #[test]
    fn defer_missing_item_is_not_found() {
        let err = service().defer(99, 30).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn promote_critical_item_creates_story() {
        let svc = service();
        let item = svc.create(&critical("Security hole", 2)).unwrap();

        let (updated, story) = svc.promote_to_story(item.id, None, false).unwrap();
        assert_eq!(story.epic_num, 2);
        assert_eq!(story.story_num, 1);
        assert_eq!(story.priority, Priority::P0);
        assert_eq!(updated.status, ActionItemStatus::Completed);
        assert_eq!(
            updated.metadata.get("promoted_story").and_then(|v| v.as_str()),
            Some("2.1")
        );
    }

    #[test]
    fn promotion_limit_is_one_per_epic() {
        let svc = service();
        let first = svc.create(&critical("first", 3)).unwrap();
        let second = svc.create(&critical("second", 3)).unwrap();

        svc.promote_to_story(first.id, None, false).unwrap();

        let err = svc.promote_to_story(second.id, None, false).unwrap_err();
        assert!(format!("{err}").contains("force"), "{err}");

        // Force bypasses the limit and the story number advances.
        let (_, story) = svc.promote_to_story(second.id, None, true).unwrap();
        assert_eq!(story.story_num, 2);
    }

    #[test]
    fn forced_promotion_counts_toward_limit() {
        let svc = service();
        let a = svc.create(&critical("a", 4)).unwrap();
        let b = svc.create(&critical("b", 4)).unwrap();
        let c = svc.create(&critical("c", 4)).unwrap();

        svc.promote_to_story(a.id, None, false).unwrap();
        svc.promote_to_story(b.id, None, true).unwrap();

        // Two promotions recorded; a third still requires force.
        let err = svc.promote_to_story(c.id, None, false).unwrap_err();
        assert!(matches!(err, EngineError::DomainValidation { .. }));
    }

    #[test]
    fn promote_non_critical_rejected() {
        let svc = service();
        let item = svc
            .create(&NewActionItem {
                epic_num: Some(1),
                ..NewActionItem::new("minor")
            })
            .unwrap();

        let err = svc.promote_to_story(item.id, None, false).unwrap_err();
        assert!(format!("{err}").contains("critical"));
    }

    #[test]
    fn promote_without_epic_rejected() {
        let svc = service();
        let item = svc
            .create(&NewActionItem {
                priority: ActionItemPriority::Critical,
                ..NewActionItem::new("orphan")
            })
            .unwrap();

        let err = svc.promote_to_story(item.id, None, false).unwrap_err();
        assert!(format!("{err}").contains("epic"));

        // Passing a target epic fixes it.
        svc.promote_to_story(item.id, Some(7), false).unwrap();
    }

    #[test]
    fn cleanup_auto_completes_stale_low_priority_items() {
        let svc = service();
        let low = svc
            .create(&NewActionItem {
                priority: ActionItemPriority::Low,
                ..NewActionItem::new("stale low")
            })
            .unwrap();
        let high = svc
            .create(&NewActionItem {
                priority: ActionItemPriority::High,
                ..NewActionItem::new("stale high")
            })
            .unwrap();
        let done = svc
            .create(&NewActionItem {
                priority: ActionItemPriority::Low,
                ..NewActionItem::new("already done")
            })
            .unwrap();
        svc.complete(done.id, None).unwrap();

        // Nothing is older than 30 days yet.
        assert!(svc.stale_low_priority(30).unwrap().is_empty());
        assert_eq!(svc.cleanup(30).unwrap(), 0);

        // A zero-day cutoff catches only the low-priority pending item.
        let stale = svc.stale_low_priority(0).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, low.id);

        assert_eq!(svc.cleanup(0).unwrap(), 1);
        assert_eq!(
            svc.get(low.id).unwrap().unwrap().status,
            ActionItemStatus::Completed
        );
        assert_eq!(
            svc.get(high.id).unwrap().unwrap().status,
            ActionItemStatus::Pending
        );
        // Nothing was deleted.
        assert_eq!(svc.list(None, None, false).unwrap().len(), 3);
    }
}
