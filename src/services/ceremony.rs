//! Ceremony recording service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{EngineError, Result};
use crate::model::Ceremony;
use crate::store::{self, StateStore};

/// Parameters for [`CeremonyService::record`].
#[derive(Clone, Debug)]
pub struct NewCeremony {
    pub ceremony_type: String,
    pub summary: String,
    pub participants: Option<String>,
    pub decisions: Option<String>,
    pub action_items: Option<String>,
    /// When the ceremony was held; defaults to now.
    pub held_at: Option<DateTime<Utc>>,
    pub epic_num: Option<i64>,
    pub story_num: Option<i64>,
    pub metadata: serde_json::Value,
}

impl NewCeremony {
    pub fn new(ceremony_type: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            ceremony_type: ceremony_type.into(),
            summary: summary.into(),
            participants: None,
            decisions: None,
            action_items: None,
            held_at: None,
            epic_num: None,
            story_num: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Append-mostly store of ceremony summaries.
#[derive(Clone)]
pub struct CeremonyService {
    store: Arc<StateStore>,
}

impl CeremonyService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Record a ceremony summary.
    pub fn record(&self, new: &NewCeremony) -> Result<Ceremony> {
        self.store.with(|conn| Self::record_in(conn, new))
    }

    pub(crate) fn record_in(conn: &Connection, new: &NewCeremony) -> Result<Ceremony> {
        if new.ceremony_type.trim().is_empty() {
            return Err(EngineError::domain("ceremony_type must not be empty"));
        }

        let held_at = new.held_at.unwrap_or_else(Utc::now);
        conn.execute(
            "INSERT INTO ceremonies
                 (ceremony_type, summary, participants, decisions, action_items,
                  held_at, epic_num, story_num, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.ceremony_type,
                new.summary,
                new.participants,
                new.decisions,
                new.action_items,
                store::ts_param(held_at),
                new.epic_num,
                new.story_num,
                store::json_param(&new.metadata),
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(id, ceremony_type = %new.ceremony_type, "ceremony recorded");
        Self::get_in(conn, id)?
            .ok_or_else(|| EngineError::store("ceremony vanished after insert"))
    }

    /// Look up a ceremony by id.
    pub fn get(&self, id: i64) -> Result<Option<Ceremony>> {
        self.store.with(|conn| Self::get_in(conn, id))
    }

    pub(crate) fn get_in(conn: &Connection, id: i64) -> Result<Option<Ceremony>> {
        conn.query_row("SELECT * FROM ceremonies WHERE id = ?1", [id], row_to_ceremony)
            .optional()
            .map_err(EngineError::from)
    }

    /// Most recent ceremonies, optionally filtered by type.
    pub fn recent(&self, ceremony_type: Option<&str>, limit: usize) -> Result<Vec<Ceremony>> {
        self.store.with(|conn| {
            let mut sql = String::from("SELECT * FROM ceremonies WHERE 1=1");
            let mut args: Vec<String> = Vec::new();
            if let Some(kind) = ceremony_type {
                sql.push_str(" AND ceremony_type = ?");
                args.push(kind.to_owned());
            }
            sql.push_str(" ORDER BY held_at DESC, id DESC LIMIT ?");
            args.push(limit.to_string());

            let mut stmt = conn.prepare(&sql)?;
            let rows =
                stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_ceremony)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }

    /// Ceremonies linked to an epic, newest first.
    pub fn list_by_epic(&self, epic_num: i64) -> Result<Vec<Ceremony>> {
        self.store.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM ceremonies WHERE epic_num = ?1 ORDER BY held_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([epic_num], row_to_ceremony)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }
}

fn row_to_ceremony(row: &Row<'_>) -> rusqlite::Result<Ceremony> {
    Ok(Ceremony {
        id: row.get("id")?,
        ceremony_type: row.get("ceremony_type")?,
        summary: row.get("summary")?,
        participants: row.get("participants")?,
        decisions: row.get("decisions")?,
        action_items: row.get("action_items")?,
        held_at: store::ts_col(row, "held_at")?,
        epic_num: row.get("epic_num")?,
        story_num: row.get("story_num")?,
        metadata: store::json_col(row, "metadata")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CeremonyService {
        CeremonyService::new(Arc::new(StateStore::in_memory().unwrap()))
    }

    #[test]
    fn record_and_get_round_trip() {
        let svc = service();
        let recorded = svc
            .record(&NewCeremony {
                participants: Some("amelia, kim".to_owned()),
                decisions: Some("ship weekly".to_owned()),
                epic_num: Some(1),
                ..NewCeremony::new("retrospective", "Sprint 4 retro")
            })
            .unwrap();

        let fetched = svc.get(recorded.id).unwrap().expect("ceremony exists");
        assert_eq!(fetched, recorded);
        assert_eq!(fetched.ceremony_type, "retrospective");
    }

    #[test]
    fn empty_type_rejected() {
        let err = service()
            .record(&NewCeremony::new("", "summary"))
            .unwrap_err();
        assert!(matches!(err, EngineError::DomainValidation { .. }));
    }

    #[test]
    fn recent_filters_by_type_and_limits() {
        let svc = service();
        for i in 0..3 {
            svc.record(&NewCeremony::new("standup", format!("day {i}"))).unwrap();
        }
        svc.record(&NewCeremony::new("retrospective", "retro")).unwrap();

        assert_eq!(svc.recent(None, 10).unwrap().len(), 4);
        assert_eq!(svc.recent(Some("standup"), 10).unwrap().len(), 3);
        assert_eq!(svc.recent(Some("standup"), 2).unwrap().len(), 2);
    }

    #[test]
    fn list_by_epic_filters() {
        let svc = service();
        svc.record(&NewCeremony {
            epic_num: Some(1),
            ..NewCeremony::new("planning", "epic 1 planning")
        })
        .unwrap();
        svc.record(&NewCeremony::new("planning", "global planning")).unwrap();

        assert_eq!(svc.list_by_epic(1).unwrap().len(), 1);
        assert!(svc.list_by_epic(2).unwrap().is_empty());
    }
}
