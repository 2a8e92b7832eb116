//! Migration registry and runner.
//!
//! Applied migrations are recorded in `migrations(version UNIQUE, applied_at)`
//! by stable string identifier, so re-running the runner on a migrated
//! database is a no-op. Each migration applies inside its own transaction.

use rusqlite::Connection;

use super::schema;
use crate::error::Result;

/// One registered schema migration.
pub struct Migration {
    /// Stable identifier recorded in the registry.
    pub version: &'static str,
    /// DDL batch to apply.
    pub sql: &'static str,
}

/// All migrations, in application order.
pub const ALL: [Migration; 4] = [
    Migration {
        version: "001_state_tables",
        sql: schema::STATE_TABLES,
    },
    Migration {
        version: "002_features",
        sql: schema::FEATURES,
    },
    Migration {
        version: "003_workflow_context",
        sql: schema::WORKFLOW_CONTEXT,
    },
    Migration {
        version: "004_context_usage",
        sql: schema::CONTEXT_USAGE,
    },
];

/// Apply every unapplied migration. Returns the versions applied by this
/// call (empty when the database was already current).
pub fn apply_all(conn: &mut Connection) -> Result<Vec<&'static str>> {
    ensure_registry(conn)?;

    let mut applied = Vec::new();
    for migration in &ALL {
        if is_applied(conn, migration.version)? {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO migrations (version, applied_at) VALUES (?1, datetime('now'))",
            [migration.version],
        )?;
        tx.commit()?;

        tracing::info!(version = migration.version, "schema migration applied");
        applied.push(migration.version);
    }

    Ok(applied)
}

/// Whether `version` is recorded in the registry.
pub fn is_applied(conn: &Connection, version: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM migrations WHERE version = ?1",
            [version],
            |_| Ok(()),
        )
        .map(|()| true)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(false),
            other => Err(other),
        })?;
    Ok(found)
}

fn ensure_registry(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version TEXT UNIQUE NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn apply_all_creates_every_table() {
        let mut conn = fresh_conn();
        let applied = apply_all(&mut conn).unwrap();
        assert_eq!(applied.len(), ALL.len());

        for table in [
            "epic_state",
            "story_state",
            "action_items",
            "ceremonies",
            "learning_index",
            "features",
            "features_audit",
            "workflow_context",
            "context_usage",
            "context_key_usage",
            "migrations",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "table {table} should exist");
        }
    }

    #[test]
    fn apply_all_is_idempotent() {
        let mut conn = fresh_conn();
        let first = apply_all(&mut conn).unwrap();
        assert!(!first.is_empty());

        let second = apply_all(&mut conn).unwrap();
        assert!(second.is_empty(), "second run should apply nothing");
    }

    #[test]
    fn registry_records_versions() {
        let mut conn = fresh_conn();
        apply_all(&mut conn).unwrap();

        for migration in &ALL {
            assert!(is_applied(&conn, migration.version).unwrap());
        }
        assert!(!is_applied(&conn, "999_future").unwrap());
    }

    #[test]
    fn completed_at_trigger_sets_and_clears() {
        let mut conn = fresh_conn();
        apply_all(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO features (name, scope, status, scale_level, created_at)
             VALUES ('auth', 'feature', 'active', 2, datetime('now'))",
            [],
        )
        .unwrap();

        conn.execute("UPDATE features SET status = 'complete' WHERE name = 'auth'", [])
            .unwrap();
        let completed: Option<String> = conn
            .query_row("SELECT completed_at FROM features WHERE name = 'auth'", [], |r| r.get(0))
            .unwrap();
        assert!(completed.is_some(), "completed_at should be stamped");

        conn.execute("UPDATE features SET status = 'active' WHERE name = 'auth'", [])
            .unwrap();
        let completed: Option<String> = conn
            .query_row("SELECT completed_at FROM features WHERE name = 'auth'", [], |r| r.get(0))
            .unwrap();
        assert!(completed.is_none(), "completed_at should be cleared on reopen");
    }

    #[test]
    fn audit_triggers_record_insert_update_delete() {
        let mut conn = fresh_conn();
        apply_all(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO features (name, scope, status, scale_level, created_at)
             VALUES ('billing', 'mvp', 'planning', 3, datetime('now'))",
            [],
        )
        .unwrap();
        conn.execute("UPDATE features SET owner = 'dana' WHERE name = 'billing'", [])
            .unwrap();
        conn.execute("DELETE FROM features WHERE name = 'billing'", [])
            .unwrap();

        let ops: Vec<String> = conn
            .prepare("SELECT operation FROM features_audit ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(ops, vec!["INSERT", "UPDATE", "DELETE"]);
    }

    #[test]
    fn scale_level_check_rejects_out_of_range() {
        let mut conn = fresh_conn();
        apply_all(&mut conn).unwrap();

        let err = conn.execute(
            "INSERT INTO features (name, scope, status, scale_level, created_at)
             VALUES ('bad', 'feature', 'planning', 5, datetime('now'))",
            [],
        );
        assert!(err.is_err(), "scale_level 5 should violate the CHECK");
    }
}
