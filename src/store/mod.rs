//! Embedded relational state store.
//!
//! [`StateStore`] wraps a single SQLite database file (by convention
//! `.gao-dev/documents.db` under the project root). Writers are serialized
//! behind one connection guarded by a mutex; readers share the same guard.
//! Callers never hold the guard across threads, which keeps the
//! one-connection-per-thread discipline without a pool.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction};

use crate::error::{EngineError, Result};
use crate::model::ParseEnumError;

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Handle to the state database.
pub struct StateStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (creating if necessary) the database at `path`.
    ///
    /// Parent directories are created; foreign keys are enabled. The schema
    /// is NOT applied — use [`StateStore::open_and_migrate`] or the
    /// migration engine for that.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
                // The conventional state directory ignores itself, so the
                // database never dirties the working tree the atomic
                // pre-checks inspect.
                if parent.file_name().is_some_and(|name| name == ".gao-dev") {
                    let ignore = parent.join(".gitignore");
                    if !ignore.exists() {
                        std::fs::write(&ignore, "*\n")?;
                    }
                }
            }
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Open the database and bring its schema fully up to date.
    pub fn open_and_migrate(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::open(path)?;
        store.apply_migrations()?;
        Ok(store)
    }

    /// In-memory store with the full schema, for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        };
        store.apply_migrations()?;
        Ok(store)
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply every unapplied schema migration. Returns the versions applied.
    pub fn apply_migrations(&self) -> Result<Vec<&'static str>> {
        let mut guard = self.lock();
        migrations::apply_all(&mut guard)
    }

    /// Run `f` with the shared connection.
    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        f(&guard)
    }

    /// Run `f` inside an explicit transaction. The transaction commits when
    /// `f` returns `Ok` and rolls back when it returns `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let tx = guard.transaction().map_err(EngineError::from)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-operation; the
        // connection itself is still usable and SQLite rolled back its
        // transaction.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Whether a rusqlite error is a UNIQUE-constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("UNIQUE")
    )
}

/// Read a TEXT column and parse it into an enum implementing
/// `FromStr<Err = ParseEnumError>`.
pub(crate) fn enum_col<T>(row: &Row<'_>, col: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.get(col)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Read a required timestamp column.
///
/// Accepts RFC 3339 (rows written by the engine) and SQLite's
/// `datetime('now')` format (rows written by triggers and defaults).
pub(crate) fn ts_col(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    parse_ts(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Read an optional timestamp column.
pub(crate) fn opt_ts_col(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        parse_ts(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read an optional `YYYY-MM-DD` date column.
pub(crate) fn opt_date_col(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read a JSON metadata column. NULL maps to `Value::Null`.
pub(crate) fn json_col(row: &Row<'_>, col: &str) -> rusqlite::Result<serde_json::Value> {
    let raw: Option<String> = row.get(col)?;
    match raw {
        None => Ok(serde_json::Value::Null),
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))),
    }
}

/// Serialize a metadata value for storage. `Value::Null` stores as SQL NULL.
pub(crate) fn json_param(value: &serde_json::Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(value.to_string())
    }
}

/// The engine's canonical timestamp encoding (RFC 3339, UTC).
pub(crate) fn ts_param(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc())
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_has_schema() {
        let store = StateStore::in_memory().unwrap();
        let count = store
            .with(|conn| {
                conn.query_row("SELECT count(*) FROM features", [], |r| r.get::<_, i64>(0))
                    .map_err(EngineError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn open_creates_parent_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join(".gao-dev").join("documents.db");
        let store = StateStore::open_and_migrate(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(store.path(), db_path);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = StateStore::in_memory().unwrap();
        let result: Result<()> = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO epic_state (epic_num, title, status, created_at, updated_at)
                 VALUES (1, 'T', 'planning', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(EngineError::domain("forced failure"))
        });
        assert!(result.is_err());

        let count = store
            .with(|conn| {
                conn.query_row("SELECT count(*) FROM epic_state", [], |r| r.get::<_, i64>(0))
                    .map_err(EngineError::from)
            })
            .unwrap();
        assert_eq!(count, 0, "insert should have been rolled back");
    }

    #[test]
    fn parse_ts_accepts_both_formats() {
        assert!(parse_ts("2026-08-01T10:30:00+00:00").is_ok());
        assert!(parse_ts("2026-08-01 10:30:00").is_ok());
        assert!(parse_ts("yesterday").is_err());
    }

    #[test]
    fn json_param_null_is_sql_null() {
        assert_eq!(json_param(&serde_json::Value::Null), None);
        assert_eq!(
            json_param(&serde_json::json!({"k": 1})),
            Some("{\"k\":1}".to_owned())
        );
    }

    #[test]
    fn unique_violation_detected() {
        let store = StateStore::in_memory().unwrap();
        store
            .with(|conn| {
                conn.execute(
                    "INSERT INTO features (name, scope, status, scale_level, created_at)
                     VALUES ('dup', 'feature', 'planning', 2, datetime('now'))",
                    [],
                )
                .map_err(EngineError::from)
            })
            .unwrap();

        let err = store.with(|conn| {
            conn.execute(
                "INSERT INTO features (name, scope, status, scale_level, created_at)
                 VALUES ('dup', 'feature', 'planning', 2, datetime('now'))",
                [],
            )
            .map(|_| ())
            .map_err(|e| {
                assert!(is_unique_violation(&e));
                EngineError::from(e)
            })
        });
        assert!(err.is_err());
    }
}
