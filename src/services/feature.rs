//! Feature registry service.
//!
//! CRUD over the `features` table. The audit trail and the
//! `completed_at` stamp are maintained by database triggers; this service
//! only validates inputs and maps rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{EngineError, Result};
use crate::model::feature::MAX_SCALE_LEVEL;
use crate::model::{Feature, FeatureScope, FeatureStatus};
use crate::store::{self, StateStore};

/// Parameters for [`FeatureService::create`].
#[derive(Clone, Debug)]
pub struct NewFeature {
    pub name: String,
    pub scope: FeatureScope,
    pub scale_level: i64,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewFeature {
    /// A feature with the given name, scope, and scale level and empty
    /// optional fields.
    pub fn new(name: impl Into<String>, scope: FeatureScope, scale_level: i64) -> Self {
        Self {
            name: name.into(),
            scope,
            scale_level,
            description: None,
            owner: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// One row of the `features_audit` trail.
#[derive(Clone, Debug, serde::Serialize)]
pub struct FeatureAuditRecord {
    pub id: i64,
    pub feature_id: i64,
    pub operation: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub changed_at: DateTime<Utc>,
}

/// CRUD over the feature registry.
#[derive(Clone)]
pub struct FeatureService {
    store: Arc<StateStore>,
}

impl FeatureService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Insert a new feature in `planning` status.
    ///
    /// Rejects empty names, out-of-range scale levels, and duplicate names.
    pub fn create(&self, new: &NewFeature) -> Result<Feature> {
        self.store.with(|conn| Self::create_in(conn, new))
    }

    pub(crate) fn create_in(conn: &Connection, new: &NewFeature) -> Result<Feature> {
        if new.name.trim().is_empty() {
            return Err(EngineError::domain("feature name must not be empty"));
        }
        if !(0..=i64::from(MAX_SCALE_LEVEL)).contains(&new.scale_level) {
            return Err(EngineError::domain(format!(
                "scale_level must be 0-{MAX_SCALE_LEVEL}, got {}",
                new.scale_level
            )));
        }

        let inserted = conn.execute(
            "INSERT INTO features (name, scope, status, scale_level, description, owner, created_at, metadata)
             VALUES (?1, ?2, 'planning', ?3, ?4, ?5, ?6, ?7)",
            params![
                new.name,
                new.scope.as_str(),
                new.scale_level,
                new.description,
                new.owner,
                store::ts_param(Utc::now()),
                store::json_param(&new.metadata),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(err) if store::is_unique_violation(&err) => {
                return Err(EngineError::domain(format!(
                    "feature '{}' already exists",
                    new.name
                )));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(feature = %new.name, scale_level = new.scale_level, "feature created");
        Self::get_in(conn, &new.name)?
            .ok_or_else(|| EngineError::store("feature vanished after insert"))
    }

    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Result<Option<Feature>> {
        self.store.with(|conn| Self::get_in(conn, name))
    }

    pub(crate) fn get_in(conn: &Connection, name: &str) -> Result<Option<Feature>> {
        conn.query_row(
            "SELECT * FROM features WHERE name = ?1",
            [name],
            row_to_feature,
        )
        .optional()
        .map_err(EngineError::from)
    }

    /// List features, optionally filtered by scope and status, newest first.
    pub fn list(
        &self,
        scope: Option<FeatureScope>,
        status: Option<FeatureStatus>,
    ) -> Result<Vec<Feature>> {
        self.store.with(|conn| Self::list_in(conn, scope, status))
    }

    pub(crate) fn list_in(
        conn: &Connection,
        scope: Option<FeatureScope>,
        status: Option<FeatureStatus>,
    ) -> Result<Vec<Feature>> {
        let mut sql = String::from("SELECT * FROM features WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(scope) = scope {
            sql.push_str(" AND scope = ?");
            args.push(scope.as_str().to_owned());
        }
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            args.push(status.as_str().to_owned());
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_feature)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(EngineError::from)
    }

    /// Transition a feature to a new status. The `completed_at` stamp is
    /// handled by triggers.
    pub fn update_status(&self, name: &str, status: FeatureStatus) -> Result<Feature> {
        self.store.with(|conn| Self::update_status_in(conn, name, status))
    }

    pub(crate) fn update_status_in(
        conn: &Connection,
        name: &str,
        status: FeatureStatus,
    ) -> Result<Feature> {
        let changed = conn.execute(
            "UPDATE features SET status = ?1 WHERE name = ?2",
            params![status.as_str(), name],
        )?;
        if changed == 0 {
            return Err(EngineError::not_found(format!("feature '{name}'")));
        }
        tracing::info!(feature = %name, status = %status, "feature status updated");
        Self::get_in(conn, name)?
            .ok_or_else(|| EngineError::not_found(format!("feature '{name}'")))
    }

    /// Delete a feature by name. The audit trigger records the deletion.
    pub fn delete(&self, name: &str) -> Result<bool> {
        self.store.with(|conn| {
            let deleted = conn.execute("DELETE FROM features WHERE name = ?1", [name])?;
            if deleted > 0 {
                tracing::info!(feature = %name, "feature deleted");
            }
            Ok(deleted > 0)
        })
    }

    /// Audit rows for a feature id, oldest first.
    pub fn audit_trail(&self, feature_id: i64) -> Result<Vec<FeatureAuditRecord>> {
        self.store.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, feature_id, operation, old_value, new_value, changed_at
                 FROM features_audit WHERE feature_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map([feature_id], |row| {
                Ok(FeatureAuditRecord {
                    id: row.get("id")?,
                    feature_id: row.get("feature_id")?,
                    operation: row.get("operation")?,
                    old_value: store::json_col(row, "old_value")?,
                    new_value: store::json_col(row, "new_value")?,
                    changed_at: store::ts_col(row, "changed_at")?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(EngineError::from)
        })
    }
}

fn row_to_feature(row: &Row<'_>) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: row.get("id")?,
        name: row.get("name")?,
        scope: store::enum_col(row, "scope")?,
        status: store::enum_col(row, "status")?,
        scale_level: row.get::<_, i64>("scale_level")? as u8,
        description: row.get("description")?,
        owner: row.get("owner")?,
        created_at: store::ts_col(row, "created_at")?,
        completed_at: store::opt_ts_col(row, "completed_at")?,
        metadata: store::json_col(row, "metadata")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> FeatureService {
        FeatureService::new(Arc::new(StateStore::in_memory().unwrap()))
    }

    #[test]
    fn create_and_get_round_trip() {
        let svc = service();
        let created = svc
            .create(&NewFeature {
                description: Some("auth flows".to_owned()),
                owner: Some("dana".to_owned()),
                metadata: serde_json::json!({"filePath": "docs/features/user-auth/PRD.md"}),
                ..NewFeature::new("user-auth", FeatureScope::Feature, 3)
            })
            .unwrap();

        assert_eq!(created.status, FeatureStatus::Planning);
        assert_eq!(created.scale_level, 3);
        assert!(created.completed_at.is_none());

        let fetched = svc.get("user-auth").unwrap().expect("feature exists");
        assert_eq!(fetched, created);
    }

    #[test]
    fn get_missing_is_none() {
        assert!(service().get("ghost").unwrap().is_none());
    }

    #[test]
    fn duplicate_name_is_domain_error() {
        let svc = service();
        svc.create(&NewFeature::new("dup", FeatureScope::Mvp, 2)).unwrap();
        let err = svc
            .create(&NewFeature::new("dup", FeatureScope::Mvp, 2))
            .unwrap_err();
        assert!(matches!(err, EngineError::DomainValidation { .. }), "{err}");
        assert!(format!("{err}").contains("already exists"));
    }

    #[test]
    fn scale_level_boundaries_rejected() {
        let svc = service();
        for bad in [-1, 5] {
            let err = svc
                .create(&NewFeature::new("f", FeatureScope::Feature, bad))
                .unwrap_err();
            assert!(matches!(err, EngineError::DomainValidation { .. }), "{bad}: {err}");
        }
        // Boundaries themselves are fine.
        svc.create(&NewFeature::new("chore", FeatureScope::Feature, 0)).unwrap();
        svc.create(&NewFeature::new("greenfield", FeatureScope::Feature, 4)).unwrap();
    }

    #[test]
    fn empty_name_rejected() {
        let err = service()
            .create(&NewFeature::new("  ", FeatureScope::Feature, 2))
            .unwrap_err();
        assert!(matches!(err, EngineError::DomainValidation { .. }));
    }

    #[test]
    fn list_filters_by_scope_and_status() {
        let svc = service();
        svc.create(&NewFeature::new("a", FeatureScope::Mvp, 2)).unwrap();
        svc.create(&NewFeature::new("b", FeatureScope::Feature, 2)).unwrap();
        svc.update_status("b", FeatureStatus::Active).unwrap();

        assert_eq!(svc.list(None, None).unwrap().len(), 2);
        assert_eq!(svc.list(Some(FeatureScope::Mvp), None).unwrap().len(), 1);
        let active = svc.list(None, Some(FeatureStatus::Active)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "b");
    }

    #[test]
    fn complete_sets_completed_at_via_trigger() {
        let svc = service();
        svc.create(&NewFeature::new("done-soon", FeatureScope::Feature, 2)).unwrap();

        let done = svc.update_status("done-soon", FeatureStatus::Complete).unwrap();
        assert!(done.completed_at.is_some());

        let reopened = svc.update_status("done-soon", FeatureStatus::Active).unwrap();
        assert!(reopened.completed_at.is_none());
    }

    #[test]
    fn update_status_missing_is_not_found() {
        let err = service()
            .update_status("ghost", FeatureStatus::Active)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn delete_and_recreate_records_audit() {
        let svc = service();
        let first = svc.create(&NewFeature::new("cycle", FeatureScope::Feature, 2)).unwrap();
        assert!(svc.delete("cycle").unwrap());
        assert!(!svc.delete("cycle").unwrap());

        let again = svc.create(&NewFeature::new("cycle", FeatureScope::Feature, 2)).unwrap();
        assert_eq!(again.name, first.name);
        assert_eq!(again.scope, first.scope);

        let audit = svc.audit_trail(first.id).unwrap();
        let ops: Vec<&str> = audit.iter().map(|r| r.operation.as_str()).collect();
        assert_eq!(ops, vec!["INSERT", "DELETE"]);
    }
}
