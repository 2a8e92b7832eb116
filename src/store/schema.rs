//! State database schema.
//!
//! Each constant is the complete DDL batch for one registered migration.
//! All statements are `IF NOT EXISTS` so a partially applied batch can be
//! re-run safely.

/// Migration `001_state_tables`: epic/story state plus action items,
/// ceremonies, and the learning index.
pub const STATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS epic_state (
    epic_num INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('planning', 'in_progress', 'completed')),
    total_stories INTEGER NOT NULL DEFAULT 0,
    completed_stories INTEGER NOT NULL DEFAULT 0,
    progress_percentage REAL NOT NULL DEFAULT 0,
    feature TEXT,
    metadata JSON,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS story_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    epic_num INTEGER NOT NULL,
    story_num INTEGER NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('pending', 'in_progress', 'blocked', 'testing', 'review', 'completed')),
    assignee TEXT,
    priority TEXT NOT NULL DEFAULT 'P2' CHECK(priority IN ('P0', 'P1', 'P2', 'P3')),
    estimate_hours REAL,
    actual_hours REAL,
    blocked_reason TEXT,
    metadata JSON,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(epic_num, story_num)
);
CREATE INDEX IF NOT EXISTS idx_story_state_epic ON story_state(epic_num);
CREATE INDEX IF NOT EXISTS idx_story_state_status ON story_state(status);

CREATE TABLE IF NOT EXISTS action_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT,
    priority TEXT NOT NULL DEFAULT 'medium' CHECK(priority IN ('critical', 'high', 'medium', 'low')),
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'in_progress', 'completed')),
    epic_num INTEGER,
    story_num INTEGER,
    assignee TEXT,
    due_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    metadata JSON
);
CREATE INDEX IF NOT EXISTS idx_action_items_status ON action_items(status);
CREATE INDEX IF NOT EXISTS idx_action_items_epic ON action_items(epic_num);

CREATE TABLE IF NOT EXISTS ceremonies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ceremony_type TEXT NOT NULL,
    summary TEXT NOT NULL,
    participants TEXT,
    decisions TEXT,
    action_items TEXT,
    held_at TEXT NOT NULL,
    epic_num INTEGER,
    story_num INTEGER,
    metadata JSON
);
CREATE INDEX IF NOT EXISTS idx_ceremonies_type ON ceremonies(ceremony_type);
CREATE INDEX IF NOT EXISTS idx_ceremonies_held_at ON ceremonies(held_at);

CREATE TABLE IF NOT EXISTS learning_index (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL,
    category TEXT NOT NULL CHECK(category IN ('technical', 'process', 'domain', 'architectural', 'team')),
    learning TEXT NOT NULL,
    context TEXT,
    source_type TEXT,
    epic_num INTEGER,
    story_num INTEGER,
    relevance_score REAL NOT NULL DEFAULT 1.0 CHECK(relevance_score >= 0.0 AND relevance_score <= 1.0),
    is_active INTEGER NOT NULL DEFAULT 1,
    superseded_by INTEGER REFERENCES learning_index(id),
    created_at TEXT NOT NULL,
    metadata JSON
);
CREATE INDEX IF NOT EXISTS idx_learning_index_category ON learning_index(category);
CREATE INDEX IF NOT EXISTS idx_learning_index_active ON learning_index(is_active);
";

/// Migration `002_features`: the feature registry, its audit trail, and the
/// triggers that keep `completed_at` in lockstep with `status` and append
/// audit rows on every INSERT/UPDATE/DELETE.
pub const FEATURES: &str = "
CREATE TABLE IF NOT EXISTS features (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    scope TEXT NOT NULL CHECK(scope IN ('mvp', 'feature')),
    status TEXT NOT NULL CHECK(status IN ('planning', 'active', 'complete', 'archived')),
    scale_level INTEGER NOT NULL CHECK(scale_level >= 0 AND scale_level <= 4),
    description TEXT,
    owner TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    completed_at TEXT,
    metadata JSON
);
CREATE INDEX IF NOT EXISTS idx_features_scope ON features(scope);
CREATE INDEX IF NOT EXISTS idx_features_status ON features(status);
CREATE INDEX IF NOT EXISTS idx_features_scale_level ON features(scale_level);

CREATE TABLE IF NOT EXISTS features_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feature_id INTEGER NOT NULL,
    operation TEXT NOT NULL CHECK(operation IN ('INSERT', 'UPDATE', 'DELETE')),
    old_value JSON,
    new_value JSON,
    changed_at TEXT NOT NULL DEFAULT (datetime('now')),
    changed_by TEXT
);
CREATE INDEX IF NOT EXISTS idx_features_audit_feature_id ON features_audit(feature_id);

CREATE TRIGGER IF NOT EXISTS features_completed_at_set
AFTER UPDATE OF status ON features
FOR EACH ROW
WHEN NEW.status = 'complete' AND OLD.status != 'complete'
BEGIN
    UPDATE features SET completed_at = datetime('now') WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS features_completed_at_clear
AFTER UPDATE OF status ON features
FOR EACH ROW
WHEN NEW.status != 'complete' AND OLD.status = 'complete'
BEGIN
    UPDATE features SET completed_at = NULL WHERE id = NEW.id;
END;

CREATE TRIGGER IF NOT EXISTS features_audit_insert
AFTER INSERT ON features
FOR EACH ROW
BEGIN
    INSERT INTO features_audit (feature_id, operation, new_value, changed_at)
    VALUES (
        NEW.id,
        'INSERT',
        json_object(
            'name', NEW.name,
            'scope', NEW.scope,
            'status', NEW.status,
            'scale_level', NEW.scale_level,
            'description', NEW.description,
            'owner', NEW.owner
        ),
        datetime('now')
    );
END;

CREATE TRIGGER IF NOT EXISTS features_audit_update
AFTER UPDATE ON features
FOR EACH ROW
BEGIN
    INSERT INTO features_audit (feature_id, operation, old_value, new_value, changed_at)
    VALUES (
        NEW.id,
        'UPDATE',
        json_object(
            'name', OLD.name,
            'scope', OLD.scope,
            'status', OLD.status,
            'scale_level', OLD.scale_level,
            'description', OLD.description,
            'owner', OLD.owner
        ),
        json_object(
            'name', NEW.name,
            'scope', NEW.scope,
            'status', NEW.status,
            'scale_level', NEW.scale_level,
            'description', NEW.description,
            'owner', NEW.owner
        ),
        datetime('now')
    );
END;

CREATE TRIGGER IF NOT EXISTS features_audit_delete
AFTER DELETE ON features
FOR EACH ROW
BEGIN
    INSERT INTO features_audit (feature_id, operation, old_value, changed_at)
    VALUES (
        OLD.id,
        'DELETE',
        json_object(
            'name', OLD.name,
            'scope', OLD.scope,
            'status', OLD.status,
            'scale_level', OLD.scale_level,
            'description', OLD.description,
            'owner', OLD.owner
        ),
        datetime('now')
    );
END;
";

/// Migration `003_workflow_context`: versioned workflow-context snapshots.
pub const WORKFLOW_CONTEXT: &str = "
CREATE TABLE IF NOT EXISTS workflow_context (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id TEXT UNIQUE NOT NULL,
    epic_num INTEGER NOT NULL,
    story_num INTEGER,
    feature TEXT NOT NULL,
    workflow_name TEXT NOT NULL,
    current_phase TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'paused')),
    context_data TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_workflow_context_workflow_id ON workflow_context(workflow_id);
CREATE INDEX IF NOT EXISTS idx_workflow_context_epic_story ON workflow_context(epic_num, story_num);
CREATE INDEX IF NOT EXISTS idx_workflow_context_status ON workflow_context(status);
CREATE INDEX IF NOT EXISTS idx_workflow_context_created_at ON workflow_context(created_at);
CREATE INDEX IF NOT EXISTS idx_workflow_context_feature ON workflow_context(feature);
";

/// Migration `004_context_usage`: lineage attribution rows plus the
/// per-key usage audit log.
pub const CONTEXT_USAGE: &str = "
CREATE TABLE IF NOT EXISTS context_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    artifact_type TEXT NOT NULL CHECK(artifact_type IN (
        'epic', 'story', 'task', 'code', 'test', 'doc', 'other'
    )),
    artifact_id TEXT NOT NULL,
    document_id INTEGER,
    document_path TEXT,
    document_type TEXT,
    document_version TEXT NOT NULL,
    workflow_id TEXT,
    workflow_name TEXT,
    epic INTEGER,
    story TEXT,
    accessed_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_context_usage_artifact ON context_usage(artifact_type, artifact_id);
CREATE INDEX IF NOT EXISTS idx_context_usage_document_id ON context_usage(document_id);
CREATE INDEX IF NOT EXISTS idx_context_usage_workflow_id ON context_usage(workflow_id);
CREATE INDEX IF NOT EXISTS idx_context_usage_epic_story ON context_usage(epic, story);

CREATE TABLE IF NOT EXISTS context_key_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    context_key TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    cache_hit INTEGER NOT NULL,
    workflow_id TEXT,
    epic INTEGER,
    story TEXT,
    accessed_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_context_key_usage_key ON context_key_usage(context_key);
CREATE INDEX IF NOT EXISTS idx_context_key_usage_workflow ON context_key_usage(workflow_id);
CREATE INDEX IF NOT EXISTS idx_context_key_usage_epic_story ON context_key_usage(epic, story);
";
