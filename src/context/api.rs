//! Agent-facing context API.
//!
//! No hidden globals: the process owns one [`EngineContext`] (shared cache
//! and trackers), each request carries a [`RequestScope`] with its current
//! [`WorkflowContext`], and [`AgentContextApi`] binds the two together for
//! document access by semantic key.
//!
//! Cache keys are `"<feature>:<epic[.story]>:<doc_type>"` — the one
//! canonical shape used everywhere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::{CacheConfig, PathTemplates, TemplateVars};
use crate::context::cache::ContextCache;
use crate::context::lineage::LineageTracker;
use crate::context::persistence::ContextPersistence;
use crate::context::usage::{ContextUsageTracker, UsageEvent};
use crate::context::workflow::WorkflowContext;
use crate::store::StateStore;
use crate::structure::DocumentRegistry;

/// The semantic document keys every [`AgentContextApi`] serves.
pub const SEMANTIC_KEYS: [&str; 6] = [
    "prd",
    "architecture",
    "epic_definition",
    "story_definition",
    "coding_standards",
    "acceptance_criteria",
];

/// First 16 hex chars of the SHA-256 of `content` — the document version
/// recorded in usage and lineage rows.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_owned()
}

// ---------------------------------------------------------------------------
// EngineContext
// ---------------------------------------------------------------------------

/// Process-wide context services: one cache, one usage tracker, one
/// lineage tracker, one persistence layer — all over the shared store.
pub struct EngineContext {
    pub cache: Arc<ContextCache>,
    pub usage: Arc<ContextUsageTracker>,
    pub lineage: Arc<LineageTracker>,
    pub persistence: ContextPersistence,
}

impl EngineContext {
    pub fn new(store: Arc<StateStore>, cache_config: &CacheConfig) -> Self {
        Self {
            cache: Arc::new(ContextCache::from_config(cache_config)),
            usage: Arc::new(ContextUsageTracker::new(Arc::clone(&store))),
            lineage: Arc::new(LineageTracker::new(Arc::clone(&store))),
            persistence: ContextPersistence::new(store),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestScope
// ---------------------------------------------------------------------------

/// Per-request holder of the current workflow context. Owned by whoever
/// drives the request (one per thread of work); never shared.
#[derive(Default)]
pub struct RequestScope {
    current: Option<WorkflowContext>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the current context for this scope.
    pub fn set_current(&mut self, context: WorkflowContext) {
        tracing::debug!(workflow_id = %context.workflow_id, "workflow context set");
        self.current = Some(context);
    }

    /// The current context, when one is installed.
    pub fn current(&self) -> Option<&WorkflowContext> {
        self.current.as_ref()
    }

    /// Drop the current context.
    pub fn clear_current(&mut self) {
        if self.current.take().is_some() {
            tracing::debug!("workflow context cleared");
        }
    }

    /// An [`AgentContextApi`] bound to the current context, or `None`
    /// when the scope is empty.
    pub fn api<'a>(
        &'a self,
        engine: &'a EngineContext,
        loader: &'a dyn DocumentLoader,
    ) -> Option<AgentContextApi<'a>> {
        self.current
            .as_ref()
            .map(|ctx| AgentContextApi::new(ctx, &engine.cache, &engine.usage, loader))
    }
}

// ---------------------------------------------------------------------------
// DocumentLoader
// ---------------------------------------------------------------------------

/// Loads a document body for a semantic key, or `None` when the document
/// does not exist.
pub trait DocumentLoader {
    fn load(&self, doc_type: &str, ctx: &WorkflowContext) -> Option<String>;
}

impl<F> DocumentLoader for F
where
    F: Fn(&str, &WorkflowContext) -> Option<String>,
{
    fn load(&self, doc_type: &str, ctx: &WorkflowContext) -> Option<String> {
        self(doc_type, ctx)
    }
}

/// Default loader: ask the document registry first, then fall back to the
/// filesystem conventions encoded in the path templates.
pub struct FsDocumentLoader {
    project_root: PathBuf,
    templates: PathTemplates,
    registry: Option<Box<dyn DocumentRegistry>>,
}

impl FsDocumentLoader {
    pub fn new(project_root: impl Into<PathBuf>, templates: PathTemplates) -> Self {
        Self {
            project_root: project_root.into(),
            templates,
            registry: None,
        }
    }

    /// Inject a document registry to consult before the filesystem.
    #[must_use]
    pub fn with_registry(mut self, registry: Box<dyn DocumentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn read(&self, rel: &Path) -> Option<String> {
        std::fs::read_to_string(self.project_root.join(rel)).ok()
    }

    fn read_first(&self, candidates: &[PathBuf]) -> Option<String> {
        candidates.iter().find_map(|rel| self.read(rel))
    }

    /// First match of a glob pattern relative to the project root.
    fn glob_one(&self, pattern: &str) -> Option<String> {
        let full = self.project_root.join(pattern);
        glob::glob(&full.to_string_lossy())
            .ok()?
            .filter_map(std::result::Result::ok)
            .find(|p| p.is_file())
            .and_then(|p| std::fs::read_to_string(p).ok())
    }

    fn from_registry(&self, doc_type: &str, feature: &str) -> Option<String> {
        let registry = self.registry.as_ref()?;
        match registry.lookup(doc_type, feature) {
            Ok(Some(path)) => {
                let full = if path.is_absolute() {
                    path
                } else {
                    self.project_root.join(path)
                };
                std::fs::read_to_string(full).ok()
            }
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(doc_type, feature, error = %err, "registry lookup failed");
                None
            }
        }
    }
}

impl DocumentLoader for FsDocumentLoader {
    fn load(&self, doc_type: &str, ctx: &WorkflowContext) -> Option<String> {
        if let Some(content) = self.from_registry(doc_type, &ctx.feature) {
            return Some(content);
        }

        let vars = TemplateVars::feature(&ctx.feature);
        match doc_type {
            "prd" => self.read_first(&[
                PathTemplates::render(&self.templates.prd_location, &vars).ok()?,
                PathBuf::from(&self.templates.global_prd_location),
            ]),
            "architecture" => self.read_first(&[
                PathTemplates::render(&self.templates.architecture_location, &vars).ok()?,
                PathBuf::from(&self.templates.global_architecture_location),
            ]),
            "epic_definition" => self
                .glob_one(&format!(
                    "{}/{}/epics/{}-*/README.md",
                    self.templates.features_dir, ctx.feature, ctx.epic_num
                ))
                .or_else(|| {
                    self.read(Path::new(&format!("docs/epics/epic-{}.md", ctx.epic_num)))
                }),
            "story_definition" => {
                let story = ctx.story_num?;
                self.glob_one(&format!(
                    "{}/{}/epics/{}-*/stories/story-{}.{}.md",
                    self.templates.features_dir, ctx.feature, ctx.epic_num, ctx.epic_num, story
                ))
                .or_else(|| {
                    self.read(Path::new(&format!(
                        "docs/stories/story-{}.{}.md",
                        ctx.epic_num, story
                    )))
                })
            }
            "coding_standards" => {
                self.read(Path::new(&self.templates.coding_standards_location))
            }
            "acceptance_criteria" => {
                let qa = PathTemplates::render(&self.templates.qa_folder, &vars).ok()?;
                self.read(&qa.join("acceptance-criteria.md"))
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentContextApi
// ---------------------------------------------------------------------------

/// Document access bound to one workflow context: cache lookup, loader on
/// miss, cache fill, usage record.
pub struct AgentContextApi<'a> {
    ctx: &'a WorkflowContext,
    cache: &'a ContextCache,
    usage: &'a ContextUsageTracker,
    loader: &'a dyn DocumentLoader,
    custom: HashMap<String, serde_json::Value>,
}

impl<'a> AgentContextApi<'a> {
    pub fn new(
        ctx: &'a WorkflowContext,
        cache: &'a ContextCache,
        usage: &'a ContextUsageTracker,
        loader: &'a dyn DocumentLoader,
    ) -> Self {
        tracing::debug!(
            workflow_id = %ctx.workflow_id,
            story_id = %ctx.story_id(),
            "agent context api bound"
        );
        Self {
            ctx,
            cache,
            usage,
            loader,
            custom: HashMap::new(),
        }
    }

    /// The bound workflow context.
    pub fn context(&self) -> &WorkflowContext {
        self.ctx
    }

    pub fn prd(&self) -> Option<String> {
        self.document("prd")
    }

    pub fn architecture(&self) -> Option<String> {
        self.document("architecture")
    }

    pub fn epic_definition(&self) -> Option<String> {
        self.document("epic_definition")
    }

    /// `None` for epic-level contexts (no story number).
    pub fn story_definition(&self) -> Option<String> {
        self.ctx.story_num?;
        self.document("story_definition")
    }

    pub fn coding_standards(&self) -> Option<String> {
        self.document("coding_standards")
    }

    pub fn acceptance_criteria(&self) -> Option<String> {
        self.document("acceptance_criteria")
    }

    /// Custom non-document context value.
    pub fn custom(&self, key: &str) -> Option<&serde_json::Value> {
        self.custom.get(key)
    }

    /// Store a custom context value on this API instance.
    pub fn set_custom(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.custom.insert(key.into(), value);
    }

    /// The canonical cache key for a document type under this context:
    /// `"<feature>:<epic[.story]>:<doc_type>"`.
    pub fn cache_key(&self, doc_type: &str) -> String {
        format!("{}:{}:{doc_type}", self.ctx.feature, self.ctx.story_id())
    }

    fn document(&self, doc_type: &str) -> Option<String> {
        let key = self.cache_key(doc_type);

        let cached = self.cache.get(&key);
        let cache_hit = cached.is_some();
        let content = match cached {
            Some(content) => Some(content),
            None => {
                let loaded = self.loader.load(doc_type, self.ctx);
                if let Some(content) = &loaded {
                    self.cache.set(&key, content.clone(), None);
                    tracing::debug!(doc_type, cache_key = %key, "document cached");
                } else {
                    tracing::debug!(doc_type, "document not found");
                }
                loaded
            }
        };

        if let Some(content) = &content {
            let recorded = self.usage.record(&UsageEvent {
                context_key: doc_type,
                content_hash: &content_hash(content),
                cache_hit,
                workflow_id: Some(self.ctx.workflow_id),
                epic: Some(self.ctx.epic_num),
                story: Some(&self.ctx.story_id()),
            });
            if let Err(err) = recorded {
                // Usage tracking never blocks document access.
                tracing::warn!(doc_type, error = %err, "usage record failed");
            }
        }

        content
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(3, Some(1), "auth", "implement_story").unwrap()
    }

    fn services() -> (Arc<ContextCache>, Arc<ContextUsageTracker>) {
        let store = Arc::new(StateStore::in_memory().unwrap());
        (
            Arc::new(ContextCache::new(Duration::from_secs(60), 16)),
            Arc::new(ContextUsageTracker::new(store)),
        )
    }

    struct CountingLoader {
        calls: Mutex<Vec<String>>,
        body: Option<String>,
    }

    impl DocumentLoader for CountingLoader {
        fn load(&self, doc_type: &str, _ctx: &WorkflowContext) -> Option<String> {
            self.calls.lock().unwrap().push(doc_type.to_owned());
            self.body.clone()
        }
    }

    #[test]
    fn content_hash_is_16_hex_chars() {
        let hash = content_hash("# PRD\n");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, content_hash("# PRD\n"), "deterministic");
        assert_ne!(hash, content_hash("# PRD v2\n"));
    }

    #[test]
    fn cache_key_shape_is_canonical() {
        let (cache, usage) = services();
        let ctx = ctx();
        let loader = CountingLoader {
            calls: Mutex::new(Vec::new()),
            body: None,
        };
        let api = AgentContextApi::new(&ctx, &cache, &usage, &loader);

        assert_eq!(api.cache_key("prd"), "auth:3.1:prd");

        let epic_level = WorkflowContext::new(3, None, "auth", "plan").unwrap();
        let api = AgentContextApi::new(&epic_level, &cache, &usage, &loader);
        assert_eq!(api.cache_key("architecture"), "auth:3:architecture");
    }

    #[test]
    fn miss_loads_caches_and_hits_after() {
        let (cache, usage) = services();
        let ctx = ctx();
        let loader = CountingLoader {
            calls: Mutex::new(Vec::new()),
            body: Some("# PRD body".to_owned()),
        };
        let api = AgentContextApi::new(&ctx, &cache, &usage, &loader);

        assert_eq!(api.prd().as_deref(), Some("# PRD body"));
        assert_eq!(api.prd().as_deref(), Some("# PRD body"));
        // Loader ran exactly once; the second access was a cache hit.
        assert_eq!(loader.calls.lock().unwrap().len(), 1);

        let history = usage.history(Some("prd"), None, 10).unwrap();
        assert_eq!(history.len(), 2);
        // Newest first: hit then miss.
        assert!(history[0].cache_hit);
        assert!(!history[1].cache_hit);
        assert_eq!(history[0].content_hash, content_hash("# PRD body"));
    }

    #[test]
    fn missing_document_records_nothing() {
        let (cache, usage) = services();
        let ctx = ctx();
        let loader = CountingLoader {
            calls: Mutex::new(Vec::new()),
            body: None,
        };
        let api = AgentContextApi::new(&ctx, &cache, &usage, &loader);

        assert!(api.architecture().is_none());
        assert!(usage.history(None, None, 10).unwrap().is_empty());
        assert!(!cache.has_key(&api.cache_key("architecture")));
    }

    #[test]
    fn story_definition_none_without_story() {
        let (cache, usage) = services();
        let epic_level = WorkflowContext::new(3, None, "auth", "plan").unwrap();
        let loader = CountingLoader {
            calls: Mutex::new(Vec::new()),
            body: Some("# Story".to_owned()),
        };
        let api = AgentContextApi::new(&epic_level, &cache, &usage, &loader);

        assert!(api.story_definition().is_none());
        assert!(loader.calls.lock().unwrap().is_empty(), "loader not invoked");
    }

    #[test]
    fn custom_keys_live_on_the_api() {
        let (cache, usage) = services();
        let ctx = ctx();
        let loader = CountingLoader {
            calls: Mutex::new(Vec::new()),
            body: None,
        };
        let mut api = AgentContextApi::new(&ctx, &cache, &usage, &loader);

        assert!(api.custom("project").is_none());
        api.set_custom("project", serde_json::json!("keel"));
        assert_eq!(api.custom("project"), Some(&serde_json::json!("keel")));
    }

    #[test]
    fn request_scope_set_get_clear() {
        let mut scope = RequestScope::new();
        assert!(scope.current().is_none());

        let ctx = ctx();
        let id = ctx.workflow_id;
        scope.set_current(ctx);
        assert_eq!(scope.current().map(|c| c.workflow_id), Some(id));

        scope.clear_current();
        assert!(scope.current().is_none());
    }

    #[test]
    fn fs_loader_falls_back_to_global_docs() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/PRD.md"), "# Global PRD\n").unwrap();

        let loader = FsDocumentLoader::new(tmp.path(), PathTemplates::default());
        let body = loader.load("prd", &ctx());
        assert_eq!(body.as_deref(), Some("# Global PRD\n"));
    }

    #[test]
    fn fs_loader_prefers_feature_docs() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs/features/auth")).unwrap();
        std::fs::write(tmp.path().join("docs/PRD.md"), "global").unwrap();
        std::fs::write(tmp.path().join("docs/features/auth/PRD.md"), "feature").unwrap();

        let loader = FsDocumentLoader::new(tmp.path(), PathTemplates::default());
        assert_eq!(loader.load("prd", &ctx()).as_deref(), Some("feature"));
    }

    #[test]
    fn fs_loader_finds_story_in_epic_folder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let stories = tmp.path().join("docs/features/auth/epics/3-login/stories");
        std::fs::create_dir_all(&stories).unwrap();
        std::fs::write(stories.join("story-3.1.md"), "# Story 3.1\n").unwrap();

        let loader = FsDocumentLoader::new(tmp.path(), PathTemplates::default());
        assert_eq!(
            loader.load("story_definition", &ctx()).as_deref(),
            Some("# Story 3.1\n")
        );
    }
}
