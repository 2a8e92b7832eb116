//! Workflow context subsystem: the immutable per-run context, its
//! versioned persistence, the document cache, the usage and lineage
//! trackers, and the agent-facing API that ties them together.

pub mod api;
pub mod cache;
pub mod lineage;
pub mod persistence;
pub mod usage;
pub mod workflow;

pub use api::{
    AgentContextApi, DocumentLoader, EngineContext, FsDocumentLoader, RequestScope, content_hash,
};
pub use cache::{CacheStatistics, ContextCache};
pub use lineage::{
    ArtifactType, LineageRecord, LineageTracker, NewLineageRecord, ReportFormat, StaleUsage,
};
pub use persistence::{ContextFilters, ContextPersistence, ContextVersion};
pub use usage::{ContextUsageTracker, UsageEvent, UsageRecord, VersionUsage};
pub use workflow::{PhaseTransition, WorkflowContext, WorkflowStatus};
