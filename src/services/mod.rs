//! Per-entity CRUD services over the state store.
//!
//! Every service is a thin handle over the shared [`StateStore`]. Each
//! public method delegates to a connection-level `*_in` function so the
//! [`StateCoordinator`](crate::coordinator::StateCoordinator) can compose
//! several of them inside a single transaction.
//!
//! Contracts shared by all services: `create` enforces unique keys and
//! validates parameter ranges before touching SQL; `get` returns `None` for
//! a missing key; listings are ordered by natural key or recency.

pub mod action_item;
pub mod ceremony;
pub mod epic;
pub mod feature;
pub mod learning;
pub mod story;

pub use action_item::{ActionItemService, NewActionItem};
pub use ceremony::{CeremonyService, NewCeremony};
pub use epic::{EpicService, NewEpic, ProgressUpdate};
pub use feature::{FeatureAuditRecord, FeatureService, NewFeature};
pub use learning::{LearningService, NewLearning};
pub use story::{NewStory, StoryService};
