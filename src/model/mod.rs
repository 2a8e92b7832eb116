//! Entity types for the state engine.
//!
//! Every durable entity the engine tracks lives here as a typed struct with
//! its status enums. All rows round-trip through these types; raw SQL rows
//! never cross a module boundary.

pub mod action_item;
pub mod ceremony;
pub mod epic;
pub mod feature;
pub mod learning;
pub mod story;

pub use action_item::{ActionItem, ActionItemPriority, ActionItemStatus};
pub use ceremony::Ceremony;
pub use epic::{Epic, EpicStatus};
pub use feature::{Feature, FeatureScope, FeatureStatus};
pub use learning::{Learning, LearningCategory};
pub use story::{Priority, Story, StoryStatus};

use std::fmt;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// ParseEnumError
// ---------------------------------------------------------------------------

/// A string from the database or CLI did not name a known enum value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseEnumError {
    /// The raw value that failed to parse.
    pub value: String,
    /// The accepted values, for the error message.
    pub expected: &'static str,
}

impl ParseEnumError {
    pub(crate) fn new(value: &str, expected: &'static str) -> Self {
        Self {
            value: value.to_owned(),
            expected,
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}', expected one of: {}", self.value, self.expected)
    }
}

impl std::error::Error for ParseEnumError {}

impl From<ParseEnumError> for EngineError {
    fn from(err: ParseEnumError) -> Self {
        Self::DomainValidation {
            message: err.to_string(),
        }
    }
}
