//! Error types for the projection and query engine.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A single filter field that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A query request that was rejected before touching the store.
///
/// Carries every violated field, not only the first one found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid query: {}", .violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

/// Collects violations while a request is checked
#[derive(Debug, Default)]
pub(crate) struct Violations(Vec<FieldViolation>);

impl Violations {
    pub(crate) fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn into_result<T>(self, value: T) -> Result<T, ValidationError> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(ValidationError { violations: self.0 })
        }
    }
}

/// Failures of the event log accessor. Never downgraded to an empty result.
#[derive(Debug, Error)]
pub enum AccessorError {
    #[error("event log query timed out after {0:?}")]
    Timeout(Duration),

    #[error("event log query was cancelled")]
    Cancelled,

    #[error("event log database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("event log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The log holds an event whose name is not in the catalog
    #[error("event log holds unknown event name: {0}")]
    UnknownEventName(String),

    #[error("corrupt event log row: {0}")]
    Corrupt(String),

    #[error("event log unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the flow service
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An event name outside the catalog. This is a data-integrity fault.
    #[error("unknown event category: {0}")]
    UnknownCategory(String),

    #[error("event category '{event_name}' has no {expected}")]
    InvalidCategory {
        event_name: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Accessor(AccessorError),
}

impl From<AccessorError> for FlowError {
    fn from(err: AccessorError) -> Self {
        match err {
            AccessorError::UnknownEventName(name) => Self::UnknownCategory(name),
            other => Self::Accessor(other),
        }
    }
}

impl FlowError {
    /// Internal faults as opposed to caller mistakes
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::UnknownCategory(_) | Self::InvalidCategory { .. })
    }
}
