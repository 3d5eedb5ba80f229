//! # Error Taxonomy
//!
//! Two layers of error handling live here:
//!
//! - [`ConveyorError`] — the crate-level error enum returned by fallible
//!   operations throughout the workspace.
//! - [`FailureKind`] + [`StructuredError`] — the *persisted* failure shape
//!   written into job and task records and surfaced through the read API.
//!   Kinds, not concrete types: they classify what happened and drive the
//!   retry policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messaging::MessagingError;
use crate::state::StateStoreError;

/// Result alias used across the workspace
pub type ConveyorResult<T> = Result<T, ConveyorError>;

/// Crate-level error enum
#[derive(Debug, Error)]
pub enum ConveyorError {
    #[error("state store error: {0}")]
    State(#[from] StateStoreError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Parameter validation failed at submission; terminal for the request,
    /// no job row is created.
    #[error("invalid parameter '{field}': {reason}")]
    InvalidParameters { field: String, reason: String },

    #[error("unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("unknown task type '{0}'")]
    UnknownTaskType(String),

    /// A job definition misbehaved (e.g. produced zero tasks for a stage
    /// that does not permit it, or violated its parallelism declaration).
    #[error("definition error: {0}")]
    Definition(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ConveyorError {
    pub fn invalid_parameters(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Map this error to the failure kind recorded on jobs/tasks
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::State(StateStoreError::Conflict { .. }) => FailureKind::ConflictState,
            Self::State(StateStoreError::Transient(_)) => FailureKind::TransientState,
            Self::State(_) => FailureKind::TransientState,
            Self::Messaging(_) => FailureKind::QueueTransient,
            Self::InvalidParameters { .. } => FailureKind::InvalidParameters,
            Self::UnknownJobType(_) => FailureKind::UnknownJobType,
            Self::UnknownTaskType(_) => FailureKind::UnknownTaskType,
            Self::Definition(_) => FailureKind::DefinitionError,
            Self::Configuration(_) => FailureKind::DefinitionError,
        }
    }
}

/// Classification of failures, persisted with job/task records.
///
/// The retry policy keys off this, not off concrete error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidParameters,
    UnknownJobType,
    UnknownTaskType,
    /// Handler returned `success = false` or panicked
    HandlerFailure,
    /// Handler exceeded its per-task-type timeout
    HandlerTimeout,
    /// State store transient error that exhausted inline retries
    TransientState,
    /// CAS precondition violated — benign, "someone else already did this"
    ConflictState,
    QueueTransient,
    /// Declared dead by the janitor after a heartbeat went stale
    StaleTimeout,
    /// Job definition produced an invalid fan-out
    DefinitionError,
}

impl FailureKind {
    /// Whether a task failure of this kind is eligible for bounded retry
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::HandlerFailure | Self::HandlerTimeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParameters => "invalid_parameters",
            Self::UnknownJobType => "unknown_job_type",
            Self::UnknownTaskType => "unknown_task_type",
            Self::HandlerFailure => "handler_failure",
            Self::HandlerTimeout => "handler_timeout",
            Self::TransientState => "transient_state",
            Self::ConflictState => "conflict_state",
            Self::QueueTransient => "queue_transient",
            Self::StaleTimeout => "stale_timeout",
            Self::DefinitionError => "definition_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure payload persisted on failed jobs and tasks.
///
/// `task_id` on a job-level error names the first task that caused the
/// stage (and therefore the job) to fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl StructuredError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            task_id: None,
            trace: None,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.task_id {
            Some(task_id) => write!(f, "[{}] {} (task {})", self.kind, self.message, task_id),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_serde_snake_case() {
        let json = serde_json::to_string(&FailureKind::HandlerTimeout).unwrap();
        assert_eq!(json, "\"handler_timeout\"");
        let parsed: FailureKind = serde_json::from_str("\"stale_timeout\"").unwrap();
        assert_eq!(parsed, FailureKind::StaleTimeout);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(FailureKind::HandlerFailure.is_retryable());
        assert!(FailureKind::HandlerTimeout.is_retryable());
        assert!(!FailureKind::StaleTimeout.is_retryable());
        assert!(!FailureKind::UnknownTaskType.is_retryable());
        assert!(!FailureKind::DefinitionError.is_retryable());
    }

    #[test]
    fn test_structured_error_roundtrip() {
        let err = StructuredError::new(FailureKind::HandlerFailure, "boom")
            .with_task_id("ab12cd34-s1-0")
            .with_trace("at handler");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "handler_failure");
        assert_eq!(value["task_id"], "ab12cd34-s1-0");
        let back: StructuredError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_structured_error_display_names_task() {
        let err = StructuredError::new(FailureKind::StaleTimeout, "heartbeat expired")
            .with_task_id("ab12cd34-s2-3");
        let shown = err.to_string();
        assert!(shown.contains("stale_timeout"));
        assert!(shown.contains("ab12cd34-s2-3"));
    }

    #[test]
    fn test_error_to_failure_kind() {
        let e = ConveyorError::UnknownJobType("nope".into());
        assert_eq!(e.failure_kind(), FailureKind::UnknownJobType);
        let e = ConveyorError::invalid_parameters("n", "must be an integer");
        assert_eq!(e.failure_kind(), FailureKind::InvalidParameters);
    }
}
