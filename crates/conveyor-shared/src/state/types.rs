//! Typed outcomes of state-store operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StructuredError;
use crate::models::TaskStatus;

/// Result of an idempotent job insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateJobOutcome {
    Created,
    AlreadyExists,
}

/// Terminal outcome handed to the fan-in primitive
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Value),
    Failed(StructuredError),
}

impl TaskOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn terminal_status(&self) -> TaskStatus {
        match self {
            Self::Completed(_) => TaskStatus::Completed,
            Self::Failed(_) => TaskStatus::Failed,
        }
    }
}

/// What the fan-in primitive observed.
///
/// Exactly one caller per `(job, stage)` sees `stage_complete = true`; a
/// duplicate replay of an already-terminal task reports
/// `task_updated = false` but still gets a truthful count, which lets a
/// crashed advancement heal on redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCheck {
    pub task_updated: bool,
    pub stage_complete: bool,
    pub remaining_in_stage: u64,
    /// `stage_complete` on the job's final stage
    pub job_complete_hint: bool,
}

/// Result of the `queued → processing` CAS on a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStartOutcome {
    /// This delivery owns the attempt
    Started,
    /// Another delivery is executing this attempt (or the same delivery,
    /// redelivered after a crash — the janitor owns that recovery)
    AlreadyProcessing { retry_count: u32 },
    /// A retry was requeued after this message was sent; this delivery is
    /// a stale duplicate of a superseded attempt
    StaleAttempt { retry_count: u32 },
    AlreadyTerminal { status: TaskStatus },
}

/// Filters for the task read API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub stage: Option<u32>,
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_stage(stage: u32) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Per-stage task counts for the progress API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: u32,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub remaining: u64,
}
