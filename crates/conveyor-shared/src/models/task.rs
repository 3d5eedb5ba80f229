//! # Task Record
//!
//! One unit of work within a stage. Status transitions are a strict chain
//! per delivery attempt: `queued → processing → {completed, failed}`. The
//! one sanctioned exception is the retry reset (`processing → queued` with
//! an incremented attempt counter), which is a CAS-guarded policy operation
//! owned by the kernel, never an ad-hoc update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StructuredError;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Validity of a forward transition within one delivery attempt
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Semantic id: `{job_id[..8]}-s{stage}-{index}`
    pub task_id: String,
    pub parent_job_id: String,
    pub job_type: String,
    pub task_type: String,
    pub stage: u32,
    /// Position within the stage's fan-out, 0-indexed
    pub task_index: u32,
    pub parameters: Value,
    pub status: TaskStatus,
    pub result_data: Option<Value>,
    pub error_details: Option<StructuredError>,
    /// Completed delivery attempts that failed; compared against the
    /// policy's max before requeueing
    pub retry_count: u32,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Build a queued task as produced by stage fan-out
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        parent_job_id: String,
        job_type: String,
        task_type: String,
        stage: u32,
        task_index: u32,
        parameters: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            parent_job_id,
            job_type,
            task_type,
            stage,
            task_index,
            parameters,
            status: TaskStatus::Queued,
            result_data: None,
            error_details: None,
            retry_count: 0,
            dispatched_at: Some(now),
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_transitions() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Processing));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Processing.can_transition_to(TaskStatus::Queued));
    }

    #[test]
    fn test_new_task_is_queued_with_dispatch_timestamp() {
        let task = TaskRecord::new(
            "01234567-s1-0".into(),
            "a".repeat(64),
            "greeting".into(),
            "greet".into(),
            1,
            0,
            json!({"who": "world"}),
        );
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.retry_count, 0);
        assert!(task.dispatched_at.is_some());
        assert!(task.started_at.is_none());
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
        let s: TaskStatus = serde_json::from_str("\"completed\"").unwrap();
        assert!(s.is_terminal());
    }
}
