//! Queue name resolution.
//!
//! Two logical queues, resolved once at startup from configuration. Kept as
//! a struct (rather than bare strings threaded around) so every send and
//! receive goes through one naming authority.

/// Resolves logical queues to transport queue names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRouter {
    job_queue: String,
    task_queue: String,
}

impl QueueRouter {
    pub fn new(job_queue: impl Into<String>, task_queue: impl Into<String>) -> Self {
        Self {
            job_queue: job_queue.into(),
            task_queue: task_queue.into(),
        }
    }

    /// Stage-processing messages (one per job per stage)
    pub fn job_queue(&self) -> &str {
        &self.job_queue
    }

    /// Task-execution messages (one per task delivery)
    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    pub fn all_queues(&self) -> [&str; 2] {
        [&self.job_queue, &self.task_queue]
    }
}

impl Default for QueueRouter {
    fn default() -> Self {
        Self::new("conveyor_jobs_queue", "conveyor_tasks_queue")
    }
}
