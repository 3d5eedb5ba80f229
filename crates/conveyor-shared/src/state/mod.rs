//! # State Store Port
//!
//! Abstract operations over the durable job/task catalog. All mutating
//! operations are compare-and-set shaped, and the fan-in primitive
//! ([`StateStore::complete_task_and_check_stage`]) is atomic end-to-end:
//! the task's terminal CAS and the "am I the last in this stage?" count are
//! serialized per `(job_id, stage)` by an advisory lock.
//!
//! Providers:
//!
//! - [`PostgresStateStore`] — production; the fan-in primitive runs as a
//!   SQL function that takes `pg_advisory_xact_lock` inside one
//!   transaction. A single advisory key per `(job, stage)` is O(1) and
//!   scoped exactly to the contention point, where row locks over the task
//!   set would be O(n) and deadlock-prone under high fan-out.
//! - [`InMemoryStateStore`] — tests and demo runs; one mutex over the
//!   catalog plays the role of the advisory lock.

mod error;
mod memory;
mod postgres;
mod types;

pub use error::StateStoreError;
pub use memory::InMemoryStateStore;
pub use postgres::PostgresStateStore;
pub use types::{
    CreateJobOutcome, StageCheck, StageProgress, TaskFilter, TaskOutcome, TaskStartOutcome,
};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::errors::StructuredError;
use crate::models::{JobRecord, TaskRecord};

/// Result alias for state-store operations
pub type StateResult<T> = Result<T, StateStoreError>;

/// The durable catalog contract.
///
/// Every operation is safe under concurrent callers; CAS failures surface
/// as [`StateStoreError::Conflict`] (or a typed outcome where the caller
/// needs to branch on them).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert a job row. Idempotent on `job_id`: a second insert with the
    /// same id is a no-op reporting [`CreateJobOutcome::AlreadyExists`].
    async fn create_job(&self, job: &JobRecord) -> StateResult<CreateJobOutcome>;

    /// Snapshot read; `NotFound` if the id is unknown
    async fn get_job(&self, job_id: &str) -> StateResult<JobRecord>;

    /// CAS `queued → processing`. Already-`processing` is reported as a
    /// plain success (duplicate job messages are routine); terminal
    /// statuses are a `Conflict`.
    async fn mark_job_processing(&self, job_id: &str) -> StateResult<()>;

    /// CAS stage advancement: succeeds only while the job is `processing`
    /// at exactly `from_stage`, and atomically appends `results` under the
    /// `from_stage` key of `stage_results`. `to_stage` must be
    /// `from_stage + 1`.
    async fn advance_job_stage(
        &self,
        job_id: &str,
        from_stage: u32,
        to_stage: u32,
        results: Vec<Value>,
    ) -> StateResult<()>;

    /// CAS `processing → completed` on the final stage, atomically
    /// appending the final stage's results and the aggregated result
    async fn complete_job(
        &self,
        job_id: &str,
        final_stage: u32,
        final_results: Vec<Value>,
        result_data: Value,
    ) -> StateResult<()>;

    /// CAS any non-terminal status → `failed`
    async fn fail_job(&self, job_id: &str, error: StructuredError) -> StateResult<()>;

    /// All-or-nothing batch insert; rows whose `task_id` already exists
    /// are silently skipped (fan-out replays are routine)
    async fn create_tasks(&self, tasks: &[TaskRecord]) -> StateResult<()>;

    /// CAS `queued → processing`, gated on the attempt counter so stale
    /// deliveries of superseded attempts cannot start the task
    async fn start_task(
        &self,
        task_id: &str,
        expected_retry_count: u32,
    ) -> StateResult<TaskStartOutcome>;

    /// CAS retry reset: `processing → queued` with `retry_count += 1`.
    /// Returns whether the transition happened.
    async fn requeue_task_for_retry(
        &self,
        task_id: &str,
        expected_retry_count: u32,
    ) -> StateResult<bool>;

    /// Refresh the task's liveness timestamp while a handler runs
    async fn record_heartbeat(&self, task_id: &str) -> StateResult<()>;

    /// The fan-in primitive (see module docs). Marks the task terminal
    /// (CAS from `processing`; an already-terminal task is a duplicate
    /// replay and reports `task_updated = false`), then — under the
    /// per-`(job, stage)` advisory lock — counts the stage's non-terminal
    /// tasks. Exactly one caller per stage observes `stage_complete`.
    async fn complete_task_and_check_stage(
        &self,
        task_id: &str,
        job_id: &str,
        stage: u32,
        outcome: &TaskOutcome,
    ) -> StateResult<StageCheck>;

    /// Ordered (by `task_index`) results of the stage's completed tasks
    async fn get_stage_results(&self, job_id: &str, stage: u32) -> StateResult<Vec<Value>>;

    /// Filtered read for monitoring and the read API
    async fn get_tasks(&self, job_id: &str, filter: &TaskFilter) -> StateResult<Vec<TaskRecord>>;

    /// Per-stage task counts for the progress API
    async fn get_stage_progress(&self, job_id: &str) -> StateResult<Vec<StageProgress>>;

    /// Tasks stuck in `processing` whose liveness timestamp is older than
    /// `threshold` — the janitor's feed
    async fn stale_task_scan(&self, threshold: Duration) -> StateResult<Vec<TaskRecord>>;

    async fn health_check(&self) -> StateResult<bool>;

    fn provider_name(&self) -> &'static str;
}

/// Concrete state-store backends, dispatched without trait objects
#[derive(Debug)]
pub enum StateStoreProvider {
    Postgres(PostgresStateStore),
    InMemory(InMemoryStateStore),
}

impl StateStoreProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryStateStore::new())
    }
}

macro_rules! dispatch {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Postgres(s) => s.$method($($arg),*).await,
            Self::InMemory(s) => s.$method($($arg),*).await,
        }
    };
}

#[async_trait]
impl StateStore for StateStoreProvider {
    async fn create_job(&self, job: &JobRecord) -> StateResult<CreateJobOutcome> {
        dispatch!(self, create_job, job)
    }

    async fn get_job(&self, job_id: &str) -> StateResult<JobRecord> {
        dispatch!(self, get_job, job_id)
    }

    async fn mark_job_processing(&self, job_id: &str) -> StateResult<()> {
        dispatch!(self, mark_job_processing, job_id)
    }

    async fn advance_job_stage(
        &self,
        job_id: &str,
        from_stage: u32,
        to_stage: u32,
        results: Vec<Value>,
    ) -> StateResult<()> {
        dispatch!(self, advance_job_stage, job_id, from_stage, to_stage, results)
    }

    async fn complete_job(
        &self,
        job_id: &str,
        final_stage: u32,
        final_results: Vec<Value>,
        result_data: Value,
    ) -> StateResult<()> {
        dispatch!(self, complete_job, job_id, final_stage, final_results, result_data)
    }

    async fn fail_job(&self, job_id: &str, error: StructuredError) -> StateResult<()> {
        dispatch!(self, fail_job, job_id, error)
    }

    async fn create_tasks(&self, tasks: &[TaskRecord]) -> StateResult<()> {
        dispatch!(self, create_tasks, tasks)
    }

    async fn start_task(
        &self,
        task_id: &str,
        expected_retry_count: u32,
    ) -> StateResult<TaskStartOutcome> {
        dispatch!(self, start_task, task_id, expected_retry_count)
    }

    async fn requeue_task_for_retry(
        &self,
        task_id: &str,
        expected_retry_count: u32,
    ) -> StateResult<bool> {
        dispatch!(self, requeue_task_for_retry, task_id, expected_retry_count)
    }

    async fn record_heartbeat(&self, task_id: &str) -> StateResult<()> {
        dispatch!(self, record_heartbeat, task_id)
    }

    async fn complete_task_and_check_stage(
        &self,
        task_id: &str,
        job_id: &str,
        stage: u32,
        outcome: &TaskOutcome,
    ) -> StateResult<StageCheck> {
        dispatch!(self, complete_task_and_check_stage, task_id, job_id, stage, outcome)
    }

    async fn get_stage_results(&self, job_id: &str, stage: u32) -> StateResult<Vec<Value>> {
        dispatch!(self, get_stage_results, job_id, stage)
    }

    async fn get_tasks(&self, job_id: &str, filter: &TaskFilter) -> StateResult<Vec<TaskRecord>> {
        dispatch!(self, get_tasks, job_id, filter)
    }

    async fn get_stage_progress(&self, job_id: &str) -> StateResult<Vec<StageProgress>> {
        dispatch!(self, get_stage_progress, job_id)
    }

    async fn stale_task_scan(&self, threshold: Duration) -> StateResult<Vec<TaskRecord>> {
        dispatch!(self, stale_task_scan, threshold)
    }

    async fn health_check(&self) -> StateResult<bool> {
        dispatch!(self, health_check)
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::Postgres(s) => s.provider_name(),
            Self::InMemory(s) => s.provider_name(),
        }
    }
}
