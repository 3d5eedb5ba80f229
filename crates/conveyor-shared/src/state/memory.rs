//! # In-Memory State Store
//!
//! The whole catalog lives behind one mutex, which makes every operation —
//! including the fan-in primitive — trivially atomic. That single lock is
//! the in-memory analogue of the per-`(job, stage)` advisory lock the
//! Postgres provider takes: coarser, but with identical observable
//! semantics for the kernel.
//!
//! Used by the test suites and single-process demo runs.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::types::{
    CreateJobOutcome, StageCheck, StageProgress, TaskFilter, TaskOutcome, TaskStartOutcome,
};
use super::{StateResult, StateStore, StateStoreError};
use crate::errors::StructuredError;
use crate::models::{JobRecord, JobStatus, TaskRecord, TaskStatus};

#[derive(Debug, Default)]
struct Catalog {
    jobs: HashMap<String, JobRecord>,
    tasks: HashMap<String, TaskRecord>,
}

/// Process-local catalog
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    catalog: Mutex<Catalog>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_job(&self, job: &JobRecord) -> StateResult<CreateJobOutcome> {
        let mut catalog = self.lock();
        if catalog.jobs.contains_key(&job.job_id) {
            return Ok(CreateJobOutcome::AlreadyExists);
        }
        catalog.jobs.insert(job.job_id.clone(), job.clone());
        Ok(CreateJobOutcome::Created)
    }

    async fn get_job(&self, job_id: &str) -> StateResult<JobRecord> {
        self.lock()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| StateStoreError::not_found("job", job_id))
    }

    async fn mark_job_processing(&self, job_id: &str) -> StateResult<()> {
        let mut catalog = self.lock();
        let job = catalog
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StateStoreError::not_found("job", job_id))?;
        match job.status {
            JobStatus::Queued => {
                job.status = JobStatus::Processing;
                job.updated_at = Utc::now();
                Ok(())
            }
            JobStatus::Processing => Ok(()),
            terminal => Err(StateStoreError::conflict(
                "mark_job_processing",
                format!("job is {terminal}"),
            )),
        }
    }

    async fn advance_job_stage(
        &self,
        job_id: &str,
        from_stage: u32,
        to_stage: u32,
        results: Vec<Value>,
    ) -> StateResult<()> {
        if to_stage != from_stage + 1 {
            return Err(StateStoreError::conflict(
                "advance_job_stage",
                format!("stage must advance by exactly 1 ({from_stage} -> {to_stage})"),
            ));
        }
        let mut catalog = self.lock();
        let job = catalog
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StateStoreError::not_found("job", job_id))?;
        if job.status != JobStatus::Processing || job.stage != from_stage {
            return Err(StateStoreError::conflict(
                "advance_job_stage",
                format!(
                    "expected processing at stage {from_stage}, found {} at stage {}",
                    job.status, job.stage
                ),
            ));
        }
        job.stage = to_stage;
        job.stage_results.insert_stage(from_stage, results);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: &str,
        final_stage: u32,
        final_results: Vec<Value>,
        result_data: Value,
    ) -> StateResult<()> {
        let mut catalog = self.lock();
        let job = catalog
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StateStoreError::not_found("job", job_id))?;
        if job.status != JobStatus::Processing
            || job.stage != final_stage
            || job.total_stages != final_stage
        {
            return Err(StateStoreError::conflict(
                "complete_job",
                format!(
                    "expected processing at final stage {final_stage}, found {} at stage {}/{}",
                    job.status, job.stage, job.total_stages
                ),
            ));
        }
        job.status = JobStatus::Completed;
        job.stage_results.insert_stage(final_stage, final_results);
        job.result_data = Some(result_data);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, error: StructuredError) -> StateResult<()> {
        let mut catalog = self.lock();
        let job = catalog
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StateStoreError::not_found("job", job_id))?;
        if job.status.is_terminal() {
            return Err(StateStoreError::conflict(
                "fail_job",
                format!("job is already {}", job.status),
            ));
        }
        job.status = JobStatus::Failed;
        job.error = Some(error);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn create_tasks(&self, tasks: &[TaskRecord]) -> StateResult<()> {
        let mut catalog = self.lock();
        // Single lock hold: the batch appears all at once or not at all
        for task in tasks {
            catalog
                .tasks
                .entry(task.task_id.clone())
                .or_insert_with(|| task.clone());
        }
        Ok(())
    }

    async fn start_task(
        &self,
        task_id: &str,
        expected_retry_count: u32,
    ) -> StateResult<TaskStartOutcome> {
        let mut catalog = self.lock();
        let task = catalog
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StateStoreError::not_found("task", task_id))?;
        match task.status {
            TaskStatus::Queued if task.retry_count == expected_retry_count => {
                let now = Utc::now();
                task.status = TaskStatus::Processing;
                task.started_at = Some(now);
                task.last_heartbeat = Some(now);
                task.updated_at = now;
                Ok(TaskStartOutcome::Started)
            }
            TaskStatus::Queued => Ok(TaskStartOutcome::StaleAttempt {
                retry_count: task.retry_count,
            }),
            TaskStatus::Processing => Ok(TaskStartOutcome::AlreadyProcessing {
                retry_count: task.retry_count,
            }),
            terminal => Ok(TaskStartOutcome::AlreadyTerminal { status: terminal }),
        }
    }

    async fn requeue_task_for_retry(
        &self,
        task_id: &str,
        expected_retry_count: u32,
    ) -> StateResult<bool> {
        let mut catalog = self.lock();
        let task = catalog
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StateStoreError::not_found("task", task_id))?;
        if task.status != TaskStatus::Processing || task.retry_count != expected_retry_count {
            return Ok(false);
        }
        task.status = TaskStatus::Queued;
        task.retry_count += 1;
        task.last_heartbeat = None;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_heartbeat(&self, task_id: &str) -> StateResult<()> {
        let mut catalog = self.lock();
        let task = catalog
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StateStoreError::not_found("task", task_id))?;
        task.last_heartbeat = Some(Utc::now());
        Ok(())
    }

    async fn complete_task_and_check_stage(
        &self,
        task_id: &str,
        job_id: &str,
        stage: u32,
        outcome: &TaskOutcome,
    ) -> StateResult<StageCheck> {
        // The single catalog lock covers both the terminal CAS and the
        // count, which is exactly the atomicity the advisory lock buys the
        // Postgres provider.
        let mut catalog = self.lock();

        let task = catalog
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StateStoreError::not_found("task", task_id))?;

        let task_updated = if task.status == TaskStatus::Processing {
            let now = Utc::now();
            match outcome {
                TaskOutcome::Completed(result) => {
                    task.status = TaskStatus::Completed;
                    task.result_data = Some(result.clone());
                }
                TaskOutcome::Failed(error) => {
                    task.status = TaskStatus::Failed;
                    task.error_details = Some(error.clone());
                }
            }
            task.completed_at = Some(now);
            task.updated_at = now;
            true
        } else {
            false
        };

        let remaining = catalog
            .tasks
            .values()
            .filter(|t| t.parent_job_id == job_id && t.stage == stage && !t.is_terminal())
            .count() as u64;

        let total_stages = catalog
            .jobs
            .get(job_id)
            .map(|j| j.total_stages)
            .ok_or_else(|| StateStoreError::not_found("job", job_id))?;

        let stage_complete = remaining == 0;
        Ok(StageCheck {
            task_updated,
            stage_complete,
            remaining_in_stage: remaining,
            job_complete_hint: stage_complete && stage == total_stages,
        })
    }

    async fn get_stage_results(&self, job_id: &str, stage: u32) -> StateResult<Vec<Value>> {
        let catalog = self.lock();
        let mut completed: Vec<&TaskRecord> = catalog
            .tasks
            .values()
            .filter(|t| {
                t.parent_job_id == job_id && t.stage == stage && t.status == TaskStatus::Completed
            })
            .collect();
        completed.sort_by_key(|t| t.task_index);
        Ok(completed
            .into_iter()
            .map(|t| t.result_data.clone().unwrap_or(Value::Null))
            .collect())
    }

    async fn get_tasks(&self, job_id: &str, filter: &TaskFilter) -> StateResult<Vec<TaskRecord>> {
        let catalog = self.lock();
        let mut tasks: Vec<TaskRecord> = catalog
            .tasks
            .values()
            .filter(|t| t.parent_job_id == job_id)
            .filter(|t| filter.stage.is_none_or(|s| t.stage == s))
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| (a.stage, a.task_index).cmp(&(b.stage, b.task_index)));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn get_stage_progress(&self, job_id: &str) -> StateResult<Vec<StageProgress>> {
        let catalog = self.lock();
        let mut by_stage: HashMap<u32, StageProgress> = HashMap::new();
        for task in catalog.tasks.values().filter(|t| t.parent_job_id == job_id) {
            let entry = by_stage.entry(task.stage).or_insert(StageProgress {
                stage: task.stage,
                total: 0,
                completed: 0,
                failed: 0,
                remaining: 0,
            });
            entry.total += 1;
            match task.status {
                TaskStatus::Completed => entry.completed += 1,
                TaskStatus::Failed => entry.failed += 1,
                _ => entry.remaining += 1,
            }
        }
        let mut progress: Vec<StageProgress> = by_stage.into_values().collect();
        progress.sort_by_key(|p| p.stage);
        Ok(progress)
    }

    async fn stale_task_scan(&self, threshold: Duration) -> StateResult<Vec<TaskRecord>> {
        let catalog = self.lock();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| StateStoreError::Permanent(format!("bad threshold: {e}")))?;
        Ok(catalog
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Processing)
            .filter(|t| {
                t.last_heartbeat
                    .or(t.started_at)
                    .map(|hb| hb < cutoff)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StateResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use serde_json::json;
    use std::sync::Arc;

    fn job(job_id: &str, total_stages: u32) -> JobRecord {
        JobRecord::new(
            job_id.to_string(),
            "greeting".into(),
            serde_json::Map::new(),
            total_stages,
        )
    }

    fn task(job_id: &str, stage: u32, index: u32) -> TaskRecord {
        TaskRecord::new(
            crate::identity::task_id(job_id, stage, index),
            job_id.to_string(),
            "greeting".into(),
            "greet".into(),
            stage,
            index,
            json!({"i": index}),
        )
    }

    /// Insert a job (processing) with `k` started tasks at `stage`
    async fn seed_stage(store: &InMemoryStateStore, job_id: &str, stage: u32, k: u32) {
        store.create_job(&job(job_id, 2)).await.unwrap();
        store.mark_job_processing(job_id).await.unwrap();
        let tasks: Vec<TaskRecord> = (0..k).map(|i| task(job_id, stage, i)).collect();
        store.create_tasks(&tasks).await.unwrap();
        for t in &tasks {
            assert_eq!(
                store.start_task(&t.task_id, 0).await.unwrap(),
                TaskStartOutcome::Started
            );
        }
    }

    fn jid() -> String {
        "f".repeat(64)
    }

    #[tokio::test]
    async fn test_create_job_is_idempotent() {
        let store = InMemoryStateStore::new();
        let record = job(&jid(), 2);
        assert_eq!(store.create_job(&record).await.unwrap(), CreateJobOutcome::Created);
        assert_eq!(
            store.create_job(&record).await.unwrap(),
            CreateJobOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_mark_processing_transitions_and_is_idempotent() {
        let store = InMemoryStateStore::new();
        store.create_job(&job(&jid(), 2)).await.unwrap();
        store.mark_job_processing(&jid()).await.unwrap();
        store.mark_job_processing(&jid()).await.unwrap();
        assert_eq!(store.get_job(&jid()).await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_terminal_job_rejects_processing() {
        let store = InMemoryStateStore::new();
        store.create_job(&job(&jid(), 2)).await.unwrap();
        store
            .fail_job(&jid(), StructuredError::new(FailureKind::DefinitionError, "x"))
            .await
            .unwrap();
        let err = store.mark_job_processing(&jid()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_advance_requires_exact_from_stage() {
        let store = InMemoryStateStore::new();
        store.create_job(&job(&jid(), 3)).await.unwrap();
        store.mark_job_processing(&jid()).await.unwrap();

        store
            .advance_job_stage(&jid(), 1, 2, vec![json!("r1")])
            .await
            .unwrap();

        // Second advancement from stage 1 loses the CAS
        let err = store
            .advance_job_stage(&jid(), 1, 2, vec![json!("dup")])
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let record = store.get_job(&jid()).await.unwrap();
        assert_eq!(record.stage, 2);
        assert_eq!(record.stage_results.stage(1).unwrap(), &[json!("r1")]);
    }

    #[tokio::test]
    async fn test_advance_rejects_stage_skips() {
        let store = InMemoryStateStore::new();
        store.create_job(&job(&jid(), 5)).await.unwrap();
        store.mark_job_processing(&jid()).await.unwrap();
        let err = store
            .advance_job_stage(&jid(), 1, 3, vec![])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_complete_job_writes_final_results_atomically() {
        let store = InMemoryStateStore::new();
        store.create_job(&job(&jid(), 1)).await.unwrap();
        store.mark_job_processing(&jid()).await.unwrap();
        store
            .complete_job(&jid(), 1, vec![json!("done")], json!({"tasks_completed": 1}))
            .await
            .unwrap();

        let record = store.get_job(&jid()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.stage_results.stage(1).unwrap(), &[json!("done")]);
        assert_eq!(record.result_data.unwrap()["tasks_completed"], 1);

        // Terminal is absorbing
        let err = store
            .fail_job(&jid(), StructuredError::new(FailureKind::HandlerFailure, "late"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_tasks_ignores_duplicates() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 1, 2).await;

        // Replayed fan-out: same ids, already-started rows keep their state
        let replay: Vec<TaskRecord> = (0..2).map(|i| task(&jid(), 1, i)).collect();
        store.create_tasks(&replay).await.unwrap();

        let tasks = store.get_tasks(&jid(), &TaskFilter::all()).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Processing));
    }

    #[tokio::test]
    async fn test_start_task_outcomes() {
        let store = InMemoryStateStore::new();
        store.create_job(&job(&jid(), 2)).await.unwrap();
        let t = task(&jid(), 1, 0);
        store.create_tasks(std::slice::from_ref(&t)).await.unwrap();

        assert_eq!(
            store.start_task(&t.task_id, 0).await.unwrap(),
            TaskStartOutcome::Started
        );
        assert_eq!(
            store.start_task(&t.task_id, 0).await.unwrap(),
            TaskStartOutcome::AlreadyProcessing { retry_count: 0 }
        );

        // Requeue for retry, then the superseded delivery is stale
        assert!(store.requeue_task_for_retry(&t.task_id, 0).await.unwrap());
        assert_eq!(
            store.start_task(&t.task_id, 0).await.unwrap(),
            TaskStartOutcome::StaleAttempt { retry_count: 1 }
        );
        // The retry delivery owns the new attempt
        assert_eq!(
            store.start_task(&t.task_id, 1).await.unwrap(),
            TaskStartOutcome::Started
        );
    }

    #[tokio::test]
    async fn test_requeue_for_retry_needs_matching_attempt() {
        let store = InMemoryStateStore::new();
        store.create_job(&job(&jid(), 2)).await.unwrap();
        let t = task(&jid(), 1, 0);
        store.create_tasks(std::slice::from_ref(&t)).await.unwrap();
        store.start_task(&t.task_id, 0).await.unwrap();

        assert!(!store.requeue_task_for_retry(&t.task_id, 7).await.unwrap());
        assert!(store.requeue_task_for_retry(&t.task_id, 0).await.unwrap());
        // Now queued: a second requeue is a no-op
        assert!(!store.requeue_task_for_retry(&t.task_id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_completion_counts_down_and_fires_once() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 1, 3).await;

        let check = store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 0),
                &jid(),
                1,
                &TaskOutcome::Completed(json!("a")),
            )
            .await
            .unwrap();
        assert!(check.task_updated);
        assert!(!check.stage_complete);
        assert_eq!(check.remaining_in_stage, 2);

        store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 1),
                &jid(),
                1,
                &TaskOutcome::Completed(json!("b")),
            )
            .await
            .unwrap();

        let last = store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 2),
                &jid(),
                1,
                &TaskOutcome::Completed(json!("c")),
            )
            .await
            .unwrap();
        assert!(last.stage_complete);
        assert_eq!(last.remaining_in_stage, 0);
        // Stage 1 of 2: not the job's final stage
        assert!(!last.job_complete_hint);
    }

    #[tokio::test]
    async fn test_duplicate_completion_does_not_double_fire() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 1, 1).await;
        let tid = crate::identity::task_id(&jid(), 1, 0);

        let first = store
            .complete_task_and_check_stage(&tid, &jid(), 1, &TaskOutcome::Completed(json!("x")))
            .await
            .unwrap();
        assert!(first.task_updated);
        assert!(first.stage_complete);

        // Replay: not updated, but the count is still truthful (healing)
        let replay = store
            .complete_task_and_check_stage(&tid, &jid(), 1, &TaskOutcome::Completed(json!("x")))
            .await
            .unwrap();
        assert!(!replay.task_updated);
        assert!(replay.stage_complete);
    }

    #[tokio::test]
    async fn test_job_complete_hint_on_final_stage() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 2, 1).await;
        let check = store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 2, 0),
                &jid(),
                2,
                &TaskOutcome::Completed(json!("z")),
            )
            .await
            .unwrap();
        assert!(check.stage_complete);
        assert!(check.job_complete_hint);
    }

    /// Spec-critical: with K workers racing to complete K tasks, exactly
    /// one observes `stage_complete`.
    #[tokio::test]
    async fn test_fan_in_exclusivity_under_concurrency() {
        const K: u32 = 10;
        let store = Arc::new(InMemoryStateStore::new());
        seed_stage(&store, &jid(), 1, K).await;

        let mut handles = Vec::new();
        for i in 0..K {
            let store = store.clone();
            let job_id = jid();
            handles.push(tokio::spawn(async move {
                store
                    .complete_task_and_check_stage(
                        &crate::identity::task_id(&job_id, 1, i),
                        &job_id,
                        1,
                        &TaskOutcome::Completed(json!(i)),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut completions = 0;
        for handle in handles {
            let check = handle.await.unwrap();
            if check.stage_complete {
                completions += 1;
            }
        }
        assert_eq!(completions, 1, "exactly one caller may observe stage completion");
    }

    #[tokio::test]
    async fn test_failed_task_counts_as_terminal() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 1, 2).await;

        store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 0),
                &jid(),
                1,
                &TaskOutcome::Failed(StructuredError::new(FailureKind::HandlerFailure, "boom")),
            )
            .await
            .unwrap();

        let check = store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 1),
                &jid(),
                1,
                &TaskOutcome::Completed(json!("ok")),
            )
            .await
            .unwrap();
        assert!(check.stage_complete);

        // Failed task is excluded from stage results
        let results = store.get_stage_results(&jid(), 1).await.unwrap();
        assert_eq!(results, vec![json!("ok")]);
    }

    #[tokio::test]
    async fn test_stage_results_ordered_by_task_index() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 1, 3).await;

        // Complete out of order
        for i in [2u32, 0, 1] {
            store
                .complete_task_and_check_stage(
                    &crate::identity::task_id(&jid(), 1, i),
                    &jid(),
                    1,
                    &TaskOutcome::Completed(json!(i)),
                )
                .await
                .unwrap();
        }
        let results = store.get_stage_results(&jid(), 1).await.unwrap();
        assert_eq!(results, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_get_tasks_filters() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 1, 3).await;
        store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 0),
                &jid(),
                1,
                &TaskOutcome::Completed(json!(0)),
            )
            .await
            .unwrap();

        let completed = store
            .get_tasks(&jid(), &TaskFilter::for_stage(1).with_status(TaskStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);

        let limited = store
            .get_tasks(&jid(), &TaskFilter::all().with_limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_stage_progress_counts() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 1, 3).await;
        store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 0),
                &jid(),
                1,
                &TaskOutcome::Completed(json!(0)),
            )
            .await
            .unwrap();
        store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 1),
                &jid(),
                1,
                &TaskOutcome::Failed(StructuredError::new(FailureKind::HandlerTimeout, "slow")),
            )
            .await
            .unwrap();

        let progress = store.get_stage_progress(&jid()).await.unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].total, 3);
        assert_eq!(progress[0].completed, 1);
        assert_eq!(progress[0].failed, 1);
        assert_eq!(progress[0].remaining, 1);
    }

    #[tokio::test]
    async fn test_stale_task_scan_threshold() {
        let store = InMemoryStateStore::new();
        seed_stage(&store, &jid(), 1, 2).await;

        // Nothing is stale under a generous threshold
        let stale = store.stale_task_scan(Duration::from_secs(3600)).await.unwrap();
        assert!(stale.is_empty());

        // Everything processing is stale under a zero threshold
        let stale = store.stale_task_scan(Duration::ZERO).await.unwrap();
        assert_eq!(stale.len(), 2);

        // Terminal tasks never show up
        store
            .complete_task_and_check_stage(
                &crate::identity::task_id(&jid(), 1, 0),
                &jid(),
                1,
                &TaskOutcome::Completed(json!(0)),
            )
            .await
            .unwrap();
        let stale = store.stale_task_scan(Duration::ZERO).await.unwrap();
        assert_eq!(stale.len(), 1);
    }
}
