//! # Postgres State Store
//!
//! The production catalog provider. Every mutation is a single CAS-shaped
//! `UPDATE ... WHERE <precondition>`; the fan-in primitive delegates to the
//! `conveyor_complete_task_and_check_stage` SQL function, which holds a
//! transaction-scoped advisory lock around the terminal CAS and the
//! remaining-count (see the migration for the rationale).

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};
use std::time::Duration;

use super::types::{
    CreateJobOutcome, StageCheck, StageProgress, TaskFilter, TaskOutcome, TaskStartOutcome,
};
use super::{StateResult, StateStore, StateStoreError};
use crate::errors::StructuredError;
use crate::models::{JobRecord, JobStatus, StageResults, TaskRecord, TaskStatus};

/// sqlx-backed catalog over the `conveyor_jobs` / `conveyor_tasks` tables
#[derive(Debug, Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn job_from_row(row: &PgRow) -> StateResult<JobRecord> {
        let status_raw: String = get(row, "status")?;
        let status = JobStatus::parse(&status_raw)
            .ok_or_else(|| StateStoreError::Serialization(format!("bad job status '{status_raw}'")))?;

        let parameters: Value = get(row, "parameters")?;
        let parameters = parameters
            .as_object()
            .cloned()
            .ok_or_else(|| StateStoreError::Serialization("job parameters not an object".into()))?;

        let stage_results: Value = get(row, "stage_results")?;
        let stage_results: StageResults = serde_json::from_value(stage_results)
            .map_err(|e| StateStoreError::Serialization(format!("bad stage_results: {e}")))?;

        let error: Option<Value> = get(row, "error")?;
        let error = error
            .map(serde_json::from_value::<StructuredError>)
            .transpose()
            .map_err(|e| StateStoreError::Serialization(format!("bad job error payload: {e}")))?;

        Ok(JobRecord {
            job_id: get(row, "job_id")?,
            job_type: get(row, "job_type")?,
            parameters,
            status,
            stage: get::<i32>(row, "stage")? as u32,
            total_stages: get::<i32>(row, "total_stages")? as u32,
            stage_results,
            result_data: get(row, "result_data")?,
            error,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    fn task_from_row(row: &PgRow) -> StateResult<TaskRecord> {
        let status_raw: String = get(row, "status")?;
        let status = TaskStatus::parse(&status_raw).ok_or_else(|| {
            StateStoreError::Serialization(format!("bad task status '{status_raw}'"))
        })?;

        let error_details: Option<Value> = get(row, "error_details")?;
        let error_details = error_details
            .map(serde_json::from_value::<StructuredError>)
            .transpose()
            .map_err(|e| StateStoreError::Serialization(format!("bad task error payload: {e}")))?;

        Ok(TaskRecord {
            task_id: get(row, "task_id")?,
            parent_job_id: get(row, "parent_job_id")?,
            job_type: get(row, "job_type")?,
            task_type: get(row, "task_type")?,
            stage: get::<i32>(row, "stage")? as u32,
            task_index: get::<i32>(row, "task_index")? as u32,
            parameters: get(row, "parameters")?,
            status,
            result_data: get(row, "result_data")?,
            error_details,
            retry_count: get::<i32>(row, "retry_count")? as u32,
            dispatched_at: get(row, "dispatched_at")?,
            started_at: get(row, "started_at")?,
            completed_at: get(row, "completed_at")?,
            last_heartbeat: get(row, "last_heartbeat")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StateResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StateStoreError::Serialization(format!("column '{column}': {e}")))
}

fn encode_error(error: &StructuredError) -> StateResult<Value> {
    serde_json::to_value(error)
        .map_err(|e| StateStoreError::Serialization(format!("error payload: {e}")))
}

const TASK_COLUMNS: &str = "task_id, parent_job_id, job_type, task_type, stage, task_index, \
     parameters, status, result_data, error_details, retry_count, dispatched_at, started_at, \
     completed_at, last_heartbeat, created_at, updated_at";

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn create_job(&self, job: &JobRecord) -> StateResult<CreateJobOutcome> {
        let result = sqlx::query(
            "INSERT INTO conveyor_jobs \
               (job_id, job_type, parameters, status, stage, total_stages, stage_results, \
                created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (job_id) DO NOTHING",
        )
        .bind(&job.job_id)
        .bind(&job.job_type)
        .bind(Value::Object(job.parameters.clone()))
        .bind(job.status.as_str())
        .bind(job.stage as i32)
        .bind(job.total_stages as i32)
        .bind(
            serde_json::to_value(&job.stage_results)
                .map_err(|e| StateStoreError::Serialization(e.to_string()))?,
        )
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("create_job", e))?;

        if result.rows_affected() == 1 {
            Ok(CreateJobOutcome::Created)
        } else {
            Ok(CreateJobOutcome::AlreadyExists)
        }
    }

    async fn get_job(&self, job_id: &str) -> StateResult<JobRecord> {
        let row = sqlx::query("SELECT * FROM conveyor_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateStoreError::from_sqlx("get_job", e))?
            .ok_or_else(|| StateStoreError::not_found("job", job_id))?;
        Self::job_from_row(&row)
    }

    async fn mark_job_processing(&self, job_id: &str) -> StateResult<()> {
        let result = sqlx::query(
            "UPDATE conveyor_jobs SET status = 'processing', updated_at = now() \
             WHERE job_id = $1 AND status IN ('queued', 'processing')",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("mark_job_processing", e))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            // Distinguish missing from terminal for the caller's logs
            let job = self.get_job(job_id).await?;
            Err(StateStoreError::conflict(
                "mark_job_processing",
                format!("job is {}", job.status),
            ))
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
        let result = sqlx::query(
            "UPDATE conveyor_jobs \
               SET stage = $3, \
                   stage_results = stage_results || jsonb_build_object($4::text, $5::jsonb), \
                   updated_at = now() \
             WHERE job_id = $1 AND stage = $2 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(from_stage as i32)
        .bind(to_stage as i32)
        .bind(from_stage.to_string())
        .bind(Value::Array(results))
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("advance_job_stage", e))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StateStoreError::conflict(
                "advance_job_stage",
                format!("job {job_id} not processing at stage {from_stage}"),
            ))
        }
    }

    async fn complete_job(
        &self,
        job_id: &str,
        final_stage: u32,
        final_results: Vec<Value>,
        result_data: Value,
    ) -> StateResult<()> {
        let result = sqlx::query(
            "UPDATE conveyor_jobs \
               SET status = 'completed', \
                   stage_results = stage_results || jsonb_build_object($2::text, $3::jsonb), \
                   result_data = $4, \
                   updated_at = now() \
             WHERE job_id = $1 AND status = 'processing' \
               AND stage = $5 AND total_stages = $5",
        )
        .bind(job_id)
        .bind(final_stage.to_string())
        .bind(Value::Array(final_results))
        .bind(result_data)
        .bind(final_stage as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("complete_job", e))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StateStoreError::conflict(
                "complete_job",
                format!("job {job_id} not processing at final stage {final_stage}"),
            ))
        }
    }

    async fn fail_job(&self, job_id: &str, error: StructuredError) -> StateResult<()> {
        let payload = encode_error(&error)?;
        let result = sqlx::query(
            "UPDATE conveyor_jobs SET status = 'failed', error = $2, updated_at = now() \
             WHERE job_id = $1 AND status IN ('queued', 'processing')",
        )
        .bind(job_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("fail_job", e))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StateStoreError::conflict(
                "fail_job",
                format!("job {job_id} missing or already terminal"),
            ))
        }
    }

    async fn create_tasks(&self, tasks: &[TaskRecord]) -> StateResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StateStoreError::from_sqlx("create_tasks", e))?;

        for task in tasks {
            let error_details = task.error_details.as_ref().map(encode_error).transpose()?;
            sqlx::query(
                "INSERT INTO conveyor_tasks \
                   (task_id, parent_job_id, job_type, task_type, stage, task_index, parameters, \
                    status, result_data, error_details, retry_count, dispatched_at, created_at, \
                    updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                 ON CONFLICT (task_id) DO NOTHING",
            )
            .bind(&task.task_id)
            .bind(&task.parent_job_id)
            .bind(&task.job_type)
            .bind(&task.task_type)
            .bind(task.stage as i32)
            .bind(task.task_index as i32)
            .bind(&task.parameters)
            .bind(task.status.as_str())
            .bind(&task.result_data)
            .bind(error_details)
            .bind(task.retry_count as i32)
            .bind(task.dispatched_at)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StateStoreError::from_sqlx("create_tasks", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| StateStoreError::from_sqlx("create_tasks", e))?;
        Ok(())
    }

    async fn start_task(
        &self,
        task_id: &str,
        expected_retry_count: u32,
    ) -> StateResult<TaskStartOutcome> {
        let result = sqlx::query(
            "UPDATE conveyor_tasks \
               SET status = 'processing', started_at = now(), last_heartbeat = now(), \
                   updated_at = now() \
             WHERE task_id = $1 AND status = 'queued' AND retry_count = $2",
        )
        .bind(task_id)
        .bind(expected_retry_count as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("start_task", e))?;

        if result.rows_affected() == 1 {
            return Ok(TaskStartOutcome::Started);
        }

        let row = sqlx::query("SELECT status, retry_count FROM conveyor_tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateStoreError::from_sqlx("start_task", e))?
            .ok_or_else(|| StateStoreError::not_found("task", task_id))?;

        let status_raw: String = get(&row, "status")?;
        let retry_count = get::<i32>(&row, "retry_count")? as u32;
        let status = TaskStatus::parse(&status_raw).ok_or_else(|| {
            StateStoreError::Serialization(format!("bad task status '{status_raw}'"))
        })?;

        Ok(match status {
            TaskStatus::Queued => TaskStartOutcome::StaleAttempt { retry_count },
            TaskStatus::Processing => TaskStartOutcome::AlreadyProcessing { retry_count },
            terminal => TaskStartOutcome::AlreadyTerminal { status: terminal },
        })
    }

    async fn requeue_task_for_retry(
        &self,
        task_id: &str,
        expected_retry_count: u32,
    ) -> StateResult<bool> {
        let result = sqlx::query(
            "UPDATE conveyor_tasks \
               SET status = 'queued', retry_count = retry_count + 1, last_heartbeat = NULL, \
                   updated_at = now() \
             WHERE task_id = $1 AND status = 'processing' AND retry_count = $2",
        )
        .bind(task_id)
        .bind(expected_retry_count as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("requeue_task_for_retry", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_heartbeat(&self, task_id: &str) -> StateResult<()> {
        sqlx::query(
            "UPDATE conveyor_tasks SET last_heartbeat = now(), updated_at = now() \
             WHERE task_id = $1",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("record_heartbeat", e))?;
        Ok(())
    }

    async fn complete_task_and_check_stage(
        &self,
        task_id: &str,
        job_id: &str,
        stage: u32,
        outcome: &TaskOutcome,
    ) -> StateResult<StageCheck> {
        let (to_status, result_payload, error_payload) = match outcome {
            TaskOutcome::Completed(result) => ("completed", Some(result.clone()), None),
            TaskOutcome::Failed(error) => ("failed", None, Some(encode_error(error)?)),
        };

        let row = sqlx::query(
            "SELECT task_updated, stage_complete, remaining_in_stage, job_complete_hint \
             FROM conveyor_complete_task_and_check_stage($1, $2, $3, $4, $5, $6)",
        )
        .bind(task_id)
        .bind(job_id)
        .bind(stage as i32)
        .bind(to_status)
        .bind(result_payload)
        .bind(error_payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("not found") => {
                StateStoreError::not_found("job", job_id)
            }
            _ => StateStoreError::from_sqlx("complete_task_and_check_stage", e),
        })?;

        Ok(StageCheck {
            task_updated: get(&row, "task_updated")?,
            stage_complete: get(&row, "stage_complete")?,
            remaining_in_stage: get::<i64>(&row, "remaining_in_stage")?.max(0) as u64,
            job_complete_hint: get(&row, "job_complete_hint")?,
        })
    }

    async fn get_stage_results(&self, job_id: &str, stage: u32) -> StateResult<Vec<Value>> {
        let rows = sqlx::query(
            "SELECT result_data FROM conveyor_tasks \
             WHERE parent_job_id = $1 AND stage = $2 AND status = 'completed' \
             ORDER BY task_index",
        )
        .bind(job_id)
        .bind(stage as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("get_stage_results", e))?;

        rows.iter()
            .map(|row| {
                let value: Option<Value> = get(row, "result_data")?;
                Ok(value.unwrap_or(Value::Null))
            })
            .collect()
    }

    async fn get_tasks(&self, job_id: &str, filter: &TaskFilter) -> StateResult<Vec<TaskRecord>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM conveyor_tasks WHERE parent_job_id = "
        ));
        builder.push_bind(job_id);
        if let Some(stage) = filter.stage {
            builder.push(" AND stage = ").push_bind(stage as i32);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY stage, task_index");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateStoreError::from_sqlx("get_tasks", e))?;
        rows.iter().map(Self::task_from_row).collect()
    }

    async fn get_stage_progress(&self, job_id: &str) -> StateResult<Vec<StageProgress>> {
        let rows = sqlx::query(
            "SELECT stage, \
                    COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE status = 'completed') AS completed, \
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed \
             FROM conveyor_tasks WHERE parent_job_id = $1 \
             GROUP BY stage ORDER BY stage",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("get_stage_progress", e))?;

        rows.iter()
            .map(|row| {
                let total = get::<i64>(row, "total")?.max(0) as u64;
                let completed = get::<i64>(row, "completed")?.max(0) as u64;
                let failed = get::<i64>(row, "failed")?.max(0) as u64;
                Ok(StageProgress {
                    stage: get::<i32>(row, "stage")? as u32,
                    total,
                    completed,
                    failed,
                    remaining: total - completed - failed,
                })
            })
            .collect()
    }

    async fn stale_task_scan(&self, threshold: Duration) -> StateResult<Vec<TaskRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM conveyor_tasks \
             WHERE status = 'processing' \
               AND COALESCE(last_heartbeat, started_at, updated_at) \
                   < now() - make_interval(secs => $1)"
        ))
        .bind(threshold.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StateStoreError::from_sqlx("stale_task_scan", e))?;
        rows.iter().map(Self::task_from_row).collect()
    }

    async fn health_check(&self) -> StateResult<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateStoreError::from_sqlx("health_check", e))?;
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}
