//! # Job Message Processing
//!
//! Fan one stage of a job out into task rows and task messages.
//!
//! Idempotence comes from three properties working together: the job-stage
//! guard (a message for a stage the job has already left is a duplicate),
//! the idempotent task insert (replayed fan-out re-creates nothing), and
//! deterministic task ids (replays produce the same ids, not new work).

use serde_json::Value;

use conveyor_shared::checkpoints::{Checkpoint, CheckpointCode};
use conveyor_shared::errors::{ConveyorError, FailureKind};
use conveyor_shared::identity;
use conveyor_shared::messaging::{JobMessage, TaskMessage};
use conveyor_shared::models::TaskRecord;
use conveyor_shared::registry::{JobDefinition, Parallelism, TaskSpec};
use conveyor_shared::state::{StateStore, StateStoreError};
use conveyor_shared::ConveyorResult;
use tracing::{debug, warn};

use super::Kernel;

impl Kernel {
    /// Process one job-queue message.
    ///
    /// `Ok(())` means the message is settled and must be acked — including
    /// every path that failed the job with a recorded error. `Err` means a
    /// transient infrastructure fault; the consumer abandons the message
    /// and redelivery retries cleanly.
    pub async fn process_job_message(&self, msg: &JobMessage) -> ConveyorResult<()> {
        let correlation = msg.correlation_id.as_deref();
        let checkpoint = Checkpoint::start(CheckpointCode::JobStart)
            .correlation(correlation)
            .job(&msg.job_id)
            .stage(msg.stage);

        // 1. Load the job; a message for an unknown job is poison, not
        //    something redelivery can fix.
        let job = match self.core().state().get_job(&msg.job_id).await {
            Ok(job) => job,
            Err(StateStoreError::NotFound { .. }) => {
                warn!(job_id = %msg.job_id, "job message for unknown job, dropping");
                checkpoint.fail("not_found");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Terminal or already-advanced: duplicate delivery, settle it.
        if job.is_terminal() {
            debug!(job_id = %msg.job_id, status = %job.status, "job already terminal, duplicate");
            checkpoint.ok();
            return Ok(());
        }
        if job.stage != msg.stage {
            debug!(
                job_id = %msg.job_id,
                msg_stage = msg.stage,
                job_stage = job.stage,
                "stale job message for a previous stage"
            );
            checkpoint.ok();
            return Ok(());
        }

        // 2. CAS queued -> processing (no-op when already processing)
        match self.core().state().mark_job_processing(&msg.job_id).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                // Raced with a terminal transition; nothing left to do
                checkpoint.ok();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        // 3. Resolve the definition; unknown job types fail the job.
        let def = match self.core().registry().job_definition(&msg.job_type) {
            Ok(def) => def,
            Err(e) => {
                self.fail_job_settled(
                    &msg.job_id,
                    Self::job_error(FailureKind::UnknownJobType, e.to_string()),
                )
                .await?;
                checkpoint.fail(FailureKind::UnknownJobType.as_str());
                return Ok(());
            }
        };

        // 4. Fan out via the definition's hook
        let previous_results = if msg.stage >= 2 {
            msg.stage_results.stage(msg.stage - 1)
        } else {
            None
        };

        let specs = match def.behavior.create_tasks_for_stage(
            msg.stage,
            &msg.parameters,
            &msg.job_id,
            previous_results,
        ) {
            Ok(specs) => specs,
            Err(e) => {
                self.fail_job_settled(
                    &msg.job_id,
                    Self::job_error(FailureKind::DefinitionError, e.to_string()),
                )
                .await?;
                checkpoint.fail(FailureKind::DefinitionError.as_str());
                return Ok(());
            }
        };

        // 5. Parallelism declaration checks + empty-stage policy
        if let Err(reason) = validate_fan_out(&def, msg.stage, &specs, previous_results) {
            self.fail_job_settled(
                &msg.job_id,
                Self::job_error(FailureKind::DefinitionError, reason),
            )
            .await?;
            checkpoint.fail(FailureKind::DefinitionError.as_str());
            return Ok(());
        }

        if specs.is_empty() {
            // Legal empty fan-out: the stage is immediately complete with
            // empty results and the job advances (or completes).
            Checkpoint::start(CheckpointCode::StageEmpty)
                .correlation(correlation)
                .job(&msg.job_id)
                .stage(msg.stage)
                .ok();
            self.advance_or_complete(&msg.job_id, msg.stage, correlation)
                .await?;
            checkpoint.ok();
            return Ok(());
        }

        // 6-7. Deterministic ids, idempotent batch insert
        let tasks: Vec<TaskRecord> = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                TaskRecord::new(
                    identity::task_id(&msg.job_id, msg.stage, index as u32),
                    msg.job_id.clone(),
                    msg.job_type.clone(),
                    spec.task_type.clone(),
                    msg.stage,
                    index as u32,
                    spec.parameters.clone(),
                )
            })
            .collect();
        self.core().state().create_tasks(&tasks).await?;

        // 8. Fan the task messages out
        let task_messages: Vec<TaskMessage> = tasks
            .iter()
            .map(|task| TaskMessage {
                task_id: task.task_id.clone(),
                parent_job_id: task.parent_job_id.clone(),
                job_type: task.job_type.clone(),
                task_type: task.task_type.clone(),
                stage: task.stage,
                task_index: task.task_index,
                parameters: task.parameters.clone(),
                retry_count: 0,
                correlation_id: msg.correlation_id.clone(),
            })
            .collect();
        self.core()
            .messaging()
            .send_task_batch(&task_messages)
            .await
            .map_err(ConveyorError::from)?;

        Checkpoint::start(CheckpointCode::StageFanout)
            .correlation(correlation)
            .job(&msg.job_id)
            .stage(msg.stage)
            .ok();
        debug!(
            job_id = %msg.job_id,
            stage = msg.stage,
            task_count = tasks.len(),
            "stage fanned out"
        );
        checkpoint.ok();
        Ok(())
    }
}

/// Check the fan-out against the stage's parallelism declaration
fn validate_fan_out(
    def: &JobDefinition,
    stage: u32,
    specs: &[TaskSpec],
    previous_results: Option<&[Value]>,
) -> Result<(), String> {
    let stage_def = def
        .stage(stage)
        .ok_or_else(|| format!("job type '{}' has no stage {stage}", def.job_type))?;

    match stage_def.parallelism {
        Parallelism::Single if specs.len() != 1 => Err(format!(
            "stage {stage} ('{}') declares single parallelism but produced {} tasks",
            stage_def.name,
            specs.len()
        )),
        Parallelism::MatchPrevious => {
            let expected = previous_results.map(<[Value]>::len).unwrap_or(0);
            if specs.len() != expected {
                Err(format!(
                    "stage {stage} ('{}') must match the previous stage's {expected} results \
                     but produced {} tasks",
                    stage_def.name,
                    specs.len()
                ))
            } else if specs.is_empty() && !stage_def.allow_empty {
                Err(format!(
                    "stage {stage} ('{}') produced zero tasks and does not allow empty stages",
                    stage_def.name
                ))
            } else {
                Ok(())
            }
        }
        _ if specs.is_empty() && !stage_def.allow_empty => Err(format!(
            "stage {stage} ('{}') produced zero tasks and does not allow empty stages",
            stage_def.name
        )),
        _ => Ok(()),
    }
}
