//! # Stage Advancement
//!
//! Runs after the completion detector reports a stage fully terminal:
//! either advance to the next stage (CAS + next job message) or finalize
//! and complete the job.
//!
//! The advisory lock in the completion detector already guarantees a
//! single `stage_complete` observer; the advancement CAS is belt and
//! braces on top — if it ever loses, someone else advanced and losing is
//! benign.

use conveyor_shared::checkpoints::{Checkpoint, CheckpointCode};
use conveyor_shared::errors::FailureKind;
use conveyor_shared::messaging::JobMessage;
use conveyor_shared::models::TaskStatus;
use conveyor_shared::registry::FinalizeContext;
use conveyor_shared::state::{StateStore, TaskFilter};
use conveyor_shared::ConveyorResult;
use tracing::{debug, info, warn};

use super::Kernel;

impl Kernel {
    /// Advance past `stage` or complete the job if it was the last stage.
    ///
    /// Called by whichever delivery observed `stage_complete` (task
    /// processor or janitor), and directly by the job processor for legal
    /// empty stages.
    pub async fn advance_or_complete(
        &self,
        job_id: &str,
        stage: u32,
        correlation: Option<&str>,
    ) -> ConveyorResult<()> {
        let job = self.core().state().get_job(job_id).await?;
        if job.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "job already terminal, nothing to advance");
            return Ok(());
        }

        let def = match self.core().registry().job_definition(&job.job_type) {
            Ok(def) => def,
            Err(e) => {
                // Registry drift between fan-out and fan-in; fail loudly.
                self.fail_job_settled(
                    job_id,
                    Self::job_error(FailureKind::UnknownJobType, e.to_string()),
                )
                .await?;
                return Ok(());
            }
        };

        // Fail-stage policy: any failed task fails the job unless the
        // definition opted into best-effort fan-out.
        let failed_tasks = self
            .core()
            .state()
            .get_tasks(
                job_id,
                &TaskFilter::for_stage(stage).with_status(TaskStatus::Failed),
            )
            .await?;
        if !failed_tasks.is_empty() && !def.continue_on_task_failure {
            let first = &failed_tasks[0];
            let error = first
                .error_details
                .clone()
                .unwrap_or_else(|| {
                    Self::job_error(FailureKind::HandlerFailure, "task failed without detail")
                })
                .with_task_id(&first.task_id);
            self.fail_job_settled(job_id, error).await?;
            Checkpoint::start(CheckpointCode::JobFail)
                .correlation(correlation)
                .job(job_id)
                .stage(stage)
                .fail(
                    first
                        .error_details
                        .as_ref()
                        .map(|e| e.kind.as_str())
                        .unwrap_or(FailureKind::HandlerFailure.as_str()),
                );
            info!(
                job_id = %job_id,
                stage = stage,
                failed_tasks = failed_tasks.len(),
                "stage failed, job failed"
            );
            return Ok(());
        }

        let results = self.core().state().get_stage_results(job_id, stage).await?;

        if stage < job.total_stages {
            // Advance CAS; a lost race means another caller already did it
            match self
                .core()
                .state()
                .advance_job_stage(job_id, stage, stage + 1, results.clone())
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    Checkpoint::start(CheckpointCode::StageAdvFail)
                        .correlation(correlation)
                        .job(job_id)
                        .stage(stage)
                        .ok();
                    debug!(job_id = %job_id, stage = stage, "advancement CAS lost, benign");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            // Stage-N+1 message carries the accumulated results so the
            // fan-out hook can consume its previous stage without a read.
            let mut stage_results = job.stage_results.clone();
            stage_results.insert_stage(stage, results);
            let next = JobMessage {
                job_id: job_id.to_string(),
                job_type: job.job_type.clone(),
                stage: stage + 1,
                parameters: job.parameters.clone(),
                stage_results,
                correlation_id: correlation.map(str::to_string),
            };
            self.core().messaging().send_job_message(&next).await?;

            Checkpoint::start(CheckpointCode::StageComplete)
                .correlation(correlation)
                .job(job_id)
                .stage(stage)
                .ok();
            info!(job_id = %job_id, from_stage = stage, to_stage = stage + 1, "stage advanced");
            return Ok(());
        }

        // Final stage: aggregate and complete
        let mut all_results = job.stage_results.clone();
        all_results.insert_stage(stage, results.clone());
        let context = FinalizeContext {
            job_id,
            parameters: &job.parameters,
            stage_results: &all_results,
        };
        let result_data = match def.behavior.finalize_job(&context) {
            Ok(data) => data,
            Err(e) => {
                self.fail_job_settled(
                    job_id,
                    Self::job_error(FailureKind::DefinitionError, format!("finalize failed: {e}")),
                )
                .await?;
                Checkpoint::start(CheckpointCode::JobFail)
                    .correlation(correlation)
                    .job(job_id)
                    .stage(stage)
                    .fail(FailureKind::DefinitionError.as_str());
                return Ok(());
            }
        };

        match self
            .core()
            .state()
            .complete_job(job_id, stage, results, result_data)
            .await
        {
            Ok(()) => {
                Checkpoint::start(CheckpointCode::JobComplete)
                    .correlation(correlation)
                    .job(job_id)
                    .stage(stage)
                    .ok();
                info!(job_id = %job_id, total_stages = job.total_stages, "job completed");
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                warn!(job_id = %job_id, "completion CAS lost, job already settled");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
