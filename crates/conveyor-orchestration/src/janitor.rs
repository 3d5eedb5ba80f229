//! # Janitor
//!
//! Safety net for worker deaths that skip the normal failure path. A
//! worker that dies mid-handler leaves its task in `processing` with a
//! heartbeat that stops refreshing; once the heartbeat is older than the
//! configured threshold, the janitor drives the task through the fan-in
//! primitive as `failed(stale_timeout)` so the stage can advance or the
//! job can fail per policy.
//!
//! Not on the happy path: a healthy fleet gives the janitor nothing to do.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conveyor_shared::checkpoints::{Checkpoint, CheckpointCode};
use conveyor_shared::config::JanitorConfig;
use conveyor_shared::errors::{FailureKind, StructuredError};
use conveyor_shared::state::{StateStore, TaskOutcome};
use conveyor_shared::ConveyorResult;

use crate::kernel::SharedKernel;

/// Periodic stale-task reaper
#[derive(Debug)]
pub struct Janitor {
    kernel: SharedKernel,
    config: JanitorConfig,
    shutdown: CancellationToken,
}

impl Janitor {
    pub fn new(kernel: SharedKernel, config: JanitorConfig, shutdown: CancellationToken) -> Self {
        Self {
            kernel,
            config,
            shutdown,
        }
    }

    /// Run sweeps until shutdown
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("janitor shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "janitor sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep: reap every stale `processing` task. Returns how many
    /// tasks were declared dead.
    pub async fn sweep(&self) -> ConveyorResult<usize> {
        let checkpoint = Checkpoint::start(CheckpointCode::JanitorSweep);
        let stale = self
            .kernel
            .core()
            .state()
            .stale_task_scan(self.config.stale_threshold)
            .await?;

        if stale.is_empty() {
            checkpoint.ok();
            return Ok(0);
        }

        let mut reaped = 0;
        for task in stale {
            let error = StructuredError::new(
                FailureKind::StaleTimeout,
                format!(
                    "no heartbeat for more than {}s, declared dead by janitor",
                    self.config.stale_threshold.as_secs()
                ),
            )
            .with_task_id(&task.task_id);

            let check = self
                .kernel
                .core()
                .state()
                .complete_task_and_check_stage(
                    &task.task_id,
                    &task.parent_job_id,
                    task.stage,
                    &TaskOutcome::Failed(error),
                )
                .await?;

            if check.task_updated {
                reaped += 1;
                Checkpoint::start(CheckpointCode::JanitorReap)
                    .job(&task.parent_job_id)
                    .task(&task.task_id)
                    .stage(task.stage)
                    .fail(FailureKind::StaleTimeout.as_str());
                warn!(
                    task_id = %task.task_id,
                    job_id = %task.parent_job_id,
                    stage = task.stage,
                    "stale task declared failed"
                );
            }

            if check.stage_complete {
                self.kernel
                    .advance_or_complete(&task.parent_job_id, task.stage, None)
                    .await?;
            }
        }

        checkpoint.ok();
        Ok(reaped)
    }
}
