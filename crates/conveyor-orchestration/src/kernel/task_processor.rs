//! # Task Message Processing
//!
//! Execute one task delivery: claim the attempt, run the handler, feed the
//! outcome through the fan-in primitive, and trigger advancement when this
//! delivery turned out to be the stage's last.
//!
//! The attempt counter on the message is what keeps retries and duplicates
//! apart: a delivery whose counter lags the task row belongs to a
//! superseded attempt and is dropped; the delivery whose counter matches a
//! queued row owns that attempt.

use conveyor_shared::checkpoints::{Checkpoint, CheckpointCode};
use conveyor_shared::errors::{FailureKind, StructuredError};
use conveyor_shared::messaging::TaskMessage;
use conveyor_shared::state::{StateStore, StateStoreError, TaskOutcome, TaskStartOutcome};
use conveyor_shared::ConveyorResult;
use tracing::{debug, warn};

use super::Kernel;

impl Kernel {
    /// Process one task-queue message.
    ///
    /// Same settlement contract as job processing: `Ok(())` ⇒ ack,
    /// `Err` ⇒ transient fault, abandon for redelivery.
    pub async fn process_task_message(&self, msg: &TaskMessage) -> ConveyorResult<()> {
        let correlation = msg.correlation_id.as_deref();
        let checkpoint = Checkpoint::start(CheckpointCode::TaskStart)
            .correlation(correlation)
            .job(&msg.parent_job_id)
            .task(&msg.task_id)
            .stage(msg.stage);

        // 1. Claim the attempt: CAS queued -> processing gated on the
        //    attempt counter.
        match self
            .core()
            .state()
            .start_task(&msg.task_id, msg.retry_count)
            .await
        {
            Ok(TaskStartOutcome::Started) => {}
            Ok(TaskStartOutcome::AlreadyProcessing { .. }) => {
                // Another delivery owns this attempt (or a crashed one —
                // the janitor reaps that case via the stale heartbeat).
                debug!(task_id = %msg.task_id, "task already processing, duplicate delivery");
                checkpoint.ok();
                return Ok(());
            }
            Ok(TaskStartOutcome::StaleAttempt { retry_count }) => {
                debug!(
                    task_id = %msg.task_id,
                    msg_attempt = msg.retry_count,
                    task_attempt = retry_count,
                    "stale delivery of a superseded attempt"
                );
                checkpoint.ok();
                return Ok(());
            }
            Ok(TaskStartOutcome::AlreadyTerminal { status }) => {
                debug!(task_id = %msg.task_id, status = %status, "task already terminal");
                checkpoint.ok();
                return Ok(());
            }
            Err(StateStoreError::NotFound { .. }) => {
                warn!(task_id = %msg.task_id, "task message for unknown task, dropping");
                checkpoint.fail("not_found");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        // 2. Resolve the handler; unknown task types fail the task
        //    immediately (non-retryable) and still run the fan-in check.
        let handler = match self.core().registry().handler(&msg.task_type) {
            Ok(handler) => handler,
            Err(e) => {
                let error = StructuredError::new(FailureKind::UnknownTaskType, e.to_string())
                    .with_task_id(&msg.task_id);
                self.settle_task(msg, TaskOutcome::Failed(error), correlation)
                    .await?;
                checkpoint.fail(FailureKind::UnknownTaskType.as_str());
                return Ok(());
            }
        };

        // 3. Run the handler through the invoker (timeout, panic capture)
        let invocation = self
            .invoker()
            .invoke(&msg.task_id, &msg.task_type, handler, &msg.parameters)
            .await;

        if invocation.succeeded() {
            self.settle_task(
                msg,
                TaskOutcome::Completed(invocation.result.result),
                correlation,
            )
            .await?;
            checkpoint.ok();
            return Ok(());
        }

        // 4. Failed attempt: bounded retry before the failure sticks
        let kind = invocation.failure_kind;
        if self.retry_policy().should_retry_task(kind, msg.retry_count) {
            if self
                .core()
                .state()
                .requeue_task_for_retry(&msg.task_id, msg.retry_count)
                .await?
            {
                let retry_msg = TaskMessage {
                    retry_count: msg.retry_count + 1,
                    ..msg.clone()
                };
                self.core().messaging().send_task_message(&retry_msg).await?;
                Checkpoint::start(CheckpointCode::TaskRetry)
                    .correlation(correlation)
                    .job(&msg.parent_job_id)
                    .task(&msg.task_id)
                    .stage(msg.stage)
                    .fail(kind.as_str());
                debug!(
                    task_id = %msg.task_id,
                    attempt = msg.retry_count + 1,
                    max = self.retry_policy().max_retries(),
                    "task requeued for retry"
                );
            }
            // Requeue CAS lost ⇒ someone else settled the attempt; either
            // way this delivery is done.
            checkpoint.ok();
            return Ok(());
        }

        // 5. Retries exhausted (or kind not retryable): the failure sticks
        let error = StructuredError::new(
            kind,
            invocation
                .result
                .error
                .unwrap_or_else(|| "handler failed without detail".to_string()),
        )
        .with_task_id(&msg.task_id);
        self.settle_task(msg, TaskOutcome::Failed(error), correlation)
            .await?;
        checkpoint.fail(kind.as_str());
        Ok(())
    }

    /// Feed a terminal outcome through the fan-in primitive and advance
    /// the stage if this was the last task out.
    async fn settle_task(
        &self,
        msg: &TaskMessage,
        outcome: TaskOutcome,
        correlation: Option<&str>,
    ) -> ConveyorResult<()> {
        // Transient store hiccups retry inline with backoff; only a
        // persistent fault escapes to the consumer as an abandon.
        let check = self
            .retry_policy()
            .retry_transient(
                || {
                    self.core().state().complete_task_and_check_stage(
                        &msg.task_id,
                        &msg.parent_job_id,
                        msg.stage,
                        &outcome,
                    )
                },
                |e: &StateStoreError| e.is_transient(),
            )
            .await?;

        if !check.task_updated {
            debug!(
                task_id = %msg.task_id,
                "terminal CAS lost (duplicate replay); count still checked"
            );
        }

        if check.stage_complete {
            Checkpoint::start(CheckpointCode::StageLastTask)
                .correlation(correlation)
                .job(&msg.parent_job_id)
                .task(&msg.task_id)
                .stage(msg.stage)
                .ok();
            self.advance_or_complete(&msg.parent_job_id, msg.stage, correlation)
                .await?;
        } else {
            debug!(
                task_id = %msg.task_id,
                remaining = check.remaining_in_stage,
                "task settled, stage not yet complete"
            );
        }
        Ok(())
    }
}
