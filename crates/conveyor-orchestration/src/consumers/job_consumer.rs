//! Job-queue consumer loop.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conveyor_shared::messaging::QueuedMessage;
use conveyor_shared::messaging::JobMessage;

use super::renewal::RenewalGuard;
use crate::kernel::SharedKernel;

/// Polls the job queue and drives stage fan-out through the kernel
#[derive(Debug)]
pub struct JobQueueConsumer {
    kernel: SharedKernel,
    shutdown: CancellationToken,
}

impl JobQueueConsumer {
    pub fn new(kernel: SharedKernel, shutdown: CancellationToken) -> Self {
        Self { kernel, shutdown }
    }

    /// Run until shutdown
    pub async fn run(self) {
        info!("job queue consumer started");
        let poll_interval = self.kernel.core().config().queues.poll_interval;
        loop {
            if self.shutdown.is_cancelled() {
                info!("job queue consumer shutting down");
                return;
            }
            match self.process_batch().await {
                Ok(0) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "job batch receive failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Receive and process one batch; returns how many messages were read
    pub async fn process_batch(&self) -> conveyor_shared::ConveyorResult<usize> {
        let config = self.kernel.core().config();
        let messages = self
            .kernel
            .core()
            .messaging()
            .receive_job_messages(config.queues.batch_size, config.queues.visibility_timeout)
            .await?;

        let count = messages.len();
        for message in messages {
            self.process_one(message).await;
        }
        Ok(count)
    }

    async fn process_one(&self, message: QueuedMessage<JobMessage>) {
        // Per-invocation id: logging only, never leaves the log stream
        // (distinct from the message correlation token).
        let invocation_id = uuid::Uuid::new_v4();
        debug!(
            invocation_id = %invocation_id,
            job_id = %message.message.job_id,
            stage = message.message.stage,
            receive_count = message.receive_count(),
            "processing job message"
        );
        let core = self.kernel.core();
        let queue = core.messaging().router().job_queue().to_string();
        let guard = RenewalGuard::spawn(
            core.messaging().clone(),
            queue.clone(),
            message.receipt_handle.clone(),
            core.config().queues.visibility_timeout,
            core.config().execution.renewal_ceiling,
            None,
        );

        let settled = self.kernel.process_job_message(&message.message).await;
        guard.finish();

        match settled {
            Ok(()) => {
                if let Err(e) = core
                    .messaging()
                    .ack_message(&queue, &message.receipt_handle)
                    .await
                {
                    warn!(
                        job_id = %message.message.job_id,
                        error = %e,
                        "failed to ack settled job message; redelivery will dedupe"
                    );
                }
            }
            Err(e) => {
                debug!(
                    job_id = %message.message.job_id,
                    error = %e,
                    "transient failure, abandoning job message for redelivery"
                );
                if let Err(nack_err) = core
                    .messaging()
                    .nack_message(&queue, &message.receipt_handle, true)
                    .await
                {
                    warn!(error = %nack_err, "failed to nack job message");
                }
            }
        }
    }
}
