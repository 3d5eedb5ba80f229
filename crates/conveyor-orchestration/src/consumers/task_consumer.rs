//! Task-queue consumer loop.
//!
//! Handler executions are the expensive part of the system, so this
//! consumer runs each batch under a bounded concurrency cap (default 4
//! per worker). Each in-flight message renews its lock and heartbeats its
//! task row for as long as the handler runs.

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conveyor_shared::messaging::QueuedMessage;
use conveyor_shared::messaging::TaskMessage;

use super::renewal::RenewalGuard;
use crate::kernel::SharedKernel;

/// Polls the task queue and executes handlers through the kernel
#[derive(Debug)]
pub struct TaskQueueConsumer {
    kernel: SharedKernel,
    shutdown: CancellationToken,
}

impl TaskQueueConsumer {
    pub fn new(kernel: SharedKernel, shutdown: CancellationToken) -> Self {
        Self { kernel, shutdown }
    }

    /// Run until shutdown
    pub async fn run(self) {
        info!(
            concurrency = self.kernel.core().config().execution.task_concurrency,
            "task queue consumer started"
        );
        let poll_interval = self.kernel.core().config().queues.poll_interval;
        loop {
            if self.shutdown.is_cancelled() {
                info!("task queue consumer shutting down");
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
                    warn!(error = %e, "task batch receive failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Receive one batch and process it under the concurrency cap;
    /// returns how many messages were read
    pub async fn process_batch(&self) -> conveyor_shared::ConveyorResult<usize> {
        let config = self.kernel.core().config();
        let messages = self
            .kernel
            .core()
            .messaging()
            .receive_task_messages(config.queues.batch_size, config.queues.visibility_timeout)
            .await?;

        let count = messages.len();
        let concurrency = config.execution.task_concurrency.max(1);
        stream::iter(messages)
            .for_each_concurrent(concurrency, |message| self.process_one(message))
            .await;
        Ok(count)
    }

    async fn process_one(&self, message: QueuedMessage<TaskMessage>) {
        // Per-invocation id: logging only, never leaves the log stream
        // (distinct from the message correlation token).
        let invocation_id = uuid::Uuid::new_v4();
        debug!(
            invocation_id = %invocation_id,
            task_id = %message.message.task_id,
            attempt = message.message.retry_count,
            receive_count = message.receive_count(),
            "processing task message"
        );
        let core = self.kernel.core();
        let queue = core.messaging().router().task_queue().to_string();
        let guard = RenewalGuard::spawn(
            core.messaging().clone(),
            queue.clone(),
            message.receipt_handle.clone(),
            core.config().queues.visibility_timeout,
            core.config().execution.renewal_ceiling,
            Some((core.state().clone(), message.message.task_id.clone())),
        );

        let settled = self.kernel.process_task_message(&message.message).await;
        guard.finish();

        match settled {
            Ok(()) => {
                if let Err(e) = core
                    .messaging()
                    .ack_message(&queue, &message.receipt_handle)
                    .await
                {
                    warn!(
                        task_id = %message.message.task_id,
                        error = %e,
                        "failed to ack settled task message; redelivery will dedupe"
                    );
                }
            }
            Err(e) => {
                debug!(
                    task_id = %message.message.task_id,
                    error = %e,
                    "transient failure, abandoning task message for redelivery"
                );
                if let Err(nack_err) = core
                    .messaging()
                    .nack_message(&queue, &message.receipt_handle, true)
                    .await
                {
                    warn!(error = %nack_err, "failed to nack task message");
                }
            }
        }
    }
}
