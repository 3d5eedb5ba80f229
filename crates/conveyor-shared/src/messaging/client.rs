//! # MessageClient Domain Facade
//!
//! Domain-level messaging client: typed send/receive for the two conveyor
//! queues over a [`QueueProvider`]. This is a **struct**, not a trait — the
//! provider enum underneath already gives us backend polymorphism without
//! trait objects.
//!
//! ```text
//! MessageClient
//!   ├── provider: Arc<QueueProvider>   <- pgmq | in_memory
//!   └── router: QueueRouter            <- job/task queue names
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::messages::{JobMessage, TaskMessage};
use super::router::QueueRouter;
use super::service::{QueueProvider, QueueService, QueueStats, QueuedMessage, ReceiptHandle};
use super::MessagingError;

/// Typed messaging facade for the job and task queues
#[derive(Debug, Clone)]
pub struct MessageClient {
    provider: Arc<QueueProvider>,
    router: QueueRouter,
}

impl MessageClient {
    pub fn new(provider: Arc<QueueProvider>, router: QueueRouter) -> Self {
        Self { provider, router }
    }

    pub fn provider(&self) -> &Arc<QueueProvider> {
        &self.provider
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Create both conveyor queues if missing (startup)
    pub async fn initialize_queues(&self) -> Result<(), MessagingError> {
        for queue in self.router.all_queues() {
            self.provider.ensure_queue(queue).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Job queue
    // =========================================================================

    pub async fn send_job_message(&self, message: &JobMessage) -> Result<i64, MessagingError> {
        let payload = encode(message)?;
        self.provider
            .send_message(self.router.job_queue(), &payload)
            .await
    }

    pub async fn receive_job_messages(
        &self,
        max_messages: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage<JobMessage>>, MessagingError> {
        let raw = self
            .provider
            .receive_messages(self.router.job_queue(), max_messages, visibility)
            .await?;
        decode_batch(raw)
    }

    // =========================================================================
    // Task queue
    // =========================================================================

    pub async fn send_task_message(&self, message: &TaskMessage) -> Result<i64, MessagingError> {
        let payload = encode(message)?;
        self.provider
            .send_message(self.router.task_queue(), &payload)
            .await
    }

    /// Fan out a stage's task messages in one all-or-nothing batch
    pub async fn send_task_batch(
        &self,
        messages: &[TaskMessage],
    ) -> Result<Vec<i64>, MessagingError> {
        let payloads = messages.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        self.provider
            .send_batch(self.router.task_queue(), &payloads)
            .await
    }

    pub async fn receive_task_messages(
        &self,
        max_messages: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage<TaskMessage>>, MessagingError> {
        let raw = self
            .provider
            .receive_messages(self.router.task_queue(), max_messages, visibility)
            .await?;
        decode_batch(raw)
    }

    // =========================================================================
    // Message lifecycle (queue-agnostic)
    // =========================================================================

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        self.provider.ack_message(queue_name, receipt_handle).await
    }

    pub async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        self.provider
            .nack_message(queue_name, receipt_handle, requeue)
            .await
    }

    pub async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        self.provider
            .extend_visibility(queue_name, receipt_handle, extension)
            .await
    }

    // =========================================================================
    // Observability
    // =========================================================================

    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        self.provider.queue_stats(queue_name).await
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        self.provider.health_check().await
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Value, MessagingError> {
    serde_json::to_value(message).map_err(|e| MessagingError::serialization(e.to_string()))
}

fn decode_batch<T: DeserializeOwned>(
    raw: Vec<QueuedMessage<Value>>,
) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
    raw.into_iter()
        .map(|m| {
            let message: T = serde_json::from_value(m.message)
                .map_err(|e| MessagingError::serialization(e.to_string()))?;
            Ok(QueuedMessage {
                message,
                receipt_handle: m.receipt_handle,
                metadata: m.metadata,
            })
        })
        .collect()
}
