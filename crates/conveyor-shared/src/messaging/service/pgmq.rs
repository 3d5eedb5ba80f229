//! # PGMQ Queue Provider
//!
//! Maps the queue port onto the `pgmq` extension via [`conveyor_pgmq`].
//! Ack is `archive` (the message moves to the queue's archive table, which
//! keeps a forensic trail), dead-letter nack is `delete`, requeue nack and
//! lock renewal are both `set_vt`.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use conveyor_pgmq::PgmqClient;

use super::{MessageMetadata, QueueService, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

/// PGMQ-backed queue service
#[derive(Debug, Clone)]
pub struct PgmqQueueService {
    client: PgmqClient,
}

impl PgmqQueueService {
    pub async fn new(database_url: &str) -> Result<Self, MessagingError> {
        let client = PgmqClient::new(database_url)
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Preferred when the state store and queues share one pool
    pub fn new_with_pool(pool: sqlx::PgPool) -> Self {
        Self {
            client: PgmqClient::new_with_pool(pool),
        }
    }

    pub fn client(&self) -> &PgmqClient {
        &self.client
    }

    fn msg_id_of(receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
        receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::InvalidReceiptHandle(receipt_handle.as_str().into()))
    }
}

#[async_trait]
impl QueueService for PgmqQueueService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.client
            .create_queue(queue_name)
            .await
            .map_err(|e| MessagingError::queue_creation(queue_name, e.to_string()))
    }

    async fn send_message(
        &self,
        queue_name: &str,
        payload: &Value,
    ) -> Result<i64, MessagingError> {
        self.client
            .send_json_message(queue_name, payload)
            .await
            .map_err(|e| MessagingError::send(queue_name, e.to_string()))
    }

    async fn send_batch(
        &self,
        queue_name: &str,
        payloads: &[Value],
    ) -> Result<Vec<i64>, MessagingError> {
        self.client
            .send_batch(queue_name, payloads)
            .await
            .map_err(|e| MessagingError::send(queue_name, e.to_string()))
    }

    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage<Value>>, MessagingError> {
        let messages = self
            .client
            .read_messages(
                queue_name,
                Some(visibility.as_secs() as i32),
                Some(max_messages as i32),
            )
            .await
            .map_err(|e| MessagingError::receive(queue_name, e.to_string()))?;

        Ok(messages
            .into_iter()
            .map(|m| QueuedMessage {
                message: m.message,
                receipt_handle: ReceiptHandle::from_msg_id(m.msg_id),
                metadata: MessageMetadata {
                    receive_count: m.read_ct.max(0) as u32,
                    enqueued_at: m.enqueued_at,
                },
            })
            .collect())
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let msg_id = Self::msg_id_of(receipt_handle)?;
        self.client
            .archive_message(queue_name, msg_id)
            .await
            .map_err(|e| MessagingError::ack(queue_name, msg_id, e.to_string()))
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let msg_id = Self::msg_id_of(receipt_handle)?;
        if requeue {
            self.client
                .set_visibility_timeout(queue_name, msg_id, 0)
                .await
                .map_err(|e| MessagingError::nack(queue_name, msg_id, e.to_string()))
        } else {
            self.client
                .delete_message(queue_name, msg_id)
                .await
                .map_err(|e| MessagingError::nack(queue_name, msg_id, e.to_string()))
        }
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        let msg_id = Self::msg_id_of(receipt_handle)?;
        self.client
            .set_visibility_timeout(queue_name, msg_id, extension.as_secs() as i32)
            .await
            .map_err(|e| MessagingError::extend_visibility(queue_name, msg_id, e.to_string()))
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let metrics = self
            .client
            .queue_metrics(queue_name)
            .await
            .map_err(|e| MessagingError::queue_stats(queue_name, e.to_string()))?;

        Ok(QueueStats {
            queue_name: metrics.queue_name,
            message_count: metrics.message_count.max(0) as u64,
            oldest_message_age_ms: metrics
                .oldest_message_age_seconds
                .map(|s| s.max(0) as u64 * 1000),
        })
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        self.client
            .health_check()
            .await
            .map_err(|e| MessagingError::health_check(e.to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}
