//! # In-Memory Queue Provider
//!
//! Full visibility-timeout semantics over process-local state. Used by the
//! test suites and by single-process demo runs; behaviorally equivalent to
//! the PGMQ provider for everything the kernel relies on (locks, renewal,
//! requeue, delivery counting).

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{MessageMetadata, QueueService, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

#[derive(Debug)]
struct StoredMessage {
    msg_id: i64,
    payload: Value,
    enqueued_at: chrono::DateTime<Utc>,
    /// The message is deliverable once `Instant::now() >= visible_at`
    visible_at: Instant,
    read_ct: u32,
}

type QueueCell = Arc<Mutex<Vec<StoredMessage>>>;

/// Process-local queue backend
#[derive(Debug, Default)]
pub struct InMemoryQueueService {
    queues: DashMap<String, QueueCell>,
    next_msg_id: AtomicI64,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            next_msg_id: AtomicI64::new(1),
        }
    }

    fn queue(&self, queue_name: &str) -> Result<QueueCell, MessagingError> {
        self.queues
            .get(queue_name)
            .map(|cell| cell.clone())
            .ok_or_else(|| MessagingError::receive(queue_name, "queue does not exist"))
    }

    fn alloc_msg_id(&self) -> i64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.queues
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
        Ok(())
    }

    async fn send_message(
        &self,
        queue_name: &str,
        payload: &Value,
    ) -> Result<i64, MessagingError> {
        let cell = self
            .queues
            .get(queue_name)
            .map(|c| c.clone())
            .ok_or_else(|| MessagingError::send(queue_name, "queue does not exist"))?;

        let msg_id = self.alloc_msg_id();
        let mut queue = cell.lock().unwrap_or_else(|p| p.into_inner());
        queue.push(StoredMessage {
            msg_id,
            payload: payload.clone(),
            enqueued_at: Utc::now(),
            visible_at: Instant::now(),
            read_ct: 0,
        });
        Ok(msg_id)
    }

    async fn send_batch(
        &self,
        queue_name: &str,
        payloads: &[Value],
    ) -> Result<Vec<i64>, MessagingError> {
        let cell = self
            .queues
            .get(queue_name)
            .map(|c| c.clone())
            .ok_or_else(|| MessagingError::send(queue_name, "queue does not exist"))?;

        // Single lock hold makes the batch atomic with respect to receivers
        let mut queue = cell.lock().unwrap_or_else(|p| p.into_inner());
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let msg_id = self.alloc_msg_id();
            queue.push(StoredMessage {
                msg_id,
                payload: payload.clone(),
                enqueued_at: Utc::now(),
                visible_at: Instant::now(),
                read_ct: 0,
            });
            ids.push(msg_id);
        }
        Ok(ids)
    }

    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage<Value>>, MessagingError> {
        let cell = self.queue(queue_name)?;
        let now = Instant::now();
        let mut queue = cell.lock().unwrap_or_else(|p| p.into_inner());

        let mut received = Vec::new();
        for stored in queue.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            stored.visible_at = now + visibility;
            stored.read_ct += 1;
            received.push(QueuedMessage {
                message: stored.payload.clone(),
                receipt_handle: ReceiptHandle::from_msg_id(stored.msg_id),
                metadata: MessageMetadata {
                    receive_count: stored.read_ct,
                    enqueued_at: stored.enqueued_at,
                },
            });
        }
        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let msg_id = receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::InvalidReceiptHandle(receipt_handle.as_str().into()))?;
        let cell = self.queue(queue_name)?;
        let mut queue = cell.lock().unwrap_or_else(|p| p.into_inner());
        queue.retain(|m| m.msg_id != msg_id);
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let msg_id = receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::InvalidReceiptHandle(receipt_handle.as_str().into()))?;
        let cell = self.queue(queue_name)?;
        let mut queue = cell.lock().unwrap_or_else(|p| p.into_inner());
        if requeue {
            if let Some(stored) = queue.iter_mut().find(|m| m.msg_id == msg_id) {
                stored.visible_at = Instant::now();
            }
        } else {
            queue.retain(|m| m.msg_id != msg_id);
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        let msg_id = receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::InvalidReceiptHandle(receipt_handle.as_str().into()))?;
        let cell = self.queue(queue_name)?;
        let mut queue = cell.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(stored) = queue.iter_mut().find(|m| m.msg_id == msg_id) {
            stored.visible_at = Instant::now() + extension;
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let cell = self.queue(queue_name)?;
        let queue = cell.lock().unwrap_or_else(|p| p.into_inner());
        let oldest = queue
            .iter()
            .map(|m| m.enqueued_at)
            .min()
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64);
        Ok(QueueStats {
            queue_name: queue_name.to_string(),
            message_count: queue.len() as u64,
            oldest_message_age_ms: oldest,
        })
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn service_with_queue(name: &str) -> InMemoryQueueService {
        let service = InMemoryQueueService::new();
        service.ensure_queue(name).await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_send_receive_ack() {
        let service = service_with_queue("q").await;
        let msg_id = service.send_message("q", &json!({"k": 1})).await.unwrap();

        let msgs = service
            .receive_messages("q", 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].message["k"], 1);
        assert_eq!(msgs[0].receive_count(), 1);
        assert_eq!(msgs[0].receipt_handle.as_i64(), Some(msg_id));

        service.ack_message("q", &msgs[0].receipt_handle).await.unwrap();
        let empty = service
            .receive_messages("q", 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_visibility_hides_in_flight_messages() {
        let service = service_with_queue("q").await;
        service.send_message("q", &json!({})).await.unwrap();

        let first = service
            .receive_messages("q", 10, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // While locked, nobody else sees it
        let second = service
            .receive_messages("q", 10, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_zero_visibility_allows_redelivery() {
        let service = service_with_queue("q").await;
        service.send_message("q", &json!({})).await.unwrap();

        let first = service
            .receive_messages("q", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first[0].receive_count(), 1);

        let again = service
            .receive_messages("q", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(again[0].receive_count(), 2);
    }

    #[tokio::test]
    async fn test_nack_requeue_makes_message_visible() {
        let service = service_with_queue("q").await;
        service.send_message("q", &json!({})).await.unwrap();

        let msgs = service
            .receive_messages("q", 10, Duration::from_secs(600))
            .await
            .unwrap();
        service
            .nack_message("q", &msgs[0].receipt_handle, true)
            .await
            .unwrap();

        let redelivered = service
            .receive_messages("q", 10, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].receive_count(), 2);
    }

    #[tokio::test]
    async fn test_nack_drop_removes_message() {
        let service = service_with_queue("q").await;
        service.send_message("q", &json!({})).await.unwrap();

        let msgs = service
            .receive_messages("q", 10, Duration::from_secs(600))
            .await
            .unwrap();
        service
            .nack_message("q", &msgs[0].receipt_handle, false)
            .await
            .unwrap();

        let stats = service.queue_stats("q").await.unwrap();
        assert_eq!(stats.message_count, 0);
    }

    #[tokio::test]
    async fn test_send_to_missing_queue_fails() {
        let service = InMemoryQueueService::new();
        let err = service.send_message("nope", &json!({})).await.unwrap_err();
        assert!(matches!(err, MessagingError::Send { .. }));
    }

    #[tokio::test]
    async fn test_batch_send_preserves_order() {
        let service = service_with_queue("q").await;
        let payloads: Vec<Value> = (0..5).map(|i| json!({"i": i})).collect();
        let ids = service.send_batch("q", &payloads).await.unwrap();
        assert_eq!(ids.len(), 5);

        let msgs = service
            .receive_messages("q", 10, Duration::from_secs(30))
            .await
            .unwrap();
        let order: Vec<i64> = msgs.iter().map(|m| m.message["i"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_receive_respects_max_messages() {
        let service = service_with_queue("q").await;
        for i in 0..10 {
            service.send_message("q", &json!({"i": i})).await.unwrap();
        }
        let msgs = service
            .receive_messages("q", 4, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(msgs.len(), 4);
    }
}
