//! # Queue Service Port
//!
//! The transport-facing trait, the message wrapper types, and the provider
//! enum. Providers are dispatched by enum match — no trait objects on the
//! consume path.
//!
//! Payloads cross the port as `serde_json::Value`; typed encode/decode
//! happens in the [`crate::messaging::client::MessageClient`] facade where
//! the schema is known.

mod in_memory;
mod pgmq;

pub use in_memory::InMemoryQueueService;
pub use pgmq::PgmqQueueService;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::MessagingError;

/// Opaque per-delivery handle used to ack/nack/renew a message.
///
/// All current providers use numeric message ids underneath; the handle
/// keeps that an implementation detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn from_msg_id(msg_id: i64) -> Self {
        Self(msg_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

/// Delivery metadata attached by the transport
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    /// Number of deliveries so far, 1 on first receipt
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// A received message plus everything needed to settle it
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub message: T,
    pub receipt_handle: ReceiptHandle,
    pub metadata: MessageMetadata,
}

impl<T> QueuedMessage<T> {
    pub fn receive_count(&self) -> u32 {
        self.metadata.receive_count
    }
}

/// Point-in-time queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub queue_name: String,
    pub message_count: u64,
    pub oldest_message_age_ms: Option<u64>,
}

/// The queue transport contract.
///
/// - At-least-once delivery; consumers must tolerate duplicates.
/// - `receive_messages` locks each returned message for `visibility`;
///   other consumers do not see it until the lock lapses or the message is
///   nacked back.
/// - `ack_message` settles a message permanently; `nack_message` either
///   releases it for redelivery (`requeue = true`) or drops it out of the
///   normal flow.
/// - `extend_visibility` renews a held lock.
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    async fn send_message(&self, queue_name: &str, payload: &Value)
        -> Result<i64, MessagingError>;

    /// All-or-nothing batch send
    async fn send_batch(
        &self,
        queue_name: &str,
        payloads: &[Value],
    ) -> Result<Vec<i64>, MessagingError>;

    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage<Value>>, MessagingError>;

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    fn provider_name(&self) -> &'static str;
}

/// Concrete queue backends, dispatched without trait objects
#[derive(Debug)]
pub enum QueueProvider {
    Pgmq(PgmqQueueService),
    InMemory(InMemoryQueueService),
}

impl QueueProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryQueueService::new())
    }
}

#[async_trait]
impl QueueService for QueueProvider {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ensure_queue(queue_name).await,
            Self::InMemory(s) => s.ensure_queue(queue_name).await,
        }
    }

    async fn send_message(
        &self,
        queue_name: &str,
        payload: &Value,
    ) -> Result<i64, MessagingError> {
        match self {
            Self::Pgmq(s) => s.send_message(queue_name, payload).await,
            Self::InMemory(s) => s.send_message(queue_name, payload).await,
        }
    }

    async fn send_batch(
        &self,
        queue_name: &str,
        payloads: &[Value],
    ) -> Result<Vec<i64>, MessagingError> {
        match self {
            Self::Pgmq(s) => s.send_batch(queue_name, payloads).await,
            Self::InMemory(s) => s.send_batch(queue_name, payloads).await,
        }
    }

    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage<Value>>, MessagingError> {
        match self {
            Self::Pgmq(s) => s.receive_messages(queue_name, max_messages, visibility).await,
            Self::InMemory(s) => s.receive_messages(queue_name, max_messages, visibility).await,
        }
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ack_message(queue_name, receipt_handle).await,
            Self::InMemory(s) => s.ack_message(queue_name, receipt_handle).await,
        }
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
            Self::InMemory(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
        }
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.extend_visibility(queue_name, receipt_handle, extension).await,
            Self::InMemory(s) => {
                s.extend_visibility(queue_name, receipt_handle, extension).await
            }
        }
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        match self {
            Self::Pgmq(s) => s.queue_stats(queue_name).await,
            Self::InMemory(s) => s.queue_stats(queue_name).await,
        }
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::Pgmq(s) => s.health_check().await,
            Self::InMemory(s) => s.health_check().await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::Pgmq(s) => s.provider_name(),
            Self::InMemory(s) => s.provider_name(),
        }
    }
}
