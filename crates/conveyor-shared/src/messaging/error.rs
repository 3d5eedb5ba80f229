//! Messaging error type shared by all queue providers.

use thiserror::Error;

/// Errors surfaced by queue providers and the message client
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("failed to connect to messaging backend: {0}")]
    Connection(String),

    #[error("failed to create queue '{queue}': {reason}")]
    QueueCreation { queue: String, reason: String },

    #[error("send to '{queue}' failed: {reason}")]
    Send { queue: String, reason: String },

    #[error("receive from '{queue}' failed: {reason}")]
    Receive { queue: String, reason: String },

    #[error("ack of message {msg_id} on '{queue}' failed: {reason}")]
    Ack {
        queue: String,
        msg_id: i64,
        reason: String,
    },

    #[error("nack of message {msg_id} on '{queue}' failed: {reason}")]
    Nack {
        queue: String,
        msg_id: i64,
        reason: String,
    },

    #[error("visibility extension of message {msg_id} on '{queue}' failed: {reason}")]
    ExtendVisibility {
        queue: String,
        msg_id: i64,
        reason: String,
    },

    #[error("queue stats for '{queue}' failed: {reason}")]
    QueueStats { queue: String, reason: String },

    #[error("invalid receipt handle '{0}'")]
    InvalidReceiptHandle(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("messaging health check failed: {0}")]
    HealthCheck(String),
}

impl MessagingError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection(reason.into())
    }

    pub fn queue_creation(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueueCreation {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn send(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Send {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn receive(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Receive {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn ack(queue: impl Into<String>, msg_id: i64, reason: impl Into<String>) -> Self {
        Self::Ack {
            queue: queue.into(),
            msg_id,
            reason: reason.into(),
        }
    }

    pub fn nack(queue: impl Into<String>, msg_id: i64, reason: impl Into<String>) -> Self {
        Self::Nack {
            queue: queue.into(),
            msg_id,
            reason: reason.into(),
        }
    }

    pub fn extend_visibility(
        queue: impl Into<String>,
        msg_id: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self::ExtendVisibility {
            queue: queue.into(),
            msg_id,
            reason: reason.into(),
        }
    }

    pub fn queue_stats(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueueStats {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    pub fn health_check(reason: impl Into<String>) -> Self {
        Self::HealthCheck(reason.into())
    }
}
