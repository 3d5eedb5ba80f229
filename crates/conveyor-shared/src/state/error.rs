//! State-store error type.

use thiserror::Error;

/// Failure modes of the durable catalog.
///
/// `Conflict` deserves a note: a violated CAS precondition is usually the
/// normal "another caller already did this" signal, not a fault. Callers
/// branch on it; only unexpected conflicts get escalated.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("conflict during {operation}: {reason}")]
    Conflict { operation: String, reason: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Plausibly recoverable (connection churn, pool exhaustion) — retried
    /// with backoff inside the operation, not by re-queueing
    #[error("transient state store error: {0}")]
    Transient(String),

    #[error("permanent state store error: {0}")]
    Permanent(String),

    #[error("state serialization error: {0}")]
    Serialization(String),
}

impl StateStoreError {
    pub fn conflict(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a sqlx error for the retry policy
    pub fn from_sqlx(context: &str, error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Transient(format!("{context}: {error}"))
            }
            _ => Self::Permanent(format!("{context}: {error}")),
        }
    }
}
