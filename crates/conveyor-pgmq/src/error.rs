//! Error type for PGMQ client operations.

use thiserror::Error;

/// Result alias for PGMQ operations
pub type PgmqResult<T> = Result<T, PgmqError>;

/// Errors surfaced by [`crate::PgmqClient`]
#[derive(Debug, Error)]
pub enum PgmqError {
    /// Failed to establish a database connection
    #[error("connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    /// A queue operation failed at the SQL layer
    #[error("queue operation '{operation}' failed on '{queue}': {source}")]
    Operation {
        operation: &'static str,
        queue: String,
        #[source]
        source: sqlx::Error,
    },

    /// Payload could not be serialized to JSON
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PgmqError {
    pub(crate) fn operation(
        operation: &'static str,
        queue: impl Into<String>,
        source: sqlx::Error,
    ) -> Self {
        Self::Operation {
            operation,
            queue: queue.into(),
            source,
        }
    }

    /// Whether the underlying failure is plausibly transient (connection
    /// churn, pool timeout) as opposed to a schema or usage error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Operation { source, .. } => matches!(
                source,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Self::Serialization(_) => false,
        }
    }
}
