//! PGMQ client over a sqlx connection pool.
//!
//! All operations map 1:1 onto functions of the `pgmq` extension. Queue
//! names are passed as bind parameters; PGMQ validates them server-side.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::{PgmqError, PgmqResult};

/// A message read from a PGMQ queue.
///
/// `read_ct` counts deliveries (1 on first read); `vt` is the timestamp at
/// which the message becomes visible to other consumers again.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub vt: DateTime<Utc>,
    pub message: Value,
}

/// Point-in-time metrics for a single queue
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    pub queue_name: String,
    pub message_count: i64,
    pub oldest_message_age_seconds: Option<i64>,
}

/// Client for the PGMQ SQL API
#[derive(Debug, Clone)]
pub struct PgmqClient {
    pool: PgPool,
}

impl PgmqClient {
    /// Connect to the database at `database_url`
    pub async fn new(database_url: &str) -> PgmqResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(PgmqError::Connection)?;
        Ok(Self { pool })
    }

    /// Build a client over an externally managed pool
    ///
    /// Preferred when pool sizing is owned by the application's configuration
    /// layer and the catalog and queues share one database.
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a queue if it does not already exist (idempotent)
    pub async fn create_queue(&self, queue_name: &str) -> PgmqResult<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| PgmqError::operation("create", queue_name, e))?;
        debug!(queue = %queue_name, "pgmq queue ensured");
        Ok(())
    }

    /// Drop a queue and its archive
    pub async fn drop_queue(&self, queue_name: &str) -> PgmqResult<()> {
        sqlx::query("SELECT pgmq.drop_queue($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| PgmqError::operation("drop_queue", queue_name, e))?;
        Ok(())
    }

    /// Send a JSON-serializable message; returns the assigned message id
    pub async fn send_json_message<T: Serialize>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> PgmqResult<i64> {
        let payload = serde_json::to_value(message)?;
        let msg_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(&payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PgmqError::operation("send", queue_name, e))?;
        Ok(msg_id)
    }

    /// Send a batch of messages inside one transaction
    ///
    /// The batch is all-or-nothing: if any send fails the transaction rolls
    /// back and no message becomes visible.
    pub async fn send_batch<T: Serialize>(
        &self,
        queue_name: &str,
        messages: &[T],
    ) -> PgmqResult<Vec<i64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PgmqError::operation("send_batch", queue_name, e))?;

        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            let payload = serde_json::to_value(message)?;
            let msg_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2)")
                .bind(queue_name)
                .bind(&payload)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| PgmqError::operation("send_batch", queue_name, e))?;
            ids.push(msg_id);
        }

        tx.commit()
            .await
            .map_err(|e| PgmqError::operation("send_batch", queue_name, e))?;
        Ok(ids)
    }

    /// Read up to `limit` messages, locking each for `vt_seconds`
    pub async fn read_messages(
        &self,
        queue_name: &str,
        vt_seconds: Option<i32>,
        limit: Option<i32>,
    ) -> PgmqResult<Vec<PgmqMessage>> {
        let rows = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(vt_seconds.unwrap_or(30))
        .bind(limit.unwrap_or(1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PgmqError::operation("read", queue_name, e))?;

        rows.into_iter()
            .map(|row| {
                Ok(PgmqMessage {
                    msg_id: row
                        .try_get("msg_id")
                        .map_err(|e| PgmqError::operation("read", queue_name, e))?,
                    read_ct: row
                        .try_get("read_ct")
                        .map_err(|e| PgmqError::operation("read", queue_name, e))?,
                    enqueued_at: row
                        .try_get("enqueued_at")
                        .map_err(|e| PgmqError::operation("read", queue_name, e))?,
                    vt: row
                        .try_get("vt")
                        .map_err(|e| PgmqError::operation("read", queue_name, e))?,
                    message: row
                        .try_get("message")
                        .map_err(|e| PgmqError::operation("read", queue_name, e))?,
                })
            })
            .collect()
    }

    /// Read and delete one message in a single step (no visibility window)
    pub async fn pop_message(&self, queue_name: &str) -> PgmqResult<Option<PgmqMessage>> {
        let row = sqlx::query("SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.pop($1)")
            .bind(queue_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PgmqError::operation("pop", queue_name, e))?;

        row.map(|row| {
            Ok(PgmqMessage {
                msg_id: row
                    .try_get("msg_id")
                    .map_err(|e| PgmqError::operation("pop", queue_name, e))?,
                read_ct: row
                    .try_get("read_ct")
                    .map_err(|e| PgmqError::operation("pop", queue_name, e))?,
                enqueued_at: row
                    .try_get("enqueued_at")
                    .map_err(|e| PgmqError::operation("pop", queue_name, e))?,
                vt: row
                    .try_get("vt")
                    .map_err(|e| PgmqError::operation("pop", queue_name, e))?,
                message: row
                    .try_get("message")
                    .map_err(|e| PgmqError::operation("pop", queue_name, e))?,
            })
        })
        .transpose()
    }

    /// Acknowledge a message by moving it to the queue's archive table
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> PgmqResult<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PgmqError::operation("archive", queue_name, e))?;
        Ok(())
    }

    /// Permanently delete a message (dead-letter drop)
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> PgmqResult<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PgmqError::operation("delete", queue_name, e))?;
        Ok(())
    }

    /// Reset a message's visibility timeout to `vt_seconds` from now
    ///
    /// `0` makes the message immediately visible again (requeue); a positive
    /// value extends the current consumer's lock (renewal).
    pub async fn set_visibility_timeout(
        &self,
        queue_name: &str,
        msg_id: i64,
        vt_seconds: i32,
    ) -> PgmqResult<()> {
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(vt_seconds)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PgmqError::operation("set_vt", queue_name, e))?;
        Ok(())
    }

    /// Metrics for a single queue
    pub async fn queue_metrics(&self, queue_name: &str) -> PgmqResult<QueueMetrics> {
        let row = sqlx::query(
            "SELECT queue_name, queue_length, oldest_msg_age_sec FROM pgmq.metrics($1)",
        )
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PgmqError::operation("metrics", queue_name, e))?;

        let oldest: Option<i32> = row
            .try_get("oldest_msg_age_sec")
            .map_err(|e| PgmqError::operation("metrics", queue_name, e))?;

        Ok(QueueMetrics {
            queue_name: row
                .try_get("queue_name")
                .map_err(|e| PgmqError::operation("metrics", queue_name, e))?,
            message_count: row
                .try_get("queue_length")
                .map_err(|e| PgmqError::operation("metrics", queue_name, e))?,
            oldest_message_age_seconds: oldest.map(i64::from),
        })
    }

    /// Verify connectivity with a trivial round-trip
    pub async fn health_check(&self) -> PgmqResult<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(PgmqError::Connection)?;
        Ok(true)
    }
}
