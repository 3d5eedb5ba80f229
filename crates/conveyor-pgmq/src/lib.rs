//! # conveyor-pgmq
//!
//! Thin client for the [PGMQ](https://github.com/pgmq/pgmq) PostgreSQL
//! extension, speaking the `pgmq.*` SQL API directly over `sqlx`.
//!
//! PGMQ gives us the queue contract the orchestration layer needs without a
//! separate broker process:
//!
//! - **At-least-once delivery** with per-message visibility timeouts
//! - **Explicit acknowledgement** via `archive` (ack) and `delete` (drop)
//! - **Lock renewal** via `set_vt`
//! - **Transactional co-location** with the job/task catalog (same database)

mod client;
mod error;

pub use client::{PgmqClient, PgmqMessage, QueueMetrics};
pub use error::{PgmqError, PgmqResult};
