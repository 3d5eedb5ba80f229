//! # Messaging
//!
//! The queue port and its providers.
//!
//! Two logical queues drive the kernel: the **job queue** (one message per
//! stage of a job) and the **task queue** (one message per task delivery).
//! The transport contract is at-least-once with per-message locks
//! (visibility timeouts), explicit acknowledgement, and lock renewal.
//! Transport-level redelivery counting is not used for retries — retry is
//! an explicit kernel concern carried in the task message itself.
//!
//! Layout mirrors the port/provider split used elsewhere in the workspace:
//!
//! - [`service`] — the `QueueService` trait, message wrapper types, and the
//!   `QueueProvider` enum (PGMQ or in-memory, enum dispatch)
//! - [`client`] — the domain facade (`MessageClient`) the kernel talks to
//! - [`router`] — queue name resolution
//! - [`messages`] — the two wire payloads

pub mod client;
mod error;
pub mod messages;
pub mod router;
pub mod service;

pub use client::MessageClient;
pub use error::MessagingError;
pub use messages::{JobMessage, TaskMessage};
pub use router::QueueRouter;
pub use service::{QueueProvider, QueueService, QueueStats, QueuedMessage, ReceiptHandle};
