//! # conveyor-orchestration
//!
//! The orchestration kernel and everything that hosts it: queue consumers,
//! the submission service, the janitor, the control-plane HTTP API, and
//! process bootstrap.
//!
//! ## Control flow
//!
//! ```text
//! submit ──► job queue ──► kernel fan-out ──► task queue ──► handlers
//!                ▲                                               │
//!                │                                   completion detector
//!                └───────────── advance ◄── stage complete ◄─────┘
//! ```
//!
//! The kernel itself is stateless — all authoritative state lives in the
//! state store, every worker process runs the same consumers, and any
//! worker may process any message.

pub mod api;
pub mod bootstrap;
pub mod consumers;
pub mod core;
pub mod invoker;
pub mod janitor;
pub mod jobs;
pub mod kernel;
pub mod retry;
pub mod submission;

pub use crate::bootstrap::{OrchestrationBootstrap, OrchestrationHandle};
pub use crate::core::SystemCore;
pub use crate::kernel::Kernel;
pub use crate::submission::{SubmissionOutcome, SubmissionService};
