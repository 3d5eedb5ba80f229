//! # Orchestration Kernel
//!
//! Two entry points, one per queue:
//!
//! - [`Kernel::process_job_message`] — fan one stage of a job out into
//!   tasks ([`job_processor`])
//! - [`Kernel::process_task_message`] — execute one task delivery and run
//!   the fan-in check ([`task_processor`])
//!
//! plus the stage advancement path shared by both ([`advancement`]).
//!
//! The kernel is a small set of methods over the injected ports; it keeps
//! no state of its own. Both entry points return `Ok(())` when the message
//! is settled (including "we failed the job and recorded why" — that *is*
//! settlement) and `Err` only for transient infrastructure failures, which
//! the consumer answers by abandoning the message for redelivery.
//!
//! CAS conflicts are not errors anywhere in this module: they are the
//! normal signal that a concurrent worker already performed the state
//! change, and the losing side simply acks.

mod advancement;
mod job_processor;
mod task_processor;

use std::sync::Arc;

use conveyor_shared::errors::{FailureKind, StructuredError};
use conveyor_shared::state::{StateStore, StateStoreError};

use crate::core::SystemCore;
use crate::invoker::HandlerInvoker;
use crate::retry::RetryPolicy;

/// The orchestration kernel
#[derive(Debug, Clone)]
pub struct Kernel {
    core: SystemCore,
    invoker: HandlerInvoker,
    retry: RetryPolicy,
}

impl Kernel {
    pub fn new(core: SystemCore) -> Self {
        let invoker = HandlerInvoker::new(core.config().execution.clone());
        let retry = RetryPolicy::new(core.config().retry.clone());
        Self {
            core,
            invoker,
            retry,
        }
    }

    pub fn core(&self) -> &SystemCore {
        &self.core
    }

    pub(crate) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn invoker(&self) -> &HandlerInvoker {
        &self.invoker
    }

    /// Fail the job, treating "already terminal" as settled.
    ///
    /// Returns transient errors for the consumer to retry via redelivery.
    pub(crate) async fn fail_job_settled(
        &self,
        job_id: &str,
        error: StructuredError,
    ) -> Result<(), StateStoreError> {
        match self.core.state().fail_job(job_id, error).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => Ok(()),
            Err(StateStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Shorthand for a job-level failure record
    pub(crate) fn job_error(
        kind: FailureKind,
        message: impl Into<String>,
    ) -> StructuredError {
        StructuredError::new(kind, message)
    }
}

/// Convenience: kernels are cheap to share across consumer tasks
pub type SharedKernel = Arc<Kernel>;
