//! # Retry Policy
//!
//! All retry decisions live here so the kernel and invoker stay
//! declarative.
//!
//! Two distinct mechanisms:
//!
//! - **Inline transient retry** — state-store and queue transients are
//!   retried with exponential backoff inside the operation, bounded by
//!   attempt count. The message is not re-queued for these.
//! - **Task retry** — a failed handler is retried by requeueing the task
//!   (CAS `processing → queued`, counter += 1) and re-enqueueing the task
//!   message with the incremented counter, bounded by `max_retries`.
//!   Transport-level redelivery counting plays no part.

use std::time::Duration;

use conveyor_shared::config::RetryConfig;
use conveyor_shared::errors::FailureKind;

/// Attempts made for inline transient retries (first try included)
const TRANSIENT_ATTEMPTS: u32 = 3;

/// Decisions about what gets retried and how long to wait
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Whether a task that failed with `kind` on attempt `retry_count`
    /// should be requeued for another attempt
    pub fn should_retry_task(&self, kind: FailureKind, retry_count: u32) -> bool {
        kind.is_retryable() && retry_count < self.config.max_retries
    }

    /// Exponential backoff with full jitter, capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as u64;
        let cap = self.config.backoff_cap.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16)).min(cap);
        Duration::from_millis(fastrand_range(exp / 2, exp.max(1)))
    }

    /// Run `op`, retrying transient failures with backoff.
    ///
    /// `is_transient` classifies the error; anything else propagates on
    /// first occurrence.
    pub async fn retry_transient<T, E, F, Fut>(
        &self,
        mut op: F,
        is_transient: fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if is_transient(&error) && attempt + 1 < TRANSIENT_ATTEMPTS => {
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn fastrand_range(low: u64, high: u64) -> u64 {
    if low >= high {
        return high;
    }
    fastrand::u64(low..=high)
}
