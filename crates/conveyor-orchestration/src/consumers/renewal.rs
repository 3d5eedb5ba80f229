//! # Lock Renewal
//!
//! The transport lock taken at receive time is short (order of minutes);
//! handlers may legitimately run longer. Each in-flight message gets a
//! renewal task that extends the lock at ~80% of the lock period, up to
//! the configured ceiling. Past the ceiling the guard stops renewing — the
//! lock lapses, the message becomes visible again, and the task becomes a
//! candidate for re-execution. A handler that routinely outruns the
//! ceiling is a design error, not something renewal should paper over.
//!
//! For task messages the guard also refreshes the task row's heartbeat so
//! the janitor can tell a live long-runner from a dead worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use conveyor_shared::messaging::{MessageClient, ReceiptHandle};
use conveyor_shared::state::{StateStore, StateStoreProvider};

/// Minimum renewal tick, protects against pathological lock periods
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to a running renewal task; call [`RenewalGuard::finish`] once
/// the message is settled.
#[derive(Debug)]
pub struct RenewalGuard {
    token: CancellationToken,
}

impl RenewalGuard {
    /// Spawn a renewal task for one in-flight message.
    ///
    /// `heartbeat` carries the state store and task id for task messages;
    /// job messages pass `None`.
    pub fn spawn(
        messaging: MessageClient,
        queue_name: String,
        receipt_handle: ReceiptHandle,
        lock_period: Duration,
        ceiling: Duration,
        heartbeat: Option<(Arc<StateStoreProvider>, String)>,
    ) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();

        tokio::spawn(async move {
            let renew_every = lock_period.mul_f32(0.8).max(MIN_RENEW_INTERVAL);
            let started = Instant::now();
            loop {
                tokio::select! {
                    _ = child.cancelled() => return,
                    _ = tokio::time::sleep(renew_every) => {}
                }

                if started.elapsed() + lock_period > ceiling {
                    warn!(
                        queue = %queue_name,
                        receipt = %receipt_handle.as_str(),
                        ceiling_secs = ceiling.as_secs(),
                        "renewal ceiling reached, abandoning lock renewal"
                    );
                    return;
                }

                if let Err(e) = messaging
                    .extend_visibility(&queue_name, &receipt_handle, lock_period)
                    .await
                {
                    // Renewal failure is not fatal: worst case the lock
                    // lapses and the message is redelivered.
                    warn!(
                        queue = %queue_name,
                        receipt = %receipt_handle.as_str(),
                        error = %e,
                        "lock renewal failed"
                    );
                    return;
                }
                debug!(
                    queue = %queue_name,
                    receipt = %receipt_handle.as_str(),
                    "lock renewed"
                );

                if let Some((state, task_id)) = &heartbeat {
                    if let Err(e) = state.record_heartbeat(task_id).await {
                        warn!(task_id = %task_id, error = %e, "heartbeat refresh failed");
                    }
                }
            }
        });

        Self { token }
    }

    /// Stop renewing; the message has been settled
    pub fn finish(self) {
        self.token.cancel();
    }
}

impl Drop for RenewalGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_shared::messaging::{MessageClient, QueueProvider, QueueRouter, QueueService};
    use serde_json::json;

    #[tokio::test]
    async fn test_renewal_keeps_message_locked() {
        let provider = Arc::new(QueueProvider::new_in_memory());
        let client = MessageClient::new(provider.clone(), QueueRouter::default());
        client.initialize_queues().await.unwrap();

        let queue = client.router().task_queue().to_string();
        provider.send_message(&queue, &json!({})).await.unwrap();

        // Receive with a tiny lock and let renewal keep it invisible
        let msgs = provider
            .receive_messages(&queue, 1, Duration::from_millis(120))
            .await
            .unwrap();
        let guard = RenewalGuard::spawn(
            client.clone(),
            queue.clone(),
            msgs[0].receipt_handle.clone(),
            Duration::from_millis(120),
            Duration::from_secs(60),
            None,
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        let visible = provider
            .receive_messages(&queue, 1, Duration::from_millis(120))
            .await
            .unwrap();
        assert!(visible.is_empty(), "renewal should keep the message locked");

        guard.finish();
    }

    #[tokio::test]
    async fn test_ceiling_stops_renewal() {
        let provider = Arc::new(QueueProvider::new_in_memory());
        let client = MessageClient::new(provider.clone(), QueueRouter::default());
        client.initialize_queues().await.unwrap();

        let queue = client.router().task_queue().to_string();
        provider.send_message(&queue, &json!({})).await.unwrap();

        let msgs = provider
            .receive_messages(&queue, 1, Duration::from_millis(100))
            .await
            .unwrap();
        // Ceiling below one lock period: the guard gives up on first tick
        let _guard = RenewalGuard::spawn(
            client.clone(),
            queue.clone(),
            msgs[0].receipt_handle.clone(),
            Duration::from_millis(100),
            Duration::from_millis(100),
            None,
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        let visible = provider
            .receive_messages(&queue, 1, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(visible.len(), 1, "lock should lapse after the ceiling");
    }
}
