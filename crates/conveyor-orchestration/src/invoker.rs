//! # Handler Invoker
//!
//! Thin wrapper around a registered [`TaskHandler`]:
//!
//! - applies the per-task-type execution timeout
//! - converts panics into structured failures with the captured payload
//! - classifies the outcome into a [`FailureKind`] for the retry policy
//! - emits handler-exec checkpoints with duration
//!
//! Exceptions-as-control-flow stop at this boundary: whatever the handler
//! does, the kernel sees a [`HandlerResult`].

use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conveyor_shared::checkpoints::{Checkpoint, CheckpointCode};
use conveyor_shared::config::ExecutionConfig;
use conveyor_shared::errors::FailureKind;
use conveyor_shared::registry::{HandlerResult, TaskHandler};

/// Outcome of one handler invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub result: HandlerResult,
    /// Classification when `result.success` is false
    pub failure_kind: FailureKind,
    pub duration: Duration,
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        self.result.success
    }
}

/// Executes registered handlers under the configured timeouts
#[derive(Debug, Clone)]
pub struct HandlerInvoker {
    execution: ExecutionConfig,
}

impl HandlerInvoker {
    pub fn new(execution: ExecutionConfig) -> Self {
        Self { execution }
    }

    pub async fn invoke(
        &self,
        task_id: &str,
        task_type: &str,
        handler: Arc<dyn TaskHandler>,
        parameters: &Value,
    ) -> Invocation {
        let timeout = self.execution.handler_timeout(task_type);
        let checkpoint = Checkpoint::start(CheckpointCode::HandlerExec).task(task_id);
        let started = Instant::now();

        let outcome =
            tokio::time::timeout(timeout, AssertUnwindSafe(handler.handle(parameters)).catch_unwind())
                .await;

        let duration = started.elapsed();
        let invocation = match outcome {
            Err(_elapsed) => Invocation {
                result: HandlerResult::failure(format!(
                    "handler '{task_type}' exceeded its {}s timeout",
                    timeout.as_secs()
                )),
                failure_kind: FailureKind::HandlerTimeout,
                duration,
            },
            Ok(Err(panic)) => Invocation {
                result: HandlerResult::failure(format!(
                    "handler '{task_type}' panicked: {}",
                    panic_message(&panic)
                )),
                failure_kind: FailureKind::HandlerFailure,
                duration,
            },
            Ok(Ok(result)) => Invocation {
                failure_kind: FailureKind::HandlerFailure,
                result,
                duration,
            },
        };

        if invocation.succeeded() {
            checkpoint.ok();
        } else {
            checkpoint.fail(invocation.failure_kind.as_str());
        }
        invocation
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(&self, parameters: &Value) -> HandlerResult {
            HandlerResult::ok(parameters.clone())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn handle(&self, _parameters: &Value) -> HandlerResult {
            HandlerResult::failure("refused")
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl TaskHandler for PanickingHandler {
        async fn handle(&self, _parameters: &Value) -> HandlerResult {
            panic!("handler exploded");
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl TaskHandler for SlowHandler {
        async fn handle(&self, _parameters: &Value) -> HandlerResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            HandlerResult::ok(json!(null))
        }
    }

    fn invoker_with_timeout(timeout: Duration) -> HandlerInvoker {
        HandlerInvoker::new(ExecutionConfig {
            default_handler_timeout: timeout,
            ..ExecutionConfig::default()
        })
    }

    #[tokio::test]
    async fn test_successful_invocation() {
        let invoker = invoker_with_timeout(Duration::from_secs(5));
        let invocation = invoker
            .invoke("t-0", "echo", Arc::new(EchoHandler), &json!({"x": 1}))
            .await;
        assert!(invocation.succeeded());
        assert_eq!(invocation.result.result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_structured_failure_keeps_error() {
        let invoker = invoker_with_timeout(Duration::from_secs(5));
        let invocation = invoker
            .invoke("t-0", "fail", Arc::new(FailingHandler), &json!({}))
            .await;
        assert!(!invocation.succeeded());
        assert_eq!(invocation.failure_kind, FailureKind::HandlerFailure);
        assert_eq!(invocation.result.error.as_deref(), Some("refused"));
    }

    #[tokio::test]
    async fn test_panic_becomes_structured_failure() {
        let invoker = invoker_with_timeout(Duration::from_secs(5));
        let invocation = invoker
            .invoke("t-0", "boom", Arc::new(PanickingHandler), &json!({}))
            .await;
        assert!(!invocation.succeeded());
        assert_eq!(invocation.failure_kind, FailureKind::HandlerFailure);
        assert!(invocation.result.error.as_deref().unwrap().contains("handler exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_synthesizes_failure() {
        let invoker = invoker_with_timeout(Duration::from_millis(50));
        let invocation = invoker
            .invoke("t-0", "slow", Arc::new(SlowHandler), &json!({}))
            .await;
        assert!(!invocation.succeeded());
        assert_eq!(invocation.failure_kind, FailureKind::HandlerTimeout);
        assert!(invocation.result.error.as_deref().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_per_type_timeout_override() {
        let mut execution = ExecutionConfig {
            default_handler_timeout: Duration::from_millis(10),
            ..ExecutionConfig::default()
        };
        execution
            .handler_timeout_overrides
            .insert("echo".into(), Duration::from_secs(5));
        let invoker = HandlerInvoker::new(execution);

        // The override gives the echo handler plenty of room
        let invocation = invoker
            .invoke("t-0", "echo", Arc::new(EchoHandler), &json!({}))
            .await;
        assert!(invocation.succeeded());
    }
}
