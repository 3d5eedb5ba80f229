//! Janitor recovery scenarios: a worker dies mid-handler and the stage
//! still reaches a terminal decision within one sweep.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::harness;
use conveyor_orchestration::janitor::Janitor;
use conveyor_shared::config::JanitorConfig;
use conveyor_shared::errors::FailureKind;
use conveyor_shared::models::{JobStatus, TaskStatus};
use conveyor_shared::state::{StateStore, TaskFilter, TaskStartOutcome};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn instant_janitor(h: &common::Harness) -> Janitor {
    Janitor::new(
        h.kernel.clone(),
        JanitorConfig {
            // Zero threshold: anything processing is immediately stale
            stale_threshold: Duration::ZERO,
            sweep_interval: Duration::from_secs(3600),
        },
        CancellationToken::new(),
    )
}

/// Claim every visible stage-`stage` task as if a worker picked it up and
/// then died before settling anything.
async fn crash_workers_mid_stage(h: &common::Harness, expected: usize) {
    let messages = h
        .core
        .messaging()
        .receive_task_messages(64, Duration::from_secs(120))
        .await
        .unwrap();
    assert_eq!(messages.len(), expected);
    for message in &messages {
        let outcome = h
            .core
            .state()
            .start_task(&message.message.task_id, message.message.retry_count)
            .await
            .unwrap();
        assert_eq!(outcome, TaskStartOutcome::Started);
    }
}

#[tokio::test]
async fn test_janitor_fails_stage_after_worker_death() {
    let h = harness().await;
    let (job_id, _, _) = h.submit("greeting", json!({"n": 2})).await;

    // Fan out, then simulate two workers dying mid-handler
    h.job_consumer.process_batch().await.unwrap();
    crash_workers_mid_stage(&h, 2).await;

    let janitor = instant_janitor(&h);
    let reaped = janitor.sweep().await.unwrap();
    assert_eq!(reaped, 2);

    let job = h.core.state().get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, FailureKind::StaleTimeout);

    let failed = h
        .core
        .state()
        .get_tasks(&job_id, &TaskFilter::all().with_status(TaskStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed
        .iter()
        .all(|t| t.error_details.as_ref().unwrap().kind == FailureKind::StaleTimeout));
}

#[tokio::test]
async fn test_janitor_ignores_live_and_terminal_tasks() {
    let h = harness().await;
    let (job_id, _, _) = h.submit("greeting", json!({"n": 2})).await;

    // Run to completion, then sweep: nothing to reap
    let job = h.run_to_terminal(&job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let janitor = instant_janitor(&h);
    assert_eq!(janitor.sweep().await.unwrap(), 0);

    // Fresh heartbeats survive a generous threshold
    let (job2, _, _) = h.submit("greeting", json!({"n": 3})).await;
    h.job_consumer.process_batch().await.unwrap();
    crash_workers_mid_stage(&h, 3).await;

    let lenient = Janitor::new(
        h.kernel.clone(),
        JanitorConfig {
            stale_threshold: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(3600),
        },
        CancellationToken::new(),
    );
    assert_eq!(lenient.sweep().await.unwrap(), 0);
    let job2_record = h.core.state().get_job(&job2).await.unwrap();
    assert_eq!(job2_record.status, JobStatus::Processing);
}

#[tokio::test]
async fn test_janitor_reap_of_partial_stage_advances_decision() {
    // One of two tasks completes normally; the other's worker dies. The
    // janitor's reap is what completes the stage (as a failure).
    let h = harness().await;
    let (job_id, _, _) = h.submit("greeting", json!({"n": 2})).await;
    h.job_consumer.process_batch().await.unwrap();

    let messages = h
        .core
        .messaging()
        .receive_task_messages(2, Duration::from_secs(120))
        .await
        .unwrap();

    // First task runs normally through the kernel
    h.kernel.process_task_message(&messages[0].message).await.unwrap();

    // Second worker claims its task and dies
    let outcome = h
        .core
        .state()
        .start_task(&messages[1].message.task_id, 0)
        .await
        .unwrap();
    assert_eq!(outcome, TaskStartOutcome::Started);

    let janitor = instant_janitor(&h);
    assert_eq!(janitor.sweep().await.unwrap(), 1);

    let job = h.core.state().get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().kind, FailureKind::StaleTimeout);
}

#[tokio::test]
async fn test_stopped_janitor_loop_exits() {
    let h = harness().await;
    let shutdown = CancellationToken::new();
    let janitor = Janitor::new(
        h.kernel.clone(),
        JanitorConfig {
            stale_threshold: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(10),
        },
        shutdown.clone(),
    );

    let handle = tokio::spawn(janitor.run());
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("janitor loop should exit on cancellation")
        .unwrap();
}
