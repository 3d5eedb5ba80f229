//! # Checkpoints
//!
//! Structured lifecycle logging. Every kernel operation emits checkpoint
//! records over `tracing` with a fixed field set, so one job's whole
//! lifecycle can be filtered from the log stream by `job_id` (or by
//! `correlation_id` for a single stage transition).
//!
//! Three id concepts stay distinct and are never conflated:
//!
//! - the external request id (HTTP tracing, optional, not ours to mint)
//! - the per-invocation id (one consumer-loop iteration, logging only)
//! - the message correlation token (field on queue messages, propagated
//!   from submission through every stage transition)

use std::time::Instant;
use tracing::{info, warn};

/// Enumerated checkpoint codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointCode {
    JobSubmit,
    JobStart,
    StageFanout,
    StageEmpty,
    TaskStart,
    HandlerExec,
    TaskRetry,
    StageLastTask,
    StageComplete,
    StageAdvFail,
    JobComplete,
    JobFail,
    JanitorSweep,
    JanitorReap,
}

impl CheckpointCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobSubmit => "JOB_SUBMIT",
            Self::JobStart => "JOB_START",
            Self::StageFanout => "STAGE_FANOUT",
            Self::StageEmpty => "STAGE_EMPTY",
            Self::TaskStart => "TASK_START",
            Self::HandlerExec => "HANDLER_EXEC",
            Self::TaskRetry => "TASK_RETRY",
            Self::StageLastTask => "STAGE_LAST_TASK",
            Self::StageComplete => "STAGE_COMPLETE",
            Self::StageAdvFail => "STAGE_ADV_FAIL",
            Self::JobComplete => "JOB_COMPLETE",
            Self::JobFail => "JOB_FAIL",
            Self::JanitorSweep => "JANITOR_SWEEP",
            Self::JanitorReap => "JANITOR_REAP",
        }
    }
}

impl std::fmt::Display for CheckpointCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checkpoint in flight; emit with [`Checkpoint::ok`] / [`Checkpoint::fail`]
#[derive(Debug, Clone)]
pub struct Checkpoint {
    code: CheckpointCode,
    correlation_id: Option<String>,
    job_id: Option<String>,
    task_id: Option<String>,
    stage: Option<u32>,
    started: Instant,
}

impl Checkpoint {
    pub fn start(code: CheckpointCode) -> Self {
        Self {
            code,
            correlation_id: None,
            job_id: None,
            task_id: None,
            stage: None,
            started: Instant::now(),
        }
    }

    pub fn correlation(mut self, correlation_id: Option<&str>) -> Self {
        self.correlation_id = correlation_id.map(str::to_string);
        self
    }

    pub fn job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn stage(mut self, stage: u32) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Emit the success record with elapsed duration
    pub fn ok(self) {
        info!(
            code = %self.code,
            phase = "ok",
            correlation_id = self.correlation_id.as_deref().unwrap_or("-"),
            job_id = self.job_id.as_deref().unwrap_or("-"),
            task_id = self.task_id.as_deref().unwrap_or("-"),
            stage = self.stage,
            duration_ms = self.started.elapsed().as_millis() as u64,
            "checkpoint"
        );
    }

    /// Emit the failure record with the error kind
    pub fn fail(self, error_kind: &str) {
        warn!(
            code = %self.code,
            phase = "fail",
            correlation_id = self.correlation_id.as_deref().unwrap_or("-"),
            job_id = self.job_id.as_deref().unwrap_or("-"),
            task_id = self.task_id.as_deref().unwrap_or("-"),
            stage = self.stage,
            duration_ms = self.started.elapsed().as_millis() as u64,
            error_kind = error_kind,
            "checkpoint"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings_are_screaming_snake() {
        assert_eq!(CheckpointCode::StageLastTask.as_str(), "STAGE_LAST_TASK");
        assert_eq!(CheckpointCode::JobComplete.as_str(), "JOB_COMPLETE");
    }

    #[test]
    fn test_checkpoint_builder_emits_without_panicking() {
        Checkpoint::start(CheckpointCode::TaskStart)
            .correlation(Some("tok12345"))
            .job("j")
            .task("t")
            .stage(1)
            .ok();
        Checkpoint::start(CheckpointCode::JobFail)
            .job("j")
            .fail("handler_failure");
    }
}
