//! # Queue Payloads
//!
//! The two wire shapes the kernel consumes. All fields are explicit and
//! unknown fields are rejected (`deny_unknown_fields`) so schema drift
//! between producers and consumers fails loudly instead of silently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::StageResults;

/// Instructs the kernel to process one stage of a job.
///
/// `stage_results` carries the results accumulated so far; the fan-out hook
/// for stage `s` receives the entry for `s - 1` as its previous-stage
/// input. `correlation_id` is the message correlation token generated at
/// submission and propagated through every stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobMessage {
    pub job_id: String,
    pub job_type: String,
    /// Stage to fan out, 1-indexed
    pub stage: u32,
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub stage_results: StageResults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl JobMessage {
    /// The initial message enqueued at submission time
    pub fn initial(
        job_id: String,
        job_type: String,
        parameters: Map<String, Value>,
        correlation_id: String,
    ) -> Self {
        Self {
            job_id,
            job_type,
            stage: 1,
            parameters,
            stage_results: StageResults::new(),
            correlation_id: Some(correlation_id),
        }
    }
}

/// Instructs the kernel to execute one task delivery.
///
/// `retry_count` is the attempt counter: the kernel bumps it when it
/// requeues a failed task, and deliveries whose counter lags the task
/// row's are stale duplicates to be discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskMessage {
    pub task_id: String,
    pub parent_job_id: String,
    pub job_type: String,
    pub task_type: String,
    pub stage: u32,
    pub task_index: u32,
    pub parameters: Value,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_message_roundtrip() {
        let msg = JobMessage::initial(
            "a".repeat(64),
            "greeting".into(),
            json!({"n": 3}).as_object().unwrap().clone(),
            "tok12345".into(),
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["stage"], 1);
        assert_eq!(value["correlation_id"], "tok12345");
        let back: JobMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_job_message_rejects_unknown_fields() {
        let raw = json!({
            "job_id": "x", "job_type": "t", "stage": 1,
            "parameters": {}, "surprise": true
        });
        assert!(serde_json::from_value::<JobMessage>(raw).is_err());
    }

    #[test]
    fn test_job_message_stage_results_default_to_empty() {
        let raw = json!({"job_id": "x", "job_type": "t", "stage": 2, "parameters": {}});
        let msg: JobMessage = serde_json::from_value(raw).unwrap();
        assert!(msg.stage_results.is_empty());
        assert!(msg.correlation_id.is_none());
    }

    #[test]
    fn test_task_message_roundtrip_with_defaults() {
        let raw = json!({
            "task_id": "01234567-s1-0",
            "parent_job_id": "x",
            "job_type": "greeting",
            "task_type": "greet",
            "stage": 1,
            "task_index": 0,
            "parameters": {"who": "world"}
        });
        let msg: TaskMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.retry_count, 0);
        assert!(msg.correlation_id.is_none());
    }

    #[test]
    fn test_task_message_rejects_unknown_fields() {
        let raw = json!({
            "task_id": "t", "parent_job_id": "j", "job_type": "g",
            "task_type": "greet", "stage": 1, "task_index": 0,
            "parameters": {}, "extra": 1
        });
        assert!(serde_json::from_value::<TaskMessage>(raw).is_err());
    }
}
