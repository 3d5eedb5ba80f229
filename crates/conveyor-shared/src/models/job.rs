//! # Job Record
//!
//! One row per client request. The record is append-mostly: `stage` only
//! advances by one, `stage_results` accumulates monotonically, and the
//! terminal statuses are absorbing. Rows are never deleted by the kernel —
//! retention is an operator concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::errors::StructuredError;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses are absorbing: no further state changes are valid
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated per-stage results.
///
/// Keys are stage numbers rendered as strings (stable JSON object keys);
/// values are the stage's task results ordered by task index. A stage's
/// entry is only ever written atomically with the advancement past that
/// stage (or with job completion for the final stage).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageResults(pub BTreeMap<String, Vec<Value>>);

impl StageResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self, stage: u32) -> Option<&[Value]> {
        self.0.get(&stage.to_string()).map(Vec::as_slice)
    }

    pub fn insert_stage(&mut self, stage: u32, results: Vec<Value>) {
        self.0.insert(stage.to_string(), results);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of task results across all recorded stages
    pub fn total_results(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

/// Durable job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// 64-hex-char deterministic identifier (see [`crate::identity::job_id`])
    pub job_id: String,
    pub job_type: String,
    /// Validated parameter map (defaults applied)
    pub parameters: Map<String, Value>,
    pub status: JobStatus,
    /// Current stage, 1-indexed; advances monotonically by exactly 1
    pub stage: u32,
    pub total_stages: u32,
    pub stage_results: StageResults,
    /// Final aggregated result, populated on completion
    pub result_data: Option<Value>,
    /// Populated on failure
    pub error: Option<StructuredError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Build a freshly submitted job at stage 1 with status `queued`
    pub fn new(
        job_id: String,
        job_type: String,
        parameters: Map<String, Value>,
        total_stages: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            job_type,
            parameters,
            status: JobStatus::Queued,
            stage: 1,
            total_stages,
            stage_results: StageResults::new(),
            result_data: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Queued).unwrap(), "\"queued\"");
        let s: JobStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(s, JobStatus::Failed);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("cancelled"), None);
    }

    #[test]
    fn test_stage_results_keys_are_strings() {
        let mut results = StageResults::new();
        results.insert_stage(1, vec![json!("a"), json!("b")]);
        results.insert_stage(2, vec![json!("c")]);

        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["1"], json!(["a", "b"]));
        assert_eq!(value["2"], json!(["c"]));
        assert_eq!(results.total_results(), 3);
        assert_eq!(results.stage(1).unwrap().len(), 2);
        assert!(results.stage(3).is_none());
    }

    #[test]
    fn test_new_job_starts_queued_at_stage_one() {
        let job = JobRecord::new(
            "a".repeat(64),
            "greeting".into(),
            Map::new(),
            2,
        );
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stage, 1);
        assert!(job.stage_results.is_empty());
        assert!(job.result_data.is_none());
        assert!(!job.is_terminal());
    }
}
