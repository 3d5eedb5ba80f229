//! Response shapes for the control-plane API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use conveyor_shared::models::{JobStatus, TaskRecord};
use conveyor_shared::state::StageProgress;

/// `202 Accepted` body for submissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub status_url: String,
}

/// Error body for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Query parameters for the task list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListQuery {
    pub stage: Option<u32>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Body of `GET /jobs/{job_id}/tasks`
#[derive(Debug, Clone, Serialize)]
pub struct TasksResponse {
    pub job_id: String,
    pub count: usize,
    pub tasks: Vec<TaskRecord>,
}

/// Body of `GET /jobs/{job_id}/progress`
#[derive(Debug, Clone, Serialize)]
pub struct ProgressResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub stage: u32,
    pub total_stages: u32,
    pub stages: Vec<StageProgress>,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub state_store: bool,
    pub messaging: bool,
    pub detail: Option<Value>,
}
