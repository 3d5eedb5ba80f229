//! # Control-Plane API
//!
//! Thin HTTP adapter over the submission service and the read side of the
//! state store. Three resources from the public contract plus a progress
//! view and a health probe:
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | `POST` | `/jobs/submit/{job_type}` | validate + enqueue, `202` |
//! | `GET` | `/jobs/status/{job_id}` | full job record |
//! | `GET` | `/jobs/{job_id}/tasks` | task list (`stage`/`status`/`limit`) |
//! | `GET` | `/jobs/{job_id}/progress` | per-stage counts |
//! | `GET` | `/health` | liveness of store + queues |

mod routes;
mod types;

pub use types::{SubmitResponse, TasksResponse};

use axum::routing::{get, post};
use axum::Router;

use crate::core::SystemCore;
use crate::submission::SubmissionService;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub core: SystemCore,
    pub submission: SubmissionService,
}

/// Build the API router over a system core
pub fn router(core: SystemCore) -> Router {
    let state = AppState {
        submission: SubmissionService::new(core.clone()),
        core,
    };
    Router::new()
        .route("/jobs/submit/{job_type}", post(routes::submit_job))
        .route("/jobs/status/{job_id}", get(routes::job_status))
        .route("/jobs/{job_id}/tasks", get(routes::job_tasks))
        .route("/jobs/{job_id}/progress", get(routes::job_progress))
        .route("/health", get(routes::health))
        .with_state(state)
}
