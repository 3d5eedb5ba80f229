//! Handler functions for the control-plane routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::warn;

use conveyor_shared::models::TaskStatus;
use conveyor_shared::state::{StateStore, StateStoreError, TaskFilter};
use conveyor_shared::ConveyorError;

use super::types::{
    ErrorResponse, HealthResponse, ProgressResponse, SubmitResponse, TaskListQuery, TasksResponse,
};
use super::AppState;

/// `POST /jobs/submit/{job_type}` — validate, dedupe, enqueue
pub async fn submit_job(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    match state.submission.submit(&job_type, &body).await {
        Ok(outcome) => {
            let response = SubmitResponse {
                status_url: format!("/jobs/status/{}", outcome.job_id),
                job_id: outcome.job_id,
                status: outcome.status,
            };
            (StatusCode::ACCEPTED, Json(response)).into_response()
        }
        Err(ConveyorError::UnknownJobType(t)) => error_response(
            StatusCode::NOT_FOUND,
            format!("unknown job type '{t}'"),
        ),
        Err(e @ ConveyorError::InvalidParameters { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            warn!(job_type = %job_type, error = %e, "submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "submission failed")
        }
    }
}

/// `GET /jobs/status/{job_id}` — the full job record
pub async fn job_status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.core.state().get_job(&job_id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(StateStoreError::NotFound { .. }) => {
            error_response(StatusCode::NOT_FOUND, format!("job '{job_id}' not found"))
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "status read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "status read failed")
        }
    }
}

/// `GET /jobs/{job_id}/tasks?stage&status&limit`
pub async fn job_tasks(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<TaskListQuery>,
) -> Response {
    let mut filter = TaskFilter {
        stage: query.stage,
        status: None,
        limit: query.limit,
    };
    if let Some(raw) = &query.status {
        match TaskStatus::parse(raw) {
            Some(status) => filter.status = Some(status),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("'{raw}' is not a task status"),
                )
            }
        }
    }

    // 404 for unknown jobs rather than an empty list
    if let Err(StateStoreError::NotFound { .. }) = state.core.state().get_job(&job_id).await {
        return error_response(StatusCode::NOT_FOUND, format!("job '{job_id}' not found"));
    }

    match state.core.state().get_tasks(&job_id, &filter).await {
        Ok(tasks) => (
            StatusCode::OK,
            Json(TasksResponse {
                job_id,
                count: tasks.len(),
                tasks,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "task read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "task read failed")
        }
    }
}

/// `GET /jobs/{job_id}/progress` — per-stage counts
pub async fn job_progress(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    let job = match state.core.state().get_job(&job_id).await {
        Ok(job) => job,
        Err(StateStoreError::NotFound { .. }) => {
            return error_response(StatusCode::NOT_FOUND, format!("job '{job_id}' not found"))
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "progress read failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "progress read failed");
        }
    };

    match state.core.state().get_stage_progress(&job_id).await {
        Ok(stages) => (
            StatusCode::OK,
            Json(ProgressResponse {
                job_id,
                status: job.status,
                stage: job.stage,
                total_stages: job.total_stages,
                stages,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "progress read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "progress read failed")
        }
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let state_ok = state.core.state().health_check().await.unwrap_or(false);
    let messaging_ok = state.core.messaging().health_check().await.unwrap_or(false);
    let healthy = state_ok && messaging_ok;

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            healthy,
            state_store: state_ok,
            messaging: messaging_ok,
            detail: None,
        }),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}
