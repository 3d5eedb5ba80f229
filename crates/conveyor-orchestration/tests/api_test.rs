//! Control-plane API contract tests over the in-memory core.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::harness;
use conveyor_orchestration::api;

async fn body_json(body: Body) -> Value {
    let bytes = to_bytes(body, 1024 * 1024).await.expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_submit_accepts_and_returns_status_url() {
    let h = harness().await;
    let router = api::router(h.core.clone());

    let response = router
        .oneshot(post("/jobs/submit/greeting", json!({"n": 3})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response.into_body()).await;
    let job_id = body["job_id"].as_str().unwrap();
    assert_eq!(job_id.len(), 64);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["status_url"], format!("/jobs/status/{job_id}"));
}

#[tokio::test]
async fn test_submit_duplicate_returns_same_job_id() {
    let h = harness().await;

    let first = api::router(h.core.clone())
        .oneshot(post("/jobs/submit/greeting", json!({"n": 5})))
        .await
        .unwrap();
    let second = api::router(h.core.clone())
        .oneshot(post("/jobs/submit/greeting", json!({"n": 5})))
        .await
        .unwrap();

    let a = body_json(first.into_body()).await;
    let b = body_json(second.into_body()).await;
    assert_eq!(a["job_id"], b["job_id"]);
}

#[tokio::test]
async fn test_submit_unknown_job_type_is_404() {
    let h = harness().await;
    let response = api::router(h.core.clone())
        .oneshot(post("/jobs/submit/ghost", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_submit_invalid_parameters_is_400() {
    let h = harness().await;
    let response = api::router(h.core.clone())
        .oneshot(post("/jobs/submit/greeting", json!({"n": "three"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("n"));
}

#[tokio::test]
async fn test_status_and_tasks_after_completion() {
    let h = harness().await;
    let (job_id, _, _) = h.submit("greeting", json!({"n": 2})).await;
    h.run_to_terminal(&job_id).await;

    let response = api::router(h.core.clone())
        .oneshot(get(&format!("/jobs/status/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result_data"]["tasks_completed"], 4);

    let response = api::router(h.core.clone())
        .oneshot(get(&format!("/jobs/{job_id}/tasks?stage=1&status=completed")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["count"], 2);

    let response = api::router(h.core.clone())
        .oneshot(get(&format!("/jobs/{job_id}/tasks?limit=1")))
        .await
        .unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_progress_counts_stages() {
    let h = harness().await;
    let (job_id, _, _) = h.submit("greeting", json!({"n": 3})).await;
    h.run_to_terminal(&job_id).await;

    let response = api::router(h.core.clone())
        .oneshot(get(&format!("/jobs/{job_id}/progress")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["total_stages"], 2);
    assert_eq!(body["stages"][0]["completed"], 3);
    assert_eq!(body["stages"][1]["completed"], 3);
}

#[tokio::test]
async fn test_unknown_job_reads_are_404() {
    let h = harness().await;
    let missing = "0".repeat(64);

    for path in [
        format!("/jobs/status/{missing}"),
        format!("/jobs/{missing}/tasks"),
        format!("/jobs/{missing}/progress"),
    ] {
        let response = api::router(h.core.clone()).oneshot(get(&path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn test_bad_status_filter_is_400() {
    let h = harness().await;
    let (job_id, _, _) = h.submit("greeting", json!({"n": 1})).await;

    let response = api::router(h.core.clone())
        .oneshot(get(&format!("/jobs/{job_id}/tasks?status=exploded")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_is_ok_in_memory() {
    let h = harness().await;
    let response = api::router(h.core.clone()).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["healthy"], true);
}
