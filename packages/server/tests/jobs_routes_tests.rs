//! Route tests over the in-memory store and mock worker pool.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use outreach_jobs::testing::{MockFailure, MockWorkerPool};
use outreach_jobs::{ControlApi, ControlConfig, MemoryJobStore};
use outreach_server::server::build_app;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, Arc<MockWorkerPool>) {
    let pool = Arc::new(MockWorkerPool::new());
    let control = ControlApi::new(
        Arc::new(MemoryJobStore::new()),
        pool.clone(),
        ControlConfig::default(),
    );
    (build_app(control), pool)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, urls: &[&str]) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/jobs",
        Some(json!({ "name": "spring outreach", "urls": urls })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn create_and_read_job() {
    let (app, _) = app();
    let id = create(&app, &["https://a.example", "https://b.example"]).await;

    let (status, body) = call(&app, Method::GET, &format!("/jobs/{id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "pending");
    assert_eq!(body["total_items"], 2);
    assert_eq!(body["name"], "spring outreach");

    let (status, items) = call(&app, Method::GET, &format!("/jobs/{id}/items"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(items.as_array().unwrap().len(), 2);
    assert_eq!(items[0]["item_state"], "queued");
}

#[tokio::test]
async fn lifecycle_over_http() {
    let (app, _) = app();
    let id = create(&app, &["https://a.example"]).await;

    let (status, body) = call(&app, Method::POST, &format!("/jobs/{id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");

    let (_, body) = call(&app, Method::POST, &format!("/jobs/{id}/pause"), None).await;
    assert_eq!(body["state"], "paused");

    let (_, body) = call(&app, Method::POST, &format!("/jobs/{id}/resume"), None).await;
    assert_eq!(body["state"], "running");

    let (_, body) = call(&app, Method::POST, &format!("/jobs/{id}/stop"), None).await;
    assert_eq!(body["state"], "failed");
    assert_eq!(body["error_message"], "stopped by request");
}

#[tokio::test]
async fn illegal_transition_is_conflict() {
    let (app, _) = app();
    let id = create(&app, &["https://a.example"]).await;

    let (status, body) = call(&app, Method::POST, &format!("/jobs/{id}/resume"), None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_transition");
    assert!(body["message"].as_str().unwrap().contains("resume"));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (app, _) = app();
    let id = uuid::Uuid::now_v7();

    let (status, body) = call(&app, Method::GET, &format!("/jobs/{id}"), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn saturated_pool_is_service_unavailable() {
    let (app, pool) = app();
    let id = create(&app, &["https://a.example"]).await;
    pool.fail_submissions(MockFailure::Saturated);

    let (status, body) = call(&app, Method::POST, &format!("/jobs/{id}/start"), None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "dispatch_unavailable");

    let (_, body) = call(&app, Method::GET, &format!("/jobs/{id}"), None).await;
    assert_eq!(body["state"], "pending");
}

#[tokio::test]
async fn rejected_dispatch_is_unprocessable() {
    let (app, pool) = app();
    let id = create(&app, &["https://a.example"]).await;
    pool.fail_submissions(MockFailure::Rejected);

    let (status, body) = call(&app, Method::POST, &format!("/jobs/{id}/start"), None).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "dispatch_rejected");
}

#[tokio::test]
async fn webhook_completes_job() {
    let (app, pool) = app();
    let id = create(&app, &["https://a.example", "https://b.example"]).await;
    call(&app, Method::POST, &format!("/jobs/{id}/start"), None).await;

    let (task_id, batch) = pool.last_submission().unwrap();
    let results: Vec<Value> = batch
        .work_item_ids()
        .iter()
        .map(|item| json!({ "work_item_id": item, "outcome": "success", "payload": "sent" }))
        .collect();
    let event = json!({ "external_task_id": task_id, "status": "success", "results": results });

    let (status, body) = call(&app, Method::POST, "/worker/events", Some(event.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 2);
    assert_eq!(body["finalized"], "completed");

    let (_, body) = call(&app, Method::POST, "/worker/events", Some(event)).await;
    assert_eq!(body["duplicates"], 2);

    let (_, body) = call(&app, Method::GET, &format!("/jobs/{id}"), None).await;
    assert_eq!(body["state"], "completed");
    assert_eq!(body["completed_items"], 2);
}

#[tokio::test]
async fn webhook_for_unknown_task_is_not_found() {
    let (app, _) = app();

    let (status, _) = call(
        &app,
        Method::POST,
        "/worker/events",
        Some(json!({ "external_task_id": "missing", "status": "started" })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_store() {
    let (app, _) = app();

    let (status, body) = call(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["running_jobs"], 0);
}
