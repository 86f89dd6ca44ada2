mod common;

use appflow::api::{build_router, AppState};
use appflow::workflow::WorkflowRegistry;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "hook-secret";

struct TestApp {
    router: Router,
    queue: Arc<RecordingQueue>,
    registry: Arc<WorkflowRegistry>,
}

fn stripe_workflow() -> Value {
    json!({
        "id": "wf-billing",
        "appId": 42,
        "ownerId": "owner-1",
        "name": "Billing",
        "nodes": [
            { "id": "hook", "label": "webhook", "category": "trigger", "config": { "source": "stripe" } },
            { "id": "mail", "label": "email.send", "category": "action",
              "config": { "to": "billing@example.com", "subject": "Paid" } },
        ],
        "edges": [{ "source": "hook", "target": "mail" }],
    })
}

async fn app() -> TestApp {
    let h = harness();
    let queue = Arc::new(RecordingQueue::default());
    let registry = Arc::new(WorkflowRegistry::new(Arc::new(MemoryWorkflowStore::default())));
    registry
        .save(serde_json::from_value(stripe_workflow()).unwrap())
        .await
        .unwrap();

    let state = AppState {
        engine: h.engine.clone(),
        queue: queue.clone(),
        registry: registry.clone(),
        webhook_secret: Arc::from(SECRET),
    };
    TestApp {
        router: build_router(state),
        queue,
        registry,
    }
}

async fn send(router: &Router, method: &str, uri: &str, headers: &[(&str, &str)], body: Value) -> (StatusCode, Value) {
    send_raw(router, method, uri, headers, &body.to_string()).await
}

async fn send_raw(router: &Router, method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let request = request.body(Body::from(body.to_string())).unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn webhook_without_secret_is_forbidden() {
    let app = app().await;
    let (status, body) = send(&app.router, "POST", "/workflow/webhook/stripe", &[], json!({ "amount": 10 })).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());
    assert!(app.queue.jobs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_with_wrong_secret_is_forbidden() {
    let app = app().await;
    let (status, _) = send(
        &app.router,
        "POST",
        "/workflow/webhook/stripe",
        &[("x-webhook-secret", "guess")],
        json!({ "amount": 10 }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.queue.jobs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_checks_the_secret_before_reading_the_body() {
    let app = app().await;
    let (status, _) = send_raw(&app.router, "POST", "/workflow/webhook/stripe", &[], "event=paid&amount=10").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send_raw(&app.router, "POST", "/workflow/webhook/stripe", &[], "[1, 2, 3]").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send_raw(
        &app.router,
        "POST",
        "/workflow/webhook/stripe",
        &[("x-webhook-secret", SECRET)],
        "event=paid&amount=10",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.queue.jobs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_for_unknown_source_is_not_found() {
    let app = app().await;
    let (status, _) = send(
        &app.router,
        "POST",
        "/workflow/webhook/github",
        &[("x-webhook-secret", SECRET)],
        json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_enqueues_from_the_trigger_node() {
    let app = app().await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/workflow/webhook/stripe",
        &[],
        json!({ "secret": SECRET, "amount": 10 }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["dispatched"], json!(1));

    let jobs = app.queue.jobs.lock().unwrap();
    let job = &jobs[0];
    assert_eq!(job.app_id, "42");
    assert_eq!(job.user_id, "owner-1");
    assert_eq!(job.start_node.as_deref(), Some("hook"));
    assert_eq!(job.workflow_id.as_deref(), Some("wf-billing"));
    assert_eq!(job.context["webhook"], json!({ "amount": 10 }));
}

#[tokio::test]
async fn execute_returns_results_and_context() {
    let app = app().await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/workflow/execute",
        &[],
        json!({
            "appId": "42",
            "userId": "7",
            "nodes": [{ "id": "submit", "label": "onSubmit", "category": "trigger", "config": { "outputVariable": "form" } }],
            "edges": [],
            "context": { "formData": { "name": "Ada" } },
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["nodeId"], "submit");
    assert_eq!(body["results"][0]["result"]["type"], "onSubmit");
    assert_eq!(body["results"][0]["result"]["success"], json!(true));
    assert_eq!(body["context"]["form"]["name"], "Ada");
}

#[tokio::test]
async fn execute_rejects_invalid_graphs() {
    let app = app().await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/workflow/execute",
        &[],
        json!({
            "appId": "42",
            "nodes": [{ "id": "x", "label": "shell.exec", "category": "action" }],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("shell.exec"));
}

#[tokio::test]
async fn enqueue_accepts_valid_jobs() {
    let app = app().await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/workflow/enqueue",
        &[],
        json!({
            "appId": "42",
            "userId": "7",
            "nodes": [{ "id": "submit", "label": "onSubmit", "category": "trigger" }],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], json!(true));
    assert_eq!(body["jobId"], "job-1");
    assert_eq!(body["mode"], "in-process");
}

#[tokio::test]
async fn stored_workflows_round_trip_through_the_api() {
    let app = app().await;
    let mut workflow = stripe_workflow();
    workflow["id"] = json!("wf-second");
    workflow["nodes"][0]["config"]["source"] = json!("github");

    let (status, _) = send(&app.router, "POST", "/api/workflows", &[], json!({ "workflow": workflow })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.registry.webhook_targets("github").len(), 1);

    let (status, _) = send(&app.router, "POST", "/api/workflows", &[], json!({ "workflow": workflow })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app.router, "GET", "/api/workflows/wf-second", &[], Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Billing");

    let (status, body) = send(&app.router, "GET", "/api/workflows", &[], Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workflows"].as_array().unwrap().len(), 2);

    let (status, _) = send(&app.router, "DELETE", "/api/workflows/wf-second", &[], Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.registry.webhook_targets("github").is_empty());

    let (status, _) = send(&app.router, "GET", "/api/workflows/wf-second", &[], Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn storing_an_invalid_workflow_is_rejected() {
    let app = app().await;
    let mut workflow = stripe_workflow();
    workflow["id"] = json!("wf-broken");
    workflow["edges"] = json!([{ "source": "hook", "target": "ghost" }]);

    let (status, _) = send(&app.router, "POST", "/api/workflows", &[], json!({ "workflow": workflow })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.registry.get_workflow("wf-broken").is_none());
}

#[tokio::test]
async fn health_check_answers_ok() {
    let app = app().await;
    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
