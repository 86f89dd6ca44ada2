mod common;

use appflow::error::EngineError;
use appflow::runtime::{CancelSignal, ExecutionLimits};
use appflow::workflow::ExecutionResponse;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::*;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn error_of(response: &ExecutionResponse, index: usize) -> String {
    response.results[index].result.error.clone().unwrap_or_default()
}

#[tokio::test]
async fn summarize_checks_file_variable_before_api_key() {
    let h = harness();
    let job = job(
        json!([{ "id": "ai", "label": "ai.summarize", "category": "action",
                 "config": { "fileVariable": "uploadedFile" } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert!(!response.results[0].result.success);
    assert!(error_of(&response, 0).contains("File variable"), "{}", error_of(&response, 0));
}

#[tokio::test]
async fn upload_rejects_disallowed_mime_type() {
    let h = harness();
    let job = job(
        json!([{ "id": "up", "label": "file.upload", "category": "action",
                 "config": { "fileUploadElementId": "fileInput", "allowedFileTypes": "application/pdf" } }]),
        json!([]),
        json!({ "fileInput": { "name": "photo.png", "mimeType": "image/png", "size": 2048 } }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(!response.results[0].result.success);
    assert!(error_of(&response, 0).contains("not allowed"));
    assert!(!response.context.contains_key("lastUploadedFile"));
}

#[tokio::test]
async fn upload_stores_allowed_file() {
    let h = harness();
    let job = job(
        json!([{ "id": "up", "label": "file.upload", "category": "action",
                 "config": { "fileUploadElementId": "fileInput", "allowedFileTypes": ["application/pdf", "image/*"] } }]),
        json!([]),
        json!({ "uploads": { "fileInput": { "name": "cv.pdf", "type": "application/pdf", "size": 100 } } }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(response.results[0].result.success, "{:?}", response.results[0].result.error);
    assert_eq!(response.context["lastUploadedFile"]["url"], "/media/42/cv.pdf");
}

#[tokio::test]
async fn download_from_missing_context_key_fails() {
    let h = harness();
    let job = job(
        json!([{ "id": "down", "label": "file.download", "category": "action",
                 "config": { "downloadSourceType": "context", "downloadContextKey": "missing" } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(!response.results[0].result.success);
    assert!(error_of(&response, 0).contains("No file found"));
}

#[tokio::test]
async fn auth_verify_rejects_wrong_role() {
    let h = harness();
    let token = token(json!({ "sub": "u1", "role": "developer", "exp": in_one_hour() }));
    let job = job(
        json!([{ "id": "auth", "label": "auth.verify", "category": "condition",
                 "config": { "requiredRole": "admin" } }]),
        json!([]),
        json!({ "token": token }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    let result = &response.results[0].result;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("INSUFFICIENT_PERMISSIONS"));
    assert_eq!(result.payload["isAuthenticated"], json!(true));
    assert_eq!(result.payload["isAuthorized"], json!(false));
    assert!(!response.context.contains_key("user"));
}

#[tokio::test]
async fn auth_verify_sets_user_and_takes_true_branch() {
    let h = harness();
    let token = token(json!({ "sub": "u1", "role": "admin", "exp": in_one_hour() }));
    let job = job(
        json!([
            { "id": "auth", "label": "auth.verify", "category": "condition", "config": { "requiredRole": "admin" } },
            { "id": "ok", "label": "email.send", "category": "action",
              "config": { "to": "ops@example.com", "subject": "Welcome {{user.sub}}" } },
            { "id": "denied", "label": "email.send", "category": "action",
              "config": { "to": "ops@example.com", "subject": "Denied" } },
        ]),
        json!([
            { "source": "auth", "target": "ok", "branch": "true" },
            { "source": "auth", "target": "denied", "branch": "false" },
        ]),
        json!({ "token": format!("Bearer {}", token) }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    let visited: Vec<&str> = response.results.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(visited, ["auth", "ok"]);
    assert_eq!(response.context["user"]["sub"], "u1");
    assert_eq!(h.mailer.sent.lock().unwrap()[0].subject, "Welcome u1");
}

#[tokio::test]
async fn every_visited_node_gets_a_result_even_when_all_fail() {
    let h = harness();
    let job = job(
        json!([
            { "id": "a", "label": "email.send", "category": "action", "config": {} },
            { "id": "b", "label": "db.find", "category": "action", "config": {} },
            { "id": "c", "label": "http.request", "category": "action", "config": {} },
        ]),
        json!([{ "source": "a", "target": "b" }, { "source": "b", "target": "c" }]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert_eq!(response.results.len(), 3);
    assert!(response.results.iter().all(|r| !r.result.success));
    assert_eq!(error_of(&response, 0), "to is required");
    assert_eq!(error_of(&response, 1), "tableName is required");
    assert_eq!(error_of(&response, 2), "url is required");
}

#[tokio::test]
async fn update_matching_no_rows_succeeds_with_zero_count() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let job = job(
        json!([{ "id": "upd", "label": "db.update", "category": "action", "config": {
            "tableName": "app_42_contacts",
            "conditions": [{ "field": "email", "operator": "=", "value": "nobody@example.com" }],
            "data": { "status": "archived" },
        } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    let result = &response.results[0].result;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.payload["rowCount"], json!(0));

    let query = &h.store.recorded()[0];
    assert!(query.query.starts_with("UPDATE"));
    assert!(query.query.contains("RETURNING *"));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn update_without_conditions_is_refused() {
    let h = harness();
    let job = job(
        json!([{ "id": "upd", "label": "db.update", "category": "action",
                 "config": { "tableName": "app_42_contacts", "data": { "status": "archived" } } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(error_of(&response, 0).contains("WHERE"));
    assert!(h.store.recorded().is_empty());
}

#[tokio::test]
async fn foreign_tables_never_reach_the_store() {
    let h = harness();
    let job = job(
        json!([{ "id": "find", "label": "db.find", "category": "action",
                 "config": { "tableName": "app_99_contacts" } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(!response.results[0].result.success);
    assert!(error_of(&response, 0).contains("does not belong"));
    assert!(h.store.recorded().is_empty());
}

#[tokio::test]
async fn users_without_the_app_are_denied() {
    let h = harness_with(HarnessOptions {
        owns_app: false,
        ..HarnessOptions::default()
    });
    let job = job(
        json!([{ "id": "find", "label": "db.find", "category": "action",
                 "config": { "tableName": "app_42_contacts" } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(error_of(&response, 0).contains("Access denied"));
    assert!(h.store.recorded().is_empty());
}

#[tokio::test]
async fn form_submission_creates_row_on_filled_branch() {
    let h = harness();
    h.store.returning(vec![json!({ "id": 1, "email": "ada@example.com", "status": null, "age": 36 })]);
    let mut events = h.publisher.subscribe();

    let job = job(
        json!([
            { "id": "submit", "label": "onSubmit", "category": "trigger" },
            { "id": "filled", "label": "isFilled", "category": "condition",
              "config": { "variables": "formData.email" } },
            { "id": "save", "label": "db.create", "category": "action", "config": {
                "tableName": "app_42_contacts",
                "data": { "email": "{{formData.email}}", "age": "{{formData.age}}" },
                "outputVariable": "contact",
            } },
            { "id": "reject", "label": "email.send", "category": "action",
              "config": { "to": "ops@example.com", "subject": "Empty form" } },
        ]),
        json!([
            { "source": "submit", "target": "filled" },
            { "source": "filled", "target": "save", "branch": true },
            { "source": "filled", "target": "reject", "branch": false },
        ]),
        json!({ "formData": { "email": "ada@example.com", "age": "36" } }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    let visited: Vec<&str> = response.results.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(visited, ["submit", "filled", "save"]);
    assert_eq!(response.results[2].result.payload["id"], json!(1));
    assert_eq!(response.context["contact"]["email"], "ada@example.com");

    let insert = &h.store.recorded()[0];
    assert!(insert.query.starts_with("INSERT INTO"));
    assert!(!insert.query.contains("ada@example.com"));
    assert_eq!(insert.params.len(), 2);

    let event = events.recv().await.unwrap();
    assert_eq!(event.channel, "app:42");
    assert_eq!(event.event, "table:changed");
    assert_eq!(event.payload["operation"], "create");
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn injection_attempts_fail_the_block() {
    let h = harness();
    let job = job(
        json!([{ "id": "find", "label": "db.find", "category": "action", "config": {
            "tableName": "app_42_contacts",
            "conditions": [{ "field": "email", "operator": "=", "value": "x' OR 1=1 --" }],
        } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(!response.results[0].result.success);
    assert!(h.store.recorded().is_empty());
}

#[tokio::test]
async fn summarize_reads_file_from_context() {
    let h = harness();
    let job = job(
        json!([{ "id": "ai", "label": "ai.summarize", "category": "action",
                 "config": { "fileVariable": "doc", "apiKey": "sk-test", "outputVariable": "summary" } }]),
        json!([]),
        json!({ "doc": { "name": "notes.txt", "mimeType": "text/plain", "size": 11, "content": "hello world" } }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(response.results[0].result.success, "{:?}", response.results[0].result.error);
    assert_eq!(response.context["summary"], json!("summary of 11 chars"));
}

#[tokio::test]
async fn cycles_visit_each_node_once() {
    let h = harness();
    let job = job(
        json!([
            { "id": "submit", "label": "onSubmit", "category": "trigger" },
            { "id": "check", "label": "match", "category": "condition",
              "config": { "variable": "formData.plan", "value": "pro" } },
            { "id": "notify", "label": "email.send", "category": "action",
              "config": { "to": "sales@example.com", "subject": "New pro user" } },
        ]),
        json!([
            { "source": "submit", "target": "check" },
            { "source": "check", "target": "notify", "branch": "true" },
            { "source": "notify", "target": "check" },
        ]),
        json!({ "formData": { "plan": "pro" } }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert_eq!(response.results.len(), 3);
    assert_eq!(h.mailer.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn false_condition_without_false_edge_ends_the_run() {
    let h = harness();
    let job = job(
        json!([
            { "id": "check", "label": "match", "category": "condition",
              "config": { "variable": "score", "operator": "greaterThan", "value": 10 } },
            { "id": "notify", "label": "email.send", "category": "action",
              "config": { "to": "a@example.com", "subject": "High score" } },
        ]),
        json!([{ "source": "check", "target": "notify", "branch": "true" }]),
        json!({ "score": 3 }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].result.payload["result"], json!(false));
}

#[tokio::test]
async fn invalid_graphs_are_rejected_before_running() {
    let h = harness();
    let job = job(
        json!([
            { "id": "a", "label": "onSubmit", "category": "trigger" },
            { "id": "b", "label": "email.send", "category": "action", "config": { "to": "x@example.com", "subject": "s" } },
            { "id": "c", "label": "email.send", "category": "action", "config": { "to": "y@example.com", "subject": "s" } },
        ]),
        json!([{ "source": "a", "target": "b" }, { "source": "a", "target": "c" }]),
        json!({}),
    );

    assert!(matches!(h.engine.execute(&job).await, Err(EngineError::InvalidGraph(_))));
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn execute_from_starts_at_the_given_node() {
    let h = harness();
    let job = job(
        json!([
            { "id": "submit", "label": "onSubmit", "category": "trigger" },
            { "id": "hook", "label": "webhook", "category": "trigger", "config": { "source": "stripe" } },
            { "id": "mail", "label": "email.send", "category": "action",
              "config": { "to": "billing@example.com", "subject": "Paid {{webhook.amount}}" } },
        ]),
        json!([{ "source": "hook", "target": "mail" }]),
        json!({ "webhook": { "amount": 12 } }),
    );

    let response = h.engine.execute_from(&job, "hook").await.unwrap();
    let visited: Vec<&str> = response.results.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(visited, ["hook", "mail"]);
    assert_eq!(h.mailer.sent.lock().unwrap()[0].subject, "Paid 12");
}

#[tokio::test(start_paused = true)]
async fn slow_blocks_time_out_as_failed_results() {
    let h = harness_with(HarnessOptions {
        summarizer_delay: Duration::from_secs(3600),
        limits: ExecutionLimits {
            block_timeout: Duration::from_secs(1),
            run_timeout: Duration::from_secs(7200),
        },
        ..HarnessOptions::default()
    });
    let job = job(
        json!([
            { "id": "ai", "label": "ai.summarize", "category": "action",
              "config": { "fileVariable": "doc", "apiKey": "sk-test" } },
            { "id": "after", "label": "email.send", "category": "action",
              "config": { "to": "a@example.com", "subject": "done" } },
        ]),
        json!([{ "source": "ai", "target": "after" }]),
        json!({ "doc": { "name": "n.txt", "content": "text" } }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert_eq!(response.results.len(), 2);
    assert!(error_of(&response, 0).contains("timed out"));
    assert!(response.results[1].result.success);
}

#[tokio::test(start_paused = true)]
async fn run_timeout_ends_the_run() {
    let h = harness_with(HarnessOptions {
        summarizer_delay: Duration::from_secs(3600),
        limits: ExecutionLimits {
            block_timeout: Duration::from_secs(7200),
            run_timeout: Duration::from_secs(5),
        },
        ..HarnessOptions::default()
    });
    let job = job(
        json!([{ "id": "ai", "label": "ai.summarize", "category": "action",
                 "config": { "fileVariable": "doc", "apiKey": "sk-test" } }]),
        json!([]),
        json!({ "doc": { "name": "n.txt", "content": "text" } }),
    );

    let outcome = h.engine.execute(&job).await;
    assert!(matches!(outcome, Err(EngineError::TimedOut(_))));
}

#[tokio::test]
async fn cancelled_runs_stop() {
    let h = harness();
    let job = job(
        json!([{ "id": "submit", "label": "onSubmit", "category": "trigger" }]),
        json!([]),
        json!({}),
    );

    let (handle, signal) = CancelSignal::pair();
    handle.cancel();
    let outcome = h.engine.execute_with_cancel(&job, signal).await;
    assert!(matches!(outcome, Err(EngineError::Cancelled)));
}

#[tokio::test]
async fn context_is_returned_with_trigger_data() {
    let h = harness();
    let job = job(
        json!([{ "id": "login", "label": "onLogin", "category": "trigger", "config": { "outputVariable": "who" } }]),
        json!([]),
        json!({ "user": { "id": 5 } }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert_eq!(response.context["who"], json!({ "id": 5 }));
    assert_eq!(response.results[0].result.payload["user"], json!({ "id": 5 }));
    assert_eq!(response.results[0].result.block_type, "onLogin");
    let _: Value = serde_json::to_value(&response).unwrap();
}

/// Local server whose first `rate_limited` calls answer 429
async fn flaky_server(rate_limited: u32) -> (SocketAddr, Arc<AtomicU32>) {
    async fn reply(State((calls, rate_limited)): State<(Arc<AtomicU32>, u32)>) -> Response {
        let seen = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if seen <= rate_limited {
            (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "0")], "slow down").into_response()
        } else {
            Json(json!({ "ok": true, "calls": seen })).into_response()
        }
    }

    let calls = Arc::new(AtomicU32::new(0));
    let router = Router::new()
        .route("/quota", get(reply))
        .with_state((calls.clone(), rate_limited));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, calls)
}

#[tokio::test]
async fn http_request_retries_a_rate_limit_then_succeeds() {
    let (addr, calls) = flaky_server(1).await;
    let h = harness();
    let job = job(
        json!([{ "id": "call", "label": "http.request", "category": "action", "config": {
            "url": format!("http://{}/quota", addr),
            "outputVariable": "reply",
        } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    let result = &response.results[0].result;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.payload["status"], json!(200));
    assert_eq!(result.payload["body"]["ok"], json!(true));
    assert_eq!(response.context["reply"], json!({ "ok": true, "calls": 2 }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn http_request_gives_up_after_repeated_rate_limits() {
    let (addr, calls) = flaky_server(u32::MAX).await;
    let h = harness();
    let job = job(
        json!([{ "id": "call", "label": "http.request", "category": "action",
                 "config": { "url": format!("http://{}/quota", addr) } }]),
        json!([]),
        json!({}),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(!response.results[0].result.success);
    assert!(error_of(&response, 0).contains("rate limit"), "{}", error_of(&response, 0));
    assert_eq!(calls.load(Ordering::SeqCst), appflow::services::retry::MAX_ATTEMPTS);
}

#[tokio::test]
async fn summarize_rejects_word_limits_beyond_u32() {
    let h = harness();
    let job = job(
        json!([{ "id": "ai", "label": "ai.summarize", "category": "action",
                 "config": { "fileVariable": "doc", "apiKey": "sk-test", "maxWords": 5_000_000_000u64 } }]),
        json!([]),
        json!({ "doc": { "name": "notes.txt", "mimeType": "text/plain", "size": 11, "content": "hello world" } }),
    );

    let response = h.engine.execute(&job).await.unwrap();
    assert!(!response.results[0].result.success);
    assert!(error_of(&response, 0).contains("maxWords"), "{}", error_of(&response, 0));
}
