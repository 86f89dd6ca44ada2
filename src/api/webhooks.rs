//! External webhook entry point
//!
//! `POST /workflow/webhook/{source}` authenticates the caller with a shared
//! secret, then queues every stored workflow whose `webhook` trigger listens
//! on `source`, starting from that trigger.

use crate::api::{ApiError, AppState};
use crate::workflow::types::ExecutionJob;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Map, Value};

pub const SECRET_HEADER: &str = "x-webhook-secret";

/// User id for runs whose workflow records no owner
pub const WEBHOOK_USER: &str = "webhook";

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/workflow/webhook/{source}", post(receive_webhook))
}

/// Byte comparison that does not stop at the first mismatch; an empty
/// configured secret matches nothing
fn secrets_match(expected: &str, presented: &str) -> bool {
    !expected.is_empty()
        && expected.len() == presented.len()
        && expected
            .bytes()
            .zip(presented.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// An empty body reads as `{}`; anything but a JSON object is `None`
fn parse_object(body: &str) -> Option<Map<String, Value>> {
    if body.trim().is_empty() {
        return Some(Map::new());
    }
    match serde_json::from_str(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    tracing::info!("📥 Webhook received from source '{}'", source);

    let header_secret = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    let mut parsed = None;
    let authorized = match header_secret {
        Some(secret) => secrets_match(&state.webhook_secret, secret),
        None => {
            parsed = parse_object(&body);
            parsed
                .as_ref()
                .and_then(|map| map.get("secret"))
                .and_then(Value::as_str)
                .is_some_and(|secret| secrets_match(&state.webhook_secret, secret))
        }
    };
    if !authorized {
        tracing::warn!("🚫 Webhook for source '{}' rejected: bad or missing secret", source);
        return Err(ApiError::Forbidden("Invalid webhook secret".to_string()));
    }

    let mut payload = match parsed.or_else(|| parse_object(&body)) {
        Some(map) => map,
        None => {
            tracing::warn!("❌ Webhook body for source '{}' is not a JSON object", source);
            return Err(ApiError::BadRequest("Webhook body must be a JSON object".to_string()));
        }
    };
    payload.remove("secret");

    let targets = state.registry.webhook_targets(&source);
    if targets.is_empty() {
        tracing::warn!("❌ No workflow listens on webhook source '{}'", source);
        return Err(ApiError::NotFound(format!("No workflow listens on '{}'", source)));
    }

    let webhook = Value::Object(payload);
    let mut jobs = Vec::with_capacity(targets.len());
    for (workflow, node_id) in targets {
        let mut context = Map::new();
        context.insert("webhook".to_string(), webhook.clone());

        let job = ExecutionJob {
            app_id: workflow.app_id.clone(),
            user_id: workflow.owner_id.clone().unwrap_or_else(|| WEBHOOK_USER.to_string()),
            nodes: workflow.nodes.clone(),
            edges: workflow.edges.clone(),
            context,
            start_node: Some(node_id.clone()),
            workflow_id: Some(workflow.id.clone()),
        };
        let receipt = state.queue.enqueue(job).await?;
        tracing::info!("🚀 Webhook '{}' queued workflow {} from node {}", source, workflow.id, node_id);
        jobs.push(json!({ "workflowId": workflow.id, "nodeId": node_id, "jobId": receipt.job_id }));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "dispatched": jobs.len(), "jobs": jobs })),
    ))
}
