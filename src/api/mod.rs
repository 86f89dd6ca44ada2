//! HTTP API layer
//!
//! Synchronous and queued execution, external webhooks and stored workflow
//! management. Errors render as JSON `{ "error": "..." }`.

pub mod webhooks;
pub mod workflows;

use crate::error::{EngineError, QueueError};
use crate::runtime::{ExecutionEngine, JobQueue};
use crate::workflow::WorkflowRegistry;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;

pub use webhooks::create_webhook_routes;
pub use workflows::create_workflow_routes;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
    pub queue: Arc<dyn JobQueue>,
    pub registry: Arc<WorkflowRegistry>,
    /// Empty means every webhook call is refused
    pub webhook_secret: Arc<str>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidGraph(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        tracing::error!("❌ Could not enqueue job: {}", e);
        ApiError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!("❌ Internal error: {:#}", e);
        ApiError::Internal("Internal server error".to_string())
    }
}

/// Every route, bound to `state`
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_webhook_routes())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
