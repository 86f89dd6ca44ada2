//! Workflow execution and management endpoints
//!
//! Stored workflow changes go through the registry, so they are live for the
//! next webhook call without a restart.

use crate::api::{ApiError, AppState};
use crate::runtime::JobReceipt;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::{ExecutionJob, ExecutionResponse, Workflow};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: Workflow,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub queued: bool,
    #[serde(flatten)]
    pub receipt: JobReceipt,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflow/execute", post(execute_workflow))
        .route("/workflow/enqueue", post(enqueue_workflow))
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
}

/// POST /workflow/execute
///
/// Runs the graph on the request task and returns every node result.
async fn execute_workflow(
    State(state): State<AppState>,
    Json(job): Json<ExecutionJob>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    tracing::info!("📥 Execute request for app '{}' ({} nodes)", job.app_id, job.nodes.len());
    let response = state.engine.execute(&job).await?;
    Ok(Json(response))
}

/// POST /workflow/enqueue
///
/// The graph is validated up front so a broken workflow is a 400, not a
/// silently failed job.
async fn enqueue_workflow(
    State(state): State<AppState>,
    Json(job): Json<ExecutionJob>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    WorkflowGraph::build(&job.nodes, &job.edges)?;
    let receipt = state.queue.enqueue(job).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            queued: true,
            receipt,
        }),
    ))
}

fn check_workflow(workflow: &Workflow) -> Result<(), ApiError> {
    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(ApiError::BadRequest("Workflow id and name are required".to_string()));
    }
    WorkflowGraph::build(&workflow.nodes, &workflow.edges)?;
    Ok(())
}

/// POST /api/workflows
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = payload.workflow;
    check_workflow(&workflow)?;

    if state.registry.storage().get_workflow(&workflow.id).await?.is_some() {
        return Err(ApiError::Conflict(format!("Workflow '{}' already exists", workflow.id)));
    }

    let id = workflow.id.clone();
    let name = workflow.name.clone();
    state.registry.save(workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", id, name);

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id,
            message: format!("Workflow '{}' created successfully", name),
        }),
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.registry.storage().list_workflows().await?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    match state.registry.storage().get_workflow(&id).await? {
        Some(workflow) => Ok(Json(workflow)),
        None => Err(ApiError::NotFound(format!("Workflow '{}' not found", id))),
    }
}

/// PUT /api/workflows/{id}
///
/// The path id wins over any id in the body.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();
    check_workflow(&workflow)?;

    if state.registry.storage().get_workflow(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Workflow '{}' not found", id)));
    }

    let name = workflow.name.clone();
    state.registry.save(workflow).await?;
    tracing::info!("🔥 Updated workflow: {} ({})", id, name);

    Ok(Json(WorkflowResponse {
        id,
        message: format!("Workflow '{}' updated successfully", name),
    }))
}

/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.registry.remove(&id).await? {
        Ok(Json(json!({ "message": "Workflow deleted successfully" })))
    } else {
        Err(ApiError::NotFound(format!("Workflow '{}' not found", id)))
    }
}
