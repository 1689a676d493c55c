//! Task REST API Routes (operator surface)
//!
//! Queueing work for agents and observing its lifecycle. Tasks are handed
//! to agents by the beacon endpoint, never from here.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use vigil_core::{new_task_id, Task, TaskKind, DEFAULT_TASK_TIMEOUT_SECS};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    types::{CreateTaskRequest, TaskResponse},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/tasks - Queue a task for an agent
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/tasks",
    tag = "Tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task queued", body = TaskResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Agent not found", body = ApiError),
    ),
))]
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let kind = TaskKind::from_db_str(&req.task_type)
        .map_err(|e| ApiError::invalid_input(format!("Unsupported task type: {}", e.0)))?;

    let timeout_seconds = req.timeout_seconds.unwrap_or(DEFAULT_TASK_TIMEOUT_SECS);
    vigil_core::validate_task_timeout(timeout_seconds)?;

    let task = Task::new(
        new_task_id(),
        req.agent_id,
        kind,
        req.payload,
        req.description,
        timeout_seconds,
        Utc::now(),
    );

    // The payload contract for execute_command: a non-empty command string.
    if kind == TaskKind::ExecuteCommand && task.command().is_none() {
        return Err(ApiError::invalid_input(
            "execute_command payload requires a non-empty 'command' string",
        ));
    }

    state.storage.task_insert(&task)?;

    tracing::info!(
        task_id = %task.task_id,
        agent_id = %task.agent_id,
        task_type = %task.kind,
        "Task queued"
    );
    Ok((StatusCode::CREATED, Json(TaskResponse::from(task))))
}

/// Query parameters for task listing.
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub agent_id: Option<Uuid>,
}

/// GET /api/v1/tasks - List tasks, optionally filtered by agent
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/tasks",
    tag = "Tasks",
    params(("agent_id" = Option<String>, Query, description = "Filter by owning agent")),
    responses(
        (status = 200, description = "Tasks in creation order", body = [TaskResponse]),
    ),
))]
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<impl IntoResponse> {
    let tasks = match query.agent_id {
        Some(agent_id) => state.storage.task_list_for_agent(agent_id)?,
        None => state.storage.task_list()?,
    };
    let response: Vec<TaskResponse> = tasks.into_iter().map(TaskResponse::from).collect();
    Ok(Json(response))
}

/// GET /api/v1/tasks/{id} - Get task details
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task details", body = TaskResponse),
        (status = 404, description = "Task not found", body = ApiError),
    ),
))]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .storage
        .task_get(id)?
        .ok_or_else(|| ApiError::task_not_found(id))?;
    Ok(Json(TaskResponse::from(task)))
}

/// POST /api/v1/tasks/{id}/cancel - Cancel a still-queued task
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/cancel",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task cancelled", body = TaskResponse),
        (status = 404, description = "Task not found", body = ApiError),
        (status = 409, description = "Task is no longer queued", body = ApiError),
    ),
))]
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let task = state.storage.task_cancel(id, Utc::now())?;
    tracing::info!(task_id = %id, "Task cancelled");
    Ok(Json(TaskResponse::from(task)))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the operator task router, nested under `/api/v1/tasks`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_task).get(list_tasks))
        .route("/:id", get(get_task))
        .route("/:id/cancel", post(cancel_task))
        .with_state(state)
}
