//! Agent REST API Routes (operator surface)
//!
//! CRUD for registered agents plus the manual liveness refresh and the
//! per-agent telemetry history. The PSK issued at registration is returned
//! exactly once, in the registration response, and never again.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use vigil_core::{issue_credential, Agent};
#[cfg(feature = "openapi")]
use vigil_core::TelemetryRecord;
use vigil_storage::AgentConfigUpdate;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    types::{
        AgentDeletedResponse, AgentRegisteredResponse, AgentResponse, RefreshResponse,
        RegisterAgentRequest, UpdateAgentConfigRequest,
    },
};

/// Default number of telemetry records returned per agent.
const DEFAULT_TELEMETRY_LIMIT: usize = 100;

/// Default number of records returned by the cross-agent telemetry feed.
const DEFAULT_FEED_LIMIT: usize = 50;

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/agents - Register a new agent
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/agents",
    tag = "Agents",
    request_body = RegisterAgentRequest,
    responses(
        (status = 201, description = "Agent registered, response carries the PSK exactly once", body = AgentRegisteredResponse),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
))]
pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::missing_field("name"));
    }

    let (agent_id, psk) = issue_credential();
    let agent = Agent::new(
        agent_id,
        req.name.trim().to_string(),
        req.description,
        psk.clone(),
        Utc::now(),
    );
    state.storage.agent_insert(&agent)?;

    tracing::info!(%agent_id, name = %agent.name, "Agent registered");

    Ok((
        StatusCode::CREATED,
        Json(AgentRegisteredResponse {
            agent_id,
            name: agent.name,
            psk_provided: psk.expose().to_string(),
        }),
    ))
}

/// GET /api/v1/agents - List all agents
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/agents",
    tag = "Agents",
    responses(
        (status = 200, description = "List of agents in registration order", body = [AgentResponse]),
    ),
))]
pub async fn list_agents(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let agents = state.storage.agent_list()?;
    let response: Vec<AgentResponse> = agents.into_iter().map(AgentResponse::from).collect();
    Ok(Json(response))
}

/// GET /api/v1/agents/{id} - Get agent details
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/agents/{id}",
    tag = "Agents",
    params(("id" = String, Path, description = "Agent ID")),
    responses(
        (status = 200, description = "Agent details", body = AgentResponse),
        (status = 404, description = "Agent not found", body = ApiError),
    ),
))]
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let agent = state
        .storage
        .agent_get(id)?
        .ok_or_else(|| ApiError::agent_not_found(id))?;
    Ok(Json(AgentResponse::from(agent)))
}

/// PATCH /api/v1/agents/{id}/config - Update agent configuration
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/api/v1/agents/{id}/config",
    tag = "Agents",
    params(("id" = String, Path, description = "Agent ID")),
    request_body = UpdateAgentConfigRequest,
    responses(
        (status = 200, description = "Updated agent", body = AgentResponse),
        (status = 400, description = "Invalid configuration", body = ApiError),
        (status = 404, description = "Agent not found", body = ApiError),
    ),
))]
pub async fn update_agent_config(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAgentConfigRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Some(ref name) = req.name {
        if name.trim().is_empty() {
            return Err(ApiError::invalid_input("Agent name cannot be empty"));
        }
    }
    if let Some(interval) = req.beacon_interval_seconds {
        vigil_core::validate_beacon_interval(interval)?;
    }

    let agent = state.storage.agent_update_config(
        id,
        AgentConfigUpdate {
            name: req.name,
            description: req.description,
            beacon_interval_seconds: req.beacon_interval_seconds,
            tags: req.tags,
        },
    )?;

    tracing::info!(agent_id = %id, interval = agent.beacon_interval_seconds, "Agent config updated");
    Ok(Json(AgentResponse::from(agent)))
}

/// DELETE /api/v1/agents/{id} - Delete an agent
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/agents/{id}",
    tag = "Agents",
    params(("id" = String, Path, description = "Agent ID")),
    responses(
        (status = 200, description = "Agent deleted, pending tasks cancelled", body = AgentDeletedResponse),
        (status = 404, description = "Agent not found", body = ApiError),
    ),
))]
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let tasks_cancelled = state.storage.agent_delete(id, Utc::now())?;
    state.telemetry.purge(id)?;

    tracing::info!(agent_id = %id, tasks_cancelled, "Agent deleted");
    Ok(Json(AgentDeletedResponse {
        agent_id: id,
        tasks_cancelled,
    }))
}

/// Query parameters for the telemetry history endpoint.
#[derive(Debug, Deserialize)]
pub struct TelemetryQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/agents/{id}/telemetry - Recent telemetry for an agent
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/agents/{id}/telemetry",
    tag = "Agents",
    params(
        ("id" = String, Path, description = "Agent ID"),
        ("limit" = Option<usize>, Query, description = "Max records to return (default 100)"),
    ),
    responses(
        (status = 200, description = "Telemetry records, oldest first", body = [TelemetryRecord]),
        (status = 404, description = "Agent not found", body = ApiError),
    ),
))]
pub async fn agent_telemetry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<TelemetryQuery>,
) -> ApiResult<impl IntoResponse> {
    if state.storage.agent_get(id)?.is_none() {
        return Err(ApiError::agent_not_found(id));
    }
    let limit = query.limit.unwrap_or(DEFAULT_TELEMETRY_LIMIT);
    let records = state.telemetry.recent(id, limit)?;
    Ok(Json(records))
}

/// GET /api/v1/telemetry - Recent telemetry across all agents
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/telemetry",
    tag = "Agents",
    params(
        ("limit" = Option<usize>, Query, description = "Max records to return (default 50)"),
    ),
    responses(
        (status = 200, description = "Most recent telemetry records, newest first", body = [TelemetryRecord]),
    ),
))]
pub async fn telemetry_feed(
    State(state): State<AppState>,
    Query(query): Query<TelemetryQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT);
    let records = state.telemetry.recent_all(limit)?;
    Ok(Json(records))
}

/// POST /api/v1/agents/refresh - Run the liveness sweep now
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/agents/refresh",
    tag = "Agents",
    responses(
        (status = 200, description = "Sweep results", body = RefreshResponse),
    ),
))]
pub async fn refresh_agents(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let offline_count = state.storage.agent_sweep_offline(Utc::now())?;
    let total_agents = state.storage.agent_list()?.len();

    if offline_count > 0 {
        tracing::info!(offline_count, total_agents, "Manual liveness refresh marked agents offline");
    }
    Ok(Json(RefreshResponse {
        offline_count,
        total_agents,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the operator agent router, nested under `/api/v1/agents`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(register_agent).get(list_agents))
        .route("/refresh", post(refresh_agents))
        .route("/:id", get(get_agent).delete(delete_agent))
        .route("/:id/config", patch(update_agent_config))
        .route("/:id/telemetry", get(agent_telemetry))
        .with_state(state)
}
