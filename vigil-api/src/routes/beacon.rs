//! Agent-Facing Beacon Routes
//!
//! The authenticated agent surface: the beacon endpoint that drives the
//! whole task lifecycle, and the out-of-band telemetry ingest. Requests are
//! authenticated with an HMAC-SHA256 signature over the raw body bytes,
//! keyed by the agent's PSK, carried in `X-Agent-ID` / `X-Signature`
//! headers.
//!
//! Every authentication failure maps to the same opaque 401; a malformed
//! agent id is the one exception (400), matching what a strict header
//! parser would reject before credentials are even considered. Nothing is
//! mutated unless authentication succeeds.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use vigil_core::{verify_body, AgentId};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    types::{
        BeaconRequest, BeaconResponse, ConfigUpdate, TaskInstruction, TelemetryAcceptedResponse,
        TelemetryBatchRequest,
    },
};

/// Header carrying the claimed agent identity.
pub const AGENT_ID_HEADER: &str = "x-agent-id";
/// Header carrying the hex HMAC-SHA256 signature over the raw body.
pub const SIGNATURE_HEADER: &str = "x-signature";

// ============================================================================
// AUTHENTICATION
// ============================================================================

fn opaque_unauthorized() -> ApiError {
    ApiError::unauthorized("Invalid agent credentials")
}

/// Authenticate a signed agent request. Returns the verified agent id.
///
/// The caller passes the raw body bytes; the signature covers exactly those
/// bytes, so this must run before any body parsing.
fn authenticate(state: &AppState, headers: &HeaderMap, body: &Bytes) -> ApiResult<AgentId> {
    let claimed_id = headers
        .get(AGENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(opaque_unauthorized)?;

    // A syntactically invalid id is a protocol error, not a credential
    // failure.
    let agent_id: Uuid = claimed_id
        .parse()
        .map_err(|_| ApiError::invalid_format(AGENT_ID_HEADER, "UUID"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(opaque_unauthorized)?;

    let psk = state
        .storage
        .agent_psk(agent_id)?
        .ok_or_else(|| {
            tracing::warn!(%agent_id, "Beacon from unknown agent");
            opaque_unauthorized()
        })?;

    verify_body(&psk, body, signature).map_err(|err| {
        tracing::warn!(%agent_id, error = %err, "Beacon signature rejected");
        opaque_unauthorized()
    })?;

    Ok(agent_id)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/agent/beacon - Authenticated agent check-in
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/agent/beacon",
    tag = "Agent Protocol",
    request_body = BeaconRequest,
    responses(
        (status = 200, description = "Beacon accepted, queued tasks handed out", body = BeaconResponse),
        (status = 400, description = "Malformed agent id or body", body = ApiError),
        (status = 401, description = "Authentication failed", body = ApiError),
    ),
))]
pub async fn beacon(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let agent_id = authenticate(&state, &headers, &body)?;

    let req: BeaconRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_input(format!("Malformed beacon body: {}", e)))?;

    let now = Utc::now();
    let outcome = state.storage.apply_beacon(
        agent_id,
        req.status,
        req.basic_telemetry.as_ref(),
        &req.task_results,
        now,
    )?;

    for (task_id, err) in &outcome.results_rejected {
        tracing::warn!(%agent_id, %task_id, error = %err, "Task result discarded");
    }

    if let Some(metrics) = req.system_metrics {
        state.telemetry.record(agent_id, metrics, now)?;
    }

    tracing::debug!(
        %agent_id,
        status = %outcome.agent.status,
        handed_out = outcome.handed_out.len(),
        results_recorded = outcome.results_recorded,
        "Beacon applied"
    );

    let new_tasks: Vec<TaskInstruction> = outcome
        .handed_out
        .into_iter()
        .map(TaskInstruction::from)
        .collect();

    Ok(Json(BeaconResponse {
        status: "ok".to_string(),
        new_tasks,
        config_update: outcome.config_update.map(ConfigUpdate::from),
    }))
}

/// POST /api/v1/agent/telemetry - Authenticated telemetry batch ingest
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/agent/telemetry",
    tag = "Agent Protocol",
    request_body = TelemetryBatchRequest,
    responses(
        (status = 200, description = "Batch recorded", body = TelemetryAcceptedResponse),
        (status = 400, description = "Malformed agent id or body", body = ApiError),
        (status = 401, description = "Authentication failed", body = ApiError),
    ),
))]
pub async fn telemetry(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let agent_id = authenticate(&state, &headers, &body)?;

    let req: TelemetryBatchRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_input(format!("Malformed telemetry body: {}", e)))?;

    let now = Utc::now();
    let recorded = req.metrics.len();
    for metrics in req.metrics {
        state.telemetry.record(agent_id, metrics, now)?;
    }

    Ok(Json(TelemetryAcceptedResponse {
        status: "ok".to_string(),
        recorded,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the agent-facing router, nested under `/api/v1/agent`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/beacon", post(beacon))
        .route("/telemetry", post(telemetry))
        .with_state(state)
}
