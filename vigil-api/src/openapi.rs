//! OpenAPI Specification for the VIGIL API
//!
//! Generates the OpenAPI document from route annotations and schema derives
//! using utoipa.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::{agent, beacon, health, task};
use crate::types::{
    AgentDeletedResponse, AgentRegisteredResponse, AgentResponse, BeaconRequest, BeaconResponse,
    ConfigUpdate, CreateTaskRequest, RefreshResponse, RegisterAgentRequest, TaskInstruction,
    TaskResponse, TelemetryAcceptedResponse, TelemetryBatchRequest, UpdateAgentConfigRequest,
};

use vigil_core::{
    AgentStatus, BasicTelemetry, SystemMetrics, TaskKind, TaskResult, TaskStatus, TelemetryRecord,
};

/// OpenAPI document for the VIGIL API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "VIGIL API",
        version = "0.2.0",
        description = "Agent beacon protocol and task lifecycle server",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    servers(
        (url = "http://localhost:8000", description = "Local Development")
    ),
    tags(
        (name = "Agents", description = "Agent registry and liveness"),
        (name = "Tasks", description = "Task queue and lifecycle"),
        (name = "Agent Protocol", description = "HMAC-signed agent beacon surface"),
        (name = "Health", description = "Health check endpoints"),
    ),
    paths(
        agent::register_agent,
        agent::list_agents,
        agent::get_agent,
        agent::update_agent_config,
        agent::delete_agent,
        agent::agent_telemetry,
        agent::telemetry_feed,
        agent::refresh_agents,
        task::create_task,
        task::list_tasks,
        task::get_task,
        task::cancel_task,
        beacon::beacon,
        beacon::telemetry,
        health::ping,
        health::liveness,
        health::readiness,
    ),
    components(schemas(
        ApiError,
        ErrorCode,
        AgentStatus,
        TaskStatus,
        TaskKind,
        TaskResult,
        BasicTelemetry,
        SystemMetrics,
        TelemetryRecord,
        RegisterAgentRequest,
        AgentRegisteredResponse,
        AgentResponse,
        UpdateAgentConfigRequest,
        AgentDeletedResponse,
        RefreshResponse,
        CreateTaskRequest,
        TaskResponse,
        BeaconRequest,
        BeaconResponse,
        ConfigUpdate,
        TaskInstruction,
        TelemetryBatchRequest,
        TelemetryAcceptedResponse,
        health::HealthResponse,
        health::HealthStatus,
    ))
)]
pub struct ApiDoc;
