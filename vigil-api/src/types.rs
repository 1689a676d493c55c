//! Request/Response Types for the VIGIL REST API
//!
//! Wire DTOs for the operator surface and the agent beacon protocol. These
//! are kept separate from the `vigil-core` entities so the storage shape can
//! evolve without breaking the wire contract, and so the PSK never leaks
//! into a serialized agent.

use serde::{Deserialize, Serialize};
use vigil_core::{
    Agent, AgentId, AgentStatus, BasicTelemetry, SystemMetrics, Task, TaskId, TaskKind,
    TaskResult, TaskStatus, Timestamp,
};

// ============================================================================
// AGENT TYPES (operator surface)
// ============================================================================

/// Request to register a new agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegisterAgentRequest {
    /// Display name for the agent
    pub name: String,
    /// Free-text description
    pub description: Option<String>,
}

/// Response to a successful registration.
///
/// This is the only message that ever carries the PSK; it must be captured
/// by the operator at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentRegisteredResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub agent_id: AgentId,
    pub name: String,
    /// Hex-encoded pre-shared key, shown exactly once
    pub psk_provided: String,
}

/// Agent details as exposed to operators. Never includes the PSK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub agent_id: AgentId,
    pub name: String,
    pub description: Option<String>,
    pub status: AgentStatus,
    pub beacon_interval_seconds: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_seen: Option<Timestamp>,
    pub os_info: Option<String>,
    pub hostname: Option<String>,
    pub internal_ip: Option<String>,
    pub agent_version: Option<String>,
    pub tags: Vec<String>,
}

impl From<Agent> for AgentResponse {
    fn from(agent: Agent) -> Self {
        Self {
            agent_id: agent.agent_id,
            name: agent.name,
            description: agent.description,
            status: agent.status,
            beacon_interval_seconds: agent.beacon_interval_seconds,
            created_at: agent.created_at,
            last_seen: agent.last_seen,
            os_info: agent.os_info,
            hostname: agent.hostname,
            internal_ip: agent.internal_ip,
            agent_version: agent.agent_version,
            tags: agent.tags,
        }
    }
}

/// Request to update operator-editable agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateAgentConfigRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Beacon cadence in seconds, bounds [10, 3600]
    pub beacon_interval_seconds: Option<i64>,
    pub tags: Option<Vec<String>>,
}

/// Response to an agent deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentDeletedResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub agent_id: AgentId,
    /// Tasks cancelled by the deletion cascade
    pub tasks_cancelled: usize,
}

/// Response to a manual liveness refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RefreshResponse {
    /// Agents newly marked offline by this sweep
    pub offline_count: usize,
    pub total_agents: usize,
}

// ============================================================================
// TASK TYPES (operator surface)
// ============================================================================

/// Request to queue a task for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateTaskRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub agent_id: AgentId,
    #[serde(rename = "type")]
    pub task_type: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    pub description: Option<String>,
    /// Execution budget in seconds, bounds [1, 3600]; defaults to 300
    pub timeout_seconds: Option<i64>,
}

/// Task details as exposed to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TaskResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub task_id: TaskId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub agent_id: AgentId,
    #[serde(rename = "type")]
    pub task_type: TaskKind,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub timeout_seconds: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub started_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub completed_at: Option<Timestamp>,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub exit_code: Option<i32>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.task_id,
            agent_id: task.agent_id,
            task_type: task.kind,
            payload: task.payload,
            description: task.description,
            status: task.status,
            timeout_seconds: task.timeout_seconds,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            output: task.output,
            error_output: task.error_output,
            exit_code: task.exit_code,
        }
    }
}

// ============================================================================
// BEACON TYPES (agent surface)
// ============================================================================

/// Beacon payload posted by an agent. The raw body bytes are also the HMAC
/// input, so this type must deserialize from exactly what the agent signs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BeaconRequest {
    /// Agent's own liveness claim: `online` or `processing` in practice
    pub status: AgentStatus,
    pub basic_telemetry: Option<BasicTelemetry>,
    pub system_metrics: Option<SystemMetrics>,
    /// Results for tasks handed out on earlier beacons
    #[serde(default)]
    pub task_results: Vec<TaskResult>,
}

/// One queued task handed to an agent in a beacon response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TaskInstruction {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskKind,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    pub timeout_seconds: i64,
}

impl From<Task> for TaskInstruction {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.task_id,
            task_type: task.kind,
            payload: task.payload,
            timeout_seconds: task.timeout_seconds,
        }
    }
}

/// Configuration delta carried in a beacon response, applied agent-side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConfigUpdate {
    pub beacon_interval_seconds: i64,
}

impl From<vigil_storage::BeaconConfigUpdate> for ConfigUpdate {
    fn from(update: vigil_storage::BeaconConfigUpdate) -> Self {
        Self {
            beacon_interval_seconds: update.beacon_interval_seconds,
        }
    }
}

/// Server response to an accepted beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BeaconResponse {
    pub status: String,
    pub new_tasks: Vec<TaskInstruction>,
    /// Staged configuration change, delivered at most once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_update: Option<ConfigUpdate>,
}

/// Telemetry batch posted by an agent outside the beacon cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TelemetryBatchRequest {
    #[serde(default)]
    pub metrics: Vec<SystemMetrics>,
}

/// Server response to an accepted telemetry batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TelemetryAcceptedResponse {
    pub status: String,
    pub recorded: usize,
}
