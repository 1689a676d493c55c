//! Vigil Core - Entity Types and Protocol Primitives
//!
//! Pure data structures plus the small amount of behavior that must be
//! shared by every other crate: the agent/task status machines, credential
//! issuance, and HMAC body signing. No web dependencies live here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod agent;
pub mod credentials;
pub mod error;
pub mod task;
pub mod telemetry;

pub use agent::{Agent, AgentStatus, AgentStatusParseError};
pub use credentials::{issue_credential, sign_body, verify_body, Psk};
pub use error::{CredentialError, StoreError, ValidationError, VigilError, VigilResult};
pub use task::{
    Task, TaskKind, TaskKindParseError, TaskResult, TaskStatus, TaskStatusParseError,
};
pub use telemetry::{BasicTelemetry, SystemMetrics, TelemetryRecord};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Agent identifier. UUIDv4 rather than a sortable variant: agent ids travel
/// in authentication headers and must not be guessable from registration
/// order.
pub type AgentId = Uuid;

/// Task identifier.
pub type TaskId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new random agent id.
pub fn new_agent_id() -> AgentId {
    Uuid::new_v4()
}

/// Generate a new random task id.
pub fn new_task_id() -> TaskId {
    Uuid::new_v4()
}

// ============================================================================
// PROTOCOL CONSTANTS
// ============================================================================

/// Default beacon cadence for newly registered agents, in seconds.
pub const DEFAULT_BEACON_INTERVAL_SECS: i64 = 60;

/// Inclusive bounds for a configurable beacon interval.
pub const BEACON_INTERVAL_MIN_SECS: i64 = 10;
pub const BEACON_INTERVAL_MAX_SECS: i64 = 3600;

/// Default wall-clock budget for a dispatched task, in seconds.
pub const DEFAULT_TASK_TIMEOUT_SECS: i64 = 300;

/// Inclusive bounds for a task timeout.
pub const TASK_TIMEOUT_MIN_SECS: i64 = 1;
pub const TASK_TIMEOUT_MAX_SECS: i64 = 3600;

/// Missed-beacon multiplier before an agent is considered offline.
///
/// A single missed beacon (scheduler jitter, transient network loss) must
/// not flip an agent offline; three consecutive misses do.
pub const OFFLINE_BEACON_MULTIPLIER: i64 = 3;

/// Validate a beacon interval against the configured bounds.
pub fn validate_beacon_interval(seconds: i64) -> Result<(), ValidationError> {
    if !(BEACON_INTERVAL_MIN_SECS..=BEACON_INTERVAL_MAX_SECS).contains(&seconds) {
        return Err(ValidationError::OutOfRange {
            field: "beacon_interval_seconds".to_string(),
            min: BEACON_INTERVAL_MIN_SECS,
            max: BEACON_INTERVAL_MAX_SECS,
        });
    }
    Ok(())
}

/// Validate a task timeout against the configured bounds.
pub fn validate_task_timeout(seconds: i64) -> Result<(), ValidationError> {
    if !(TASK_TIMEOUT_MIN_SECS..=TASK_TIMEOUT_MAX_SECS).contains(&seconds) {
        return Err(ValidationError::OutOfRange {
            field: "timeout_seconds".to_string(),
            min: TASK_TIMEOUT_MIN_SECS,
            max: TASK_TIMEOUT_MAX_SECS,
        });
    }
    Ok(())
}
