//! Agent identity and liveness types.
//!
//! An agent is a remote, headless process that authenticates with a
//! pre-shared key and periodically beacons to the server. Its `status` is
//! derived state: every accepted beacon refreshes it, and the liveness
//! sweep demotes it to `offline` once beacons are overdue.

use crate::{
    credentials::Psk, telemetry::BasicTelemetry, AgentId, Timestamp,
    OFFLINE_BEACON_MULTIPLIER,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// AGENT STATUS
// ============================================================================

/// Derived liveness classification of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Beaconing on schedule, no task in flight
    Online,
    /// Beaconed, explicitly idle (distinct from online; the dashboard may
    /// collapse the two for display, the core never does)
    Idle,
    /// Executing at least one dispatched task
    Processing,
    /// Beacons overdue past the liveness deadline
    Offline,
    /// Agent-signaled fault; never inferred from timing
    Error,
}

impl AgentStatus {
    /// Convert to wire/database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Idle => "idle",
            AgentStatus::Processing => "processing",
            AgentStatus::Offline => "offline",
            AgentStatus::Error => "error",
        }
    }

    /// Parse from wire/database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, AgentStatusParseError> {
        match s.to_lowercase().as_str() {
            "online" => Ok(AgentStatus::Online),
            "idle" => Ok(AgentStatus::Idle),
            "processing" => Ok(AgentStatus::Processing),
            "offline" => Ok(AgentStatus::Offline),
            "error" => Ok(AgentStatus::Error),
            _ => Err(AgentStatusParseError(s.to_string())),
        }
    }

    /// A beacon is by definition "not offline": a self-reported `offline`
    /// coming in over a live connection is coerced to `online`.
    pub fn coerce_live(self) -> Self {
        match self {
            AgentStatus::Offline => AgentStatus::Online,
            other => other,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentStatus {
    type Err = AgentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid agent status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatusParseError(pub String);

impl fmt::Display for AgentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid agent status: {}", self.0)
    }
}

impl std::error::Error for AgentStatusParseError {}

// ============================================================================
// AGENT ENTITY
// ============================================================================

/// A registered agent.
///
/// The `psk` field is the verbatim shared secret, required for exact HMAC
/// verification. `Agent` deliberately does not implement `Serialize`; wire
/// responses go through the dedicated types in vigil-api, which omit the PSK.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub agent_id: AgentId,
    /// Human label, unique per deployment by convention (not enforced)
    pub name: String,
    pub description: Option<String>,
    /// Shared secret issued at registration; rotatable only by
    /// re-registration
    pub psk: Psk,
    pub status: AgentStatus,
    /// Configured beacon cadence in seconds, bounds [10, 3600]
    pub beacon_interval_seconds: i64,
    pub created_at: Timestamp,
    /// Timestamp of the last successfully authenticated beacon; None until
    /// the first beacon arrives
    pub last_seen: Option<Timestamp>,
    // Descriptive metadata merged from beacon telemetry. No invariants.
    pub os_info: Option<String>,
    pub hostname: Option<String>,
    pub internal_ip: Option<String>,
    pub agent_version: Option<String>,
    pub tags: Vec<String>,
}

impl Agent {
    /// Create a freshly registered agent with issued credentials.
    pub fn new(
        agent_id: AgentId,
        name: String,
        description: Option<String>,
        psk: Psk,
        now: Timestamp,
    ) -> Self {
        Self {
            agent_id,
            name,
            description,
            psk,
            status: AgentStatus::Offline,
            beacon_interval_seconds: crate::DEFAULT_BEACON_INTERVAL_SECS,
            created_at: now,
            last_seen: None,
            os_info: None,
            hostname: None,
            internal_ip: None,
            agent_version: None,
            tags: Vec::new(),
        }
    }

    /// Deadline after which this agent counts as offline.
    ///
    /// Anchored at `last_seen`, or at `created_at` for an agent that has
    /// never beaconed, plus the hysteresis margin of three beacon
    /// intervals.
    pub fn offline_deadline(&self) -> Timestamp {
        let anchor = self.last_seen.unwrap_or(self.created_at);
        anchor + Duration::seconds(self.beacon_interval_seconds * OFFLINE_BEACON_MULTIPLIER)
    }

    /// Whether beacons are overdue at `now`.
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        now > self.offline_deadline()
    }

    /// Apply an accepted beacon: refresh liveness and merge telemetry
    /// metadata. The reported status is coerced so a live beacon can never
    /// leave the agent classified offline.
    pub fn record_beacon(
        &mut self,
        reported: AgentStatus,
        telemetry: Option<&BasicTelemetry>,
        now: Timestamp,
    ) {
        self.status = reported.coerce_live();
        self.last_seen = Some(now);

        if let Some(telemetry) = telemetry {
            if let Some(ref os_info) = telemetry.os_info {
                self.os_info = Some(os_info.clone());
            }
            if let Some(ref hostname) = telemetry.hostname {
                self.hostname = Some(hostname.clone());
            }
            if let Some(first_ip) = telemetry.internal_ips.first() {
                self.internal_ip = Some(first_ip.clone());
            }
            if let Some(ref version) = telemetry.agent_version {
                self.agent_version = Some(version.clone());
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
