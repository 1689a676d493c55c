//! Host telemetry carried on agent beacons.
//!
//! `BasicTelemetry` is the lightweight identity block an agent sends on
//! every beacon; `SystemMetrics` is the optional resource sample retained
//! in a bounded per-agent ring by the telemetry sink.

use crate::{AgentId, Timestamp};
use serde::{Deserialize, Serialize};

/// Host identity fields self-reported on every beacon.
///
/// All fields are optional on the wire; missing fields leave the agent's
/// stored values untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BasicTelemetry {
    pub os_info: Option<String>,
    pub hostname: Option<String>,
    pub agent_version: Option<String>,
    #[serde(default)]
    pub internal_ips: Vec<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub timestamp: Option<Timestamp>,
    /// Host uptime in seconds
    pub uptime: Option<i64>,
}

/// A resource usage sample from an agent host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SystemMetrics {
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub timestamp: Option<Timestamp>,
    pub cpu_percent: Option<f64>,
    pub memory_total: Option<u64>,
    pub memory_used: Option<u64>,
    pub memory_percent: Option<f64>,
    pub disk_total: Option<u64>,
    pub disk_used: Option<u64>,
    pub disk_percent: Option<f64>,
    pub network_bytes_sent: Option<u64>,
    pub network_bytes_recv: Option<u64>,
    pub network_packets_sent: Option<u64>,
    pub network_packets_recv: Option<u64>,
}

/// A stored metrics sample, stamped with server receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TelemetryRecord {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub agent_id: AgentId,
    /// Agent-side sample time, if the agent stamped one
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub timestamp: Option<Timestamp>,
    /// Server-side receipt time
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub received_at: Timestamp,
    pub metrics: SystemMetrics,
}
