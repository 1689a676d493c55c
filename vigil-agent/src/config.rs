//! Agent Configuration
//!
//! Loaded from environment variables at startup. The agent id and PSK come
//! from the registration response on the server side; there is no local
//! enrollment flow.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;
use vigil_core::{AgentId, Psk, DEFAULT_BEACON_INTERVAL_SECS};

/// Configuration errors raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

/// Agent runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the VIGIL server, e.g. `http://localhost:8000`
    pub server_url: String,
    pub agent_id: AgentId,
    pub psk: Psk,
    /// Beacon cadence; the server may adjust its expectation via config
    pub beacon_interval: Duration,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `VIGIL_SERVER_URL`: Server base URL (required)
    /// - `VIGIL_AGENT_ID`: Agent UUID from registration (required)
    /// - `VIGIL_AGENT_PSK`: Hex pre-shared key from registration (required)
    /// - `VIGIL_BEACON_INTERVAL_SECS`: Beacon cadence (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = std::env::var("VIGIL_SERVER_URL")
            .map_err(|_| ConfigError::MissingVar("VIGIL_SERVER_URL"))?
            .trim_end_matches('/')
            .to_string();

        let agent_id: Uuid = std::env::var("VIGIL_AGENT_ID")
            .map_err(|_| ConfigError::MissingVar("VIGIL_AGENT_ID"))?
            .parse()
            .map_err(|e| ConfigError::InvalidVar {
                var: "VIGIL_AGENT_ID",
                reason: format!("not a UUID: {}", e),
            })?;

        let psk = Psk::from_string(
            std::env::var("VIGIL_AGENT_PSK")
                .map_err(|_| ConfigError::MissingVar("VIGIL_AGENT_PSK"))?,
        );

        let interval_secs = std::env::var("VIGIL_BEACON_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_BEACON_INTERVAL_SECS as u64);

        Ok(Self {
            server_url,
            agent_id,
            psk,
            beacon_interval: Duration::from_secs(interval_secs),
        })
    }

    /// Full URL of the beacon endpoint.
    pub fn beacon_url(&self) -> String {
        format!("{}/api/v1/agent/beacon", self.server_url)
    }
}
