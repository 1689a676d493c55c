//! API Configuration Module
//!
//! Configuration for the HTTP surface: bind address, CORS, and whether the
//! background sweeper runs in-process. Loaded from environment variables
//! with development defaults.

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for the VIGIL server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host (default: 0.0.0.0).
    pub bind_host: String,

    /// Bind port (default: 8000).
    pub bind_port: u16,

    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    /// Whether the in-process sweeper job (liveness + task reaper) runs.
    pub sweeper_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 8000,
            cors_origins: Vec::new(), // Empty = allow all
            cors_max_age_secs: 86400,
            sweeper_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `VIGIL_BIND`: Bind host (default: 0.0.0.0)
    /// - `VIGIL_PORT` / `PORT`: Bind port (default: 8000)
    /// - `VIGIL_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `VIGIL_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `VIGIL_SWEEPER_ENABLED`: "true" or "false" (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_host = std::env::var("VIGIL_BIND").unwrap_or(defaults.bind_host);

        let bind_port = std::env::var("VIGIL_PORT")
            .ok()
            .or_else(|| std::env::var("PORT").ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.bind_port);

        let cors_origins = std::env::var("VIGIL_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_max_age_secs = std::env::var("VIGIL_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        let sweeper_enabled = std::env::var("VIGIL_SWEEPER_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            bind_host,
            bind_port,
            cors_origins,
            cors_max_age_secs,
            sweeper_enabled,
        }
    }
}
