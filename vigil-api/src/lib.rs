//! VIGIL API - REST Layer for the Agent Control Server
//!
//! This crate exposes two HTTP surfaces over one Axum router:
//!
//! - The operator surface (`/api/v1/agents`, `/api/v1/tasks`): registration,
//!   task queueing, lifecycle observation, liveness refresh.
//! - The agent protocol surface (`/api/v1/agent/*`): HMAC-signed beacons
//!   that report liveness and results and pick up queued work.
//!
//! A background sweeper job marks overdue agents offline and times out
//! tasks that outlive their execution budget.

pub mod config;
pub mod error;
pub mod jobs;
pub mod macros;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{sweeper_task, SweeperConfig, SweeperMetrics};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::AppState;
pub use types::*;
