//! REST API Routes Module
//!
//! Route handlers organized by surface:
//! - Operator CRUD routes (agents, tasks)
//! - Agent-facing signed protocol routes (beacon, telemetry)
//! - Health check endpoints (Kubernetes-compatible)
//! - CORS support for browser-based consoles

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod agent;
pub mod beacon;
pub mod health;
pub mod task;

use crate::config::ApiConfig;
use crate::state::AppState;

// Re-export route creation functions for convenience
pub use agent::create_router as agent_router;
pub use beacon::create_router as beacon_router;
pub use health::create_router as health_router;
pub use task::create_router as task_router;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
#[cfg(feature = "openapi")]
async fn openapi_json() -> impl axum::response::IntoResponse {
    use utoipa::OpenApi;
    axum::Json(crate::openapi::ApiDoc::openapi())
}

// ============================================================================
// CORS
// ============================================================================

/// Build the CORS layer from configuration. An empty origin list means
/// allow-all, for development.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(beacon::AGENT_ID_HEADER),
            header::HeaderName::from_static(beacon::SIGNATURE_HEADER),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

// ============================================================================
// ROUTER ASSEMBLY
// ============================================================================

/// Build the complete API router.
///
/// Layout:
/// - `/api/v1/agents`, `/api/v1/tasks` - operator surface
/// - `/api/v1/telemetry` - cross-agent telemetry feed
/// - `/api/v1/agent` - signed agent protocol surface
/// - `/health` - unauthenticated health checks
/// - `/openapi.json` - API specification (openapi feature)
pub fn create_api_router(state: AppState, config: &ApiConfig) -> Router {
    let feed_routes = Router::new()
        .route("/telemetry", axum::routing::get(agent::telemetry_feed))
        .with_state(state.clone());

    let api_routes = Router::new()
        .nest("/agents", agent::create_router(state.clone()))
        .nest("/tasks", task::create_router(state.clone()))
        .nest("/agent", beacon::create_router(state.clone()))
        .merge(feed_routes);

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router(state));

    #[cfg(feature = "openapi")]
    let router = router.route("/openapi.json", axum::routing::get(openapi_json));

    router
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(config))
}
