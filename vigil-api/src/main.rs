//! VIGIL API Server Entry Point
//!
//! Bootstraps configuration, storage, the background sweeper, and the Axum
//! HTTP server.

use std::net::SocketAddr;

use axum::Router;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use vigil_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState, SweeperConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ApiConfig::from_env();
    let state = AppState::in_memory();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.sweeper_enabled {
        let sweeper_config = SweeperConfig::from_env();
        Some(tokio::spawn(vigil_api::sweeper_task(
            state.storage.clone(),
            sweeper_config,
            shutdown_rx,
        )))
    } else {
        tracing::warn!("Sweeper disabled; agents will not be marked offline automatically");
        None
    };

    let app: Router = create_api_router(state, &config);

    let addr = resolve_bind_addr(&config)?;
    tracing::info!(%addr, "Starting VIGIL server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        if let Ok(metrics) = handle.await {
            let snapshot = metrics.snapshot();
            tracing::info!(
                agents_marked_offline = snapshot.agents_marked_offline,
                tasks_reaped = snapshot.tasks_reaped,
                "Sweeper finished"
            );
        }
    }

    Ok(())
}

fn resolve_bind_addr(config: &ApiConfig) -> ApiResult<SocketAddr> {
    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
