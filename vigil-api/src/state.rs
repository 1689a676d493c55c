//! Shared application state for Axum routers.

use std::sync::Arc;

use vigil_storage::{MemoryStorage, MemoryTelemetrySink, StorageTrait, TelemetrySink};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Agent registry and task queue backend.
    pub storage: Arc<dyn StorageTrait>,
    /// Sink for system metrics samples carried on beacons.
    pub telemetry: Arc<dyn TelemetrySink>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build state over arbitrary backends.
    pub fn new(storage: Arc<dyn StorageTrait>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            storage,
            telemetry,
            start_time: std::time::Instant::now(),
        }
    }

    /// Build state over the in-memory backends.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryTelemetrySink::new()),
        )
    }
}

// Use macro to reduce boilerplate for FromRef implementations
crate::impl_from_ref!(Arc<dyn StorageTrait>, storage);
crate::impl_from_ref!(Arc<dyn TelemetrySink>, telemetry);
crate::impl_from_ref!(std::time::Instant, start_time);
