//! Liveness Sweep and Task Reaper Background Task
//!
//! This module provides a background task that periodically:
//!
//! - Marks agents offline when their beacons are overdue (no beacon for
//!   more than three beacon intervals)
//! - Times out `processing` tasks that have exceeded their execution budget
//!
//! Both conditions arise when an agent crashes, is disconnected, or a
//! network partition prevents it from beaconing or reporting results.
//!
//! # Configuration
//!
//! The task is configured via `SweeperConfig`:
//!
//! ```rust
//! use vigil_api::jobs::SweeperConfig;
//! use std::time::Duration;
//!
//! let config = SweeperConfig {
//!     liveness_interval: Duration::from_secs(30),
//!     reaper_interval: Duration::from_secs(10),
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use vigil_storage::StorageTrait;

/// Default cadence for the agent liveness sweep.
const DEFAULT_LIVENESS_INTERVAL_SECS: u64 = 30;
/// Default cadence for the task timeout reaper.
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 10;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the sweeper background task.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to run the agent liveness sweep (default: 30 seconds)
    pub liveness_interval: Duration,

    /// How often to reap overdue tasks (default: 10 seconds)
    pub reaper_interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            liveness_interval: Duration::from_secs(DEFAULT_LIVENESS_INTERVAL_SECS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
        }
    }
}

impl SweeperConfig {
    /// Create SweeperConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VIGIL_LIVENESS_INTERVAL_SECS`: Liveness sweep cadence (default: 30)
    /// - `VIGIL_REAPER_INTERVAL_SECS`: Task reaper cadence (default: 10)
    pub fn from_env() -> Self {
        let liveness_interval = Duration::from_secs(
            std::env::var("VIGIL_LIVENESS_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LIVENESS_INTERVAL_SECS),
        );

        let reaper_interval = Duration::from_secs(
            std::env::var("VIGIL_REAPER_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REAPER_INTERVAL_SECS),
        );

        Self {
            liveness_interval,
            reaper_interval,
        }
    }

    /// Create a configuration for development/testing with short cadences.
    pub fn development() -> Self {
        Self {
            liveness_interval: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(2),
        }
    }

    /// Create a configuration for production.
    pub fn production() -> Self {
        Self::default()
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for sweeper operations.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Total agents marked offline since startup
    pub agents_marked_offline: AtomicU64,

    /// Total tasks timed out by the reaper since startup
    pub tasks_reaped: AtomicU64,

    /// Total sweep cycles completed
    pub sweep_cycles: AtomicU64,

    /// Total errors encountered
    pub sweep_errors: AtomicU64,
}

impl SweeperMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            agents_marked_offline: self.agents_marked_offline.load(Ordering::Relaxed),
            tasks_reaped: self.tasks_reaped.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone)]
pub struct SweeperSnapshot {
    pub agents_marked_offline: u64,
    pub tasks_reaped: u64,
    pub sweep_cycles: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that sweeps agent liveness and reaps overdue tasks.
///
/// Runs until the shutdown signal is received, then returns the metrics
/// collected over its lifetime.
///
/// # Example
///
/// ```ignore
/// use tokio::sync::watch;
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(sweeper_task(storage, SweeperConfig::default(), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn sweeper_task(
    storage: Arc<dyn StorageTrait>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics> {
    let metrics = Arc::new(SweeperMetrics::new());

    let mut liveness_interval = interval(config.liveness_interval);
    liveness_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut reaper_interval = interval(config.reaper_interval);
    reaper_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        liveness_interval_secs = config.liveness_interval.as_secs(),
        reaper_interval_secs = config.reaper_interval.as_secs(),
        "Sweeper task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Sweeper task shutting down");
                    break;
                }
            }

            _ = liveness_interval.tick() => {
                sweep_liveness(storage.as_ref(), &metrics);
            }

            _ = reaper_interval.tick() => {
                reap_tasks(storage.as_ref(), &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        agents_marked_offline = snapshot.agents_marked_offline,
        tasks_reaped = snapshot.tasks_reaped,
        sweep_cycles = snapshot.sweep_cycles,
        sweep_errors = snapshot.sweep_errors,
        "Sweeper task completed"
    );

    metrics
}

/// Perform one agent liveness sweep.
fn sweep_liveness(storage: &dyn StorageTrait, metrics: &SweeperMetrics) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    match storage.agent_sweep_offline(Utc::now()) {
        Ok(0) => {
            tracing::trace!("Liveness sweep completed with no overdue agents");
        }
        Ok(marked) => {
            metrics
                .agents_marked_offline
                .fetch_add(marked as u64, Ordering::Relaxed);
            tracing::info!(marked, "Liveness sweep marked agents offline");
        }
        Err(e) => {
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Liveness sweep failed");
        }
    }
}

/// Perform one task timeout reap.
fn reap_tasks(storage: &dyn StorageTrait, metrics: &SweeperMetrics) {
    match storage.task_reap_overdue(Utc::now()) {
        Ok(0) => {
            tracing::trace!("Reaper cycle completed with no overdue tasks");
        }
        Ok(reaped) => {
            metrics
                .tasks_reaped
                .fetch_add(reaped as u64, Ordering::Relaxed);
            tracing::warn!(reaped, "Reaper timed out overdue tasks");
        }
        Err(e) => {
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Task reap failed");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
