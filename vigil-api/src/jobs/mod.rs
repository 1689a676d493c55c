//! Background Jobs
//!
//! Long-running maintenance tasks spawned alongside the HTTP server.

pub mod sweeper;

pub use sweeper::{sweeper_task, SweeperConfig, SweeperMetrics, SweeperSnapshot};
