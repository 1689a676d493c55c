//! VIGIL Reference Agent
//!
//! Beacons to the server on a fixed cadence, executes handed-out
//! `execute_command` tasks in the background, and carries their results on
//! the next beacon. While any task is in flight the agent reports
//! `processing`, otherwise `online`.

mod config;
mod executor;

use std::net::UdpSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

use vigil_core::{sign_body, AgentStatus, BasicTelemetry, TaskResult};

use config::AgentConfig;
use executor::TaskInstruction;

/// Beacon payload as the server expects it. The serialized bytes of this
/// struct are exactly what gets signed.
#[derive(Debug, Serialize)]
struct BeaconBody {
    status: AgentStatus,
    basic_telemetry: BasicTelemetry,
    task_results: Vec<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct BeaconReply {
    #[allow(dead_code)]
    status: String,
    #[serde(default)]
    new_tasks: Vec<TaskInstruction>,
    #[serde(default)]
    config_update: Option<ConfigUpdate>,
}

/// One-shot configuration delta the server staged for this agent.
#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    beacon_interval_seconds: i64,
}

/// Bounds accepted for a server-pushed beacon interval, in seconds.
const INTERVAL_BOUNDS: std::ops::RangeInclusive<i64> = 10..=3600;

/// Results finished since the last successful beacon.
type PendingResults = Arc<Mutex<Vec<TaskResult>>>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid agent configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        agent_id = %config.agent_id,
        server = %config.server_url,
        interval_secs = config.beacon_interval.as_secs(),
        "Agent starting"
    );

    let client = reqwest::Client::new();
    let pending: PendingResults = Arc::new(Mutex::new(Vec::new()));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let mut ticker = interval(config.beacon_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Some(new_interval) = beacon_once(&client, &config, &pending, &in_flight).await {
            tracing::info!(
                interval_secs = new_interval.as_secs(),
                "Applying server-pushed beacon interval"
            );
            ticker = interval(new_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The fresh ticker fires immediately; consume that tick so the
            // next beacon waits a full interval.
            ticker.tick().await;
        }
    }
}

/// Send one beacon, then launch any handed-out tasks. Returns the new
/// beacon interval when the reply carries a valid config update.
async fn beacon_once(
    client: &reqwest::Client,
    config: &AgentConfig,
    pending: &PendingResults,
    in_flight: &Arc<AtomicUsize>,
) -> Option<std::time::Duration> {
    let status = if in_flight.load(Ordering::Relaxed) > 0 {
        AgentStatus::Processing
    } else {
        AgentStatus::Online
    };

    let task_results: Vec<TaskResult> = pending.lock().await.drain(..).collect();
    let body = BeaconBody {
        status,
        basic_telemetry: collect_telemetry(),
        task_results,
    };

    let raw = match serde_json::to_vec(&body) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize beacon");
            return None;
        }
    };
    let signature = sign_body(&config.psk, &raw);

    let response = client
        .post(config.beacon_url())
        .header("content-type", "application/json")
        .header("x-agent-id", config.agent_id.to_string())
        .header("x-signature", signature)
        .body(raw)
        .send()
        .await;

    let reply: BeaconReply = match response {
        Ok(response) if response.status().is_success() => match response.json().await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "Malformed beacon reply");
                requeue_results(pending, body.task_results).await;
                return None;
            }
        },
        Ok(response) => {
            tracing::error!(status = %response.status(), "Beacon rejected");
            requeue_results(pending, body.task_results).await;
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Beacon failed, will retry next interval");
            requeue_results(pending, body.task_results).await;
            return None;
        }
    };

    for instruction in reply.new_tasks {
        let pending = pending.clone();
        let in_flight = in_flight.clone();
        in_flight.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let result = executor::execute(instruction).await;
            tracing::info!(task_id = %result.task_id, status = %result.status, "Task finished");
            pending.lock().await.push(result);
            in_flight.fetch_sub(1, Ordering::Relaxed);
        });
    }

    reply.config_update.and_then(|update| {
        if INTERVAL_BOUNDS.contains(&update.beacon_interval_seconds) {
            Some(std::time::Duration::from_secs(
                update.beacon_interval_seconds as u64,
            ))
        } else {
            tracing::warn!(
                interval_secs = update.beacon_interval_seconds,
                "Ignoring out-of-range beacon interval from server"
            );
            None
        }
    })
}

/// Put unacknowledged results back so the next beacon carries them again.
async fn requeue_results(pending: &PendingResults, results: Vec<TaskResult>) {
    if !results.is_empty() {
        let mut queue = pending.lock().await;
        for result in results {
            queue.insert(0, result);
        }
    }
}

/// Gather the host identity block sent on every beacon.
fn collect_telemetry() -> BasicTelemetry {
    BasicTelemetry {
        os_info: Some(format!(
            "{} {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )),
        hostname: read_hostname(),
        agent_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        internal_ips: local_ip().into_iter().collect(),
        timestamp: Some(Utc::now()),
        uptime: None,
    }
}

fn read_hostname() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
}

/// Discover the primary local address by opening a routed (never sent-on)
/// UDP socket.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}
