//! VIGIL Storage - Storage Trait and In-Memory Implementation
//!
//! Defines the storage abstraction for VIGIL agents, tasks, and telemetry.
//! The in-memory backend guards all agent/task state behind one `RwLock` so
//! that every compound protocol step (beacon application, task dequeue,
//! result recording, timeout reaping, liveness sweep) observes and mutates
//! a consistent snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use vigil_core::{
    validate_beacon_interval, validate_task_timeout, Agent, AgentId, AgentStatus, BasicTelemetry,
    Psk, StoreError, SystemMetrics, Task, TaskId, TaskResult, TaskStatus, TelemetryRecord,
    Timestamp, VigilResult,
};

/// Telemetry samples retained per agent before the oldest is evicted.
pub const TELEMETRY_RING_CAPACITY: usize = 100;

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for agent configuration.
#[derive(Debug, Clone, Default)]
pub struct AgentConfigUpdate {
    /// New display name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New beacon cadence, bounds [10, 3600]
    pub beacon_interval_seconds: Option<i64>,
    /// Replacement tag set
    pub tags: Option<Vec<String>>,
}

/// One-shot configuration delta delivered to an agent on its next beacon,
/// then cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconConfigUpdate {
    pub beacon_interval_seconds: i64,
}

/// Outcome of applying one beacon as a single transaction.
#[derive(Debug, Clone)]
pub struct BeaconOutcome {
    /// Agent state after liveness refresh and metadata merge
    pub agent: Agent,
    /// Tasks handed out on this beacon, already transitioned to `processing`
    pub handed_out: Vec<Task>,
    /// Results accepted into a terminal state
    pub results_recorded: usize,
    /// Results rejected for ownership or by the state machine, for
    /// caller-side logging
    pub results_rejected: Vec<(TaskId, StoreError)>,
    /// Pending configuration delta, consumed by this beacon
    pub config_update: Option<BeaconConfigUpdate>,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait for VIGIL entities.
///
/// Every time-dependent operation takes `now` explicitly so callers (and
/// tests) control the clock. Implementations must make each method atomic
/// with respect to the others.
pub trait StorageTrait: Send + Sync {
    // === Agent Operations ===

    /// Insert a newly registered agent.
    fn agent_insert(&self, agent: &Agent) -> VigilResult<()>;

    /// Get an agent by ID.
    fn agent_get(&self, id: AgentId) -> VigilResult<Option<Agent>>;

    /// List all agents in registration order.
    fn agent_list(&self) -> VigilResult<Vec<Agent>>;

    /// Look up an agent's pre-shared key for beacon verification.
    fn agent_psk(&self, id: AgentId) -> VigilResult<Option<Psk>>;

    /// Update operator-editable agent configuration.
    fn agent_update_config(&self, id: AgentId, update: AgentConfigUpdate) -> VigilResult<Agent>;

    /// Record an accepted beacon: refresh liveness and merge telemetry.
    fn agent_record_beacon(
        &self,
        id: AgentId,
        reported: AgentStatus,
        telemetry: Option<&BasicTelemetry>,
        now: Timestamp,
    ) -> VigilResult<Agent>;

    /// Delete an agent, cancelling its non-terminal tasks. Returns the
    /// number of tasks cancelled by the cascade.
    fn agent_delete(&self, id: AgentId, now: Timestamp) -> VigilResult<usize>;

    /// Mark agents whose beacons are overdue at `now` as offline. Returns
    /// the number of agents newly marked offline.
    fn agent_sweep_offline(&self, now: Timestamp) -> VigilResult<usize>;

    // === Task Operations ===

    /// Insert a freshly queued task. The owning agent must exist.
    fn task_insert(&self, task: &Task) -> VigilResult<()>;

    /// Get a task by ID.
    fn task_get(&self, id: TaskId) -> VigilResult<Option<Task>>;

    /// List all tasks in creation order.
    fn task_list(&self) -> VigilResult<Vec<Task>>;

    /// List tasks owned by one agent, in creation order.
    fn task_list_for_agent(&self, agent_id: AgentId) -> VigilResult<Vec<Task>>;

    /// Atomically hand out every queued task for an agent, transitioning
    /// each to `processing`. A task is returned by this method at most once.
    fn task_dequeue_for_agent(&self, agent_id: AgentId, now: Timestamp) -> VigilResult<Vec<Task>>;

    /// Record an agent-reported result for a `processing` task. Late or
    /// duplicate results are rejected with `InvalidStateTransition`.
    fn task_record_result(&self, result: &TaskResult, now: Timestamp) -> VigilResult<Task>;

    /// Cancel a still-queued task.
    fn task_cancel(&self, id: TaskId, now: Timestamp) -> VigilResult<Task>;

    /// Time out `processing` tasks that have exceeded their budget at `now`.
    /// Returns the number of tasks reaped.
    fn task_reap_overdue(&self, now: Timestamp) -> VigilResult<usize>;

    // === Composite Operations ===

    /// Apply one authenticated beacon as a single transaction: record the
    /// beacon, ingest carried results (per-item rejections do not abort the
    /// beacon), dequeue pending tasks, and consume any staged config
    /// update. Results for tasks the agent does not own are rejected.
    fn apply_beacon(
        &self,
        agent_id: AgentId,
        reported: AgentStatus,
        telemetry: Option<&BasicTelemetry>,
        results: &[TaskResult],
        now: Timestamp,
    ) -> VigilResult<BeaconOutcome>;
}

// ============================================================================
// TELEMETRY SINK
// ============================================================================

/// Sink for system metrics samples carried on beacons.
pub trait TelemetrySink: Send + Sync {
    /// Persist one sample for an agent.
    fn record(&self, agent_id: AgentId, metrics: SystemMetrics, now: Timestamp) -> VigilResult<()>;

    /// Most recent samples for an agent, newest last, capped at `limit`.
    fn recent(&self, agent_id: AgentId, limit: usize) -> VigilResult<Vec<TelemetryRecord>>;

    /// Most recent samples across every agent, newest first, capped at
    /// `limit`.
    fn recent_all(&self, limit: usize) -> VigilResult<Vec<TelemetryRecord>>;

    /// Drop all samples for an agent.
    fn purge(&self, agent_id: AgentId) -> VigilResult<()>;
}

/// In-memory telemetry sink holding a bounded ring per agent.
#[derive(Debug, Default)]
pub struct MemoryTelemetrySink {
    rings: RwLock<HashMap<AgentId, VecDeque<TelemetryRecord>>>,
}

impl MemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetrySink for MemoryTelemetrySink {
    fn record(&self, agent_id: AgentId, metrics: SystemMetrics, now: Timestamp) -> VigilResult<()> {
        let mut rings = self.rings.write().map_err(|_| StoreError::LockPoisoned)?;
        let ring = rings.entry(agent_id).or_default();
        if ring.len() >= TELEMETRY_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(TelemetryRecord {
            agent_id,
            timestamp: metrics.timestamp,
            received_at: now,
            metrics,
        });
        Ok(())
    }

    fn recent(&self, agent_id: AgentId, limit: usize) -> VigilResult<Vec<TelemetryRecord>> {
        let rings = self.rings.read().map_err(|_| StoreError::LockPoisoned)?;
        let ring = match rings.get(&agent_id) {
            Some(ring) => ring,
            None => return Ok(Vec::new()),
        };
        let skip = ring.len().saturating_sub(limit);
        Ok(ring.iter().skip(skip).cloned().collect())
    }

    fn recent_all(&self, limit: usize) -> VigilResult<Vec<TelemetryRecord>> {
        let rings = self.rings.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut all: Vec<TelemetryRecord> = rings.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        all.truncate(limit);
        Ok(all)
    }

    fn purge(&self, agent_id: AgentId) -> VigilResult<()> {
        let mut rings = self.rings.write().map_err(|_| StoreError::LockPoisoned)?;
        rings.remove(&agent_id);
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY STORAGE
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    agents: HashMap<AgentId, Agent>,
    agent_order: Vec<AgentId>,
    tasks: HashMap<TaskId, Task>,
    task_order: Vec<TaskId>,
    pending_config: HashMap<AgentId, BeaconConfigUpdate>,
}

impl Inner {
    fn agent_mut(&mut self, id: AgentId) -> Result<&mut Agent, StoreError> {
        self.agents
            .get_mut(&id)
            .ok_or(StoreError::AgentNotFound { id })
    }

    fn transition_task(
        &mut self,
        id: TaskId,
        to: TaskStatus,
    ) -> Result<&mut Task, StoreError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(StoreError::TaskNotFound { id })?;
        if !task.status.can_transition_to(to) {
            return Err(StoreError::InvalidStateTransition {
                task_id: id,
                from: task.status,
                to,
            });
        }
        task.status = to;
        Ok(task)
    }

    fn record_result(&mut self, result: &TaskResult, now: Timestamp) -> Result<Task, StoreError> {
        let task = self.transition_task(result.task_id, result.final_status())?;
        task.completed_at = Some(now);
        task.output = result.output.clone();
        task.error_output = result.error_output.clone();
        task.exit_code = result.exit_code;
        Ok(task.clone())
    }

    fn dequeue_for_agent(&mut self, agent_id: AgentId, now: Timestamp) -> Vec<Task> {
        let mut handed_out = Vec::new();
        for id in &self.task_order {
            if let Some(task) = self.tasks.get_mut(id) {
                if task.agent_id == agent_id && task.status == TaskStatus::Queued {
                    task.status = TaskStatus::Processing;
                    task.started_at = Some(now);
                    handed_out.push(task.clone());
                }
            }
        }
        handed_out
    }
}

/// In-memory storage backend.
///
/// Suitable for a single-process deployment; all state is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Count of registered agents.
    pub fn agent_count(&self) -> usize {
        self.read().map(|inner| inner.agents.len()).unwrap_or(0)
    }

    /// Count of stored tasks.
    pub fn task_count(&self) -> usize {
        self.read().map(|inner| inner.tasks.len()).unwrap_or(0)
    }
}

impl StorageTrait for MemoryStorage {
    // === Agent Operations ===

    fn agent_insert(&self, agent: &Agent) -> VigilResult<()> {
        validate_beacon_interval(agent.beacon_interval_seconds)?;
        let mut inner = self.write()?;
        if inner.agents.contains_key(&agent.agent_id) {
            return Err(StoreError::InsertFailed {
                entity: "agent".to_string(),
                reason: "already exists".to_string(),
            }
            .into());
        }
        inner.agents.insert(agent.agent_id, agent.clone());
        inner.agent_order.push(agent.agent_id);
        Ok(())
    }

    fn agent_get(&self, id: AgentId) -> VigilResult<Option<Agent>> {
        let inner = self.read()?;
        Ok(inner.agents.get(&id).cloned())
    }

    fn agent_list(&self) -> VigilResult<Vec<Agent>> {
        let inner = self.read()?;
        Ok(inner
            .agent_order
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .cloned()
            .collect())
    }

    fn agent_psk(&self, id: AgentId) -> VigilResult<Option<Psk>> {
        let inner = self.read()?;
        Ok(inner.agents.get(&id).map(|agent| agent.psk.clone()))
    }

    fn agent_update_config(&self, id: AgentId, update: AgentConfigUpdate) -> VigilResult<Agent> {
        if let Some(interval) = update.beacon_interval_seconds {
            validate_beacon_interval(interval)?;
        }
        let mut inner = self.write()?;
        let agent = inner.agent_mut(id)?;

        if let Some(name) = update.name {
            agent.name = name;
        }
        if let Some(description) = update.description {
            agent.description = Some(description);
        }
        if let Some(interval) = update.beacon_interval_seconds {
            agent.beacon_interval_seconds = interval;
        }
        if let Some(tags) = update.tags {
            agent.tags = tags;
        }
        let agent = agent.clone();

        // Stage the new cadence for delivery on the agent's next beacon.
        if let Some(interval) = update.beacon_interval_seconds {
            inner.pending_config.insert(
                id,
                BeaconConfigUpdate {
                    beacon_interval_seconds: interval,
                },
            );
        }
        Ok(agent)
    }

    fn agent_record_beacon(
        &self,
        id: AgentId,
        reported: AgentStatus,
        telemetry: Option<&BasicTelemetry>,
        now: Timestamp,
    ) -> VigilResult<Agent> {
        let mut inner = self.write()?;
        let agent = inner.agent_mut(id)?;
        agent.record_beacon(reported, telemetry, now);
        Ok(agent.clone())
    }

    fn agent_delete(&self, id: AgentId, now: Timestamp) -> VigilResult<usize> {
        let mut inner = self.write()?;
        if inner.agents.remove(&id).is_none() {
            return Err(StoreError::AgentNotFound { id }.into());
        }
        inner.agent_order.retain(|aid| *aid != id);
        inner.pending_config.remove(&id);

        // Cascade: orphaned tasks can never produce a result, so every
        // non-terminal one is forced to cancelled regardless of the normal
        // transition rules.
        let mut cancelled = 0;
        for task in inner.tasks.values_mut() {
            if task.agent_id == id && !task.status.is_terminal() {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    fn agent_sweep_offline(&self, now: Timestamp) -> VigilResult<usize> {
        let mut inner = self.write()?;
        let mut marked = 0;
        for agent in inner.agents.values_mut() {
            if agent.status != AgentStatus::Offline && agent.is_overdue(now) {
                agent.status = AgentStatus::Offline;
                marked += 1;
            }
        }
        Ok(marked)
    }

    // === Task Operations ===

    fn task_insert(&self, task: &Task) -> VigilResult<()> {
        validate_task_timeout(task.timeout_seconds)?;
        let mut inner = self.write()?;
        if !inner.agents.contains_key(&task.agent_id) {
            return Err(StoreError::AgentNotFound { id: task.agent_id }.into());
        }
        if inner.tasks.contains_key(&task.task_id) {
            return Err(StoreError::InsertFailed {
                entity: "task".to_string(),
                reason: "already exists".to_string(),
            }
            .into());
        }
        inner.tasks.insert(task.task_id, task.clone());
        inner.task_order.push(task.task_id);
        Ok(())
    }

    fn task_get(&self, id: TaskId) -> VigilResult<Option<Task>> {
        let inner = self.read()?;
        Ok(inner.tasks.get(&id).cloned())
    }

    fn task_list(&self) -> VigilResult<Vec<Task>> {
        let inner = self.read()?;
        Ok(inner
            .task_order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .cloned()
            .collect())
    }

    fn task_list_for_agent(&self, agent_id: AgentId) -> VigilResult<Vec<Task>> {
        let inner = self.read()?;
        Ok(inner
            .task_order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|task| task.agent_id == agent_id)
            .cloned()
            .collect())
    }

    fn task_dequeue_for_agent(&self, agent_id: AgentId, now: Timestamp) -> VigilResult<Vec<Task>> {
        let mut inner = self.write()?;
        Ok(inner.dequeue_for_agent(agent_id, now))
    }

    fn task_record_result(&self, result: &TaskResult, now: Timestamp) -> VigilResult<Task> {
        let mut inner = self.write()?;
        Ok(inner.record_result(result, now)?)
    }

    fn task_cancel(&self, id: TaskId, now: Timestamp) -> VigilResult<Task> {
        let mut inner = self.write()?;
        let task = inner.transition_task(id, TaskStatus::Cancelled)?;
        task.completed_at = Some(now);
        Ok(task.clone())
    }

    fn task_reap_overdue(&self, now: Timestamp) -> VigilResult<usize> {
        let mut inner = self.write()?;
        let mut reaped = 0;
        for task in inner.tasks.values_mut() {
            if task.is_overdue(now) {
                task.status = TaskStatus::TimedOut;
                task.completed_at = Some(now);
                if task.error_output.is_none() {
                    task.error_output = Some(format!(
                        "task exceeded its {}s timeout without a result",
                        task.timeout_seconds
                    ));
                }
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    // === Composite Operations ===

    fn apply_beacon(
        &self,
        agent_id: AgentId,
        reported: AgentStatus,
        telemetry: Option<&BasicTelemetry>,
        results: &[TaskResult],
        now: Timestamp,
    ) -> VigilResult<BeaconOutcome> {
        let mut inner = self.write()?;
        let agent = inner.agent_mut(agent_id)?;
        agent.record_beacon(reported, telemetry, now);
        let agent = agent.clone();

        let mut results_recorded = 0;
        let mut results_rejected = Vec::new();
        for result in results {
            // A result only counts for a task this agent owns; anything
            // else is rejected before the state machine is consulted, so a
            // forged entry cannot settle another agent's task.
            match inner.tasks.get(&result.task_id) {
                None => {
                    results_rejected
                        .push((result.task_id, StoreError::TaskNotFound { id: result.task_id }));
                    continue;
                }
                Some(task) if task.agent_id != agent_id => {
                    results_rejected.push((
                        result.task_id,
                        StoreError::TaskNotOwned {
                            task_id: result.task_id,
                            agent_id,
                        },
                    ));
                    continue;
                }
                Some(_) => {}
            }
            match inner.record_result(result, now) {
                Ok(_) => results_recorded += 1,
                Err(err) => results_rejected.push((result.task_id, err)),
            }
        }

        let handed_out = inner.dequeue_for_agent(agent_id, now);
        let config_update = inner.pending_config.remove(&agent_id);

        Ok(BeaconOutcome {
            agent,
            handed_out,
            results_recorded,
            results_rejected,
            config_update,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vigil_core::{issue_credential, TaskKind, VigilError};

    fn make_agent(now: Timestamp) -> Agent {
        let (agent_id, psk) = issue_credential();
        Agent::new(agent_id, "web-01".to_string(), None, psk, now)
    }

    fn make_task(agent_id: AgentId, now: Timestamp) -> Task {
        Task::new(
            vigil_core::new_task_id(),
            agent_id,
            TaskKind::ExecuteCommand,
            serde_json::json!({"command": "uname -a"}),
            None,
            300,
            now,
        )
    }

    fn make_result(task_id: TaskId, exit_code: i32) -> TaskResult {
        TaskResult {
            task_id,
            status: if exit_code == 0 {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            },
            output: Some("Linux\n".to_string()),
            error_output: None,
            exit_code: Some(exit_code),
        }
    }

    // ========================================================================
    // Agent Tests
    // ========================================================================

    #[test]
    fn test_agent_insert_get() {
        let storage = MemoryStorage::new();
        let agent = make_agent(Utc::now());

        storage.agent_insert(&agent).unwrap();
        let retrieved = storage.agent_get(agent.agent_id).unwrap().unwrap();
        assert_eq!(retrieved.agent_id, agent.agent_id);
        assert_eq!(retrieved.status, AgentStatus::Offline);
    }

    #[test]
    fn test_agent_insert_duplicate() {
        let storage = MemoryStorage::new();
        let agent = make_agent(Utc::now());

        storage.agent_insert(&agent).unwrap();
        assert!(storage.agent_insert(&agent).is_err());
    }

    #[test]
    fn test_agent_list_preserves_registration_order() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agents: Vec<Agent> = (0..5).map(|_| make_agent(now)).collect();
        for agent in &agents {
            storage.agent_insert(agent).unwrap();
        }

        let listed = storage.agent_list().unwrap();
        let ids: Vec<AgentId> = listed.iter().map(|a| a.agent_id).collect();
        let expected: Vec<AgentId> = agents.iter().map(|a| a.agent_id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_agent_update_config_rejects_out_of_range_interval() {
        let storage = MemoryStorage::new();
        let agent = make_agent(Utc::now());
        storage.agent_insert(&agent).unwrap();

        let result = storage.agent_update_config(
            agent.agent_id,
            AgentConfigUpdate {
                beacon_interval_seconds: Some(5),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(VigilError::Validation(_))));

        let updated = storage
            .agent_update_config(
                agent.agent_id,
                AgentConfigUpdate {
                    beacon_interval_seconds: Some(120),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.beacon_interval_seconds, 120);
    }

    #[test]
    fn test_agent_delete_cascade_cancels_pending_tasks() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();

        let queued = make_task(agent.agent_id, now);
        storage.task_insert(&queued).unwrap();

        let done = make_task(agent.agent_id, now);
        storage.task_insert(&done).unwrap();
        storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();
        storage
            .task_record_result(&make_result(done.task_id, 0), now)
            .unwrap();

        let pending = make_task(agent.agent_id, now);
        storage.task_insert(&pending).unwrap();
        storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();

        let cancelled = storage.agent_delete(agent.agent_id, now).unwrap();
        assert_eq!(cancelled, 1); // only the still-processing task

        assert!(storage.agent_get(agent.agent_id).unwrap().is_none());
        assert_eq!(
            storage.task_get(pending.task_id).unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
        // Terminal tasks were left alone.
        assert_eq!(
            storage.task_get(done.task_id).unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn test_sweep_hysteresis() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();
        storage
            .agent_record_beacon(agent.agent_id, AgentStatus::Online, None, now)
            .unwrap();

        // Two intervals past: still within the grace window.
        let marked = storage
            .agent_sweep_offline(now + Duration::seconds(120))
            .unwrap();
        assert_eq!(marked, 0);

        // Just past three intervals: offline.
        let marked = storage
            .agent_sweep_offline(now + Duration::seconds(181))
            .unwrap();
        assert_eq!(marked, 1);
        assert_eq!(
            storage.agent_get(agent.agent_id).unwrap().unwrap().status,
            AgentStatus::Offline
        );

        // Already offline agents are not re-marked.
        let marked = storage
            .agent_sweep_offline(now + Duration::seconds(500))
            .unwrap();
        assert_eq!(marked, 0);
    }

    #[test]
    fn test_sweep_uses_created_at_for_never_beaconed_agent() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let mut agent = make_agent(now);
        agent.status = AgentStatus::Error;
        storage.agent_insert(&agent).unwrap();

        let marked = storage
            .agent_sweep_offline(now + Duration::seconds(181))
            .unwrap();
        assert_eq!(marked, 1);
    }

    // ========================================================================
    // Task Tests
    // ========================================================================

    #[test]
    fn test_task_insert_requires_agent() {
        let storage = MemoryStorage::new();
        let task = make_task(vigil_core::new_agent_id(), Utc::now());
        let result = storage.task_insert(&task);
        assert!(matches!(
            result,
            Err(VigilError::Store(StoreError::AgentNotFound { .. }))
        ));
    }

    #[test]
    fn test_dequeue_is_at_most_once() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();

        let task = make_task(agent.agent_id, now);
        storage.task_insert(&task).unwrap();

        let first = storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, TaskStatus::Processing);
        assert_eq!(first[0].started_at, Some(now));

        let second = storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_dequeue_preserves_creation_order() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();

        let tasks: Vec<Task> = (0..3).map(|_| make_task(agent.agent_id, now)).collect();
        for task in &tasks {
            storage.task_insert(task).unwrap();
        }

        let handed_out = storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();
        let ids: Vec<TaskId> = handed_out.iter().map(|t| t.task_id).collect();
        let expected: Vec<TaskId> = tasks.iter().map(|t| t.task_id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_record_result_completes_task() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();
        let task = make_task(agent.agent_id, now);
        storage.task_insert(&task).unwrap();
        storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();

        let later = now + Duration::seconds(5);
        let recorded = storage
            .task_record_result(&make_result(task.task_id, 0), later)
            .unwrap();
        assert_eq!(recorded.status, TaskStatus::Completed);
        assert_eq!(recorded.completed_at, Some(later));
        assert_eq!(recorded.output.as_deref(), Some("Linux\n"));
    }

    #[test]
    fn test_record_result_rejects_queued_task() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();
        let task = make_task(agent.agent_id, now);
        storage.task_insert(&task).unwrap();

        let result = storage.task_record_result(&make_result(task.task_id, 0), now);
        assert!(matches!(
            result,
            Err(VigilError::Store(StoreError::InvalidStateTransition { .. }))
        ));
    }

    #[test]
    fn test_late_result_after_reap_is_rejected() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();
        let task = make_task(agent.agent_id, now);
        storage.task_insert(&task).unwrap();
        storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();

        let past_deadline = now + Duration::seconds(301);
        assert_eq!(storage.task_reap_overdue(past_deadline).unwrap(), 1);

        let late = storage.task_record_result(&make_result(task.task_id, 0), past_deadline);
        assert!(late.is_err());
        assert_eq!(
            storage.task_get(task.task_id).unwrap().unwrap().status,
            TaskStatus::TimedOut
        );
    }

    #[test]
    fn test_cancel_only_from_queued() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();
        let task = make_task(agent.agent_id, now);
        storage.task_insert(&task).unwrap();

        let cancelled = storage.task_cancel(task.task_id, now).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let other = make_task(agent.agent_id, now);
        storage.task_insert(&other).unwrap();
        storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();
        assert!(storage.task_cancel(other.task_id, now).is_err());
    }

    // ========================================================================
    // Beacon Transaction Tests
    // ========================================================================

    #[test]
    fn test_apply_beacon_full_cycle() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();
        let task = make_task(agent.agent_id, now);
        storage.task_insert(&task).unwrap();

        // First beacon: task handed out.
        let outcome = storage
            .apply_beacon(agent.agent_id, AgentStatus::Online, None, &[], now)
            .unwrap();
        assert_eq!(outcome.handed_out.len(), 1);
        assert_eq!(outcome.agent.status, AgentStatus::Online);
        assert_eq!(outcome.agent.last_seen, Some(now));

        // Second beacon: result carried back, nothing new to hand out.
        let later = now + Duration::seconds(60);
        let outcome = storage
            .apply_beacon(
                agent.agent_id,
                AgentStatus::Online,
                None,
                &[make_result(task.task_id, 0)],
                later,
            )
            .unwrap();
        assert!(outcome.handed_out.is_empty());
        assert_eq!(outcome.results_recorded, 1);
        assert!(outcome.results_rejected.is_empty());
        assert_eq!(
            storage.task_get(task.task_id).unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn test_apply_beacon_isolates_stale_results() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();
        let task = make_task(agent.agent_id, now);
        storage.task_insert(&task).unwrap();
        storage
            .task_dequeue_for_agent(agent.agent_id, now)
            .unwrap();
        storage
            .task_record_result(&make_result(task.task_id, 0), now)
            .unwrap();

        // A duplicate result for the completed task is rejected, but the
        // beacon still refreshes liveness.
        let later = now + Duration::seconds(60);
        let outcome = storage
            .apply_beacon(
                agent.agent_id,
                AgentStatus::Online,
                None,
                &[make_result(task.task_id, 1)],
                later,
            )
            .unwrap();
        assert_eq!(outcome.results_recorded, 0);
        assert_eq!(outcome.results_rejected.len(), 1);
        assert_eq!(outcome.agent.last_seen, Some(later));
        assert_eq!(
            storage.task_get(task.task_id).unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn test_apply_beacon_rejects_result_for_foreign_task() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let victim = make_agent(now);
        let attacker = make_agent(now);
        storage.agent_insert(&victim).unwrap();
        storage.agent_insert(&attacker).unwrap();

        // Victim's task is in flight.
        let task = make_task(victim.agent_id, now);
        storage.task_insert(&task).unwrap();
        storage
            .task_dequeue_for_agent(victim.agent_id, now)
            .unwrap();

        // The attacker's own beacon carries a result for the victim's task.
        let outcome = storage
            .apply_beacon(
                attacker.agent_id,
                AgentStatus::Online,
                None,
                &[make_result(task.task_id, 0)],
                now,
            )
            .unwrap();

        assert_eq!(outcome.results_recorded, 0);
        assert!(matches!(
            outcome.results_rejected.as_slice(),
            [(_, StoreError::TaskNotOwned { .. })]
        ));
        assert_eq!(
            storage.task_get(task.task_id).unwrap().unwrap().status,
            TaskStatus::Processing
        );

        // The owner can still settle it.
        let outcome = storage
            .apply_beacon(
                victim.agent_id,
                AgentStatus::Online,
                None,
                &[make_result(task.task_id, 0)],
                now,
            )
            .unwrap();
        assert_eq!(outcome.results_recorded, 1);
    }

    #[test]
    fn test_config_update_delivered_on_next_beacon_exactly_once() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();

        storage
            .agent_update_config(
                agent.agent_id,
                AgentConfigUpdate {
                    beacon_interval_seconds: Some(120),
                    ..Default::default()
                },
            )
            .unwrap();

        let outcome = storage
            .apply_beacon(agent.agent_id, AgentStatus::Online, None, &[], now)
            .unwrap();
        assert_eq!(
            outcome.config_update,
            Some(BeaconConfigUpdate {
                beacon_interval_seconds: 120
            })
        );

        // Consumed: the next beacon carries nothing.
        let outcome = storage
            .apply_beacon(agent.agent_id, AgentStatus::Online, None, &[], now)
            .unwrap();
        assert_eq!(outcome.config_update, None);
    }

    #[test]
    fn test_apply_beacon_unknown_agent_mutates_nothing() {
        let storage = MemoryStorage::new();
        let result = storage.apply_beacon(
            vigil_core::new_agent_id(),
            AgentStatus::Online,
            None,
            &[],
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(VigilError::Store(StoreError::AgentNotFound { .. }))
        ));
    }

    #[test]
    fn test_beacon_with_idle_unoffines_agent() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let agent = make_agent(now);
        storage.agent_insert(&agent).unwrap();

        storage
            .agent_sweep_offline(now + Duration::seconds(181))
            .unwrap();
        assert_eq!(
            storage.agent_get(agent.agent_id).unwrap().unwrap().status,
            AgentStatus::Offline
        );

        let updated = storage
            .agent_record_beacon(
                agent.agent_id,
                AgentStatus::Idle,
                None,
                now + Duration::seconds(200),
            )
            .unwrap();
        assert_eq!(updated.status, AgentStatus::Idle);
    }

    // ========================================================================
    // Telemetry Sink Tests
    // ========================================================================

    #[test]
    fn test_telemetry_ring_evicts_oldest() {
        let sink = MemoryTelemetrySink::new();
        let agent_id = vigil_core::new_agent_id();
        let now = Utc::now();

        for i in 0..(TELEMETRY_RING_CAPACITY + 10) {
            let metrics = SystemMetrics {
                cpu_percent: Some(i as f64),
                ..Default::default()
            };
            sink.record(agent_id, metrics, now + Duration::seconds(i as i64))
                .unwrap();
        }

        let all = sink.recent(agent_id, usize::MAX).unwrap();
        assert_eq!(all.len(), TELEMETRY_RING_CAPACITY);
        // Oldest ten samples evicted; newest retained.
        assert_eq!(all[0].metrics.cpu_percent, Some(10.0));
        assert_eq!(
            all.last().unwrap().metrics.cpu_percent,
            Some((TELEMETRY_RING_CAPACITY + 9) as f64)
        );
    }

    #[test]
    fn test_telemetry_recent_all_merges_newest_first() {
        let sink = MemoryTelemetrySink::new();
        let now = Utc::now();
        let agent_a = vigil_core::new_agent_id();
        let agent_b = vigil_core::new_agent_id();

        for i in 0..3 {
            let metrics = SystemMetrics {
                cpu_percent: Some(i as f64),
                ..Default::default()
            };
            // Interleave so neither agent's samples are contiguous in time.
            sink.record(agent_a, metrics.clone(), now + Duration::seconds(2 * i))
                .unwrap();
            sink.record(agent_b, metrics, now + Duration::seconds(2 * i + 1))
                .unwrap();
        }

        let feed = sink.recent_all(4).unwrap();
        assert_eq!(feed.len(), 4);
        let times: Vec<Timestamp> = feed.iter().map(|r| r.received_at).collect();
        let mut sorted = times.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(times, sorted);
        assert_eq!(feed[0].agent_id, agent_b);
        assert_eq!(feed[0].received_at, now + Duration::seconds(5));
    }

    #[test]
    fn test_telemetry_recent_limit_and_purge() {
        let sink = MemoryTelemetrySink::new();
        let agent_id = vigil_core::new_agent_id();
        let now = Utc::now();

        for i in 0..5 {
            let metrics = SystemMetrics {
                cpu_percent: Some(i as f64),
                ..Default::default()
            };
            sink.record(agent_id, metrics, now).unwrap();
        }

        let last_two = sink.recent(agent_id, 2).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].metrics.cpu_percent, Some(3.0));
        assert_eq!(last_two[1].metrics.cpu_percent, Some(4.0));

        sink.purge(agent_id).unwrap();
        assert!(sink.recent(agent_id, 10).unwrap().is_empty());
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use vigil_core::{issue_credential, TaskKind};

    fn seeded_storage(task_count: usize) -> (MemoryStorage, AgentId, Vec<TaskId>) {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let (agent_id, psk) = issue_credential();
        let agent = Agent::new(agent_id, "prop".to_string(), None, psk, now);
        storage.agent_insert(&agent).unwrap();

        let mut ids = Vec::new();
        for _ in 0..task_count {
            let task = Task::new(
                vigil_core::new_task_id(),
                agent_id,
                TaskKind::ExecuteCommand,
                serde_json::json!({"command": "true"}),
                None,
                300,
                now,
            );
            storage.task_insert(&task).unwrap();
            ids.push(task.task_id);
        }
        (storage, agent_id, ids)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Interleaved dequeue calls hand each task out exactly once.
        #[test]
        fn prop_dequeue_at_most_once(task_count in 0usize..20, rounds in 1usize..5) {
            let (storage, agent_id, _) = seeded_storage(task_count);
            let now = Utc::now();

            let mut seen = std::collections::HashSet::new();
            let mut total = 0;
            for round in 0..rounds {
                let handed_out = storage
                    .task_dequeue_for_agent(agent_id, now + Duration::seconds(round as i64))
                    .unwrap();
                for task in handed_out {
                    prop_assert!(seen.insert(task.task_id), "task handed out twice");
                    total += 1;
                }
            }
            prop_assert_eq!(total, task_count);
        }

        /// Once terminal, a task's status never changes again, whatever
        /// mixture of results, cancels, and reaps arrives afterwards.
        #[test]
        fn prop_terminal_states_are_immutable(exit_code in 0i32..3, late_ops in 0usize..6) {
            let (storage, agent_id, ids) = seeded_storage(1);
            let now = Utc::now();
            storage.task_dequeue_for_agent(agent_id, now).unwrap();

            let result = TaskResult {
                task_id: ids[0],
                status: TaskStatus::Completed,
                output: None,
                error_output: None,
                exit_code: Some(exit_code),
            };
            let recorded = storage.task_record_result(&result, now).unwrap();
            let settled = recorded.status;
            prop_assert!(settled.is_terminal());

            for i in 0..late_ops {
                let later = now + Duration::seconds(400 + i as i64);
                let _ = storage.task_record_result(&result, later);
                let _ = storage.task_cancel(ids[0], later);
                let _ = storage.task_reap_overdue(later);
                let current = storage.task_get(ids[0]).unwrap().unwrap().status;
                prop_assert_eq!(current, settled);
            }
        }
    }
}
