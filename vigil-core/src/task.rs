//! Task types and the per-task state machine.
//!
//! A task is a unit of work queued for exactly one agent. It is handed out
//! in a beacon response at most once and then progresses through a terminal
//! state machine:
//!
//! ```text
//! queued ----(handed out)----> processing
//! processing --(exit 0)------> completed
//! processing --(exit != 0)---> failed
//! processing --(timeout)-----> timed_out
//! queued ----(cancel)--------> cancelled
//! ```
//!
//! Terminal states are immutable; every attempted transition out of one is
//! rejected with `StoreError::InvalidStateTransition`.

use crate::{AgentId, TaskId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TASK KIND
// ============================================================================

/// Enumerated task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run a shell command on the agent host. Payload: `{"command": "..."}`
    ExecuteCommand,
}

impl TaskKind {
    /// Convert to wire/database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskKind::ExecuteCommand => "execute_command",
        }
    }

    /// Parse from wire/database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TaskKindParseError> {
        match s.to_lowercase().as_str() {
            "execute_command" => Ok(TaskKind::ExecuteCommand),
            _ => Err(TaskKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid task kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskKindParseError(pub String);

impl fmt::Display for TaskKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid task kind: {}", self.0)
    }
}

impl std::error::Error for TaskKindParseError {}

// ============================================================================
// TASK STATUS STATE MACHINE
// ============================================================================

/// State machine value for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for the agent's next beacon
    Queued,
    /// Handed out to the agent; never rebroadcast
    Processing,
    /// Result received with exit code 0
    Completed,
    /// Result received with a non-zero exit code
    Failed,
    /// Agent reported a timeout, or the reaper exceeded `timeout_seconds`
    TimedOut,
    /// Cancelled before dispatch
    Cancelled,
}

impl TaskStatus {
    /// Convert to wire/database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from wire/database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TaskStatusParseError> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "timed_out" => Ok(TaskStatus::TimedOut),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(TaskStatusParseError(s.to_string())),
        }
    }

    /// Whether this status permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::TimedOut
                | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine permits `self -> to`.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (TaskStatus::Queued, TaskStatus::Processing)
                | (TaskStatus::Queued, TaskStatus::Cancelled)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::TimedOut)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid task status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid task status: {}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ============================================================================
// TASK ENTITY
// ============================================================================

/// A unit of work owned by the queue and targeted at exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    /// Owning agent. Foreign reference, not ownership: the queue owns the
    /// task; deletion of the agent cascade-cancels what is still pending.
    pub agent_id: AgentId,
    pub kind: TaskKind,
    /// Opaque structured payload interpreted by the task kind
    pub payload: serde_json::Value,
    pub description: Option<String>,
    pub status: TaskStatus,
    /// Max wall-clock seconds the agent may spend executing, bounds [1, 3600]
    pub timeout_seconds: i64,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub exit_code: Option<i32>,
}

impl Task {
    /// Create a freshly queued task.
    pub fn new(
        task_id: TaskId,
        agent_id: AgentId,
        kind: TaskKind,
        payload: serde_json::Value,
        description: Option<String>,
        timeout_seconds: i64,
        now: Timestamp,
    ) -> Self {
        Self {
            task_id,
            agent_id,
            kind,
            payload,
            description,
            status: TaskStatus::Queued,
            timeout_seconds,
            created_at: now,
            started_at: None,
            completed_at: None,
            output: None,
            error_output: None,
            exit_code: None,
        }
    }

    /// The shell command for an `execute_command` payload, if present and
    /// non-empty.
    pub fn command(&self) -> Option<&str> {
        self.payload
            .get("command")
            .and_then(|value| value.as_str())
            .filter(|command| !command.trim().is_empty())
    }

    /// Whether a `processing` task has exceeded its timeout budget at `now`.
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        match (self.status, self.started_at) {
            (TaskStatus::Processing, Some(started_at)) => {
                now - started_at > chrono::Duration::seconds(self.timeout_seconds)
            }
            _ => false,
        }
    }
}

// ============================================================================
// TASK RESULT
// ============================================================================

/// A task result carried on a beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TaskResult {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub task_id: TaskId,
    /// Agent-reported outcome: completed, failed, or timed_out
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub exit_code: Option<i32>,
}

impl TaskResult {
    /// Terminal status the server records for this result.
    ///
    /// An agent-reported timeout is honored as such; otherwise the exit
    /// code is authoritative: zero completes, anything else fails.
    pub fn final_status(&self) -> TaskStatus {
        if self.status == TaskStatus::TimedOut {
            return TaskStatus::TimedOut;
        }
        match self.exit_code {
            Some(0) => TaskStatus::Completed,
            _ => TaskStatus::Failed,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn make_task() -> Task {
        Task::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TaskKind::ExecuteCommand,
            serde_json::json!({"command": "echo hi"}),
            None,
            300,
            Utc::now(),
        )
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::TimedOut,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_db_str(status.as_db_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::TimedOut.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_permitted_transitions() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::TimedOut));
    }

    #[test]
    fn test_forbidden_transitions() {
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Processing.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Processing.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::TimedOut.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Processing));
    }

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(
            TaskKind::from_db_str("execute_command").unwrap(),
            TaskKind::ExecuteCommand
        );
        assert!(TaskKind::from_db_str("file_transfer").is_err());
    }

    #[test]
    fn test_command_extraction() {
        let task = make_task();
        assert_eq!(task.command(), Some("echo hi"));

        let mut empty = make_task();
        empty.payload = serde_json::json!({"command": "   "});
        assert_eq!(empty.command(), None);

        let mut missing = make_task();
        missing.payload = serde_json::json!({});
        assert_eq!(missing.command(), None);
    }

    #[test]
    fn test_is_overdue() {
        let now = Utc::now();
        let mut task = make_task();
        task.timeout_seconds = 5;

        // Queued tasks are never overdue.
        assert!(!task.is_overdue(now + Duration::seconds(3600)));

        task.status = TaskStatus::Processing;
        task.started_at = Some(now);
        assert!(!task.is_overdue(now + Duration::seconds(5)));
        assert!(task.is_overdue(now + Duration::seconds(6)));
    }

    #[test]
    fn test_result_final_status_mapping() {
        let mut result = TaskResult {
            task_id: Uuid::new_v4(),
            status: TaskStatus::Completed,
            output: Some("hi\n".to_string()),
            error_output: None,
            exit_code: Some(0),
        };
        assert_eq!(result.final_status(), TaskStatus::Completed);

        result.exit_code = Some(2);
        assert_eq!(result.final_status(), TaskStatus::Failed);

        result.exit_code = None;
        assert_eq!(result.final_status(), TaskStatus::Failed);

        result.status = TaskStatus::TimedOut;
        assert_eq!(result.final_status(), TaskStatus::TimedOut);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
