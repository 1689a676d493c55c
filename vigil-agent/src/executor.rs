//! Task Execution
//!
//! Runs `execute_command` tasks in a subprocess with a wall-clock budget.
//! Exit code 0 reports `completed`, any other exit reports `failed`, and a
//! budget overrun kills the child and reports `timed_out`.

use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use vigil_core::{TaskId, TaskResult, TaskStatus};

/// Cap on captured stdout/stderr, matching what the server will store.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// One task as handed out in a beacon response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TaskInstruction {
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    pub timeout_seconds: i64,
}

/// Execute a single instruction to completion and produce the result to
/// carry on the next beacon.
pub async fn execute(instruction: TaskInstruction) -> TaskResult {
    if instruction.task_type != "execute_command" {
        return TaskResult {
            task_id: instruction.task_id,
            status: TaskStatus::Failed,
            output: None,
            error_output: Some(format!("Unsupported task type: {}", instruction.task_type)),
            exit_code: None,
        };
    }

    let command = match instruction
        .payload
        .get("command")
        .and_then(|value| value.as_str())
        .filter(|command| !command.trim().is_empty())
    {
        Some(command) => command.to_string(),
        None => {
            return TaskResult {
                task_id: instruction.task_id,
                status: TaskStatus::Failed,
                output: None,
                error_output: Some("Payload is missing a 'command' string".to_string()),
                exit_code: None,
            };
        }
    };

    let budget = Duration::from_secs(instruction.timeout_seconds.max(1) as u64);
    tracing::info!(task_id = %instruction.task_id, %command, timeout_secs = budget.as_secs(), "Executing task");

    run_command(instruction.task_id, &command, budget).await
}

async fn run_command(task_id: TaskId, command: &str, budget: Duration) -> TaskResult {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .kill_on_drop(true)
        .output();

    match timeout(budget, child).await {
        Ok(Ok(output)) => {
            let exit_code = output.status.code();
            let status = match exit_code {
                Some(0) => TaskStatus::Completed,
                _ => TaskStatus::Failed,
            };
            TaskResult {
                task_id,
                status,
                output: Some(truncate_output(&output.stdout)),
                error_output: Some(truncate_output(&output.stderr)),
                exit_code,
            }
        }
        Ok(Err(e)) => TaskResult {
            task_id,
            status: TaskStatus::Failed,
            output: None,
            error_output: Some(format!("Failed to spawn command: {}", e)),
            exit_code: None,
        },
        // kill_on_drop reaps the child when the future is dropped here.
        Err(_) => TaskResult {
            task_id,
            status: TaskStatus::TimedOut,
            output: None,
            error_output: Some(format!(
                "Command exceeded its {}s timeout",
                budget.as_secs()
            )),
            exit_code: None,
        },
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        text.into_owned()
    } else {
        let mut end = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n[output truncated]", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn instruction(payload: serde_json::Value, timeout_seconds: i64) -> TaskInstruction {
        TaskInstruction {
            task_id: Uuid::new_v4(),
            task_type: "execute_command".to_string(),
            payload,
            timeout_seconds,
        }
    }

    #[tokio::test]
    async fn test_successful_command_completes() {
        let result = execute(instruction(serde_json::json!({"command": "echo hello"}), 10)).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output.as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let result = execute(instruction(serde_json::json!({"command": "exit 3"}), 10)).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_timeout_reports_timed_out() {
        let result = execute(instruction(serde_json::json!({"command": "sleep 30"}), 1)).await;
        assert_eq!(result.status, TaskStatus::TimedOut);
        assert_eq!(result.exit_code, None);
    }

    #[tokio::test]
    async fn test_missing_command_fails_without_spawning() {
        let result = execute(instruction(serde_json::json!({}), 10)).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error_output.unwrap().contains("command"));
    }

    #[test]
    fn test_truncate_output_respects_char_boundaries() {
        let long = "é".repeat(MAX_OUTPUT_BYTES);
        let truncated = truncate_output(long.as_bytes());
        assert!(truncated.ends_with("[output truncated]"));
    }
}
