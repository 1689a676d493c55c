//! Error types for Vigil operations

use crate::task::TaskStatus;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Agent not found: {id}")]
    AgentNotFound { id: Uuid },

    #[error("Task not found: {id}")]
    TaskNotFound { id: Uuid },

    #[error("Task {task_id} is not owned by agent {agent_id}")]
    TaskNotOwned { task_id: Uuid, agent_id: Uuid },

    #[error("Insert failed for {entity}: {reason}")]
    InsertFailed { entity: String, reason: String },

    #[error("Invalid task state transition for {task_id}: {from} -> {to}")]
    InvalidStateTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Value for {field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("Unsupported task type: {task_type}")]
    UnsupportedTaskType { task_type: String },
}

/// Credential and signature errors.
///
/// Deliberately coarse: callers translate every variant into the same
/// opaque 401 so the response never reveals which check failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Unknown agent: {id}")]
    UnknownAgent { id: Uuid },

    #[error("Malformed signature encoding")]
    MalformedSignature,

    #[error("Signature verification failed")]
    InvalidSignature,
}

/// Master error type for all Vigil errors.
#[derive(Debug, Clone, Error)]
pub enum VigilError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
}

/// Result type alias for Vigil operations.
pub type VigilResult<T> = Result<T, VigilError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_agent_not_found() {
        let err = StoreError::AgentNotFound { id: Uuid::nil() };
        let msg = format!("{}", err);
        assert!(msg.contains("Agent not found"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_store_error_display_invalid_transition() {
        let err = StoreError::InvalidStateTransition {
            task_id: Uuid::nil(),
            from: TaskStatus::TimedOut,
            to: TaskStatus::Completed,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid task state transition"));
        assert!(msg.contains("timed_out"));
        assert!(msg.contains("completed"));
    }

    #[test]
    fn test_validation_error_display_out_of_range() {
        let err = ValidationError::OutOfRange {
            field: "beacon_interval_seconds".to_string(),
            min: 10,
            max: 3600,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("beacon_interval_seconds"));
        assert!(msg.contains("10"));
        assert!(msg.contains("3600"));
    }

    #[test]
    fn test_credential_error_display() {
        let err = CredentialError::InvalidSignature;
        assert!(format!("{}", err).contains("Signature verification failed"));
    }

    #[test]
    fn test_vigil_error_from_variants() {
        let store = VigilError::from(StoreError::LockPoisoned);
        assert!(matches!(store, VigilError::Store(_)));

        let validation = VigilError::from(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
        assert!(matches!(validation, VigilError::Validation(_)));

        let credential = VigilError::from(CredentialError::MalformedSignature);
        assert!(matches!(credential, VigilError::Credential(_)));
    }
}
