//! Reconciliation error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while converging an aggregate.
///
/// Every variant is returned to the caller as-is; nothing in this crate
/// retries on any of them.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// Aggregate absent at fetch time.
    #[error("not found: {0}")]
    NotFound(String),

    /// Version stamp presented on mutate no longer matches the server's.
    #[error("conflict on {key}: expected version {expected}, server has {actual}")]
    Conflict {
        key: String,
        expected: String,
        actual: String,
    },

    /// The remote operation reached `FAILED`.
    #[error("operation {operation_id} failed: {reason}")]
    OperationFailed {
        operation_id: String,
        reason: String,
    },

    /// The remote operation reached `CANCELLED`.
    #[error("operation {operation_id} cancelled")]
    OperationCancelled { operation_id: String },

    /// Local deadline elapsed before a terminal state was observed.
    /// The remote outcome is unknown.
    #[error("deadline of {timeout:?} exceeded waiting for operation {operation_id}")]
    DeadlineExceeded {
        operation_id: String,
        timeout: Duration,
    },

    /// A fetch, mutate or status-lookup call itself failed.
    #[error("transport: {0}")]
    Transport(String),
}

impl ReconcileError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Conflict { .. })
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ReconcileError::DeadlineExceeded { .. })
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_is_kept_verbatim() {
        let err = ReconcileError::OperationFailed {
            operation_id: "op-1".to_string(),
            reason: "namespace quota exceeded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "operation op-1 failed: namespace quota exceeded"
        );
    }

    #[test]
    fn test_classification_predicates() {
        assert!(ReconcileError::NotFound("ns-1".into()).is_not_found());
        assert!(
            ReconcileError::Conflict {
                key: "ns-1".into(),
                expected: "3".into(),
                actual: "4".into(),
            }
            .is_conflict()
        );
        assert!(!ReconcileError::Transport("reset".into()).is_not_found());
    }
}
