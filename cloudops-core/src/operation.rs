//! Async operation completion - polls a long-running operation until it
//! reaches a terminal state or the local deadline elapses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until, timeout_at};
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};

/// Default deadline for create/delete-class operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fixed delay between two status lookups. No backoff, no jitter.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest accepted poll interval; a zero interval is raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Stand-in for deadlines that do not fit in an `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating to a far-future instant instead of overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// State of a server-side operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Unspecified,
    Pending,
    InProgress,
    Fulfilled,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Fulfilled | OperationState::Failed | OperationState::Cancelled
        )
    }
}

/// Handle to a long-running mutation, as returned by every mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncOperation {
    pub id: String,
    pub state: OperationState,
    /// Set by the server when `state` is `Failed`.
    pub failure_reason: Option<String>,
}

impl AsyncOperation {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: OperationState::Pending,
            failure_reason: None,
        }
    }
}

/// Looks up the current status of an operation by ID.
#[async_trait]
pub trait OperationStatusLookup: Send + Sync {
    async fn get_operation(&self, operation_id: &str) -> Result<AsyncOperation>;
}

/// Polling configuration for [`OperationAwaiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for AwaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl AwaitConfig {
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Twice the current timeout, for multi-step reconciliations.
    pub fn doubled(self) -> Self {
        self.with_timeout(self.timeout.saturating_mul(2))
    }
}

/// Waits for async operations to reach a terminal state.
#[derive(Clone)]
pub struct OperationAwaiter {
    lookup: Arc<dyn OperationStatusLookup>,
    poll_interval: Duration,
}

impl OperationAwaiter {
    pub fn new(lookup: Arc<dyn OperationStatusLookup>, poll_interval: Duration) -> Self {
        Self {
            lookup,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Awaiter polling at `config.poll_interval`.
    pub fn from_config(lookup: Arc<dyn OperationStatusLookup>, config: &AwaitConfig) -> Self {
        Self::new(lookup, config.poll_interval)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll `operation` until it is fulfilled, fails, is cancelled, or
    /// `timeout` elapses.
    ///
    /// The first lookup happens immediately, subsequent ones every poll
    /// interval. On timeout the remote operation is left running.
    pub async fn wait(&self, operation: &AsyncOperation, timeout: Duration) -> Result<()> {
        let id = operation.id.as_str();
        let deadline = deadline_after(timeout);
        let deadline_exceeded = || ReconcileError::DeadlineExceeded {
            operation_id: id.to_string(),
            timeout,
        };

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = sleep_until(deadline) => {
                    warn!(operation_id = %id, polls, "Deadline exceeded waiting for operation");
                    return Err(deadline_exceeded());
                }
                _ = ticker.tick() => {}
            }

            polls += 1;
            let status = match timeout_at(deadline, self.lookup.get_operation(id)).await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => return Err(lookup_failure(id, e)),
                Err(_) => {
                    warn!(operation_id = %id, polls, "Deadline exceeded during status lookup");
                    return Err(deadline_exceeded());
                }
            };

            match status.state {
                OperationState::Pending
                | OperationState::InProgress
                | OperationState::Unspecified => {
                    debug!(operation_id = %id, state = ?status.state, polls, "Operation in flight");
                }
                OperationState::Fulfilled => {
                    info!(operation_id = %id, polls, "Operation fulfilled");
                    return Ok(());
                }
                OperationState::Failed => {
                    let reason = status.failure_reason.unwrap_or_default();
                    warn!(operation_id = %id, %reason, "Operation failed");
                    return Err(ReconcileError::OperationFailed {
                        operation_id: id.to_string(),
                        reason,
                    });
                }
                OperationState::Cancelled => {
                    warn!(operation_id = %id, "Operation cancelled");
                    return Err(ReconcileError::OperationCancelled {
                        operation_id: id.to_string(),
                    });
                }
            }
        }
    }
}

/// A handle the server no longer knows about is a lookup failure, not an
/// absent aggregate.
fn lookup_failure(operation_id: &str, err: ReconcileError) -> ReconcileError {
    match err {
        ReconcileError::NotFound(_) => ReconcileError::Transport(format!(
            "status lookup for operation {}: operation no longer exists",
            operation_id
        )),
        other => other,
    }
}
