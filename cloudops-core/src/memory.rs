//! In-memory management API for tests and local simulation.
//!
//! Behaves like the remote API in the ways that matter to reconciliation:
//! every write is an async operation, changes become visible only once the
//! operation is fulfilled, and writes are rejected when the presented
//! version stamp is stale or another operation on the aggregate is still
//! running.
//!
//! An operation resolves on whichever comes first: the lookup after its
//! in-flight lookups are used up, or its settle time passing. Operations
//! nobody polls therefore still complete.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::aggregate::{AggregateClient, ApplyPatch, Snapshot, VersionStamp};
use crate::error::{ReconcileError, Result};
use crate::operation::{
    AsyncOperation, OperationState, OperationStatusLookup, POLL_INTERVAL, deadline_after,
};

/// How a submitted operation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Fulfilled,
    Failed(String),
    Cancelled,
}

enum Change<S, P> {
    Create(S),
    Patch(P),
    Delete,
}

struct Record<S> {
    state: S,
    version: u64,
}

struct Operation<S, P> {
    seq: u64,
    key: String,
    resolve_at: Instant,
    change: Option<Change<S, P>>,
    outcome: Outcome,
    lookups: u32,
    resolved: Option<OperationState>,
    failure_reason: Option<String>,
}

struct Inner<S, P> {
    records: HashMap<String, Record<S>>,
    operations: HashMap<String, Operation<S, P>>,
    scripted_outcomes: VecDeque<Outcome>,
    transport_failures: u32,
    polls_in_flight: u32,
    settle_after: Option<Duration>,
    fetches: u64,
    mutations: u64,
}

impl<S, P> Inner<S, P> {
    fn take_transport_failure(&mut self, call: &str) -> Result<()> {
        if self.transport_failures > 0 {
            self.transport_failures -= 1;
            return Err(ReconcileError::Transport(format!(
                "{}: connection reset by peer",
                call
            )));
        }
        Ok(())
    }

    fn check_version(&self, key: &str, version: &VersionStamp) -> Result<()> {
        let record = self
            .records
            .get(key)
            .ok_or_else(|| ReconcileError::NotFound(key.to_string()))?;
        let actual = record.version.to_string();
        if actual != version.as_str() {
            return Err(ReconcileError::Conflict {
                key: key.to_string(),
                expected: version.to_string(),
                actual,
            });
        }
        if let Some(operation_id) = self.in_flight(key) {
            return Err(ReconcileError::Conflict {
                key: key.to_string(),
                expected: version.to_string(),
                actual: format!("{} with operation {} in flight", actual, operation_id),
            });
        }
        Ok(())
    }

    /// An unresolved operation targeting `key`, if any.
    fn in_flight(&self, key: &str) -> Option<&str> {
        self.operations
            .iter()
            .find(|(_, operation)| operation.key == key && operation.resolved.is_none())
            .map(|(id, _)| id.as_str())
    }

    fn submit(&mut self, key: &str, change: Change<S, P>) -> AsyncOperation {
        let id = uuid::Uuid::new_v4().to_string();
        let outcome = self
            .scripted_outcomes
            .pop_front()
            .unwrap_or(Outcome::Fulfilled);
        let settle_after = self
            .settle_after
            .unwrap_or_else(|| POLL_INTERVAL.saturating_mul(self.polls_in_flight));
        self.mutations += 1;
        self.operations.insert(
            id.clone(),
            Operation {
                seq: self.mutations,
                key: key.to_string(),
                resolve_at: deadline_after(settle_after),
                change: Some(change),
                outcome,
                lookups: 0,
                resolved: None,
                failure_reason: None,
            },
        );
        debug!(key = %key, operation_id = %id, "Operation accepted");
        AsyncOperation::pending(id)
    }
}

impl<S, P: ApplyPatch<S>> Inner<S, P> {
    fn commit(&mut self, key: &str, change: Change<S, P>) {
        match change {
            Change::Create(state) => {
                self.records
                    .insert(key.to_string(), Record { state, version: 1 });
            }
            Change::Patch(patch) => {
                if let Some(record) = self.records.get_mut(key) {
                    patch.apply_to(&mut record.state);
                    record.version += 1;
                }
            }
            Change::Delete => {
                self.records.remove(key);
            }
        }
    }

    /// Drive an operation to its outcome, committing its change if it is
    /// fulfilled. `None` for unknown IDs.
    fn resolve(&mut self, operation_id: &str) -> Option<(OperationState, Option<String>)> {
        let operation = self.operations.get_mut(operation_id)?;
        if let Some(state) = operation.resolved {
            return Some((state, operation.failure_reason.clone()));
        }

        let (state, failure_reason) = match &operation.outcome {
            Outcome::Fulfilled => (OperationState::Fulfilled, None),
            Outcome::Failed(reason) => (OperationState::Failed, Some(reason.clone())),
            Outcome::Cancelled => (OperationState::Cancelled, None),
        };
        operation.resolved = Some(state);
        operation.failure_reason = failure_reason.clone();
        let key = operation.key.clone();

        if let (OperationState::Fulfilled, Some(change)) = (state, operation.change.take()) {
            self.commit(&key, change);
        }
        debug!(operation_id = %operation_id, state = ?state, "Operation resolved");
        Some((state, failure_reason))
    }

    /// Resolve, in submission order, every operation whose settle time has
    /// passed.
    fn settle_due(&mut self) {
        let now = Instant::now();
        let mut due: Vec<(u64, String)> = self
            .operations
            .iter()
            .filter(|(_, operation)| {
                operation.resolved.is_none() && operation.resolve_at <= now
            })
            .map(|(id, operation)| (operation.seq, id.clone()))
            .collect();
        due.sort_unstable();

        for (_, operation_id) in due {
            self.resolve(&operation_id);
        }
    }
}

/// In-memory store of aggregates of one kind plus their operations.
pub struct MemoryApi<S, P> {
    inner: Mutex<Inner<S, P>>,
    _patch: PhantomData<fn(P)>,
}

impl<S, P> Default for MemoryApi<S, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, P> MemoryApi<S, P> {
    /// Operations are fulfilled on the third lookup.
    pub fn new() -> Self {
        Self::with_polls_in_flight(2)
    }

    /// Operations report `PENDING`/`IN_PROGRESS` for `polls` lookups before
    /// reaching their terminal state. Unobserved operations settle `polls`
    /// poll intervals after submission.
    pub fn with_polls_in_flight(polls: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                operations: HashMap::new(),
                scripted_outcomes: VecDeque::new(),
                transport_failures: 0,
                polls_in_flight: polls,
                settle_after: None,
                fetches: 0,
                mutations: 0,
            }),
            _patch: PhantomData,
        }
    }

    /// Operations settle `after` their submission whether or not anyone
    /// polls them.
    pub fn with_settle_after(mut self, after: Duration) -> Self {
        self.inner.get_mut().settle_after = Some(after);
        self
    }

    /// Seed an aggregate directly, bypassing operations.
    pub async fn insert(&self, key: &str, state: S) {
        let mut inner = self.inner.lock().await;
        inner
            .records
            .insert(key.to_string(), Record { state, version: 1 });
    }

    /// The next submitted operations end with these outcomes, in order.
    pub async fn script_outcomes(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.inner.lock().await.scripted_outcomes.extend(outcomes);
    }

    /// The next `count` calls of any kind fail at the transport level.
    pub async fn fail_next_calls(&self, count: u32) {
        self.inner.lock().await.transport_failures = count;
    }

    pub async fn set_polls_in_flight(&self, polls: u32) {
        self.inner.lock().await.polls_in_flight = polls;
    }

    /// Drop an operation record, as the server does after retention expires.
    pub async fn forget_operation(&self, operation_id: &str) {
        self.inner.lock().await.operations.remove(operation_id);
    }

    /// Number of `fetch` calls served.
    pub async fn fetch_count(&self) -> u64 {
        self.inner.lock().await.fetches
    }

    /// Number of mutating calls accepted.
    pub async fn mutation_count(&self) -> u64 {
        self.inner.lock().await.mutations
    }
}

impl<S: Clone, P: ApplyPatch<S>> MemoryApi<S, P> {
    /// Provision an aggregate through an operation.
    pub async fn create(&self, key: &str, state: S) -> Result<AsyncOperation> {
        let mut inner = self.inner.lock().await;
        inner.take_transport_failure("create")?;
        inner.settle_due();
        if inner.records.contains_key(key) {
            return Err(ReconcileError::Conflict {
                key: key.to_string(),
                expected: "absent".to_string(),
                actual: "exists".to_string(),
            });
        }
        Ok(inner.submit(key, Change::Create(state)))
    }

    /// Apply a change immediately, as a writer outside this process would.
    pub async fn apply_now(&self, key: &str, patch: P) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.settle_due();
        if !inner.records.contains_key(key) {
            return Err(ReconcileError::NotFound(key.to_string()));
        }
        inner.commit(key, Change::Patch(patch));
        Ok(())
    }

    /// Current state without counting as a fetch.
    pub async fn get(&self, key: &str) -> Option<Snapshot<S>> {
        let mut inner = self.inner.lock().await;
        inner.settle_due();
        inner.records.get(key).map(|record| Snapshot {
            id: key.to_string(),
            version: VersionStamp::new(record.version.to_string()),
            state: record.state.clone(),
        })
    }
}

#[async_trait]
impl<S, P> AggregateClient for MemoryApi<S, P>
where
    S: Clone + Send + Sync + 'static,
    P: ApplyPatch<S> + Send + 'static,
{
    type State = S;
    type Payload = P;

    async fn fetch(&self, key: &str) -> Result<Option<Snapshot<S>>> {
        let mut inner = self.inner.lock().await;
        inner.take_transport_failure("fetch")?;
        inner.settle_due();
        inner.fetches += 1;
        Ok(inner.records.get(key).map(|record| Snapshot {
            id: key.to_string(),
            version: VersionStamp::new(record.version.to_string()),
            state: record.state.clone(),
        }))
    }

    async fn mutate(
        &self,
        key: &str,
        payload: P,
        version: &VersionStamp,
    ) -> Result<AsyncOperation> {
        let mut inner = self.inner.lock().await;
        inner.take_transport_failure("mutate")?;
        inner.settle_due();
        inner.check_version(key, version)?;
        Ok(inner.submit(key, Change::Patch(payload)))
    }

    async fn delete(&self, key: &str, version: &VersionStamp) -> Result<AsyncOperation> {
        let mut inner = self.inner.lock().await;
        inner.take_transport_failure("delete")?;
        inner.settle_due();
        inner.check_version(key, version)?;
        Ok(inner.submit(key, Change::Delete))
    }
}

#[async_trait]
impl<S, P> OperationStatusLookup for MemoryApi<S, P>
where
    S: Send + 'static,
    P: ApplyPatch<S> + Send + 'static,
{
    async fn get_operation(&self, operation_id: &str) -> Result<AsyncOperation> {
        let mut inner = self.inner.lock().await;
        inner.take_transport_failure("get_operation")?;
        inner.settle_due();
        let polls_in_flight = inner.polls_in_flight;

        let operation = inner
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| ReconcileError::NotFound(operation_id.to_string()))?;

        if operation.resolved.is_none() && operation.lookups < polls_in_flight {
            let state = if operation.lookups == 0 {
                OperationState::Pending
            } else {
                OperationState::InProgress
            };
            operation.lookups += 1;
            return Ok(AsyncOperation {
                id: operation_id.to_string(),
                state,
                failure_reason: None,
            });
        }

        let (state, failure_reason) = inner
            .resolve(operation_id)
            .ok_or_else(|| ReconcileError::NotFound(operation_id.to_string()))?;
        Ok(AsyncOperation {
            id: operation_id.to_string(),
            state,
            failure_reason,
        })
    }
}
