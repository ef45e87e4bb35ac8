//! Reconciliation cycle: fetch, plan, mutate with the fetched version
//! stamp, await the operation, re-fetch.
//!
//! Fetch through await runs under the aggregate's lock so that two subsets
//! of one aggregate never interleave. The final re-fetch only reads and
//! runs after the lock is released. Conflicts are surfaced, never retried.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::aggregate::{AggregateClient, Snapshot};
use crate::error::{ReconcileError, Result};
use crate::lock::KeyedLocks;
use crate::operation::{AsyncOperation, OperationAwaiter};

/// Drives aggregates from their observed state to a declared one.
#[derive(Clone)]
pub struct Mutator {
    locks: Arc<KeyedLocks>,
    awaiter: OperationAwaiter,
}

impl Mutator {
    pub fn new(locks: Arc<KeyedLocks>, awaiter: OperationAwaiter) -> Self {
        Self { locks, awaiter }
    }

    pub fn locks(&self) -> &Arc<KeyedLocks> {
        &self.locks
    }

    pub fn awaiter(&self) -> &OperationAwaiter {
        &self.awaiter
    }

    /// Converge the aggregate at `key`.
    ///
    /// `plan` receives the current state and returns the mutation payload,
    /// or `None` when nothing needs to change, in which case no write is
    /// issued and the fetched snapshot is returned.
    ///
    /// Returns `NotFound` without calling `mutate` if the aggregate is absent.
    pub async fn reconcile<C, F>(
        &self,
        key: &str,
        client: &C,
        plan: F,
        timeout: Duration,
    ) -> Result<Snapshot<C::State>>
    where
        C: AggregateClient + ?Sized,
        F: FnOnce(&C::State) -> Option<C::Payload> + Send,
    {
        {
            let _guard = self.locks.lock(key).await;

            let current = client
                .fetch(key)
                .await?
                .ok_or_else(|| ReconcileError::NotFound(key.to_string()))?;

            let Some(payload) = plan(&current.state) else {
                debug!(key = %key, version = %current.version, "Already converged");
                return Ok(current);
            };

            let operation = client
                .mutate(key, payload, &current.version)
                .await
                .inspect_err(|e| {
                    if e.is_conflict() {
                        warn!(key = %key, version = %current.version, "Aggregate changed since fetch");
                    }
                })?;
            info!(
                key = %key,
                operation_id = %operation.id,
                version = %current.version,
                "Mutation submitted"
            );

            self.awaiter.wait(&operation, timeout).await?;
        }

        let observed = client
            .fetch(key)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(key.to_string()))?;
        info!(key = %key, version = %observed.version, "Reconciled");
        Ok(observed)
    }

    /// Delete the aggregate at `key`. An aggregate that is already gone,
    /// before or at submission, counts as deleted.
    pub async fn delete<C>(&self, key: &str, client: &C, timeout: Duration) -> Result<()>
    where
        C: AggregateClient + ?Sized,
    {
        let _guard = self.locks.lock(key).await;

        let Some(current) = client.fetch(key).await? else {
            info!(key = %key, "Already deleted");
            return Ok(());
        };

        let operation = match client.delete(key, &current.version).await {
            Ok(operation) => operation,
            Err(ReconcileError::NotFound(_)) => {
                info!(key = %key, "Deleted concurrently");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        info!(key = %key, operation_id = %operation.id, "Deletion submitted");

        self.awaiter.wait(&operation, timeout).await
    }

    /// Wait for a provisioning operation, then fetch what it created.
    /// An aggregate that is still absent afterwards is a hard `NotFound`.
    pub async fn await_created<C>(
        &self,
        key: &str,
        client: &C,
        operation: &AsyncOperation,
        timeout: Duration,
    ) -> Result<Snapshot<C::State>>
    where
        C: AggregateClient + ?Sized,
    {
        self.awaiter.wait(operation, timeout).await?;

        client.fetch(key).await?.ok_or_else(|| {
            warn!(key = %key, operation_id = %operation.id, "Created aggregate not visible");
            ReconcileError::NotFound(key.to_string())
        })
    }
}
