//! Per-aggregate mutual exclusion.
//!
//! Several declarations may target the same remote aggregate. Reconciliation
//! cycles are serialized by aggregate key, not by the subset they manage.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Lock key for account-level aggregates.
pub const ACCOUNT_LOCK_KEY: &str = "account";

/// Registry of named locks, created lazily on first use and never removed.
///
/// One instance is shared by every reconciliation in the process.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock for `key` is held. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        debug!(key = %key, "Acquiring aggregate lock");
        entry.lock_owned().await
    }

    /// Run `body` while holding the lock for `key`.
    ///
    /// The lock is released on every exit path, including an error result
    /// or a panic unwinding out of `body`.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock(key).await;
        body().await
    }

    /// Number of distinct keys seen so far.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
