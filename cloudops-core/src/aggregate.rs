//! Remote aggregates and the read/write capability over them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::operation::AsyncOperation;

/// Opaque token advanced by the server on every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionStamp(String);

impl VersionStamp {
    pub fn new(stamp: impl Into<String>) -> Self {
        Self(stamp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An aggregate as observed at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    pub id: String,
    pub version: VersionStamp,
    pub state: S,
}

/// Read/write access to one kind of aggregate.
///
/// Writes are asynchronous on the server: they return an operation handle
/// that must be awaited before the change is visible.
#[async_trait]
pub trait AggregateClient: Send + Sync {
    /// Observed state of the aggregate.
    type State: Send + Sync;
    /// Mutation request body.
    type Payload: Send;

    /// Fetch the aggregate. `Ok(None)` means it does not exist.
    async fn fetch(&self, key: &str) -> Result<Option<Snapshot<Self::State>>>;

    /// Submit a mutation guarded by `version`.
    async fn mutate(
        &self,
        key: &str,
        payload: Self::Payload,
        version: &VersionStamp,
    ) -> Result<AsyncOperation>;

    /// Submit a deletion guarded by `version`.
    async fn delete(&self, key: &str, version: &VersionStamp) -> Result<AsyncOperation>;
}

/// A mutation request body that knows how to change a state in place, the
/// way the server applies it once the operation is fulfilled.
pub trait ApplyPatch<S> {
    fn apply_to(self, state: &mut S);
}
