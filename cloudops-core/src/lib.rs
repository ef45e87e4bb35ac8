//! Convergence primitives for reconciling declared cloud resources against
//! a management API whose writes are asynchronous and whose aggregates are
//! optimistically versioned.

pub mod access;
pub mod aggregate;
pub mod diff;
pub mod error;
pub mod group;
pub mod lock;
pub mod memory;
pub mod mutator;
pub mod namespace;
pub mod operation;

pub use access::{AccountRole, NamespacePermission};
pub use aggregate::{AggregateClient, ApplyPatch, Snapshot, VersionStamp};
pub use diff::{MapDiff, SetDiff, diff_map, diff_set};
pub use error::{ReconcileError, Result};
pub use lock::{ACCOUNT_LOCK_KEY, KeyedLocks};
pub use memory::{MemoryApi, Outcome};
pub use mutator::Mutator;
pub use operation::{
    AsyncOperation, AwaitConfig, DEFAULT_TIMEOUT, MIN_POLL_INTERVAL, OperationAwaiter,
    OperationState, OperationStatusLookup, POLL_INTERVAL,
};
