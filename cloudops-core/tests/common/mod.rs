//! Shared test utilities for cloudops-core integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudops_core::namespace::{NamespacePatch, NamespaceState};
use cloudops_core::{
    AggregateClient, AsyncOperation, KeyedLocks, MemoryApi, Mutator, NamespacePermission,
    OperationAwaiter, POLL_INTERVAL, Result, Snapshot, VersionStamp,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

pub type NamespaceApi = MemoryApi<NamespaceState, NamespacePatch>;

/// One in-memory namespace API with a mutator polling it.
pub struct Harness {
    pub api: Arc<NamespaceApi>,
    pub mutator: Mutator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_polls_in_flight(2)
    }

    pub fn with_polls_in_flight(polls: u32) -> Self {
        let api = Arc::new(NamespaceApi::with_polls_in_flight(polls));
        let awaiter = OperationAwaiter::new(api.clone(), POLL_INTERVAL);
        let mutator = Mutator::new(Arc::new(KeyedLocks::new()), awaiter);
        Self { api, mutator }
    }

    pub async fn seed(&self, key: &str, tags: HashMap<String, String>) {
        self.api
            .insert(
                key,
                NamespaceState {
                    tags,
                    accesses: HashMap::new(),
                },
            )
            .await;
    }
}

pub fn tags(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn accesses(entries: &[(&str, NamespacePermission)]) -> HashMap<String, NamespacePermission> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect()
}

/// A fetch-to-mutate window observed by [`RecordingClient`].
#[derive(Debug, Clone)]
pub struct CriticalSection {
    pub key: String,
    pub start: Instant,
    pub end: Instant,
}

impl CriticalSection {
    pub fn overlaps(&self, other: &CriticalSection) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Wraps the namespace API, adds latency to fetches and records the window
/// from the first fetch of a cycle to its mutate returning.
pub struct RecordingClient {
    api: Arc<NamespaceApi>,
    latency: Duration,
    started: Mutex<Option<Instant>>,
    log: Arc<Mutex<Vec<CriticalSection>>>,
}

impl RecordingClient {
    pub fn new(
        api: Arc<NamespaceApi>,
        latency: Duration,
        log: Arc<Mutex<Vec<CriticalSection>>>,
    ) -> Self {
        Self {
            api,
            latency,
            started: Mutex::new(None),
            log,
        }
    }
}

#[async_trait]
impl AggregateClient for RecordingClient {
    type State = NamespaceState;
    type Payload = NamespacePatch;

    async fn fetch(&self, key: &str) -> Result<Option<Snapshot<NamespaceState>>> {
        {
            let mut started = self.started.lock().await;
            if started.is_none() {
                *started = Some(Instant::now());
            }
        }
        tokio::time::sleep(self.latency).await;
        self.api.fetch(key).await
    }

    async fn mutate(
        &self,
        key: &str,
        payload: NamespacePatch,
        version: &VersionStamp,
    ) -> Result<AsyncOperation> {
        let result = self.api.mutate(key, payload, version).await;
        if let Some(start) = self.started.lock().await.take() {
            self.log.lock().await.push(CriticalSection {
                key: key.to_string(),
                start,
                end: Instant::now(),
            });
        }
        result
    }

    async fn delete(&self, key: &str, version: &VersionStamp) -> Result<AsyncOperation> {
        self.api.delete(key, version).await
    }
}

/// Lets another writer change the aggregate between fetch and mutate.
pub struct InterleavingClient {
    pub api: Arc<NamespaceApi>,
    pub interloper: NamespacePatch,
}

#[async_trait]
impl AggregateClient for InterleavingClient {
    type State = NamespaceState;
    type Payload = NamespacePatch;

    async fn fetch(&self, key: &str) -> Result<Option<Snapshot<NamespaceState>>> {
        let snapshot = self.api.fetch(key).await?;
        self.api.apply_now(key, self.interloper.clone()).await?;
        Ok(snapshot)
    }

    async fn mutate(
        &self,
        key: &str,
        payload: NamespacePatch,
        version: &VersionStamp,
    ) -> Result<AsyncOperation> {
        self.api.mutate(key, payload, version).await
    }

    async fn delete(&self, key: &str, version: &VersionStamp) -> Result<AsyncOperation> {
        self.api.delete(key, version).await
    }
}
