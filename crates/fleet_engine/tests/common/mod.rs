#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{RetryPolicy, WorkKind};
use fleet_engine::{
    CompletionWaiter, CoordinationStore, DispatchSettings, LeaseSettings, MemoryStore, StoreError,
    StoreOp, StoreResult, WaitSettings, WatchGuard,
};

pub fn units(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::unbounded(Duration::from_millis(1)).with_max_attempts(max_attempts)
}

pub fn fast_lease() -> LeaseSettings {
    LeaseSettings {
        conflict_retry: fast_retry(20),
    }
}

pub fn fast_dispatch() -> DispatchSettings {
    DispatchSettings {
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
        transport_retry: fast_retry(10),
        admission_retry: fast_retry(50),
    }
}

/// Wait settings that never block a test for more than a few milliseconds.
pub fn short_wait() -> WaitSettings {
    let mut settings = WaitSettings::default();
    settings.model.average_latency = Duration::from_millis(1);
    settings.model.max_wait = Some(Duration::from_millis(20));
    settings.poll_interval = Duration::from_millis(5);
    settings
}

pub async fn pending_total(store: Arc<dyn CoordinationStore>, kind: WorkKind) -> u64 {
    CompletionWaiter::new(store, short_wait())
        .pending_total(kind)
        .await
        .unwrap()
}

/// Delegates to a [`MemoryStore`] but rejects the first `conflicts` commits.
pub struct ConflictingStore {
    pub inner: MemoryStore,
    remaining: AtomicU32,
    outage: bool,
    pub commits: AtomicU32,
}

impl ConflictingStore {
    pub fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            remaining: AtomicU32::new(conflicts),
            outage: false,
            commits: AtomicU32::new(0),
        }
    }

    /// Same, but the rejected commits fail as if the connection dropped.
    pub fn unavailable(failures: u32) -> Self {
        Self {
            outage: true,
            ..Self::new(failures)
        }
    }
}

#[async_trait::async_trait]
impl CoordinationStore for ConflictingStore {
    async fn get_all(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.inner.get_all(key).await
    }

    async fn pop_random(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        self.inner.pop_random(key, count).await
    }

    async fn add_all(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.inner.add_all(key, members).await
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.inner.remove_members(key, members).await
    }

    async fn take_all(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.take_all(key).await
    }

    async fn cardinality(&self, key: &str) -> StoreResult<u64> {
        self.inner.cardinality(key).await
    }

    async fn delete_key(&self, key: &str) -> StoreResult<()> {
        self.inner.delete_key(key).await
    }

    async fn get_value(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get_value(key).await
    }

    async fn set_value(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set_value(key, value).await
    }

    async fn get_counter(&self, key: &str) -> StoreResult<u64> {
        self.inner.get_counter(key).await
    }

    async fn watch(&self, keys: &[String]) -> StoreResult<WatchGuard> {
        self.inner.watch(keys).await
    }

    async fn commit(&self, guard: WatchGuard, ops: Vec<StoreOp>) -> StoreResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            if self.outage {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            return Err(StoreError::Conflict);
        }
        self.inner.commit(guard, ops).await
    }
}
