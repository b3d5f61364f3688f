use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{parse_counter, CoordinationStore, StoreError, StoreOp, StoreResult, WatchGuard};

/// In-process store with the same semantics as the shared one.
///
/// Every key carries a version that is bumped whenever the key's content
/// actually changes; a watch records the versions and a commit is rejected if
/// any of them moved.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    sets: HashMap<String, BTreeSet<String>>,
    values: HashMap<String, String>,
    versions: HashMap<String, u64>,
    unavailable: bool,
}

struct WatchedVersions(Vec<u64>);

impl Inner {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn add_all(&mut self, key: &str, members: &[String]) {
        let set = self.sets.entry(key.to_string()).or_default();
        let before = set.len();
        set.extend(members.iter().cloned());
        let changed = set.len() != before;
        if set.is_empty() {
            self.sets.remove(key);
        }
        if changed {
            self.bump(key);
        }
    }

    fn remove_all(&mut self, key: &str, members: &[String]) {
        let mut changed = false;
        if let Some(set) = self.sets.get_mut(key) {
            for member in members {
                changed |= set.remove(member);
            }
            if set.is_empty() {
                self.sets.remove(key);
            }
        }
        if changed {
            self.bump(key);
        }
    }

    fn delete(&mut self, key: &str) {
        let had_set = self.sets.remove(key).is_some();
        let had_value = self.values.remove(key).is_some();
        if had_set || had_value {
            self.bump(key);
        }
    }

    fn set_value(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        self.bump(key);
    }

    fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::AddAll { key, members } => self.add_all(&key, &members),
            StoreOp::RemoveAll { key, members } => self.remove_all(&key, &members),
            StoreOp::Delete { key } => self.delete(&key),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    /// Counter increment as performed by downstream workers.
    pub fn increment_counter(&self, key: &str, by: u64) -> StoreResult<u64> {
        let mut inner = self.lock()?;
        let current = parse_counter(key, inner.values.get(key).cloned())?;
        let next = current + by;
        inner.set_value(key, &next.to_string());
        Ok(next)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Operation("memory store lock poisoned".to_string()))?;
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(inner)
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_all(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        Ok(self.lock()?.sets.get(key).cloned().unwrap_or_default())
    }

    async fn pop_random(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        let mut inner = self.lock()?;
        let Some(set) = inner.sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<String> = set.iter().cloned().collect();
        fastrand::shuffle(&mut members);
        members.truncate(count);
        inner.remove_all(key, &members);
        Ok(members)
    }

    async fn add_all(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.lock()?.add_all(key, members);
        Ok(())
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.lock()?.remove_all(key, members);
        Ok(())
    }

    async fn take_all(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut inner = self.lock()?;
        let members = inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        inner.delete(key);
        Ok(members)
    }

    async fn cardinality(&self, key: &str) -> StoreResult<u64> {
        Ok(self.lock()?.sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn delete_key(&self, key: &str) -> StoreResult<()> {
        self.lock()?.delete(key);
        Ok(())
    }

    async fn get_value(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.values.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock()?.set_value(key, value);
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> StoreResult<u64> {
        let raw = self.lock()?.values.get(key).cloned();
        parse_counter(key, raw)
    }

    async fn watch(&self, keys: &[String]) -> StoreResult<WatchGuard> {
        let inner = self.lock()?;
        let versions = keys.iter().map(|key| inner.version(key)).collect();
        Ok(WatchGuard::new(keys.to_vec(), WatchedVersions(versions)))
    }

    async fn commit(&self, guard: WatchGuard, ops: Vec<StoreOp>) -> StoreResult<()> {
        let (keys, WatchedVersions(versions)) = guard.into_parts::<WatchedVersions>()?;
        let mut inner = self.lock()?;
        let unchanged = keys
            .iter()
            .zip(&versions)
            .all(|(key, version)| inner.version(key) == *version);
        if !unchanged {
            return Err(StoreError::Conflict);
        }
        for op in ops {
            inner.apply(op);
        }
        Ok(())
    }
}
