//! Coordination store: the only shared mutable resource of the fleet.
//!
//! Every scheduler process talks to the same store. Single-key mutations rely
//! on the store's native atomicity; anything spanning several keys goes
//! through [`CoordinationStore::watch`] + [`CoordinationStore::commit`], which
//! rejects the whole batch with [`StoreError::Conflict`] when a watched key
//! changed in between.

mod memory;
mod redis_store;

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A watched key changed between `watch` and `commit`.
    #[error("transaction aborted: a watched key changed")]
    Conflict,
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation failed: {0}")]
    Operation(String),
    #[error("value under '{key}' is malformed: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

/// One mutation inside a watched transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    AddAll { key: String, members: Vec<String> },
    RemoveAll { key: String, members: Vec<String> },
    Delete { key: String },
}

impl StoreOp {
    pub fn add_all(key: impl Into<String>, members: &[String]) -> Self {
        StoreOp::AddAll {
            key: key.into(),
            members: members.to_vec(),
        }
    }

    pub fn remove_all(key: impl Into<String>, members: &[String]) -> Self {
        StoreOp::RemoveAll {
            key: key.into(),
            members: members.to_vec(),
        }
    }
}

/// Proof that a set of keys is being watched.
///
/// Each backend stores whatever it needs to validate the commit (key versions,
/// a dedicated connection) and recovers it with [`WatchGuard::into_parts`].
pub struct WatchGuard {
    keys: Vec<String>,
    state: Box<dyn Any + Send>,
}

impl WatchGuard {
    pub fn new<T: Any + Send>(keys: Vec<String>, state: T) -> Self {
        Self {
            keys,
            state: Box::new(state),
        }
    }

    pub fn into_parts<T: Any>(self) -> StoreResult<(Vec<String>, T)> {
        match self.state.downcast::<T>() {
            Ok(state) => Ok((self.keys, *state)),
            Err(_) => Err(StoreError::Operation(
                "watch guard was issued by a different store".to_string(),
            )),
        }
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// Set/value/counter store shared by every scheduler process.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// All members of a set; empty when the key does not exist.
    async fn get_all(&self, key: &str) -> StoreResult<BTreeSet<String>>;

    /// Atomically remove and return up to `count` random members.
    async fn pop_random(&self, key: &str, count: usize) -> StoreResult<Vec<String>>;

    async fn add_all(&self, key: &str, members: &[String]) -> StoreResult<()>;

    async fn remove_members(&self, key: &str, members: &[String]) -> StoreResult<()>;

    /// Atomically read every member of a set and delete the key.
    async fn take_all(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn cardinality(&self, key: &str) -> StoreResult<u64>;

    async fn delete_key(&self, key: &str) -> StoreResult<()>;

    async fn get_value(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_value(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Integer counter; a missing key reads as zero.
    async fn get_counter(&self, key: &str) -> StoreResult<u64>;

    /// Start watching `keys` for a following [`commit`](Self::commit).
    async fn watch(&self, keys: &[String]) -> StoreResult<WatchGuard>;

    /// Apply `ops` atomically unless a watched key changed since `watch`.
    async fn commit(&self, guard: WatchGuard, ops: Vec<StoreOp>) -> StoreResult<()>;
}

pub(crate) fn parse_counter(key: &str, raw: Option<String>) -> StoreResult<u64> {
    match raw {
        None => Ok(0),
        Some(raw) => raw.trim().parse::<u64>().map_err(|err| StoreError::Corrupt {
            key: key.to_string(),
            reason: err.to_string(),
        }),
    }
}
