//! Catalog item store: the source of truth for item freshness.
//!
//! The scheduler only touches the `pcode`, `isUpdating` and `updatedAt`
//! fields; one collection per item category.

mod memory;
mod mongo;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::{ItemRecord, MemoryItemStore};
pub use mongo::{MongoItemStore, MongoItemStoreConfig};

pub type ItemStoreResult<T> = Result<T, ItemStoreError>;

#[derive(Debug, Error)]
pub enum ItemStoreError {
    #[error("item store unavailable: {0}")]
    Unavailable(String),
    #[error("item store query failed: {0}")]
    Query(String),
}

#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    /// Up to `limit` item codes that are not being updated and were last
    /// updated before `cutoff`.
    async fn stale_codes(
        &self,
        category: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> ItemStoreResult<Vec<String>>;

    /// Number of items [`stale_codes`](Self::stale_codes) could still return.
    async fn count_stale(&self, category: &str, cutoff: DateTime<Utc>) -> ItemStoreResult<u64>;

    /// Flag `codes` as in flight. Returns the number of items modified.
    async fn mark_updating(&self, category: &str, codes: &[String]) -> ItemStoreResult<u64>;

    /// Clear the flag on `codes`, touching only items that are still flagged.
    async fn release_flagged(&self, category: &str, codes: &[String]) -> ItemStoreResult<u64>;

    /// Clear the flag on every item of the category.
    async fn clear_updating(&self, category: &str) -> ItemStoreResult<u64>;
}
