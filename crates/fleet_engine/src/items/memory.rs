use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{ItemStore, ItemStoreError, ItemStoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub pcode: String,
    pub is_updating: bool,
    pub updated_at: DateTime<Utc>,
}

impl ItemRecord {
    pub fn new(pcode: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            pcode: pcode.into(),
            is_updating: false,
            updated_at,
        }
    }
}

type Categories = HashMap<String, BTreeMap<String, ItemRecord>>;

/// Item store kept in process memory, keyed by category then item code.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    categories: Mutex<Categories>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, category: &str, record: ItemRecord) {
        if let Ok(mut categories) = self.categories.lock() {
            categories
                .entry(category.to_string())
                .or_default()
                .insert(record.pcode.clone(), record);
        }
    }

    pub fn record(&self, category: &str, pcode: &str) -> Option<ItemRecord> {
        let categories = self.categories.lock().ok()?;
        categories.get(category)?.get(pcode).cloned()
    }

    /// What the item updater does on completion: fresh timestamp, flag cleared.
    pub fn complete(&self, category: &str, pcode: &str, at: DateTime<Utc>) {
        if let Ok(mut categories) = self.categories.lock() {
            if let Some(record) = categories.get_mut(category).and_then(|c| c.get_mut(pcode)) {
                record.updated_at = at;
                record.is_updating = false;
            }
        }
    }

    fn lock(&self) -> ItemStoreResult<MutexGuard<'_, Categories>> {
        self.categories.lock().map_err(|_| {
            ItemStoreError::Unavailable("memory item store lock poisoned".to_string())
        })
    }

    fn update_flags(
        &self,
        category: &str,
        codes: &[String],
        only_flagged: bool,
        value: bool,
    ) -> ItemStoreResult<u64> {
        let mut categories = self.lock()?;
        let Some(records) = categories.get_mut(category) else {
            return Ok(0);
        };
        let mut modified = 0;
        for code in codes {
            if let Some(record) = records.get_mut(code) {
                if only_flagged && !record.is_updating {
                    continue;
                }
                if record.is_updating != value {
                    record.is_updating = value;
                    modified += 1;
                }
            }
        }
        Ok(modified)
    }
}

fn is_stale(record: &ItemRecord, cutoff: DateTime<Utc>) -> bool {
    !record.is_updating && record.updated_at < cutoff
}

#[async_trait::async_trait]
impl ItemStore for MemoryItemStore {
    async fn stale_codes(
        &self,
        category: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> ItemStoreResult<Vec<String>> {
        let categories = self.lock()?;
        Ok(categories
            .get(category)
            .map(|records| {
                records
                    .values()
                    .filter(|record| is_stale(record, cutoff))
                    .take(limit)
                    .map(|record| record.pcode.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_stale(&self, category: &str, cutoff: DateTime<Utc>) -> ItemStoreResult<u64> {
        let categories = self.lock()?;
        Ok(categories.get(category).map_or(0, |records| {
            records.values().filter(|record| is_stale(record, cutoff)).count() as u64
        }))
    }

    async fn mark_updating(&self, category: &str, codes: &[String]) -> ItemStoreResult<u64> {
        self.update_flags(category, codes, false, true)
    }

    async fn release_flagged(&self, category: &str, codes: &[String]) -> ItemStoreResult<u64> {
        self.update_flags(category, codes, true, false)
    }

    async fn clear_updating(&self, category: &str) -> ItemStoreResult<u64> {
        let mut categories = self.lock()?;
        let Some(records) = categories.get_mut(category) else {
            return Ok(0);
        };
        let mut modified = 0;
        for record in records.values_mut().filter(|record| record.is_updating) {
            record.is_updating = false;
            modified += 1;
        }
        Ok(modified)
    }
}
