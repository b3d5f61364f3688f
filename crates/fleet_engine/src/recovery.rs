//! Crash recovery and the end-of-stage completion wait.
//!
//! Recovery runs once per process before any dispatch loop. It drains both
//! pending journals: page units go back to their category's available pool,
//! item codes are discarded after their `isUpdating` flag is released in the
//! item store. Each category is settled in one watched transaction. A failed
//! category keeps its journal and index entry for the next recovery, and the
//! pass moves on.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    available_pages_key, CompletionWaitModel, RetryPolicy, WorkKind, CATEGORIES_KEY,
};
use fleet_logging::{fleet_debug, fleet_info, fleet_warn};
use thiserror::Error;
use tokio::time::Instant;

use crate::items::{ItemStore, ItemStoreError};
use crate::lease::LeaseSettings;
use crate::store::{CoordinationStore, StoreError, StoreOp, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    pub page_categories: usize,
    pub pages_requeued: usize,
    pub item_categories: usize,
    pub items_discarded: usize,
    pub items_released: u64,
    /// Steps that failed and were skipped.
    pub failures: usize,
}

pub struct RecoveryManager {
    store: Arc<dyn CoordinationStore>,
    items: Arc<dyn ItemStore>,
    conflict_retry: RetryPolicy,
}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Items(#[from] ItemStoreError),
}

impl RecoveryManager {
    pub fn new(store: Arc<dyn CoordinationStore>, items: Arc<dyn ItemStore>) -> Self {
        Self {
            store,
            items,
            conflict_retry: LeaseSettings::default().conflict_retry,
        }
    }

    /// Policy for a journal transaction that raced a concurrent lease.
    pub fn with_conflict_retry(mut self, policy: RetryPolicy) -> Self {
        self.conflict_retry = policy;
        self
    }

    pub async fn recover(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        self.recover_pages(&mut report).await;
        self.recover_items(&mut report).await;
        fleet_info!(
            "[Recovery] requeued {} pages in {} categories, released {} of {} pending items",
            report.pages_requeued,
            report.page_categories,
            report.items_released,
            report.items_discarded
        );
        report
    }

    async fn recover_pages(&self, report: &mut RecoveryReport) {
        let index_key = WorkKind::Pages.pending_index_key();
        let categories = match self.store.get_all(&index_key).await {
            Ok(categories) => categories,
            Err(err) => {
                fleet_warn!("[Recovery] could not read {}: {}", index_key, err);
                report.failures += 1;
                return;
            }
        };

        for category in categories {
            match self.requeue_pages(&category).await {
                Ok(count) => {
                    report.page_categories += 1;
                    report.pages_requeued += count;
                }
                Err(err) => {
                    fleet_warn!("[Recovery] pages of '{}' not requeued: {}", category, err);
                    report.failures += 1;
                }
            }
        }
    }

    /// Moves the journal back to the available pool and drops the index
    /// entry in one transaction, so a failure leaves the journal intact.
    async fn requeue_pages(&self, category: &str) -> StoreResult<usize> {
        let pool_key = WorkKind::Pages.pending_pool_key(category);
        let index_key = WorkKind::Pages.pending_index_key();
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let guard = self
                .store
                .watch(&[pool_key.clone(), index_key.clone()])
                .await?;
            let pending: Vec<String> = self.store.get_all(&pool_key).await?.into_iter().collect();

            let mut ops = vec![StoreOp::remove_all(&index_key, &[category.to_string()])];
            if !pending.is_empty() {
                ops.push(StoreOp::add_all(available_pages_key(category), &pending));
                ops.push(StoreOp::add_all(CATEGORIES_KEY, &[category.to_string()]));
                ops.push(StoreOp::Delete {
                    key: pool_key.clone(),
                });
            }

            match self.store.commit(guard, ops).await {
                Ok(()) => {
                    fleet_debug!("[Recovery] '{}': {} pages requeued", category, pending.len());
                    return Ok(pending.len());
                }
                Err(err) if err.is_conflict() => self.back_off(category, attempts, started).await?,
                Err(err) => return Err(err),
            }
        }
    }

    async fn recover_items(&self, report: &mut RecoveryReport) {
        let index_key = WorkKind::Items.pending_index_key();
        let categories = match self.store.get_all(&index_key).await {
            Ok(categories) => categories,
            Err(err) => {
                fleet_warn!("[Recovery] could not read {}: {}", index_key, err);
                report.failures += 1;
                return;
            }
        };

        for category in categories {
            match self.release_items(&category).await {
                Ok((discarded, released)) => {
                    report.item_categories += 1;
                    report.items_discarded += discarded;
                    report.items_released += released;
                }
                Err(err) => {
                    fleet_warn!("[Recovery] item journal of '{}' kept: {}", category, err);
                    report.failures += 1;
                }
            }
        }
    }

    /// Releases the flags of journalled items, then discards the journal.
    /// The journal survives until the release has succeeded.
    async fn release_items(&self, category: &str) -> Result<(usize, u64), StepError> {
        let pool_key = WorkKind::Items.pending_pool_key(category);
        let index_key = WorkKind::Items.pending_index_key();
        let started = Instant::now();
        let mut attempts = 0;
        let mut released = 0;
        loop {
            attempts += 1;
            let guard = self
                .store
                .watch(&[pool_key.clone(), index_key.clone()])
                .await?;
            let pending: Vec<String> = self.store.get_all(&pool_key).await?.into_iter().collect();
            if !pending.is_empty() {
                released += self.items.release_flagged(category, &pending).await?;
            }

            let ops = vec![
                StoreOp::remove_all(&index_key, &[category.to_string()]),
                StoreOp::Delete {
                    key: pool_key.clone(),
                },
            ];
            match self.store.commit(guard, ops).await {
                Ok(()) => return Ok((pending.len(), released)),
                Err(err) if err.is_conflict() => self.back_off(category, attempts, started).await?,
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn back_off(&self, category: &str, attempts: u32, started: Instant) -> StoreResult<()> {
        if !self.conflict_retry.allows_another(attempts, started.elapsed()) {
            return Err(StoreError::Conflict);
        }
        fleet_debug!(
            "[Recovery] journal of '{}' changed concurrently (attempt {}), retrying",
            category,
            attempts
        );
        tokio::time::sleep(self.conflict_retry.delay).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitSettings {
    pub model: CompletionWaitModel,
    pub poll_interval: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            model: CompletionWaitModel::default(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    pub initial_pending: u64,
    pub budget: Duration,
    pub waited: Duration,
    /// The journal emptied before the budget ran out.
    pub drained: bool,
}

/// Heuristic "the fleet is probably done" wait at the end of a stage.
pub struct CompletionWaiter {
    store: Arc<dyn CoordinationStore>,
    settings: WaitSettings,
}

impl CompletionWaiter {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: WaitSettings) -> Self {
        Self { store, settings }
    }

    /// Sum of every pending pool of `kind` listed in its pending index.
    pub async fn pending_total(&self, kind: WorkKind) -> StoreResult<u64> {
        let categories = self.store.get_all(&kind.pending_index_key()).await?;
        let mut total = 0;
        for category in categories {
            total += self
                .store
                .cardinality(&kind.pending_pool_key(&category))
                .await?;
        }
        Ok(total)
    }

    pub async fn wait(&self, kind: WorkKind) -> StoreResult<WaitReport> {
        let initial_pending = self.pending_total(kind).await?;
        let budget = self.settings.model.budget(initial_pending);
        let started = Instant::now();
        fleet_info!(
            "waiting up to {:?} for {} pending {}",
            budget,
            initial_pending,
            kind
        );

        let mut drained = initial_pending == 0;
        while !drained {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                break;
            }
            tokio::time::sleep(self.settings.poll_interval.min(budget - elapsed)).await;
            match self.pending_total(kind).await {
                Ok(0) => drained = true,
                Ok(left) => fleet_debug!("{} pending {} left", left, kind),
                Err(err) => fleet_debug!("pending {} poll failed: {}", kind, err),
            }
        }

        Ok(WaitReport {
            initial_pending,
            budget,
            waited: started.elapsed(),
            drained,
        })
    }
}
