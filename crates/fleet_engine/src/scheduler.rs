//! Two-stage dispatch loop: discover pages, then refresh stale items.
//!
//! Categories and batch sizes are drawn at random on every iteration so that
//! independent scheduler processes spread over the keyspace instead of
//! queueing on the same pool.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use fleet_core::{
    available_pages_key, refresh_cutoff, CategoryMeta, WorkKind, CATEGORIES_KEY,
    DEFAULT_REFRESH_HOUR,
};
use fleet_logging::{fleet_debug, fleet_info, fleet_trace, fleet_warn};
use thiserror::Error;

use crate::dispatch::{
    dispatch_request, DispatchError, DispatchReport, Dispatcher, ItemRequest, PageRequest,
};
use crate::items::{ItemStore, ItemStoreError};
use crate::lease::{LeaseError, LeaseReceipt, LeaseSettings, WorkLeaseManager};
use crate::recovery::{CompletionWaiter, WaitReport, WaitSettings};
use crate::store::{CoordinationStore, StoreError};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub page_worker_url: String,
    pub item_worker_url: String,
    /// Pages popped per batch, drawn uniformly each iteration.
    pub page_batch: RangeInclusive<usize>,
    pub item_batch: RangeInclusive<usize>,
    /// Pause after every dispatched batch.
    pub throttle: Duration,
    pub refresh_hour: u32,
    pub lease: LeaseSettings,
    pub wait: WaitSettings,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            page_worker_url: "http://localhost:10000/updatePages".to_string(),
            item_worker_url: "http://localhost:10000/updateItems".to_string(),
            page_batch: 3..=6,
            item_batch: 3..=4,
            throttle: Duration::from_millis(100),
            refresh_hour: DEFAULT_REFRESH_HOUR,
            lease: LeaseSettings::default(),
            wait: WaitSettings::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Items(#[from] ItemStoreError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// A stage aborted; the run must not be marked done.
#[derive(Debug, Error)]
pub struct StageError {
    pub stage: WorkKind,
    #[source]
    pub source: SchedulerError,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", stage_label(self.stage), self.source)
    }
}

pub fn stage_label(kind: WorkKind) -> &'static str {
    match kind {
        WorkKind::Pages => "PageStage",
        WorkKind::Items => "ItemStage",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub kind: WorkKind,
    pub batches: usize,
    pub units_leased: usize,
    pub busy_retries: u64,
    pub transport_retries: u64,
    pub lease_conflicts: u64,
    pub categories_exhausted: usize,
    /// Page categories removed because their metadata was unusable.
    pub categories_dropped: usize,
    pub flags_cleared: u64,
    pub wait: Option<WaitReport>,
}

impl StageReport {
    fn new(kind: WorkKind) -> Self {
        Self {
            kind,
            batches: 0,
            units_leased: 0,
            busy_retries: 0,
            transport_retries: 0,
            lease_conflicts: 0,
            categories_exhausted: 0,
            categories_dropped: 0,
            flags_cleared: 0,
            wait: None,
        }
    }

    fn record_lease(&mut self, receipt: LeaseReceipt) {
        self.units_leased += receipt.units;
        self.lease_conflicts += u64::from(receipt.attempts.saturating_sub(1));
    }

    fn record_dispatch(&mut self, report: DispatchReport) {
        self.batches += 1;
        self.busy_retries += u64::from(report.busy_retries);
        self.transport_retries += u64::from(report.transport_retries);
    }
}

pub struct DispatchScheduler {
    store: Arc<dyn CoordinationStore>,
    items: Arc<dyn ItemStore>,
    dispatcher: Arc<dyn Dispatcher>,
    leases: WorkLeaseManager,
    waiter: CompletionWaiter,
    settings: SchedulerSettings,
}

impl DispatchScheduler {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        items: Arc<dyn ItemStore>,
        dispatcher: Arc<dyn Dispatcher>,
        settings: SchedulerSettings,
    ) -> Self {
        let leases = WorkLeaseManager::new(store.clone(), settings.lease.clone());
        let waiter = CompletionWaiter::new(store.clone(), settings.wait);
        Self {
            store,
            items,
            dispatcher,
            leases,
            waiter,
            settings,
        }
    }

    /// Page stage followed by item stage.
    pub async fn run(
        &self,
        page_base_url: &str,
        item_base_url: &str,
        item_categories: &[String],
    ) -> Result<(StageReport, StageReport), StageError> {
        let pages = self
            .run_page_stage(page_base_url)
            .await
            .map_err(|source| StageError {
                stage: WorkKind::Pages,
                source,
            })?;
        let items = self
            .run_item_stage(item_base_url, item_categories)
            .await
            .map_err(|source| StageError {
                stage: WorkKind::Items,
                source,
            })?;
        Ok((pages, items))
    }

    pub async fn run_page_stage(&self, page_base_url: &str) -> Result<StageReport, SchedulerError> {
        let mut report = StageReport::new(WorkKind::Pages);
        fleet_info!("[PageStage] started");

        loop {
            let categories: Vec<String> = self
                .store
                .get_all(CATEGORIES_KEY)
                .await?
                .into_iter()
                .collect();
            if categories.is_empty() {
                break;
            }
            let category = &categories[fastrand::usize(..categories.len())];

            let size = batch_size(&self.settings.page_batch);
            let pages = self
                .store
                .pop_random(&available_pages_key(category), size)
                .await?;
            if pages.is_empty() {
                fleet_debug!("[PageStage] '{}' has no pages left", category);
                self.drop_category(category).await;
                report.categories_exhausted += 1;
                continue;
            }
            fleet_trace!("[PageStage] '{}': popped {:?}", category, pages);

            let meta = self.load_meta(category).await?;
            report.record_lease(self.leases.lease(WorkKind::Pages, category, &pages).await?);

            let Some(meta) = meta else {
                self.drop_category(category).await;
                report.categories_dropped += 1;
                continue;
            };

            let request = PageRequest::new(category, page_base_url, pages, &meta);
            let dispatched =
                dispatch_request(self.dispatcher.as_ref(), &self.settings.page_worker_url, &request)
                    .await?;
            report.record_dispatch(dispatched);
            self.throttle().await;
        }

        report.wait = Some(self.waiter.wait(WorkKind::Pages).await?);
        log_report(&report);
        Ok(report)
    }

    pub async fn run_item_stage(
        &self,
        item_base_url: &str,
        item_categories: &[String],
    ) -> Result<StageReport, SchedulerError> {
        let mut report = StageReport::new(WorkKind::Items);
        let cutoff = refresh_cutoff(Local::now(), self.settings.refresh_hour);
        let mut candidates = item_categories.to_vec();
        fleet_info!("[ItemStage] started, refreshing items updated before {}", cutoff);

        while !candidates.is_empty() {
            let index = fastrand::usize(..candidates.len());
            let category = candidates[index].clone();

            let limit = batch_size(&self.settings.item_batch);
            let codes = self.items.stale_codes(&category, cutoff, limit).await?;
            if codes.is_empty() {
                fleet_debug!("[ItemStage] '{}' has no stale items left", category);
                candidates.swap_remove(index);
                report.categories_exhausted += 1;
                continue;
            }

            let request = ItemRequest {
                base_url: item_base_url.to_string(),
                category: category.clone(),
                pcodes: codes.clone(),
            };
            let dispatched =
                dispatch_request(self.dispatcher.as_ref(), &self.settings.item_worker_url, &request)
                    .await?;
            report.record_dispatch(dispatched);
            report.record_lease(self.leases.lease(WorkKind::Items, &category, &codes).await?);

            if let Err(err) = self.items.mark_updating(&category, &codes).await {
                fleet_warn!("[ItemStage] could not flag {:?} of '{}': {}", codes, category, err);
            }
            self.throttle().await;
        }

        report.wait = Some(self.waiter.wait(WorkKind::Items).await?);

        for category in item_categories {
            match self.items.clear_updating(category).await {
                Ok(cleared) => report.flags_cleared += cleared,
                Err(err) => {
                    fleet_warn!("[ItemStage] final sweep of '{}' failed: {}", category, err)
                }
            }
        }
        log_report(&report);
        Ok(report)
    }

    /// `None` when the blob is missing or unreadable.
    async fn load_meta(&self, category: &str) -> Result<Option<CategoryMeta>, StoreError> {
        let Some(raw) = self.store.get_value(category).await? else {
            fleet_warn!("[PageStage] '{}' has no metadata; dropping category", category);
            return Ok(None);
        };
        match CategoryMeta::from_json(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(err) => {
                fleet_warn!(
                    "[PageStage] metadata of '{}' unreadable ({}); dropping category",
                    category,
                    err
                );
                Ok(None)
            }
        }
    }

    /// Another process may re-add the category concurrently; that is tolerated.
    async fn drop_category(&self, category: &str) {
        if let Err(err) = self
            .store
            .remove_members(CATEGORIES_KEY, &[category.to_string()])
            .await
        {
            fleet_warn!(
                "[PageStage] could not remove '{}' from {}: {}",
                category,
                CATEGORIES_KEY,
                err
            );
        }
    }

    async fn throttle(&self) {
        if !self.settings.throttle.is_zero() {
            tokio::time::sleep(self.settings.throttle).await;
        }
    }
}

fn batch_size(range: &RangeInclusive<usize>) -> usize {
    let (low, high) = (*range.start(), *range.end());
    if low >= high {
        low.max(1)
    } else {
        fastrand::usize(low.max(1)..=high)
    }
}

fn log_report(report: &StageReport) {
    fleet_info!(
        "[{}] done: {} batches, {} units leased, {} busy retries, {} transport retries, {} categories exhausted",
        stage_label(report.kind),
        report.batches,
        report.units_leased,
        report.busy_retries,
        report.transport_retries,
        report.categories_exhausted
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_stays_in_range() {
        for _ in 0..200 {
            let size = batch_size(&(3..=6));
            assert!((3..=6).contains(&size));
        }
    }

    #[test]
    fn degenerate_ranges_are_clamped() {
        assert_eq!(batch_size(&(4..=4)), 4);
        assert_eq!(batch_size(&(0..=0)), 1);
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = 5..=2;
        assert_eq!(batch_size(&reversed), 5);
    }

    #[test]
    fn stage_error_names_the_stage() {
        let err = StageError {
            stage: WorkKind::Items,
            source: SchedulerError::Store(StoreError::Unavailable("gone".into())),
        };
        assert_eq!(err.to_string(), "[ItemStage] coordination store unavailable: gone");
    }
}
