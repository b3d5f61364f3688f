use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use fleet_core::{
    available_pages_key, format_eta, refresh_cutoff, ProgressSnapshot, ThroughputWindow, WorkKind,
    CATEGORIES_KEY, DEFAULT_HISTORY_CAPACITY, DEFAULT_REFRESH_HOUR,
};
use fleet_logging::{fleet_debug, fleet_info, fleet_warn};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::items::{ItemStore, ItemStoreError};
use crate::store::{CoordinationStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorSettings {
    pub interval: Duration,
    pub history_capacity: usize,
    pub refresh_hour: u32,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            refresh_hour: DEFAULT_REFRESH_HOUR,
        }
    }
}

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Items(#[from] ItemStoreError),
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, snapshot: &ProgressSnapshot);
}

/// Writes each snapshot to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn emit(&self, snapshot: &ProgressSnapshot) {
        fleet_info!(
            "pages to scrape: {}/{}, items to update: {}/{}",
            snapshot.remaining_pages,
            snapshot.total_pages(),
            snapshot.remaining_items,
            snapshot.total_items()
        );
        match (snapshot.eta_seconds, snapshot.average_throughput) {
            (Some(eta), Some(rate)) => fleet_info!(
                "estimated completion in {} at {} (avg. {:.3} requests/s)",
                format_eta(eta),
                completion_time(Local::now(), eta).format("%Y-%m-%d %H:%M:%S"),
                rate
            ),
            _ => fleet_debug!("no throughput measured yet"),
        }
    }
}

pub fn completion_time(now: DateTime<Local>, eta_seconds: u64) -> DateTime<Local> {
    i64::try_from(eta_seconds)
        .ok()
        .and_then(chrono::TimeDelta::try_seconds)
        .and_then(|eta| now.checked_add_signed(eta))
        .unwrap_or(now)
}

/// Background estimate of remaining work and time to completion.
///
/// Reads only: pool cardinalities, item counts and the two completion
/// counters the downstream workers maintain.
pub struct ProgressEstimator {
    store: Arc<dyn CoordinationStore>,
    items: Arc<dyn ItemStore>,
    item_categories: Vec<String>,
    settings: EstimatorSettings,
}

impl ProgressEstimator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        items: Arc<dyn ItemStore>,
        item_categories: Vec<String>,
        settings: EstimatorSettings,
    ) -> Self {
        Self {
            store,
            items,
            item_categories,
            settings,
        }
    }

    /// Available plus pending pages over every known category.
    pub async fn remaining_pages(&self) -> Result<u64, EstimatorError> {
        let mut total = 0;
        for category in self.store.get_all(CATEGORIES_KEY).await? {
            total += self.store.cardinality(&available_pages_key(&category)).await?;
        }
        let pending_index = WorkKind::Pages.pending_index_key();
        for category in self.store.get_all(&pending_index).await? {
            total += self
                .store
                .cardinality(&WorkKind::Pages.pending_pool_key(&category))
                .await?;
        }
        Ok(total)
    }

    /// Pending journal plus still-stale items over every item category.
    pub async fn remaining_items(&self) -> Result<u64, EstimatorError> {
        let cutoff = refresh_cutoff(Local::now(), self.settings.refresh_hour);
        let mut total = 0;
        for category in &self.item_categories {
            total += self
                .store
                .cardinality(&WorkKind::Items.pending_pool_key(category))
                .await?;
            total += self.items.count_stale(category, cutoff).await?;
        }
        Ok(total)
    }

    /// `(items_done, pages_done)`.
    pub async fn counters(&self) -> Result<(u64, u64), EstimatorError> {
        let items = self.store.get_counter(&WorkKind::Items.counter_key()).await?;
        let pages = self.store.get_counter(&WorkKind::Pages.counter_key()).await?;
        Ok((items, pages))
    }

    /// Fresh window seeded with the persisted counters.
    pub async fn prime(&self) -> Result<ThroughputWindow, EstimatorError> {
        let (items, pages) = self.counters().await?;
        Ok(ThroughputWindow::resume(
            self.settings.history_capacity,
            self.settings.interval,
            items,
            pages,
        ))
    }

    pub async fn tick(
        &self,
        window: &mut ThroughputWindow,
    ) -> Result<ProgressSnapshot, EstimatorError> {
        let remaining_pages = self.remaining_pages().await?;
        let remaining_items = self.remaining_items().await?;
        let (items_done, pages_done) = self.counters().await?;
        let delta = window.record_counters(items_done, pages_done);
        Ok(ProgressSnapshot {
            remaining_pages,
            remaining_items,
            pages_done,
            items_done,
            delta,
            average_throughput: window.average_throughput(),
            eta_seconds: window.eta_seconds(remaining_pages + remaining_items),
        })
    }

    /// Tick every interval until `cancel` fires. Failed ticks are logged and skipped.
    pub async fn run(self, cancel: CancellationToken, sink: Arc<dyn ProgressSink>) {
        let interval = self.settings.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut window = match self.prime().await {
            Ok(primed) => Some(primed),
            Err(err) => {
                fleet_warn!("estimator could not read counters: {}", err);
                None
            }
        };
        fleet_info!("estimating time to completion...");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if window.is_none() {
                match self.prime().await {
                    Ok(primed) => window = Some(primed),
                    Err(err) => {
                        fleet_warn!("estimator could not read counters: {}", err);
                        continue;
                    }
                }
            }
            let Some(current) = window.as_mut() else {
                continue;
            };
            match self.tick(current).await {
                Ok(snapshot) => sink.emit(&snapshot),
                Err(err) => fleet_warn!("estimator tick failed: {}", err),
            }
        }
        fleet_debug!("estimator stopped");
    }

    pub fn spawn(self, cancel: CancellationToken, sink: Arc<dyn ProgressSink>) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel, sink))
    }
}
