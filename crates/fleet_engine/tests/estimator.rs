mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::units;
use fleet_core::ProgressSnapshot;
use fleet_engine::{
    CoordinationStore, EstimatorSettings, ItemRecord, MemoryItemStore, MemoryStore,
    ProgressEstimator, ProgressSink,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct TestSink {
    snapshots: Mutex<Vec<ProgressSnapshot>>,
}

impl ProgressSink for TestSink {
    fn emit(&self, snapshot: &ProgressSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

async fn fixture() -> (Arc<MemoryStore>, Arc<MemoryItemStore>) {
    let store = Arc::new(MemoryStore::new());
    store.add_all("categories", &units(&["cpu"])).await.unwrap();
    store.add_all("pages:cpu", &units(&["4", "5", "6"])).await.unwrap();
    store.add_all("pendingPages", &units(&["cpu", "gpu"])).await.unwrap();
    store.add_all("pendingPages:cpu", &units(&["1", "2"])).await.unwrap();
    store.add_all("pendingPages:gpu", &units(&["1"])).await.unwrap();
    store.add_all("pendingItems:ssd", &units(&["S1"])).await.unwrap();

    let items = Arc::new(MemoryItemStore::new());
    let stale = Utc::now() - ChronoDuration::days(2);
    for code in ["S2", "S3"] {
        items.insert("ssd", ItemRecord::new(code, stale));
    }
    items.insert("ssd", ItemRecord::new("S4", Utc::now() + ChronoDuration::days(1)));
    (store, items)
}

fn estimator(store: &Arc<MemoryStore>, items: &Arc<MemoryItemStore>) -> ProgressEstimator {
    ProgressEstimator::new(
        store.clone(),
        items.clone(),
        units(&["ssd"]),
        EstimatorSettings {
            interval: Duration::from_millis(10),
            ..EstimatorSettings::default()
        },
    )
}

#[tokio::test]
async fn remaining_work_counts_available_pending_and_stale() {
    let (store, items) = fixture().await;
    let estimator = estimator(&store, &items);

    assert_eq!(estimator.remaining_pages().await.unwrap(), 3 + 2 + 1);
    assert_eq!(estimator.remaining_items().await.unwrap(), 1 + 2);
}

#[tokio::test]
async fn ticks_measure_counter_deltas_from_persisted_values() {
    let (store, items) = fixture().await;
    store.increment_counter("updateCount:Pages", 500).unwrap();
    store.increment_counter("updateCount:Items", 70).unwrap();
    let estimator = estimator(&store, &items);

    let mut window = estimator.prime().await.unwrap();
    store.increment_counter("updateCount:Pages", 3).unwrap();
    store.increment_counter("updateCount:Items", 2).unwrap();
    let snapshot = estimator.tick(&mut window).await.unwrap();

    // Only the five units completed since start-up count.
    assert_eq!(snapshot.delta, 5);
    assert_eq!(snapshot.pages_done, 503);
    assert_eq!(snapshot.items_done, 72);
    assert_eq!(snapshot.remaining(), 9);
    assert!(snapshot.eta_seconds.is_some());

    let idle = estimator.tick(&mut window).await.unwrap();
    assert_eq!(idle.delta, 0);
    assert_eq!(window.len(), 2);
}

#[tokio::test]
async fn no_eta_before_any_progress() {
    let (store, items) = fixture().await;
    let estimator = estimator(&store, &items);

    let mut window = estimator.prime().await.unwrap();
    let snapshot = estimator.tick(&mut window).await.unwrap();

    assert_eq!(snapshot.delta, 0);
    assert_eq!(snapshot.eta_seconds, None);
}

#[tokio::test]
async fn background_loop_reports_until_cancelled() {
    let (store, items) = fixture().await;
    let sink = Arc::new(TestSink::default());
    let cancel = CancellationToken::new();

    let handle = estimator(&store, &items).spawn(cancel.clone(), sink.clone());
    tokio::time::sleep(Duration::from_millis(80)).await;
    cancel.cancel();
    handle.await.unwrap();

    let snapshots = sink.snapshots.lock().unwrap();
    assert!(!snapshots.is_empty());
    assert_eq!(snapshots[0].remaining_pages, 6);
}
