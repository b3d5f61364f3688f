mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use common::{fast_dispatch, fast_lease, fast_retry, set, short_wait, units, ConflictingStore};
use fleet_core::{available_pages_key, parse_config, CategoryMeta, WorkKind, CATEGORIES_KEY};
use fleet_engine::{
    dispatch_request, CompletionWaiter, CoordinationStore, Dispatcher, ItemRecord, ItemStore,
    MemoryItemStore, MemoryStore, NoBoundResolver, PageRequest, PoolSeeder, RecoveryManager,
    ReqwestDispatcher, WaitSettings, WorkLeaseManager,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn managers(store: &Arc<MemoryStore>, items: &Arc<MemoryItemStore>) -> RecoveryManager {
    RecoveryManager::new(store.clone(), items.clone())
}

#[tokio::test]
async fn pending_pages_return_to_the_available_pool() {
    let store = Arc::new(MemoryStore::new());
    let items = Arc::new(MemoryItemStore::new());
    store.add_all("pendingPages:A", &units(&["1", "2", "3"])).await.unwrap();
    store.add_all("pendingPages", &units(&["A"])).await.unwrap();

    let report = managers(&store, &items).recover().await;

    assert!(store.get_all("pages:A").await.unwrap().is_superset(&set(&["1", "2", "3"])));
    assert!(store.get_all("pendingPages:A").await.unwrap().is_empty());
    assert!(store.get_all(CATEGORIES_KEY).await.unwrap().contains("A"));
    assert!(store.get_all("pendingPages").await.unwrap().is_empty());
    assert_eq!(report.pages_requeued, 3);
    assert_eq!(report.page_categories, 1);
    assert_eq!(report.failures, 0);
}

#[tokio::test]
async fn recovery_twice_is_harmless() {
    let store = Arc::new(MemoryStore::new());
    let items = Arc::new(MemoryItemStore::new());
    store.add_all("pages:A", &units(&["4"])).await.unwrap();
    store.add_all("pendingPages:A", &units(&["1", "2"])).await.unwrap();
    store.add_all("pendingPages", &units(&["A"])).await.unwrap();
    let recovery = managers(&store, &items);

    recovery.recover().await;
    let second = recovery.recover().await;

    assert_eq!(store.get_all("pages:A").await.unwrap(), set(&["1", "2", "4"]));
    assert_eq!(second.pages_requeued, 0);
}

#[tokio::test]
async fn pending_items_are_released_only_when_still_flagged() {
    let store = Arc::new(MemoryStore::new());
    let items = Arc::new(MemoryItemStore::new());
    let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    for code in ["P1", "P2", "P3"] {
        items.insert("ssd", ItemRecord::new(code, old));
    }
    items.mark_updating("ssd", &units(&["P1", "P2"])).await.unwrap();
    // P2 was finished by a worker in the meantime.
    items.complete("ssd", "P2", Utc::now());
    store.add_all("pendingItems:ssd", &units(&["P1", "P2"])).await.unwrap();
    store.add_all("pendingItems", &units(&["ssd"])).await.unwrap();

    let report = managers(&store, &items).recover().await;

    assert_eq!(report.items_discarded, 2);
    assert_eq!(report.items_released, 1);
    assert!(!items.record("ssd", "P1").unwrap().is_updating);
    assert!(store.get_all("pendingItems:ssd").await.unwrap().is_empty());
    assert!(store.get_all("pendingItems").await.unwrap().is_empty());
    // Pending items are not returned to any pool.
    assert!(store.get_all(CATEGORIES_KEY).await.unwrap().is_empty());
}

#[tokio::test]
async fn unavailable_store_is_logged_not_raised() {
    let store = Arc::new(MemoryStore::new());
    let items = Arc::new(MemoryItemStore::new());
    store.set_unavailable(true);

    let report = managers(&store, &items).recover().await;

    assert_eq!(report.failures, 2);
    assert_eq!(report.pages_requeued, 0);
}

#[tokio::test]
async fn journal_survives_a_failed_requeue() {
    let store = Arc::new(ConflictingStore::unavailable(1));
    let items = Arc::new(MemoryItemStore::new());
    store.add_all("pendingPages:A", &units(&["1", "2", "3"])).await.unwrap();
    store.add_all("pendingPages", &units(&["A"])).await.unwrap();
    let recovery = RecoveryManager::new(store.clone(), items.clone());

    let first = recovery.recover().await;

    assert_eq!(first.failures, 1);
    assert_eq!(first.pages_requeued, 0);
    assert!(store.get_all("pages:A").await.unwrap().is_empty());
    assert_eq!(store.get_all("pendingPages:A").await.unwrap(), set(&["1", "2", "3"]));
    assert_eq!(store.get_all("pendingPages").await.unwrap(), set(&["A"]));

    let second = recovery.recover().await;

    assert_eq!(second.failures, 0);
    assert_eq!(second.pages_requeued, 3);
    assert_eq!(store.get_all("pages:A").await.unwrap(), set(&["1", "2", "3"]));
    assert!(store.get_all(CATEGORIES_KEY).await.unwrap().contains("A"));
    assert!(store.get_all("pendingPages:A").await.unwrap().is_empty());
    assert!(store.get_all("pendingPages").await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_lease_during_requeue_is_retried() {
    let store = Arc::new(ConflictingStore::new(2));
    let items = Arc::new(MemoryItemStore::new());
    store.add_all("pendingPages:A", &units(&["1", "2"])).await.unwrap();
    store.add_all("pendingPages", &units(&["A"])).await.unwrap();

    let report = RecoveryManager::new(store.clone(), items)
        .with_conflict_retry(fast_retry(5))
        .recover()
        .await;

    assert_eq!(report.failures, 0);
    assert_eq!(report.pages_requeued, 2);
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    assert_eq!(store.get_all("pages:A").await.unwrap(), set(&["1", "2"]));
}

#[tokio::test]
async fn requeue_gives_up_when_conflicts_persist() {
    let store = Arc::new(ConflictingStore::new(100));
    let items = Arc::new(MemoryItemStore::new());
    store.add_all("pendingPages:A", &units(&["1"])).await.unwrap();
    store.add_all("pendingPages", &units(&["A"])).await.unwrap();

    let report = RecoveryManager::new(store.clone(), items)
        .with_conflict_retry(fast_retry(3))
        .recover()
        .await;

    assert_eq!(report.failures, 1);
    assert_eq!(store.get_all("pendingPages:A").await.unwrap(), set(&["1"]));
}

#[tokio::test]
async fn crash_after_dispatch_is_repaired_by_the_next_process() {
    let store = Arc::new(MemoryStore::new());
    let items = Arc::new(MemoryItemStore::new());
    let config = parse_config(
        r#"{
            "pageBaseUrl": "https://shop.example/list?cate=",
            "itemBaseUrl": "https://shop.example/item?pcode=",
            "categories": [{ "category": "cpu", "categoryNumber": 873, "start": 1, "end": 3 }]
        }"#,
    )
    .unwrap();
    PoolSeeder::new(store.clone(), Arc::new(NoBoundResolver))
        .seed(&config)
        .await
        .unwrap();
    assert_eq!(store.get_all("pages:cpu").await.unwrap(), set(&["1", "2", "3"]));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keepGoing": true })))
        .expect(1)
        .mount(&server)
        .await;

    // The first process pops {1, 2}, leases and dispatches them, then dies.
    store.remove_members("pages:cpu", &units(&["1", "2"])).await.unwrap();
    let popped = units(&["1", "2"]);
    WorkLeaseManager::new(store.clone(), fast_lease())
        .lease(WorkKind::Pages, "cpu", &popped)
        .await
        .unwrap();
    let dispatcher: Arc<dyn Dispatcher> =
        Arc::new(ReqwestDispatcher::new(fast_dispatch()).unwrap());
    let raw_meta = store.get_value("cpu").await.unwrap().unwrap();
    let meta = CategoryMeta::from_json(&raw_meta).unwrap();
    let request = PageRequest::new("cpu", &config.page_base_url, popped, &meta);
    let url = format!("{}/updatePages", server.uri());
    dispatch_request(dispatcher.as_ref(), &url, &request)
        .await
        .unwrap();

    assert_eq!(store.get_all("pendingPages:cpu").await.unwrap(), set(&["1", "2"]));
    assert_eq!(store.get_all(&available_pages_key("cpu")).await.unwrap(), set(&["3"]));

    managers(&store, &items).recover().await;

    assert_eq!(store.get_all("pages:cpu").await.unwrap(), set(&["1", "2", "3"]));
    assert!(store.get_all("pendingPages:cpu").await.unwrap().is_empty());
}

#[tokio::test]
async fn completion_wait_returns_at_once_without_pending_work() {
    let store = Arc::new(MemoryStore::new());
    let waiter = CompletionWaiter::new(store, WaitSettings::default());

    let report = waiter.wait(WorkKind::Pages).await.unwrap();

    assert_eq!(report.initial_pending, 0);
    assert_eq!(report.budget, Duration::ZERO);
    assert!(report.drained);
}

#[tokio::test]
async fn completion_wait_sums_every_pending_pool() {
    let store = Arc::new(MemoryStore::new());
    store.add_all("pendingItems:a", &units(&["1", "2"])).await.unwrap();
    store.add_all("pendingItems:b", &units(&["3"])).await.unwrap();
    store.add_all("pendingItems", &units(&["a", "b"])).await.unwrap();
    let waiter = CompletionWaiter::new(store, short_wait());

    assert_eq!(waiter.pending_total(WorkKind::Items).await.unwrap(), 3);
    let report = waiter.wait(WorkKind::Items).await.unwrap();
    assert_eq!(report.initial_pending, 3);
    assert!(!report.drained);
    assert!(report.waited >= report.budget);
}

#[tokio::test]
async fn completion_wait_ends_early_once_workers_drain_the_journal() {
    let store = Arc::new(MemoryStore::new());
    store.add_all("pendingPages:cpu", &units(&["1"])).await.unwrap();
    store.add_all("pendingPages", &units(&["cpu"])).await.unwrap();
    let mut settings = short_wait();
    settings.model.max_wait = Some(Duration::from_secs(30));
    settings.model.average_latency = Duration::from_secs(30);
    let waiter = CompletionWaiter::new(store.clone(), settings);

    let worker = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            store.remove_members("pendingPages:cpu", &units(&["1"])).await.unwrap();
        })
    };
    let report = waiter.wait(WorkKind::Pages).await.unwrap();
    worker.await.unwrap();

    assert!(report.drained);
    assert!(report.waited < Duration::from_secs(5));
}
