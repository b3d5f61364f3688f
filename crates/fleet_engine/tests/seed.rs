mod common;

use std::sync::Arc;
use std::time::Duration;

use common::set;
use fleet_core::{parse_config, CategoryMeta, ConfigError, CATEGORIES_KEY};
use fleet_engine::{
    CoordinationStore, HttpPageBoundResolver, MemoryStore, NoBoundResolver, PoolSeeder, SeedError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG: &str = r#"{
    "pageBaseUrl": "https://shop.example/list?cate=",
    "itemBaseUrl": "https://shop.example/item?pcode=",
    "minimumDate": "2023-01-01",
    "ignoreWords": ["used"],
    "categories": [
        { "category": "cpu", "categoryNumber": 873, "start": 2, "end": 4, "ignoreWords": ["tray"] },
        { "category": "gpu", "categoryNumber": "876", "end": "*",
          "filters": [{ "type": "maker", "value": "702" }] }
    ],
    "itemsCategories": ["cpu"]
}"#;

#[tokio::test]
async fn bounded_categories_are_seeded_with_metadata() {
    let store = Arc::new(MemoryStore::new());
    let config = parse_config(
        r#"{
            "pageBaseUrl": "https://shop.example/list?cate=",
            "itemBaseUrl": "https://shop.example/item?pcode=",
            "categories": [{ "category": "cpu", "categoryNumber": 873, "start": 1, "end": 3 }]
        }"#,
    )
    .unwrap();

    let report = PoolSeeder::new(store.clone(), Arc::new(NoBoundResolver))
        .seed(&config)
        .await
        .unwrap();

    assert_eq!(report.categories_seeded, 1);
    assert_eq!(report.pages_seeded, 3);
    assert_eq!(store.get_all("pages:cpu").await.unwrap(), set(&["1", "2", "3"]));
    assert_eq!(store.get_all(CATEGORIES_KEY).await.unwrap(), set(&["cpu"]));
    assert_eq!(
        store.get_value("pageBaseUrl").await.unwrap().as_deref(),
        Some("https://shop.example/list?cate=")
    );
    assert_eq!(
        store.get_value("itemBaseUrl").await.unwrap().as_deref(),
        Some("https://shop.example/item?pcode=")
    );
    let meta = CategoryMeta::from_json(&store.get_value("cpu").await.unwrap().unwrap()).unwrap();
    assert_eq!(meta.category_number, "873");
}

#[tokio::test]
async fn open_ranges_are_resolved_through_the_page_count_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pageCount"))
        .and(body_json(json!({
            "url": "https://shop.example/list?cate=876",
            "filters": ["#searchMaker702"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "lastPage": 5 })))
        .expect(1)
        .mount(&server)
        .await;
    let resolver =
        HttpPageBoundResolver::new(format!("{}/pageCount", server.uri()), Duration::from_secs(5))
            .unwrap();
    let store = Arc::new(MemoryStore::new());
    let config = parse_config(CONFIG).unwrap();

    let report = PoolSeeder::new(store.clone(), Arc::new(resolver))
        .seed(&config)
        .await
        .unwrap();

    assert_eq!(report.categories_seeded, 2);
    assert_eq!(report.pages_seeded, 3 + 5);
    assert_eq!(store.get_all("pages:cpu").await.unwrap(), set(&["2", "3", "4"]));
    assert_eq!(
        store.get_all("pages:gpu").await.unwrap(),
        set(&["1", "2", "3", "4", "5"])
    );
    assert_eq!(store.get_all(CATEGORIES_KEY).await.unwrap(), set(&["cpu", "gpu"]));

    let cpu = CategoryMeta::from_json(&store.get_value("cpu").await.unwrap().unwrap()).unwrap();
    assert_eq!(cpu.minimum_date.as_deref(), Some("2023-01-01"));
    assert_eq!(cpu.ignore_words, vec!["used".to_string(), "tray".to_string()]);
    let gpu = CategoryMeta::from_json(&store.get_value("gpu").await.unwrap().unwrap()).unwrap();
    assert_eq!(gpu.filters, vec!["#searchMaker702".to_string()]);
}

#[tokio::test]
async fn failed_resolution_skips_only_that_category() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let resolver =
        HttpPageBoundResolver::new(format!("{}/pageCount", server.uri()), Duration::from_secs(5))
            .unwrap();
    let store = Arc::new(MemoryStore::new());
    let config = parse_config(CONFIG).unwrap();

    let report = PoolSeeder::new(store.clone(), Arc::new(resolver))
        .seed(&config)
        .await
        .unwrap();

    assert_eq!(report.categories_seeded, 1);
    assert_eq!(report.categories_skipped, vec!["gpu".to_string()]);
    assert_eq!(store.get_all(CATEGORIES_KEY).await.unwrap(), set(&["cpu"]));
    assert!(store.get_all("pages:gpu").await.unwrap().is_empty());
}

#[tokio::test]
async fn open_range_without_page_count_service_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let config = parse_config(CONFIG).unwrap();

    let err = PoolSeeder::new(store, Arc::new(NoBoundResolver))
        .seed(&config)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SeedError::Config(ConfigError::UnresolvedBound(ref category)) if category == "gpu"
    ));
}

#[tokio::test]
async fn store_outage_aborts_seeding() {
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let config = parse_config(CONFIG).unwrap();

    let err = PoolSeeder::new(store, Arc::new(NoBoundResolver))
        .seed(&config)
        .await
        .unwrap_err();

    assert!(matches!(err, SeedError::Store(_)));
}
