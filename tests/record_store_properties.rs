//! End-to-end properties of the record store with the full component
//! stack wired together: pool, cache, monitor, store, paginator.

use runledger::{
    AdaptivePaginator, AnalysisRecord, CacheLayer, ConnectionConfig, ConnectionPool,
    HistoryConfig, MarketCategory, PerformanceMonitor, RecordFilter, RecordStore, ResourceUsage,
    RunStatus, SortDirection, Worker,
};
use std::collections::HashSet;
use std::sync::Arc;

async fn build_store() -> RecordStore {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = HistoryConfig::default();
    let pool = Arc::new(
        ConnectionPool::new(ConnectionConfig::memory().with_pool_size(1)).unwrap(),
    );
    let cache = Arc::new(CacheLayer::new(&config.cache));
    let monitor = Arc::new(PerformanceMonitor::default());
    RecordStore::new(pool, cache, monitor).await.unwrap()
}

fn us_record(symbol: &str) -> AnalysisRecord {
    AnalysisRecord::builder(symbol, format!("{} Inc.", symbol), MarketCategory::Us)
        .workers([Worker::Market, Worker::Fundamentals])
        .depth(3)
        .build()
        .unwrap()
}

/// Two-letter US symbols: AA, AB, AC, ...
fn us_symbol(i: usize) -> String {
    format!(
        "{}{}",
        char::from(b'A' + (i / 26) as u8),
        char::from(b'A' + (i % 26) as u8)
    )
}

#[tokio::test]
async fn save_then_get_returns_equal_record() {
    let store = build_store().await;
    let mut record = us_record("AAPL");
    record.set_resource_usage(ResourceUsage::new(1200, 400, 0.034));
    record.insert_metadata("trigger", serde_json::json!("scheduled"));
    record.attach_payloads(
        serde_json::json!({"signal": "buy", "confidence": 0.8}),
        serde_json::json!({"summary": "Bullish."}),
    );

    assert!(store.save(&record).await.unwrap());

    let fetched = store
        .get_by_id(&record.id.to_string())
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(fetched, record);
}

#[tokio::test]
async fn saving_twice_keeps_one_record_with_second_values() {
    let store = build_store().await;
    let mut record = us_record("AAPL");
    store.save(&record).await.unwrap();

    record.set_duration(77.0);
    record.insert_metadata("revision", serde_json::json!(2));
    store.save(&record).await.unwrap();

    let (records, total) = store
        .list(
            &RecordFilter::default(),
            1,
            10,
            "created_at",
            SortDirection::Desc,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].duration_seconds, 77.0);
    assert_eq!(records[0].metadata["revision"], serde_json::json!(2));
}

#[tokio::test]
async fn illegal_transition_leaves_persisted_status_unchanged() {
    let store = build_store().await;
    let record = us_record("AAPL");
    let id = record.id.to_string();
    store.save(&record).await.unwrap();

    for illegal in [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled] {
        assert!(store.update_status(&id, illegal).await.is_err());
        let persisted = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(persisted.status, RunStatus::Pending);
    }

    // Terminal states absorb
    store.update_status(&id, RunStatus::InProgress).await.unwrap();
    store.update_status(&id, RunStatus::Cancelled).await.unwrap();
    assert!(store.update_status(&id, RunStatus::InProgress).await.is_err());
    let persisted = store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(persisted.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn status_update_scenario_advances_updated_at() {
    let store = build_store().await;
    let record = AnalysisRecord::builder("AAPL", "Apple Inc.", MarketCategory::Us)
        .status(RunStatus::InProgress)
        .workers([Worker::Market])
        .depth(3)
        .build()
        .unwrap();
    let id = record.id.to_string();
    store.save(&record).await.unwrap();

    assert!(store.update_status(&id, RunStatus::Completed).await.unwrap());

    let updated = store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(updated.status, RunStatus::Completed);
    assert!(updated.updated_at > record.updated_at);
}

#[tokio::test]
async fn total_count_independent_of_paging_and_pages_disjoint() {
    let store = build_store().await;
    for i in 0..25 {
        store.save(&us_record(&us_symbol(i))).await.unwrap();
    }
    for i in 0..5 {
        let record = AnalysisRecord::builder(
            format!("{:06}", 600_000 + i),
            "Shanghai Listing",
            MarketCategory::Cn,
        )
        .workers([Worker::Market])
        .build()
        .unwrap();
        store.save(&record).await.unwrap();
    }

    // 25 US records paged by 10: full count regardless of page
    let filter = RecordFilter::default().with_category(MarketCategory::Us);
    let (page1, total) = store
        .list(&filter, 1, 10, "created_at", SortDirection::Desc)
        .await
        .unwrap();
    assert_eq!(total, 25);
    assert_eq!(page1.len(), 10);

    let mut seen: HashSet<String> = HashSet::new();
    let mut fetched = 0;
    for page in 1..=3 {
        let (records, page_total) = store
            .list(&filter, page, 10, "created_at", SortDirection::Desc)
            .await
            .unwrap();
        assert_eq!(page_total, 25);
        fetched += records.len();
        for record in records {
            assert!(seen.insert(record.id.to_string()), "pages must be disjoint");
        }
    }
    assert_eq!(fetched, 25);
    assert_eq!(seen.len(), 25);
}

#[tokio::test]
async fn cached_list_never_returns_stale_membership() {
    let store = build_store().await;
    let keep = us_record("AAPL");
    let drop = us_record("MSFT");
    store.save(&keep).await.unwrap();
    store.save(&drop).await.unwrap();

    let filter = RecordFilter::default();
    let (_, total) = store
        .list(&filter, 1, 10, "created_at", SortDirection::Desc)
        .await
        .unwrap();
    assert_eq!(total, 2);

    // Delete must not leave the cached page visible
    store.delete(&drop.id.to_string()).await.unwrap();
    let (records, total) = store
        .list(&filter, 1, 10, "created_at", SortDirection::Desc)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert!(records.iter().all(|r| r.id != drop.id));

    // A new save must appear in a previously-cached query
    let added = us_record("NVDA");
    store.save(&added).await.unwrap();
    let (records, total) = store
        .list(&filter, 1, 10, "created_at", SortDirection::Desc)
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(records.iter().any(|r| r.id == added.id));
}

#[tokio::test]
async fn filters_compose_over_symbol_status_and_worker() {
    let store = build_store().await;
    let mut completed = us_record("AAPL");
    completed.set_status(RunStatus::InProgress).unwrap();
    completed.set_status(RunStatus::Completed).unwrap();
    store.save(&completed).await.unwrap();

    let pending = AnalysisRecord::builder("MSFT", "Microsoft", MarketCategory::Us)
        .workers([Worker::News])
        .build()
        .unwrap();
    store.save(&pending).await.unwrap();

    let (records, total) = store
        .list(
            &RecordFilter::default().with_status(RunStatus::Completed),
            1,
            10,
            "created_at",
            SortDirection::Desc,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(records[0].id, completed.id);

    let (records, total) = store
        .list(
            &RecordFilter::default().with_worker(Worker::News),
            1,
            10,
            "created_at",
            SortDirection::Desc,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(records[0].id, pending.id);

    let (_, total) = store
        .list(
            &RecordFilter::default().with_symbol("aap"),
            1,
            10,
            "created_at",
            SortDirection::Desc,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn stats_reflect_saved_records() {
    let store = build_store().await;
    for i in 0..3 {
        let mut record = us_record(&us_symbol(i));
        record.set_resource_usage(ResourceUsage::new(1000, 200, 0.25));
        store.save(&record).await.unwrap();
    }

    let stats = store.stats().await.unwrap();
    assert!(stats.available);
    assert_eq!(stats.total_runs, 3);
    assert_eq!(stats.category_distribution.get("US"), Some(&3));
    assert_eq!(stats.provider_distribution.get("dashscope"), Some(&3));
    assert!((stats.total_cost - 0.75).abs() < 1e-9);

    // The statistics slot is cached as a unit
    let again = store.stats().await.unwrap();
    assert_eq!(again, stats);
}

#[tokio::test]
async fn paginator_over_real_store_caches_and_reports() {
    let config = HistoryConfig::default();
    let store = build_store().await;
    for i in 0..15 {
        store.save(&us_record(&us_symbol(i))).await.unwrap();
    }

    let paginator = AdaptivePaginator::new(
        config.pagination,
        store.cache().clone(),
        store.monitor().clone(),
    );

    let page = paginator
        .paginate(
            store.page_query_fn(),
            RecordFilter::default(),
            1,
            Some(10),
            "created_at",
            SortDirection::Desc,
        )
        .await;
    assert_eq!(page.records.len(), 10);
    assert_eq!(page.total_count, 15);
    assert_eq!(page.total_pages, 2);
    assert!(page.has_next);

    let stats = paginator.performance_stats();
    assert_eq!(stats.total_queries, 1);

    // Second read of the same page is served from cache
    let cached = paginator
        .paginate(
            store.page_query_fn(),
            RecordFilter::default(),
            1,
            Some(10),
            "created_at",
            SortDirection::Desc,
        )
        .await;
    assert!(cached.cache_hit);
    assert_eq!(cached.total_count, 15);
}

#[tokio::test]
async fn monitor_collects_store_operations() {
    let store = build_store().await;
    let record = us_record("AAPL");
    store.save(&record).await.unwrap();
    // Drop the entry written by save so the first read is a genuine miss
    store.clear_cache().await;
    store.get_by_id(&record.id.to_string()).await.unwrap();
    store.get_by_id(&record.id.to_string()).await.unwrap();

    let overall = store.monitor().overall_stats(None);
    assert!(overall.total_operations >= 3);
    assert_eq!(overall.success_rate, 100.0);

    // Second get_by_id was a cache hit
    let get_stats = store.monitor().operation_stats("get_by_id", None);
    assert_eq!(get_stats.count, 2);
    assert_eq!(get_stats.cache_hit_rate, 50.0);

    let metrics = store.cache_metrics();
    assert!(metrics.hits >= 1);
}
