//! Caching layer for records, list-query results, and statistics.
//!
//! Three tiers with independent TTLs: identity-keyed record entries
//! (long-lived; a fresh save replaces the entry), list-query results
//! (short-lived and invalidated wholesale on any write, because tracking
//! which cached queries a write could affect is not worth the complexity),
//! and a single statistics slot. Every operation degrades to a clean miss
//! when caching is disabled; no cache path can fail a caller.

use crate::query::{RecordFilter, SortDirection, query_signature};
use crate::store::HistoryStats;
use moka::future::Cache;
use runledger_core::config::CacheSettings;
use runledger_core::record::AnalysisRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const STATS_KEY: &str = "global";

/// A cached page of list-query results.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPage {
    pub records: Vec<AnalysisRecord>,
    pub total_count: u64,
}

/// Cache performance counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CacheMetrics {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub total_requests: u64,
}

/// Read-through cache in front of the record store.
pub struct CacheLayer {
    enabled: bool,
    records: Cache<String, Arc<AnalysisRecord>>,
    queries: Cache<String, Arc<CachedPage>>,
    stats: Cache<&'static str, Arc<HistoryStats>>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheLayer {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            records: Cache::builder()
                .max_capacity(settings.max_record_entries)
                .time_to_live(Duration::from_secs(settings.record_ttl_secs))
                .build(),
            queries: Cache::builder()
                .max_capacity(settings.max_query_entries)
                .time_to_live(Duration::from_secs(settings.query_ttl_secs))
                .build(),
            stats: Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(settings.stats_ttl_secs))
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Whether caching is active
    pub fn is_available(&self) -> bool {
        self.enabled
    }

    /// Cache an individual record under its identity.
    pub async fn cache_record(&self, record: &AnalysisRecord) -> bool {
        if !self.enabled {
            return false;
        }
        self.records
            .insert(record.id.to_string(), Arc::new(record.clone()))
            .await;
        debug!("Cached record: {}", record.id);
        true
    }

    /// Look up a record by identity.
    pub async fn get_cached_record(&self, id: &str) -> Option<AnalysisRecord> {
        if !self.enabled {
            return None;
        }
        match self.records.get(id).await {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for record: {}", id);
                Some((*record).clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for record: {}", id);
                None
            }
        }
    }

    /// Cache one page of list-query results under the full query signature.
    #[allow(clippy::too_many_arguments)]
    pub async fn cache_query_result(
        &self,
        filter: &RecordFilter,
        page: usize,
        page_size: usize,
        sort_field: &str,
        sort_direction: SortDirection,
        records: Vec<AnalysisRecord>,
        total_count: u64,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        let key = query_signature(filter, page, page_size, sort_field, sort_direction);
        self.queries
            .insert(
                key,
                Arc::new(CachedPage {
                    records,
                    total_count,
                }),
            )
            .await;
        true
    }

    /// Look up a cached page for the full query signature.
    pub async fn get_cached_query_result(
        &self,
        filter: &RecordFilter,
        page: usize,
        page_size: usize,
        sort_field: &str,
        sort_direction: SortDirection,
    ) -> Option<(Vec<AnalysisRecord>, u64)> {
        if !self.enabled {
            return None;
        }
        let key = query_signature(filter, page, page_size, sort_field, sort_direction);
        match self.queries.get(&key).await {
            Some(page) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for query: {} records", page.records.len());
                Some((page.records.clone(), page.total_count))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for query");
                None
            }
        }
    }

    /// Cache the global statistics aggregate.
    pub async fn cache_stats(&self, stats: &HistoryStats) -> bool {
        if !self.enabled {
            return false;
        }
        self.stats.insert(STATS_KEY, Arc::new(stats.clone())).await;
        true
    }

    /// Look up the global statistics aggregate.
    pub async fn get_cached_stats(&self) -> Option<HistoryStats> {
        if !self.enabled {
            return None;
        }
        match self.stats.get(STATS_KEY).await {
            Some(stats) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some((*stats).clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drop one record entry.
    pub async fn invalidate_record(&self, id: &str) {
        if !self.enabled {
            return;
        }
        self.records.invalidate(id).await;
        debug!("Invalidated cached record: {}", id);
    }

    /// Drop every cached list-query result.
    ///
    /// Coarse on purpose: membership and ordering of any cached page may
    /// have changed after a write.
    pub async fn invalidate_query_cache(&self) {
        if !self.enabled {
            return;
        }
        self.queries.invalidate_all();
        debug!("Invalidated query cache");
    }

    /// Drop everything.
    pub async fn clear_all(&self) {
        self.records.invalidate_all();
        self.queries.invalidate_all();
        self.stats.invalidate_all();
    }

    /// Current counters.
    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheMetrics {
            enabled: self.enabled,
            hits,
            misses,
            errors,
            hit_rate: if total > 0 {
                hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            total_requests: total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runledger_core::record::{MarketCategory, Worker};

    fn settings() -> CacheSettings {
        CacheSettings::default()
    }

    fn record() -> AnalysisRecord {
        AnalysisRecord::builder("AAPL", "Apple Inc.", MarketCategory::Us)
            .workers([Worker::Market])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_cache_roundtrip() {
        let cache = CacheLayer::new(&settings());
        let record = record();

        assert!(cache.cache_record(&record).await);
        let cached = cache.get_cached_record(&record.id.to_string()).await;
        assert_eq!(cached.unwrap(), record);

        cache.invalidate_record(&record.id.to_string()).await;
        assert!(cache.get_cached_record(&record.id.to_string()).await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_record_replaces_cached_entry() {
        let cache = CacheLayer::new(&settings());
        let mut record = record();
        cache.cache_record(&record).await;

        record.set_duration(99.0);
        cache.cache_record(&record).await;

        let cached = cache.get_cached_record(&record.id.to_string()).await.unwrap();
        assert_eq!(cached.duration_seconds, 99.0);
    }

    #[tokio::test]
    async fn test_query_cache_keyed_by_signature() {
        let cache = CacheLayer::new(&settings());
        let filter = RecordFilter::default().with_category(MarketCategory::Us);
        let records = vec![record()];

        cache
            .cache_query_result(
                &filter,
                1,
                10,
                "created_at",
                SortDirection::Desc,
                records.clone(),
                25,
            )
            .await;

        let hit = cache
            .get_cached_query_result(&filter, 1, 10, "created_at", SortDirection::Desc)
            .await;
        assert_eq!(hit.unwrap(), (records, 25));

        // Different page misses
        assert!(
            cache
                .get_cached_query_result(&filter, 2, 10, "created_at", SortDirection::Desc)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_coarse_query_invalidation() {
        let cache = CacheLayer::new(&settings());
        let filter = RecordFilter::default();
        cache
            .cache_query_result(
                &filter,
                1,
                10,
                "created_at",
                SortDirection::Desc,
                vec![],
                0,
            )
            .await;

        cache.invalidate_query_cache().await;
        // moka invalidate_all is applied lazily; run pending maintenance
        cache.queries.run_pending_tasks().await;

        assert!(
            cache
                .get_cached_query_result(&filter, 1, 10, "created_at", SortDirection::Desc)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_stats_slot() {
        let cache = CacheLayer::new(&settings());
        assert!(cache.get_cached_stats().await.is_none());

        let stats = HistoryStats {
            total_runs: 7,
            available: true,
            ..Default::default()
        };
        cache.cache_stats(&stats).await;
        assert_eq!(cache.get_cached_stats().await.unwrap().total_runs, 7);
    }

    #[tokio::test]
    async fn test_disabled_cache_degrades_to_miss() {
        let mut settings = settings();
        settings.enabled = false;
        let cache = CacheLayer::new(&settings);
        let record = record();

        assert!(!cache.cache_record(&record).await);
        assert!(cache.get_cached_record(&record.id.to_string()).await.is_none());
        assert!(!cache.is_available());

        // Disabled lookups are not counted
        assert_eq!(cache.metrics().total_requests, 0);
    }

    #[tokio::test]
    async fn test_metrics_hit_rate() {
        let cache = CacheLayer::new(&settings());
        let record = record();
        cache.cache_record(&record).await;

        cache.get_cached_record(&record.id.to_string()).await;
        cache.get_cached_record("missing").await;

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.errors, 0);
        assert_eq!(metrics.hit_rate, 50.0);
    }
}
