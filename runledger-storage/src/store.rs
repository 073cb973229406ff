//! The record store: persistence facade for analysis run records.
//!
//! Every read checks the cache layer first and repopulates it on miss;
//! every write refreshes the record entry and drops all cached list
//! results. Transient connectivity failures are retried with backoff and
//! then degrade to empty/false results; validation failures propagate
//! immediately. Collaborators are injected explicitly; the store owns no
//! global state.

use crate::cache::{CacheLayer, CacheMetrics};
use crate::monitor::{OperationMetric, PerformanceMonitor};
use crate::paginate::{PageQueryFn, PageRequest};
use crate::pool::ConnectionPool;
use crate::query::{self, RecordFilter, SortDirection, apply_binds};
use crate::retry::{RetryPolicy, with_retry};
use crate::schema::{self, TABLE};
use chrono::{Duration as ChronoDuration, Utc};
use runledger_core::error::{LedgerError, Result};
use runledger_core::record::{AnalysisRecord, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::{debug, error, info, warn};

/// Aggregate statistics over the whole collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HistoryStats {
    pub total_runs: u64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    /// Runs created within the last 7 days
    pub recent_runs: u64,
    pub success_rate: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
    pub avg_duration_seconds: f64,
    pub total_duration_seconds: f64,
    pub status_distribution: BTreeMap<String, u64>,
    pub category_distribution: BTreeMap<String, u64>,
    pub provider_distribution: BTreeMap<String, u64>,
    /// Daily run counts for the last 30 days, keyed `YYYY-MM-DD`
    pub daily_counts: BTreeMap<String, u64>,
    pub available: bool,
}

/// Persistence facade for [`AnalysisRecord`]s.
#[derive(Clone)]
pub struct RecordStore {
    pool: Arc<ConnectionPool>,
    cache: Arc<CacheLayer>,
    monitor: Arc<PerformanceMonitor>,
    retry: RetryPolicy,
}

impl RecordStore {
    /// Create a store and initialize the schema.
    pub async fn new(
        pool: Arc<ConnectionPool>,
        cache: Arc<CacheLayer>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Result<Self> {
        let db = pool.get().await?;
        schema::init_schema(&db).await?;

        Ok(Self {
            pool,
            cache,
            monitor,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether the backing connection is usable.
    pub fn is_available(&self) -> bool {
        self.pool.is_available()
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Persist a record with insert-or-replace semantics keyed by identity.
    ///
    /// Returns `false` when the backing store is unavailable; validation
    /// failures propagate as errors.
    pub async fn save(&self, record: &AnalysisRecord) -> Result<bool> {
        let start = Instant::now();
        record.validate()?;

        let pool = self.pool.clone();
        let result = with_retry(&self.retry, "save", || {
            let pool = pool.clone();
            let record = record.clone();
            async move {
                let db = pool.get().await?;
                let _: Option<AnalysisRecord> = db
                    .upsert((TABLE, record.id.to_string()))
                    .content(record)
                    .await
                    .map_err(|e| LedgerError::database(format!("Failed to save record: {}", e)))?;
                Ok(())
            }
        })
        .await;

        match result {
            Ok(()) => {
                debug!("Saved analysis record: {}", record.id);
                self.cache.cache_record(record).await;
                self.cache.invalidate_query_cache().await;
                self.observe("save", start, true, 1, false, None);
                Ok(true)
            }
            Err(e) => {
                self.observe("save", start, false, 0, false, Some(&e));
                self.degrade("save", false, e)
            }
        }
    }

    /// Fetch a record by identity, read-through cached.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let start = Instant::now();
        let id = id.trim();
        if id.is_empty() {
            warn!("Empty id passed to get_by_id");
            return Ok(None);
        }

        if let Some(record) = self.cache.get_cached_record(id).await {
            self.observe("get_by_id", start, true, 1, true, None);
            return Ok(Some(record));
        }

        let pool = self.pool.clone();
        let owned_id = id.to_string();
        let result = with_retry(&self.retry, "get_by_id", || {
            let pool = pool.clone();
            let id = owned_id.clone();
            async move {
                let db = pool.get().await?;
                let record: Option<AnalysisRecord> = db
                    .select((TABLE, id))
                    .await
                    .map_err(|e| LedgerError::database(format!("Failed to get record: {}", e)))?;
                Ok(record)
            }
        })
        .await;

        match result {
            Ok(Some(record)) => {
                self.cache.cache_record(&record).await;
                self.observe("get_by_id", start, true, 1, false, None);
                Ok(Some(record))
            }
            Ok(None) => {
                debug!("Analysis record not found: {}", id);
                self.observe("get_by_id", start, true, 0, false, None);
                Ok(None)
            }
            Err(e) => {
                self.observe("get_by_id", start, false, 0, false, Some(&e));
                self.degrade("get_by_id", None, e)
            }
        }
    }

    /// List records matching a filter, with paging and sorting.
    ///
    /// Returns the page and the exact total count. Invalid sort fields
    /// fall back to `created_at DESC`.
    pub async fn list(
        &self,
        filter: &RecordFilter,
        page: usize,
        page_size: usize,
        sort_field: &str,
        sort_direction: SortDirection,
    ) -> Result<(Vec<AnalysisRecord>, u64)> {
        let start = Instant::now();
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let (sort_field, sort_direction) = query::sanitize_sort(sort_field, sort_direction);

        if let Some((records, total)) = self
            .cache
            .get_cached_query_result(filter, page, page_size, sort_field, sort_direction)
            .await
        {
            self.observe("list", start, true, records.len(), true, None);
            return Ok((records, total));
        }

        let parts = query::build_where(filter);
        let count_query = format!(
            "SELECT count() FROM {}{} GROUP ALL",
            TABLE,
            parts.where_fragment()
        );
        let page_query = format!(
            "SELECT * FROM {}{} ORDER BY {} {} LIMIT $limit START $start",
            TABLE,
            parts.where_fragment(),
            sort_field,
            sort_direction.as_str()
        );
        let offset = (page - 1) * page_size;

        let pool = self.pool.clone();
        let result = with_retry(&self.retry, "list", || {
            let pool = pool.clone();
            let count_query = count_query.clone();
            let page_query = page_query.clone();
            let binds = parts.binds.clone();
            async move {
                let db = pool.get().await?;

                let mut response = apply_binds(db.query(&count_query), binds.clone())
                    .await
                    .map_err(|e| LedgerError::database(format!("Count query failed: {}", e)))?;
                let total: Option<u64> = response
                    .take("count")
                    .map_err(|e| LedgerError::storage(format!("Failed to read count: {}", e)))?;

                let mut response = apply_binds(db.query(&page_query), binds)
                    .bind(("limit", page_size as i64))
                    .bind(("start", offset as i64))
                    .await
                    .map_err(|e| LedgerError::database(format!("List query failed: {}", e)))?;
                let records: Vec<AnalysisRecord> = response
                    .take(0)
                    .map_err(|e| LedgerError::storage(format!("Failed to parse records: {}", e)))?;

                Ok((records, total.unwrap_or(0)))
            }
        })
        .await;

        match result {
            Ok((records, total)) => {
                debug!(
                    "Listed {} records (page {}, total {})",
                    records.len(),
                    page,
                    total
                );
                self.cache
                    .cache_query_result(
                        filter,
                        page,
                        page_size,
                        sort_field,
                        sort_direction,
                        records.clone(),
                        total,
                    )
                    .await;
                self.observe("list", start, true, records.len(), false, None);
                Ok((records, total))
            }
            Err(e) => {
                self.observe("list", start, false, 0, false, Some(&e));
                self.degrade("list", (Vec::new(), 0), e)
            }
        }
    }

    /// Delete a record by identity. Returns whether a record was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let start = Instant::now();
        let id = id.trim();
        if id.is_empty() {
            warn!("Empty id passed to delete");
            return Ok(false);
        }

        let pool = self.pool.clone();
        let owned_id = id.to_string();
        let result = with_retry(&self.retry, "delete", || {
            let pool = pool.clone();
            let id = owned_id.clone();
            async move {
                let db = pool.get().await?;
                let deleted: Option<AnalysisRecord> = db
                    .delete((TABLE, id))
                    .await
                    .map_err(|e| LedgerError::database(format!("Failed to delete record: {}", e)))?;
                Ok(deleted.is_some())
            }
        })
        .await;

        match result {
            Ok(existed) => {
                if existed {
                    info!("Deleted analysis record: {}", id);
                    self.cache.invalidate_record(id).await;
                    self.cache.invalidate_query_cache().await;
                } else {
                    warn!("Analysis record not found for deletion: {}", id);
                }
                self.observe("delete", start, true, usize::from(existed), false, None);
                Ok(existed)
            }
            Err(e) => {
                self.observe("delete", start, false, 0, false, Some(&e));
                self.degrade("delete", false, e)
            }
        }
    }

    /// Delete many records by identity. Returns the number removed.
    pub async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        let start = Instant::now();
        if ids.is_empty() {
            return Ok(0);
        }

        let pool = self.pool.clone();
        let id_list: Vec<String> = ids.to_vec();
        let result = with_retry(&self.retry, "delete_many", || {
            let pool = pool.clone();
            let ids = id_list.clone();
            async move {
                let db = pool.get().await?;
                let mut response = db
                    .query(format!(
                        "DELETE FROM {} WHERE run_id IN $ids RETURN BEFORE",
                        TABLE
                    ))
                    .bind(("ids", ids))
                    .await
                    .map_err(|e| LedgerError::database(format!("Bulk delete failed: {}", e)))?;
                let deleted: Vec<AnalysisRecord> = response.take(0).map_err(|e| {
                    LedgerError::storage(format!("Failed to parse deleted records: {}", e))
                })?;
                Ok(deleted.len() as u64)
            }
        })
        .await;

        match result {
            Ok(count) => {
                info!("Deleted {} analysis records", count);
                for id in ids {
                    self.cache.invalidate_record(id).await;
                }
                self.cache.invalidate_query_cache().await;
                self.observe("delete_many", start, true, count as usize, false, None);
                Ok(count)
            }
            Err(e) => {
                self.observe("delete_many", start, false, 0, false, Some(&e));
                self.degrade("delete_many", 0, e)
            }
        }
    }

    /// Apply a validated status transition and advance `updated_at`.
    ///
    /// Illegal transitions error and leave the persisted record unchanged;
    /// an unknown id returns `false`.
    pub async fn update_status(&self, id: &str, new_status: RunStatus) -> Result<bool> {
        let start = Instant::now();
        let id = id.trim();
        if id.is_empty() {
            return Ok(false);
        }

        // Read the persisted record, not the cache, so the transition is
        // checked against the authoritative status.
        let pool = self.pool.clone();
        let owned_id = id.to_string();
        let current = with_retry(&self.retry, "update_status", || {
            let pool = pool.clone();
            let id = owned_id.clone();
            async move {
                let db = pool.get().await?;
                let record: Option<AnalysisRecord> = db
                    .select((TABLE, id))
                    .await
                    .map_err(|e| LedgerError::database(format!("Failed to get record: {}", e)))?;
                Ok(record)
            }
        })
        .await;

        let mut record = match current {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Analysis record not found for status update: {}", id);
                self.observe("update_status", start, true, 0, false, None);
                return Ok(false);
            }
            Err(e) => {
                self.observe("update_status", start, false, 0, false, Some(&e));
                return self.degrade("update_status", false, e);
            }
        };

        // Rejected transitions propagate without touching the store
        record.set_status(new_status)?;

        match self.save(&record).await {
            Ok(true) => {
                info!("Updated analysis status: {} -> {}", id, new_status);
                self.observe("update_status", start, true, 1, false, None);
                Ok(true)
            }
            Ok(false) => {
                self.observe("update_status", start, false, 0, false, None);
                Ok(false)
            }
            Err(e) => {
                self.observe("update_status", start, false, 0, false, Some(&e));
                Err(e)
            }
        }
    }

    /// Aggregate statistics over the whole collection, cached as a unit.
    pub async fn stats(&self) -> Result<HistoryStats> {
        let start = Instant::now();

        if let Some(stats) = self.cache.get_cached_stats().await {
            self.observe("stats", start, true, 0, true, None);
            return Ok(stats);
        }

        let pool = self.pool.clone();
        let result = with_retry(&self.retry, "stats", || {
            let pool = pool.clone();
            async move {
                let db = pool.get().await?;
                compute_stats(&db).await
            }
        })
        .await;

        match result {
            Ok(stats) => {
                self.cache.cache_stats(&stats).await;
                self.observe("stats", start, true, stats.total_runs as usize, false, None);
                Ok(stats)
            }
            Err(e) => {
                self.observe("stats", start, false, 0, false, Some(&e));
                self.degrade("stats", HistoryStats::default(), e)
            }
        }
    }

    /// Push the most recent `limit` records into the record cache.
    pub async fn warm_cache(&self, limit: usize) -> Result<usize> {
        let pool = self.pool.clone();
        let result = with_retry(&self.retry, "warm_cache", || {
            let pool = pool.clone();
            async move {
                let db = pool.get().await?;
                let mut response = db
                    .query(format!(
                        "SELECT * FROM {} ORDER BY created_at DESC LIMIT $limit",
                        TABLE
                    ))
                    .bind(("limit", limit as i64))
                    .await
                    .map_err(|e| LedgerError::database(format!("Warm query failed: {}", e)))?;
                let records: Vec<AnalysisRecord> = response
                    .take(0)
                    .map_err(|e| LedgerError::storage(format!("Failed to parse records: {}", e)))?;
                Ok(records)
            }
        })
        .await;

        match result {
            Ok(records) => {
                let mut cached = 0;
                for record in &records {
                    if self.cache.cache_record(record).await {
                        cached += 1;
                    }
                }
                info!("Cache warmed with {} recent records", cached);
                Ok(cached)
            }
            Err(e) => self.degrade("warm_cache", 0, e),
        }
    }

    /// Current cache counters.
    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    /// Drop every cache entry.
    pub async fn clear_cache(&self) {
        self.cache.clear_all().await;
    }

    /// A query function over this store for the adaptive paginator.
    pub fn page_query_fn(&self) -> PageQueryFn {
        let store = self.clone();
        Arc::new(move |request: PageRequest| {
            let store = store.clone();
            Box::pin(async move {
                store
                    .list(
                        &request.filter,
                        request.page,
                        request.page_size,
                        &request.sort_field,
                        request.sort_direction,
                    )
                    .await
            })
        })
    }

    fn observe(
        &self,
        operation: &str,
        start: Instant,
        success: bool,
        record_count: usize,
        cache_hit: bool,
        err: Option<&LedgerError>,
    ) {
        let mut metric = OperationMetric::new(operation, start.elapsed(), success)
            .with_record_count(record_count)
            .with_cache_hit(cache_hit);
        if let Some(e) = err {
            metric = metric.with_error(e.to_string());
        }
        self.monitor.record(metric);
    }

    /// Map non-validation failures to a degraded result; the host process
    /// must never crash on store unavailability.
    fn degrade<T>(&self, operation: &str, fallback: T, e: LedgerError) -> Result<T> {
        if e.is_validation() {
            return Err(e);
        }
        error!("{} degraded after failure: {}", operation, e);
        Ok(fallback)
    }
}

async fn compute_stats(db: &Surreal<Any>) -> Result<HistoryStats> {
    #[derive(Deserialize)]
    struct StatusRow {
        status: String,
        count: u64,
    }
    #[derive(Deserialize)]
    struct CategoryRow {
        category: String,
        count: u64,
    }
    #[derive(Deserialize)]
    struct ProviderRow {
        engine_provider: String,
        count: u64,
    }
    #[derive(Deserialize)]
    struct DayRow {
        day: String,
        count: u64,
    }
    #[derive(Deserialize, Default)]
    struct AggRow {
        total_duration: Option<f64>,
        avg_duration: Option<f64>,
        total_cost: Option<f64>,
        avg_cost: Option<f64>,
    }

    let db_err = |e: surrealdb::Error| LedgerError::database(format!("Stats query failed: {}", e));
    let parse_err =
        |e: surrealdb::Error| LedgerError::storage(format!("Failed to parse stats: {}", e));

    let mut response = db
        .query(format!("SELECT count() FROM {} GROUP ALL", TABLE))
        .await
        .map_err(db_err)?;
    let total: Option<u64> = response.take("count").map_err(parse_err)?;
    let total_runs = total.unwrap_or(0);

    let mut response = db
        .query(format!(
            "SELECT status, count() FROM {} GROUP BY status",
            TABLE
        ))
        .await
        .map_err(db_err)?;
    let status_rows: Vec<StatusRow> = response.take(0).map_err(parse_err)?;
    let status_distribution: BTreeMap<String, u64> = status_rows
        .into_iter()
        .map(|row| (row.status, row.count))
        .collect();

    let mut response = db
        .query(format!(
            "SELECT category, count() FROM {} GROUP BY category",
            TABLE
        ))
        .await
        .map_err(db_err)?;
    let category_rows: Vec<CategoryRow> = response.take(0).map_err(parse_err)?;
    let category_distribution: BTreeMap<String, u64> = category_rows
        .into_iter()
        .map(|row| (row.category, row.count))
        .collect();

    let mut response = db
        .query(format!(
            "SELECT engine_provider, count() FROM {} GROUP BY engine_provider",
            TABLE
        ))
        .await
        .map_err(db_err)?;
    let provider_rows: Vec<ProviderRow> = response.take(0).map_err(parse_err)?;
    let provider_distribution: BTreeMap<String, u64> = provider_rows
        .into_iter()
        .map(|row| (row.engine_provider, row.count))
        .collect();

    let week_ago = Utc::now() - ChronoDuration::days(7);
    let mut response = db
        .query(format!(
            "SELECT count() FROM {} WHERE created_at >= $since GROUP ALL",
            TABLE
        ))
        .bind(("since", surrealdb::sql::Datetime::from(week_ago)))
        .await
        .map_err(db_err)?;
    let recent: Option<u64> = response.take("count").map_err(parse_err)?;

    let mut response = db
        .query(format!(
            "SELECT math::sum(duration_seconds) AS total_duration, \
             math::mean(duration_seconds) AS avg_duration, \
             math::sum(resource_usage.total_cost ?? 0) AS total_cost, \
             math::mean(resource_usage.total_cost ?? 0) AS avg_cost \
             FROM {} GROUP ALL",
            TABLE
        ))
        .await
        .map_err(db_err)?;
    let aggregates: Option<AggRow> = response.take(0).map_err(parse_err)?;
    let aggregates = aggregates.unwrap_or_default();

    let month_ago = Utc::now() - ChronoDuration::days(30);
    let mut response = db
        .query(format!(
            "SELECT time::format(created_at, '%Y-%m-%d') AS day, count() \
             FROM {} WHERE created_at >= $since GROUP BY day",
            TABLE
        ))
        .bind(("since", surrealdb::sql::Datetime::from(month_ago)))
        .await
        .map_err(db_err)?;
    let day_rows: Vec<DayRow> = response.take(0).map_err(parse_err)?;
    let daily_counts: BTreeMap<String, u64> = day_rows
        .into_iter()
        .map(|row| (row.day, row.count))
        .collect();

    let completed_runs = status_distribution
        .get(RunStatus::Completed.as_str())
        .copied()
        .unwrap_or(0);
    let failed_runs = status_distribution
        .get(RunStatus::Failed.as_str())
        .copied()
        .unwrap_or(0);

    Ok(HistoryStats {
        total_runs,
        completed_runs,
        failed_runs,
        recent_runs: recent.unwrap_or(0),
        success_rate: if total_runs > 0 {
            completed_runs as f64 / total_runs as f64 * 100.0
        } else {
            0.0
        },
        total_cost: aggregates.total_cost.unwrap_or(0.0),
        avg_cost: aggregates.avg_cost.unwrap_or(0.0),
        avg_duration_seconds: aggregates.avg_duration.unwrap_or(0.0),
        total_duration_seconds: aggregates.total_duration.unwrap_or(0.0),
        status_distribution,
        category_distribution,
        provider_distribution,
        daily_counts,
        available: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use runledger_core::record::{MarketCategory, Worker};

    async fn test_store() -> RecordStore {
        let pool = Arc::new(
            ConnectionPool::new(ConnectionConfig::memory().with_pool_size(1)).unwrap(),
        );
        let cache = Arc::new(CacheLayer::new(&Default::default()));
        let monitor = Arc::new(PerformanceMonitor::default());
        RecordStore::new(pool, cache, monitor).await.unwrap()
    }

    fn record(symbol: &str) -> AnalysisRecord {
        AnalysisRecord::builder(symbol, format!("{} Inc.", symbol), MarketCategory::Us)
            .workers([Worker::Market, Worker::Fundamentals])
            .depth(3)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let store = test_store().await;
        let record = record("AAPL");

        assert!(store.save(&record).await.unwrap());

        let fetched = store.get_by_id(&record.id.to_string()).await.unwrap();
        assert_eq!(fetched.unwrap(), record);
    }

    #[tokio::test]
    async fn test_save_twice_upserts() {
        let store = test_store().await;
        let mut record = record("AAPL");
        store.save(&record).await.unwrap();

        record.set_duration(42.0);
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
        assert_eq!(records[0].duration_seconds, 42.0);
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_record() {
        let store = test_store().await;
        let mut record = record("AAPL");
        record.subject_symbol = String::new();
        assert!(store.save(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_get_by_id_empty_id() {
        let store = test_store().await;
        assert!(store.get_by_id("  ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_by_id_unknown_is_none() {
        let store = test_store().await;
        let missing = store
            .get_by_id(&runledger_core::RunId::new().to_string())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = test_store().await;
        let record = record("AAPL");
        store.save(&record).await.unwrap();

        assert!(store.delete(&record.id.to_string()).await.unwrap());
        assert!(!store.delete(&record.id.to_string()).await.unwrap());
        assert!(
            store
                .get_by_id(&record.id.to_string())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_many() {
        let store = test_store().await;
        let a = record("AAPL");
        let b = record("MSFT");
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let deleted = store
            .delete_many(&[a.id.to_string(), b.id.to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn test_update_status_transitions() {
        let store = test_store().await;
        let record = record("AAPL");
        let id = record.id.to_string();
        store.save(&record).await.unwrap();

        // pending -> completed is illegal
        assert!(store.update_status(&id, RunStatus::Completed).await.is_err());
        let unchanged = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, RunStatus::Pending);

        assert!(store.update_status(&id, RunStatus::InProgress).await.unwrap());
        assert!(store.update_status(&id, RunStatus::Completed).await.unwrap());

        let updated = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(updated.status, RunStatus::Completed);
        assert!(updated.updated_at > record.updated_at);
    }

    #[tokio::test]
    async fn test_update_status_unknown_id() {
        let store = test_store().await;
        let ok = store
            .update_status(
                &runledger_core::RunId::new().to_string(),
                RunStatus::InProgress,
            )
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_list_filters_and_total() {
        let store = test_store().await;
        for i in 0..5 {
            store.save(&record(&format!("AA{}", ["A", "B", "C", "D", "E"][i]))).await.unwrap();
        }
        let cn = AnalysisRecord::builder("000001", "Ping An Bank", MarketCategory::Cn)
            .workers([Worker::Market])
            .build()
            .unwrap();
        store.save(&cn).await.unwrap();

        let filter = RecordFilter::default().with_category(MarketCategory::Us);
        let (records, total) = store
            .list(&filter, 1, 3, "created_at", SortDirection::Desc)
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(records.len(), 3);

        let (page2, total2) = store
            .list(&filter, 2, 3, "created_at", SortDirection::Desc)
            .await
            .unwrap();
        assert_eq!(total2, 5);
        assert_eq!(page2.len(), 2);

        // Pages are disjoint
        let ids: std::collections::HashSet<_> =
            records.iter().map(|r| r.id).chain(page2.iter().map(|r| r.id)).collect();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn test_list_invalid_sort_falls_back() {
        let store = test_store().await;
        store.save(&record("AAPL")).await.unwrap();

        let (records, total) = store
            .list(
                &RecordFilter::default(),
                1,
                10,
                "raw_payload.evil",
                SortDirection::Asc,
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_list_cache_invalidated_on_delete() {
        let store = test_store().await;
        let record = record("AAPL");
        store.save(&record).await.unwrap();

        let filter = RecordFilter::default();
        let (_, total) = store
            .list(&filter, 1, 10, "created_at", SortDirection::Desc)
            .await
            .unwrap();
        assert_eq!(total, 1);

        store.delete(&record.id.to_string()).await.unwrap();

        let (records, total) = store
            .list(&filter, 1, 10, "created_at", SortDirection::Desc)
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let store = test_store().await;
        for symbol in ["AAPL", "MSFT"] {
            let mut r = record(symbol);
            r.set_resource_usage(runledger_core::ResourceUsage::new(100, 50, 0.5));
            store.save(&r).await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert!(stats.available);
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.recent_runs, 2);
        assert_eq!(stats.status_distribution.get("pending"), Some(&2));
        assert_eq!(stats.category_distribution.get("US"), Some(&2));
        assert!((stats.total_cost - 1.0).abs() < 1e-9);
        assert_eq!(stats.daily_counts.values().sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn test_warm_cache() {
        let store = test_store().await;
        for symbol in ["AAPL", "MSFT", "NVDA"] {
            store.save(&record(symbol)).await.unwrap();
        }
        store.clear_cache().await;

        let warmed = store.warm_cache(2).await.unwrap();
        assert_eq!(warmed, 2);
    }
}
