//! Adaptive pagination over the record store.
//!
//! Wraps a caller-supplied query function with page-size tuning driven by
//! recent query timings, offset-vs-cursor strategy selection, page-result
//! caching, and best-effort background prefetch of the next page.

use crate::cache::CacheLayer;
use crate::monitor::{OperationMetric, PerformanceMonitor};
use crate::query::{self, RecordFilter, SortDirection};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use runledger_core::config::PaginationSettings;
use runledger_core::error::Result;
use runledger_core::record::AnalysisRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

const TIMING_WINDOW: usize = 100;
const RECENT_WINDOW: usize = 10;
/// Prefetch only fires below this query duration and page size.
const PREFETCH_MAX_QUERY_SECS: f64 = 1.0;
const PREFETCH_MAX_PAGE_SIZE: usize = 50;

/// One fully-specified page query.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub filter: RecordFilter,
    pub page: usize,
    pub page_size: usize,
    pub sort_field: String,
    pub sort_direction: SortDirection,
}

/// The query function a paginator wraps: takes a page request, returns the
/// page of records plus the exact total count.
pub type PageQueryFn =
    Arc<dyn Fn(PageRequest) -> BoxFuture<'static, Result<(Vec<AnalysisRecord>, u64)>> + Send + Sync>;

/// How a page was (or should be) fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationStrategy {
    /// Numeric offset; fine for small totals and shallow pages
    Offset,
    /// Preferred past the threshold to avoid deep-skip cost; execution is
    /// an extension point of the store
    Cursor,
}

/// Result of a paginated query.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<AnalysisRecord>,
    pub total_count: u64,
    pub current_page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub strategy: PaginationStrategy,
    pub cache_hit: bool,
    pub query_time_secs: f64,
}

/// Aggregated paginator timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PaginatorStats {
    pub total_queries: usize,
    pub avg_query_time_secs: f64,
    pub min_query_time_secs: f64,
    pub max_query_time_secs: f64,
    pub recent_avg_time_secs: f64,
    pub adaptive_sizing: bool,
}

/// Pagination engine with adaptive page sizing and prefetch.
pub struct AdaptivePaginator {
    config: PaginationSettings,
    cache: Arc<CacheLayer>,
    monitor: Arc<PerformanceMonitor>,
    query_times: Mutex<VecDeque<f64>>,
}

impl AdaptivePaginator {
    pub fn new(
        config: PaginationSettings,
        cache: Arc<CacheLayer>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            config,
            cache,
            monitor,
            query_times: Mutex::new(VecDeque::with_capacity(TIMING_WINDOW)),
        }
    }

    /// Run a paginated query.
    ///
    /// With `page_size: None` the size is derived from recent query
    /// timings, clamped to the configured bounds. A failed query degrades
    /// to an empty page rather than an error.
    pub async fn paginate(
        &self,
        query: PageQueryFn,
        filter: RecordFilter,
        page: usize,
        page_size: Option<usize>,
        sort_field: &str,
        sort_direction: SortDirection,
    ) -> Page {
        let start = Instant::now();
        let page = page.max(1);
        let page_size = self.resolve_page_size(page_size);
        let (sort_field, sort_direction) = query::sanitize_sort(sort_field, sort_direction);

        if self.config.cache_pages {
            if let Some((records, total)) = self
                .cache
                .get_cached_query_result(&filter, page, page_size, sort_field, sort_direction)
                .await
            {
                debug!("Pagination cache hit: page {}, size {}", page, page_size);
                let mut result = self.assemble(records, total, page, page_size);
                result.cache_hit = true;
                self.observe(start, true, result.records.len(), true);
                return result;
            }
        }

        let request = PageRequest {
            filter: filter.clone(),
            page,
            page_size,
            sort_field: sort_field.to_string(),
            sort_direction,
        };

        let (records, total) = match query(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Pagination query failed: {}", e);
                self.observe(start, false, 0, false);
                let mut empty = self.assemble(Vec::new(), 0, page, page_size);
                empty.query_time_secs = start.elapsed().as_secs_f64();
                return empty;
            }
        };

        let query_time = start.elapsed().as_secs_f64();
        self.push_query_time(query_time);

        if self.config.cache_pages {
            self.cache
                .cache_query_result(
                    &filter,
                    page,
                    page_size,
                    sort_field,
                    sort_direction,
                    records.clone(),
                    total,
                )
                .await;
        }

        let mut result = self.assemble(records, total, page, page_size);
        result.query_time_secs = query_time;
        self.observe(start, true, result.records.len(), false);

        if self.config.prefetch_next_page
            && result.has_next
            && query_time < PREFETCH_MAX_QUERY_SECS
            && page_size <= PREFETCH_MAX_PAGE_SIZE
        {
            self.spawn_prefetch(query, filter, page + 1, page_size, sort_field, sort_direction);
        }

        debug!(
            "Pagination query completed: page {}, size {}, time {:.3}s, total {}",
            page, page_size, query_time, total
        );
        result
    }

    /// Aggregated timing statistics for self-tuning and reporting.
    pub fn performance_stats(&self) -> PaginatorStats {
        let times = self.query_times.lock();
        if times.is_empty() {
            return PaginatorStats {
                adaptive_sizing: self.config.adaptive_sizing,
                ..Default::default()
            };
        }

        let sum: f64 = times.iter().sum();
        let recent: Vec<f64> = times.iter().rev().take(RECENT_WINDOW).copied().collect();

        PaginatorStats {
            total_queries: times.len(),
            avg_query_time_secs: sum / times.len() as f64,
            min_query_time_secs: times.iter().copied().fold(f64::INFINITY, f64::min),
            max_query_time_secs: times.iter().copied().fold(0.0, f64::max),
            recent_avg_time_secs: recent.iter().sum::<f64>() / recent.len() as f64,
            adaptive_sizing: self.config.adaptive_sizing,
        }
    }

    fn resolve_page_size(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(size) => size.clamp(self.config.min_page_size, self.config.max_page_size),
            None => {
                let recent_avg = {
                    let times = self.query_times.lock();
                    if times.is_empty() {
                        1.0
                    } else {
                        let recent: Vec<f64> =
                            times.iter().rev().take(RECENT_WINDOW).copied().collect();
                        recent.iter().sum::<f64>() / recent.len() as f64
                    }
                };
                self.optimal_page_size(1000, recent_avg)
            }
        }
    }

    /// Page size from recent performance: fast queries earn larger pages.
    fn optimal_page_size(&self, estimated_total: u64, avg_query_time: f64) -> usize {
        if !self.config.adaptive_sizing {
            return self.config.default_page_size;
        }

        let mut optimal = if avg_query_time < 0.5 {
            50
        } else if avg_query_time < 2.0 {
            30
        } else {
            15
        };
        optimal = optimal.min(self.config.max_page_size);

        // Small result sets get pulled toward smaller pages
        if estimated_total < 100 {
            optimal = optimal.min(25);
        } else if estimated_total > 10_000 {
            optimal = optimal.max(20);
        }

        optimal.clamp(self.config.min_page_size, self.config.max_page_size)
    }

    /// Offset pagination below the threshold; cursor preferred beyond it.
    fn preferred_strategy(&self, total_count: u64, page: usize) -> PaginationStrategy {
        if total_count > self.config.cursor_threshold || page > 50 {
            PaginationStrategy::Cursor
        } else {
            PaginationStrategy::Offset
        }
    }

    fn assemble(
        &self,
        records: Vec<AnalysisRecord>,
        total_count: u64,
        page: usize,
        page_size: usize,
    ) -> Page {
        let total_pages = if total_count > 0 {
            total_count.div_ceil(page_size as u64) as usize
        } else {
            1
        };
        Page {
            strategy: self.preferred_strategy(total_count, page),
            has_next: page < total_pages,
            has_previous: page > 1,
            records,
            total_count,
            current_page: page,
            page_size,
            total_pages,
            cache_hit: false,
            query_time_secs: 0.0,
        }
    }

    fn push_query_time(&self, secs: f64) {
        let mut times = self.query_times.lock();
        if times.len() == TIMING_WINDOW {
            times.pop_front();
        }
        times.push_back(secs);
    }

    fn observe(&self, start: Instant, success: bool, record_count: usize, cache_hit: bool) {
        self.monitor.record(
            OperationMetric::new("paginate", start.elapsed(), success)
                .with_record_count(record_count)
                .with_cache_hit(cache_hit),
        );
    }

    /// Fire-and-forget prefetch of the next page. Errors are logged and
    /// swallowed; nothing in the foreground path waits on this.
    fn spawn_prefetch(
        &self,
        query: PageQueryFn,
        filter: RecordFilter,
        next_page: usize,
        page_size: usize,
        sort_field: &'static str,
        sort_direction: SortDirection,
    ) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            if cache
                .get_cached_query_result(&filter, next_page, page_size, sort_field, sort_direction)
                .await
                .is_some()
            {
                return;
            }

            let request = PageRequest {
                filter: filter.clone(),
                page: next_page,
                page_size,
                sort_field: sort_field.to_string(),
                sort_direction,
            };

            match query(request).await {
                Ok((records, total)) => {
                    cache
                        .cache_query_result(
                            &filter,
                            next_page,
                            page_size,
                            sort_field,
                            sort_direction,
                            records,
                            total,
                        )
                        .await;
                    debug!("Prefetched page {}", next_page);
                }
                Err(e) => {
                    debug!("Prefetch failed for page {}: {}", next_page, e);
                }
            }
        });
    }
}
