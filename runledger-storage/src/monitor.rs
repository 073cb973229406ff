//! Performance monitoring for history operations.
//!
//! A bounded ring of timestamped operation metrics feeds windowed
//! aggregates, a slow-operation ranking, and threshold-based tuning
//! recommendations. The monitor is purely observational: recording never
//! fails and never blocks the operation being measured beyond a short
//! lock hold.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Threshold above which an operation counts as slow.
pub const SLOW_THRESHOLD: Duration = Duration::from_secs(2);

const CACHE_HIT_RATE_LOW: f64 = 50.0;
const SLOW_RATE_HIGH: f64 = 10.0;
const AVG_DURATION_HIGH: f64 = 2.0;

/// A single recorded operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationMetric {
    pub operation: String,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub record_count: usize,
    pub cache_hit: bool,
    pub error: Option<String>,
}

impl OperationMetric {
    pub fn new(operation: impl Into<String>, duration: Duration, success: bool) -> Self {
        Self {
            operation: operation.into(),
            duration,
            timestamp: Utc::now(),
            success,
            record_count: 0,
            cache_hit: false,
            error: None,
        }
    }

    pub fn with_record_count(mut self, count: usize) -> Self {
        self.record_count = count;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.success = false;
        self
    }
}

/// Aggregates for one operation over a time window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OperationStats {
    pub count: usize,
    pub avg_duration_secs: f64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    pub median_duration_secs: f64,
    pub p95_duration_secs: f64,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub total_records: usize,
}

/// Aggregates across all operations over a time window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OverallStats {
    pub total_operations: usize,
    pub avg_duration_secs: f64,
    pub median_duration_secs: f64,
    pub p95_duration_secs: f64,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub slow_operations: usize,
    pub slow_operation_rate: f64,
    pub operations_by_type: HashMap<String, usize>,
    pub total_records_processed: usize,
}

/// One entry in the slow-operation ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowOperation {
    pub operation: String,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
    pub record_count: usize,
    pub error: Option<String>,
}

/// Snapshot produced by [`PerformanceMonitor::export_metrics`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsExport {
    pub export_timestamp: DateTime<Utc>,
    pub window_secs: Option<i64>,
    pub metrics_count: usize,
    pub overall: OverallStats,
    pub per_operation: HashMap<String, OperationStats>,
    pub slowest: Vec<SlowOperation>,
    pub recommendations: Vec<String>,
}

/// Bounded-size collector of operation metrics.
pub struct PerformanceMonitor {
    metrics: Mutex<VecDeque<OperationMetric>>,
    max_metrics: usize,
}

impl PerformanceMonitor {
    pub fn new(max_metrics: usize) -> Self {
        Self {
            metrics: Mutex::new(VecDeque::with_capacity(max_metrics.min(1024))),
            max_metrics,
        }
    }

    /// Record a metric. Oldest entries are evicted past the ring capacity.
    pub fn record(&self, metric: OperationMetric) {
        let mut metrics = self.metrics.lock();
        if metrics.len() == self.max_metrics {
            metrics.pop_front();
        }
        metrics.push_back(metric);
    }

    /// Aggregates for one operation, optionally limited to a trailing window.
    pub fn operation_stats(
        &self,
        operation: &str,
        window: Option<ChronoDuration>,
    ) -> OperationStats {
        let metrics = self.metrics.lock();
        let relevant: Vec<&OperationMetric> = filter_window(&metrics, window)
            .filter(|m| m.operation == operation)
            .collect();
        compute_operation_stats(&relevant)
    }

    /// Aggregates across every operation, optionally windowed.
    pub fn overall_stats(&self, window: Option<ChronoDuration>) -> OverallStats {
        let metrics = self.metrics.lock();
        let relevant: Vec<&OperationMetric> = filter_window(&metrics, window).collect();

        if relevant.is_empty() {
            return OverallStats::default();
        }

        let mut durations: Vec<f64> =
            relevant.iter().map(|m| m.duration.as_secs_f64()).collect();
        durations.sort_by(|a, b| a.total_cmp(b));

        let successes = relevant.iter().filter(|m| m.success).count();
        let cache_hits = relevant.iter().filter(|m| m.cache_hit).count();
        let slow = relevant
            .iter()
            .filter(|m| m.duration > SLOW_THRESHOLD)
            .count();

        let mut operations_by_type: HashMap<String, usize> = HashMap::new();
        for metric in &relevant {
            *operations_by_type.entry(metric.operation.clone()).or_default() += 1;
        }

        let total = relevant.len();
        OverallStats {
            total_operations: total,
            avg_duration_secs: durations.iter().sum::<f64>() / total as f64,
            median_duration_secs: percentile(&durations, 50.0),
            p95_duration_secs: percentile(&durations, 95.0),
            success_rate: successes as f64 / total as f64 * 100.0,
            cache_hit_rate: cache_hits as f64 / total as f64 * 100.0,
            slow_operations: slow,
            slow_operation_rate: slow as f64 / total as f64 * 100.0,
            operations_by_type,
            total_records_processed: relevant.iter().map(|m| m.record_count).sum(),
        }
    }

    /// The slowest recorded operations, ranked by duration.
    pub fn slowest(&self, limit: usize) -> Vec<SlowOperation> {
        let metrics = self.metrics.lock();
        let mut slow: Vec<SlowOperation> = metrics
            .iter()
            .filter(|m| m.duration > SLOW_THRESHOLD)
            .map(|m| SlowOperation {
                operation: m.operation.clone(),
                duration_secs: m.duration.as_secs_f64(),
                timestamp: m.timestamp,
                record_count: m.record_count,
                error: m.error.clone(),
            })
            .collect();
        slow.sort_by(|a, b| b.duration_secs.total_cmp(&a.duration_secs));
        slow.truncate(limit);
        slow
    }

    /// Tuning suggestions derived from the last hour of metrics.
    pub fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();
        let recent = self.overall_stats(Some(ChronoDuration::hours(1)));

        if recent.total_operations == 0 {
            return recommendations;
        }

        if recent.cache_hit_rate < CACHE_HIT_RATE_LOW {
            recommendations.push(format!(
                "Cache hit rate is low ({:.1}%). Consider warming the cache or increasing cache TTL.",
                recent.cache_hit_rate
            ));
        }

        if recent.slow_operation_rate > SLOW_RATE_HIGH {
            recommendations.push(format!(
                "High slow operation rate ({:.1}%). Consider optimizing database indexes or query patterns.",
                recent.slow_operation_rate
            ));
        }

        if recent.avg_duration_secs > AVG_DURATION_HIGH {
            recommendations.push(format!(
                "Average operation duration is high ({:.2}s). Consider tighter pagination or result limiting.",
                recent.avg_duration_secs
            ));
        }

        for operation in ["list", "get_by_id", "stats"] {
            let stats = self.operation_stats(operation, Some(ChronoDuration::hours(1)));
            if stats.count > 0 && stats.avg_duration_secs > AVG_DURATION_HIGH {
                recommendations.push(format!(
                    "Operation '{}' is slow (avg: {:.2}s). Consider specific optimizations for this operation.",
                    operation, stats.avg_duration_secs
                ));
            }
        }

        recommendations
    }

    /// Drop all recorded metrics.
    pub fn reset(&self) {
        self.metrics.lock().clear();
    }

    /// Snapshot everything for external analysis.
    pub fn export_metrics(&self, window: Option<ChronoDuration>) -> MetricsExport {
        let per_operation = {
            let metrics = self.metrics.lock();
            let names: std::collections::HashSet<String> = filter_window(&metrics, window)
                .map(|m| m.operation.clone())
                .collect();
            names
        };

        MetricsExport {
            export_timestamp: Utc::now(),
            window_secs: window.map(|w| w.num_seconds()),
            metrics_count: self.metrics.lock().len(),
            overall: self.overall_stats(window),
            per_operation: per_operation
                .into_iter()
                .map(|name| {
                    let stats = self.operation_stats(&name, window);
                    (name, stats)
                })
                .collect(),
            slowest: self.slowest(10),
            recommendations: self.recommendations(),
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn filter_window<'a>(
    metrics: &'a VecDeque<OperationMetric>,
    window: Option<ChronoDuration>,
) -> impl Iterator<Item = &'a OperationMetric> {
    let cutoff = window.map(|w| Utc::now() - w);
    metrics
        .iter()
        .filter(move |m| cutoff.is_none_or(|c| m.timestamp >= c))
}

fn compute_operation_stats(relevant: &[&OperationMetric]) -> OperationStats {
    if relevant.is_empty() {
        return OperationStats::default();
    }

    let mut durations: Vec<f64> = relevant.iter().map(|m| m.duration.as_secs_f64()).collect();
    durations.sort_by(|a, b| a.total_cmp(b));

    let successes = relevant.iter().filter(|m| m.success).count();
    let cache_hits = relevant.iter().filter(|m| m.cache_hit).count();
    let total = relevant.len();

    OperationStats {
        count: total,
        avg_duration_secs: durations.iter().sum::<f64>() / total as f64,
        min_duration_secs: durations[0],
        max_duration_secs: durations[total - 1],
        median_duration_secs: percentile(&durations, 50.0),
        p95_duration_secs: percentile(&durations, 95.0),
        success_rate: successes as f64 / total as f64 * 100.0,
        cache_hit_rate: cache_hits as f64 / total as f64 * 100.0,
        total_records: relevant.iter().map(|m| m.record_count).sum(),
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(op: &str, secs: f64) -> OperationMetric {
        OperationMetric::new(op, Duration::from_secs_f64(secs), true)
    }

    #[test]
    fn test_ring_buffer_bounded() {
        let monitor = PerformanceMonitor::new(3);
        for i in 0..5 {
            monitor.record(metric("op", i as f64 * 0.1));
        }
        assert_eq!(monitor.overall_stats(None).total_operations, 3);
    }

    #[test]
    fn test_operation_stats() {
        let monitor = PerformanceMonitor::default();
        monitor.record(metric("list", 0.1).with_record_count(20));
        monitor.record(metric("list", 0.3).with_record_count(20).with_cache_hit(true));
        monitor.record(metric("save", 0.2));

        let stats = monitor.operation_stats("list", None);
        assert_eq!(stats.count, 2);
        assert!((stats.avg_duration_secs - 0.2).abs() < 1e-9);
        assert_eq!(stats.min_duration_secs, 0.1);
        assert_eq!(stats.max_duration_secs, 0.3);
        assert_eq!(stats.total_records, 40);
        assert_eq!(stats.cache_hit_rate, 50.0);
        assert_eq!(stats.success_rate, 100.0);
    }

    #[test]
    fn test_failure_tracking() {
        let monitor = PerformanceMonitor::default();
        monitor.record(metric("save", 0.1));
        monitor.record(
            OperationMetric::new("save", Duration::from_millis(50), true)
                .with_error("connection refused"),
        );

        let stats = monitor.operation_stats("save", None);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[test]
    fn test_slowest_ranking() {
        let monitor = PerformanceMonitor::default();
        monitor.record(metric("list", 0.5));
        monitor.record(metric("list", 3.0));
        monitor.record(metric("stats", 5.0));
        monitor.record(metric("export", 2.5));

        let slow = monitor.slowest(2);
        assert_eq!(slow.len(), 2);
        assert_eq!(slow[0].operation, "stats");
        assert_eq!(slow[1].operation, "list");
    }

    #[test]
    fn test_recommendations_on_poor_metrics() {
        let monitor = PerformanceMonitor::default();
        // All misses, all slow
        for _ in 0..20 {
            monitor.record(metric("list", 3.0));
        }

        let recommendations = monitor.recommendations();
        assert!(recommendations.iter().any(|r| r.contains("Cache hit rate")));
        assert!(recommendations.iter().any(|r| r.contains("slow operation rate")));
        assert!(
            recommendations
                .iter()
                .any(|r| r.contains("Operation 'list' is slow"))
        );
    }

    #[test]
    fn test_no_recommendations_when_idle() {
        let monitor = PerformanceMonitor::default();
        assert!(monitor.recommendations().is_empty());
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted = vec![0.1, 0.2, 0.3, 0.4, 1.0];
        assert_eq!(percentile(&sorted, 50.0), 0.3);
        assert_eq!(percentile(&sorted, 95.0), 1.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_export_snapshot() {
        let monitor = PerformanceMonitor::default();
        monitor.record(metric("list", 0.1));
        monitor.record(metric("save", 0.2));

        let export = monitor.export_metrics(None);
        assert_eq!(export.metrics_count, 2);
        assert_eq!(export.per_operation.len(), 2);
        assert_eq!(export.overall.total_operations, 2);
    }

    #[test]
    fn test_reset() {
        let monitor = PerformanceMonitor::default();
        monitor.record(metric("list", 0.1));
        monitor.reset();
        assert_eq!(monitor.overall_stats(None).total_operations, 0);
    }
}
