//! Storage layer for runledger using SurrealDB.
//!
//! This crate provides the record store (CRUD, query building, retry),
//! the invalidating cache layer, the adaptive paginator, the performance
//! monitor, and the lifecycle manager for the analysis-history system.

pub mod cache;
pub mod connection;
pub mod lifecycle;
pub mod monitor;
pub mod paginate;
pub mod pool;
pub mod query;
pub mod retry;
pub mod schema;
pub mod store;

pub use cache::{CacheLayer, CacheMetrics, CachedPage};
pub use connection::{ConnectionConfig, ConnectionMode};
pub use lifecycle::{
    AlertKind, AlertReport, CleanupReport, ExportReport, ImportReport, LifecycleManager,
    PerformanceAggregate, RecordSummary, StorageAlert, StorageInfo, StorageReport,
};
pub use monitor::{
    MetricsExport, OperationMetric, OperationStats, OverallStats, PerformanceMonitor,
    SlowOperation,
};
pub use paginate::{
    AdaptivePaginator, Page, PageQueryFn, PageRequest, PaginationStrategy, PaginatorStats,
};
pub use pool::ConnectionPool;
pub use query::{QueryParts, RecordFilter, SortDirection};
pub use retry::{RetryPolicy, with_retry};
pub use store::{HistoryStats, RecordStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{CacheLayer, CacheMetrics};
    pub use crate::connection::{ConnectionConfig, ConnectionMode};
    pub use crate::lifecycle::LifecycleManager;
    pub use crate::monitor::{OperationMetric, PerformanceMonitor};
    pub use crate::paginate::{AdaptivePaginator, Page, PaginationStrategy};
    pub use crate::pool::ConnectionPool;
    pub use crate::query::{RecordFilter, SortDirection};
    pub use crate::retry::{RetryPolicy, with_retry};
    pub use crate::store::{HistoryStats, RecordStore};
}
