//! Facade crate for the runledger analysis-history system.
//!
//! Re-exports the record model from `runledger-core` and the storage
//! stack from `runledger-storage` so embedding services depend on a
//! single crate.

pub use runledger_core::{
    AnalysisRecord, HistoryConfig, LedgerError, MarketCategory, RecordBuilder, ResourceUsage,
    Result, RunId, RunStatus, Worker,
};
pub use runledger_storage::{
    AdaptivePaginator, CacheLayer, CacheMetrics, CleanupReport, ConnectionConfig, ConnectionMode,
    ConnectionPool, ExportReport, HistoryStats, ImportReport, LifecycleManager, Page,
    PaginationStrategy, PerformanceMonitor, RecordFilter, RecordStore, RetryPolicy, SortDirection,
    StorageReport,
};
