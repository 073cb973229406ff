//! Core types for the runledger analysis-history system.
//!
//! This crate defines the record model and its validation, the central
//! error type, and the configuration surface shared by the storage layer.

pub mod config;
pub mod error;
pub mod id;
pub mod record;

pub use config::{
    AlertThresholds, CacheSettings, HistoryConfig, PaginationSettings, RetentionSettings,
};
pub use error::{LedgerError, Result};
pub use id::RunId;
pub use record::{
    AnalysisRecord, MarketCategory, RecordBuilder, ResourceUsage, RunStatus, Worker,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::HistoryConfig;
    pub use crate::error::{LedgerError, Result};
    pub use crate::id::RunId;
    pub use crate::record::{
        AnalysisRecord, MarketCategory, RecordBuilder, ResourceUsage, RunStatus, Worker,
    };
}
