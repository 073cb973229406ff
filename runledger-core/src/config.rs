//! Configuration for the history store.
//!
//! Defaults are production-safe; every knob can be overridden with a
//! `RUNLEDGER_*` environment variable or loaded from a TOML file. Invalid
//! environment values fall back to the default with a logged warning
//! rather than failing startup.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const ENV_CACHE_ENABLED: &str = "RUNLEDGER_CACHE_ENABLED";
pub const ENV_RECORD_TTL: &str = "RUNLEDGER_RECORD_TTL_SECS";
pub const ENV_QUERY_TTL: &str = "RUNLEDGER_QUERY_TTL_SECS";
pub const ENV_STATS_TTL: &str = "RUNLEDGER_STATS_TTL_SECS";
pub const ENV_PAGE_SIZE: &str = "RUNLEDGER_PAGE_SIZE";
pub const ENV_MAX_PAGE_SIZE: &str = "RUNLEDGER_MAX_PAGE_SIZE";
pub const ENV_ADAPTIVE_SIZING: &str = "RUNLEDGER_ADAPTIVE_SIZING";
pub const ENV_CURSOR_THRESHOLD: &str = "RUNLEDGER_CURSOR_THRESHOLD";
pub const ENV_RETENTION_DAYS: &str = "RUNLEDGER_RETENTION_DAYS";
pub const ENV_CLEANUP_BATCH: &str = "RUNLEDGER_CLEANUP_BATCH_SIZE";
pub const ENV_EXPORT_BATCH: &str = "RUNLEDGER_EXPORT_BATCH_SIZE";
pub const ENV_IMPORT_BATCH: &str = "RUNLEDGER_IMPORT_BATCH_SIZE";
pub const ENV_MAX_SIZE_MB: &str = "RUNLEDGER_MAX_SIZE_MB";
pub const ENV_MAX_DOCUMENTS: &str = "RUNLEDGER_MAX_DOCUMENTS";
pub const ENV_MAX_DAILY_GROWTH: &str = "RUNLEDGER_MAX_DAILY_GROWTH";

/// Cache tier settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    /// TTL for individual record entries
    pub record_ttl_secs: u64,
    /// TTL for list-query results; short because membership changes often
    pub query_ttl_secs: u64,
    /// TTL for the global statistics slot
    pub stats_ttl_secs: u64,
    pub max_record_entries: u64,
    pub max_query_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            record_ttl_secs: 3600,
            query_ttl_secs: 300,
            stats_ttl_secs: 600,
            max_record_entries: 5000,
            max_query_entries: 1000,
        }
    }
}

/// Pagination behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginationSettings {
    pub default_page_size: usize,
    pub min_page_size: usize,
    pub max_page_size: usize,
    /// Derive the page size from recent query timings when the caller
    /// does not pass one
    pub adaptive_sizing: bool,
    /// Total count beyond which cursor pagination is preferred
    pub cursor_threshold: u64,
    pub cache_pages: bool,
    pub prefetch_next_page: bool,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            min_page_size: 5,
            max_page_size: 100,
            adaptive_sizing: true,
            cursor_threshold: 1000,
            cache_pages: true,
            prefetch_next_page: true,
        }
    }
}

/// Retention and batch-size settings for lifecycle operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionSettings {
    pub retention_days: i64,
    pub cleanup_batch_size: usize,
    pub export_batch_size: usize,
    pub import_batch_size: usize,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            retention_days: 90,
            cleanup_batch_size: 100,
            export_batch_size: 1000,
            import_batch_size: 1000,
        }
    }
}

/// Storage alert thresholds. Warnings fire at 80% of each limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertThresholds {
    pub max_size_mb: f64,
    pub max_documents: u64,
    pub max_daily_growth: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_size_mb: 1000.0,
            max_documents: 100_000,
            max_daily_growth: 1000,
        }
    }
}

/// Top-level configuration for the history store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HistoryConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub pagination: PaginationSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub alerts: AlertThresholds,
}

impl HistoryConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| LedgerError::config(format!("Failed to parse config: {}", e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LedgerError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_bool(ENV_CACHE_ENABLED) {
            self.cache.enabled = v;
        }
        if let Some(v) = env_parse(ENV_RECORD_TTL) {
            self.cache.record_ttl_secs = v;
        }
        if let Some(v) = env_parse(ENV_QUERY_TTL) {
            self.cache.query_ttl_secs = v;
        }
        if let Some(v) = env_parse(ENV_STATS_TTL) {
            self.cache.stats_ttl_secs = v;
        }
        if let Some(v) = env_parse(ENV_PAGE_SIZE) {
            self.pagination.default_page_size = v;
        }
        if let Some(v) = env_parse(ENV_MAX_PAGE_SIZE) {
            self.pagination.max_page_size = v;
        }
        if let Some(v) = env_bool(ENV_ADAPTIVE_SIZING) {
            self.pagination.adaptive_sizing = v;
        }
        if let Some(v) = env_parse(ENV_CURSOR_THRESHOLD) {
            self.pagination.cursor_threshold = v;
        }
        if let Some(v) = env_parse(ENV_RETENTION_DAYS) {
            self.retention.retention_days = v;
        }
        if let Some(v) = env_parse(ENV_CLEANUP_BATCH) {
            self.retention.cleanup_batch_size = v;
        }
        if let Some(v) = env_parse(ENV_EXPORT_BATCH) {
            self.retention.export_batch_size = v;
        }
        if let Some(v) = env_parse(ENV_IMPORT_BATCH) {
            self.retention.import_batch_size = v;
        }
        if let Some(v) = env_parse(ENV_MAX_SIZE_MB) {
            self.alerts.max_size_mb = v;
        }
        if let Some(v) = env_parse(ENV_MAX_DOCUMENTS) {
            self.alerts.max_documents = v;
        }
        if let Some(v) = env_parse(ENV_MAX_DAILY_GROWTH) {
            self.alerts.max_daily_growth = v;
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.pagination.min_page_size == 0 {
            return Err(LedgerError::config("min_page_size must be at least 1"));
        }
        if self.pagination.min_page_size > self.pagination.max_page_size {
            return Err(LedgerError::config(
                "min_page_size cannot exceed max_page_size",
            ));
        }
        if !(self.pagination.min_page_size..=self.pagination.max_page_size)
            .contains(&self.pagination.default_page_size)
        {
            return Err(LedgerError::config(
                "default_page_size must fall between min_page_size and max_page_size",
            ));
        }
        if self.retention.retention_days < 1 {
            return Err(LedgerError::config("retention_days must be at least 1"));
        }
        if self.retention.cleanup_batch_size == 0
            || self.retention.export_batch_size == 0
            || self.retention.import_batch_size == 0
        {
            return Err(LedgerError::config("batch sizes must be at least 1"));
        }
        Ok(())
    }
}

fn env_bool(key: &str) -> Option<bool> {
    match std::env::var(key).ok()?.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        other => {
            warn!("Ignoring invalid boolean for {}: '{}'", key, other);
            None
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring invalid value for {}: '{}'", key, raw);
            None
        }
    }
}
