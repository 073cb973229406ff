//! Analysis run records: the unit of persistence for the history store.
//!
//! An [`AnalysisRecord`] captures the inputs, outputs, cost, and timing of
//! one unit of analysis work. Records are constructed through
//! [`RecordBuilder`], which centralizes validation so an invalid record
//! cannot exist in memory; records deserialized from untrusted sources
//! (import files) are re-checked with [`AnalysisRecord::validate`].

use crate::error::{LedgerError, Result};
use crate::id::RunId;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

static CN_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{6}$").expect("static pattern"));
static HK_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4,5}(\.HK)?$").expect("static pattern"));
static US_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,5}$").expect("static pattern"));

/// Lifecycle status of an analysis run.
///
/// The legal transitions form a small state machine:
/// `Pending -> InProgress -> {Completed, Failed, Cancelled}`. The three
/// end states are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [RunStatus; 5] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this status ends the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(LedgerError::invalid_input(format!(
                "Invalid status '{}'. Must be one of: pending, in_progress, completed, failed, cancelled",
                s
            ))),
        }
    }
}

/// Market category of the analyzed subject.
///
/// Each category carries its own symbol format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketCategory {
    /// Mainland China listing, six-digit symbols (e.g. `000001`)
    Cn,
    /// Hong Kong listing, 4-5 digit symbols with optional `.HK` suffix
    Hk,
    /// US listing, 1-5 letter symbols (e.g. `AAPL`)
    Us,
}

impl MarketCategory {
    pub const ALL: [MarketCategory; 3] = [Self::Cn, Self::Hk, Self::Us];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cn => "CN",
            Self::Hk => "HK",
            Self::Us => "US",
        }
    }

    /// The symbol format this category requires.
    pub fn symbol_pattern(&self) -> &'static Regex {
        match self {
            Self::Cn => &CN_SYMBOL,
            Self::Hk => &HK_SYMBOL,
            Self::Us => &US_SYMBOL,
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MarketCategory {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CN" => Ok(Self::Cn),
            "HK" => Ok(Self::Hk),
            "US" => Ok(Self::Us),
            _ => Err(LedgerError::invalid_input(format!(
                "Invalid market category '{}'. Must be one of: CN, HK, US",
                s
            ))),
        }
    }
}

/// Worker roles that can participate in an analysis run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Worker {
    Market,
    Fundamentals,
    News,
    Social,
}

impl Worker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Fundamentals => "fundamentals",
            Self::News => "news",
            Self::Social => "social",
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Worker {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "market" => Ok(Self::Market),
            "fundamentals" => Ok(Self::Fundamentals),
            "news" => Ok(Self::News),
            "social" => Ok(Self::Social),
            _ => Err(LedgerError::invalid_input(format!(
                "Invalid worker '{}'. Must be one of: market, fundamentals, news, social",
                s
            ))),
        }
    }
}

/// Engine resource consumption for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceUsage {
    pub input_units: u64,
    pub output_units: u64,
    pub total_units: u64,
    pub total_cost: f64,
}

impl ResourceUsage {
    /// Create a usage entry, deriving the total unit count.
    pub fn new(input_units: u64, output_units: u64, total_cost: f64) -> Self {
        Self {
            input_units,
            output_units,
            total_units: input_units + output_units,
            total_cost: total_cost.max(0.0),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.total_cost.is_finite() || self.total_cost < 0.0 {
            return Err("Resource usage total_cost must be a non-negative number".into());
        }
        Ok(())
    }
}

/// One persisted unit of analysis work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    /// Serialized as `run_id`: the bare `id` name collides with the
    /// backing database's intrinsic record id.
    #[serde(rename = "run_id")]
    pub id: RunId,
    pub subject_symbol: String,
    pub subject_name: String,
    pub category: MarketCategory,
    pub event_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub workers_used: Vec<Worker>,
    pub depth: u8,
    pub engine_provider: String,
    pub engine_model: String,
    pub duration_seconds: f64,
    pub resource_usage: Option<ResourceUsage>,
    pub raw_payload: serde_json::Value,
    pub formatted_payload: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AnalysisRecord {
    /// Start building a record for the given subject.
    pub fn builder(
        symbol: impl Into<String>,
        name: impl Into<String>,
        category: MarketCategory,
    ) -> RecordBuilder {
        RecordBuilder::new(symbol, name, category)
    }

    /// Re-check all invariants.
    ///
    /// Builder output always passes; this exists for records deserialized
    /// from export files or other untrusted sources.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        validate_fields(
            &self.subject_symbol,
            &self.subject_name,
            self.category,
            &self.workers_used,
            self.depth,
            &self.engine_provider,
            &self.engine_model,
            self.duration_seconds,
            self.resource_usage.as_ref(),
            &mut errors,
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::validation(errors.join("; ")))
        }
    }

    /// Apply a validated status transition.
    ///
    /// Rejected transitions leave the record untouched.
    pub fn set_status(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::invalid_input(format!(
                "Illegal status transition: {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Attach the run's output payloads.
    pub fn attach_payloads(&mut self, raw: serde_json::Value, formatted: serde_json::Value) {
        self.raw_payload = raw;
        self.formatted_payload = formatted;
        self.touch();
    }

    /// Record the wall-clock duration of the run. Negative input clamps to zero.
    pub fn set_duration(&mut self, duration_seconds: f64) {
        self.duration_seconds = duration_seconds.max(0.0);
        self.touch();
    }

    /// Record engine resource consumption.
    pub fn set_resource_usage(&mut self, usage: ResourceUsage) {
        self.resource_usage = Some(usage);
        self.touch();
    }

    /// Add or overwrite a metadata entry.
    pub fn insert_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
        self.touch();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Builder for [`AnalysisRecord`], the single validation boundary.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    id: RunId,
    subject_symbol: String,
    subject_name: String,
    category: MarketCategory,
    event_date: DateTime<Utc>,
    status: RunStatus,
    workers_used: Vec<Worker>,
    depth: u8,
    engine_provider: String,
    engine_model: String,
    duration_seconds: f64,
    resource_usage: Option<ResourceUsage>,
    raw_payload: serde_json::Value,
    formatted_payload: serde_json::Value,
    metadata: HashMap<String, serde_json::Value>,
}

impl RecordBuilder {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        category: MarketCategory,
    ) -> Self {
        Self {
            id: RunId::new(),
            subject_symbol: symbol.into().trim().to_string(),
            subject_name: name.into().trim().to_string(),
            category,
            event_date: Utc::now(),
            status: RunStatus::Pending,
            workers_used: Vec::new(),
            depth: 3,
            engine_provider: "dashscope".to_string(),
            engine_model: "qwen-plus".to_string(),
            duration_seconds: 0.0,
            resource_usage: None,
            raw_payload: serde_json::Value::Null,
            formatted_payload: serde_json::Value::Null,
            metadata: HashMap::new(),
        }
    }

    /// Use a caller-supplied identity instead of a fresh one.
    pub fn id(mut self, id: RunId) -> Self {
        self.id = id;
        self
    }

    pub fn event_date(mut self, date: DateTime<Utc>) -> Self {
        self.event_date = date;
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn workers(mut self, workers: impl IntoIterator<Item = Worker>) -> Self {
        self.workers_used = workers.into_iter().collect();
        self
    }

    pub fn depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }

    pub fn engine(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.engine_provider = provider.into();
        self.engine_model = model.into();
        self
    }

    pub fn duration_seconds(mut self, duration: f64) -> Self {
        self.duration_seconds = duration;
        self
    }

    pub fn resource_usage(mut self, usage: ResourceUsage) -> Self {
        self.resource_usage = Some(usage);
        self
    }

    pub fn raw_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = payload;
        self
    }

    pub fn formatted_payload(mut self, payload: serde_json::Value) -> Self {
        self.formatted_payload = payload;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Validate everything and produce the record.
    pub fn build(self) -> Result<AnalysisRecord> {
        let mut errors = Vec::new();
        validate_fields(
            &self.subject_symbol,
            &self.subject_name,
            self.category,
            &self.workers_used,
            self.depth,
            &self.engine_provider,
            &self.engine_model,
            self.duration_seconds,
            self.resource_usage.as_ref(),
            &mut errors,
        );
        if !errors.is_empty() {
            return Err(LedgerError::validation(errors.join("; ")));
        }

        let now = Utc::now();
        Ok(AnalysisRecord {
            id: self.id,
            subject_symbol: self.subject_symbol,
            subject_name: self.subject_name,
            category: self.category,
            event_date: self.event_date,
            created_at: now,
            updated_at: now,
            status: self.status,
            workers_used: self.workers_used,
            depth: self.depth,
            engine_provider: self.engine_provider,
            engine_model: self.engine_model,
            duration_seconds: self.duration_seconds,
            resource_usage: self.resource_usage,
            raw_payload: self.raw_payload,
            formatted_payload: self.formatted_payload,
            metadata: self.metadata,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn validate_fields(
    symbol: &str,
    name: &str,
    category: MarketCategory,
    workers: &[Worker],
    depth: u8,
    engine_provider: &str,
    engine_model: &str,
    duration_seconds: f64,
    resource_usage: Option<&ResourceUsage>,
    errors: &mut Vec<String>,
) {
    if symbol.trim().is_empty() {
        errors.push("Subject symbol cannot be empty".into());
    } else if symbol.trim().len() > 20 {
        errors.push("Subject symbol cannot exceed 20 characters".into());
    } else {
        let normalized = symbol.trim().to_ascii_uppercase();
        if !category.symbol_pattern().is_match(&normalized) {
            errors.push(format!(
                "Symbol '{}' does not match the {} format",
                symbol, category
            ));
        }
    }

    if name.trim().is_empty() {
        errors.push("Subject name cannot be empty".into());
    } else if name.trim().len() > 100 {
        errors.push("Subject name cannot exceed 100 characters".into());
    }

    if workers.is_empty() {
        errors.push("At least one worker must be specified".into());
    }

    if !(1..=5).contains(&depth) {
        errors.push("Depth must be between 1 and 5".into());
    }

    if engine_provider.trim().is_empty() {
        errors.push("Engine provider cannot be empty".into());
    }
    if engine_model.trim().is_empty() {
        errors.push("Engine model cannot be empty".into());
    }

    if !duration_seconds.is_finite() || duration_seconds < 0.0 {
        errors.push("Duration cannot be negative".into());
    }

    if let Some(usage) = resource_usage {
        if let Err(msg) = usage.validate() {
            errors.push(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> AnalysisRecord {
        AnalysisRecord::builder("AAPL", "Apple Inc.", MarketCategory::Us)
            .workers([Worker::Market, Worker::Fundamentals])
            .depth(3)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_produces_valid_record() {
        let record = valid_record();
        assert_eq!(record.subject_symbol, "AAPL");
        assert_eq!(record.status, RunStatus::Pending);
        assert_eq!(record.depth, 3);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_symbol_format_per_category() {
        // US symbols are 1-5 letters
        assert!(
            AnalysisRecord::builder("AAPL2", "Apple", MarketCategory::Us)
                .workers([Worker::Market])
                .build()
                .is_err()
        );
        // CN symbols are exactly six digits
        assert!(
            AnalysisRecord::builder("000001", "Ping An Bank", MarketCategory::Cn)
                .workers([Worker::Market])
                .build()
                .is_ok()
        );
        assert!(
            AnalysisRecord::builder("0001", "Ping An Bank", MarketCategory::Cn)
                .workers([Worker::Market])
                .build()
                .is_err()
        );
        // HK symbols allow an optional .HK suffix
        assert!(
            AnalysisRecord::builder("0700.HK", "Tencent", MarketCategory::Hk)
                .workers([Worker::Market])
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_empty_workers_rejected() {
        let err = AnalysisRecord::builder("AAPL", "Apple", MarketCategory::Us)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("worker"));
    }

    #[test]
    fn test_depth_bounds() {
        assert!(
            AnalysisRecord::builder("AAPL", "Apple", MarketCategory::Us)
                .workers([Worker::Market])
                .depth(0)
                .build()
                .is_err()
        );
        assert!(
            AnalysisRecord::builder("AAPL", "Apple", MarketCategory::Us)
                .workers([Worker::Market])
                .depth(6)
                .build()
                .is_err()
        );
        assert!(
            AnalysisRecord::builder("AAPL", "Apple", MarketCategory::Us)
                .workers([Worker::Market])
                .depth(5)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_status_state_machine() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::InProgress));
        assert!(RunStatus::InProgress.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::InProgress.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::InProgress.can_transition_to(RunStatus::Cancelled));

        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::InProgress));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn test_set_status_rejects_illegal_transition() {
        let mut record = valid_record();
        let err = record.set_status(RunStatus::Completed).unwrap_err();
        assert!(err.to_string().contains("Illegal status transition"));
        assert_eq!(record.status, RunStatus::Pending);

        record.set_status(RunStatus::InProgress).unwrap();
        record.set_status(RunStatus::Completed).unwrap();
        assert!(record.is_completed());
        assert!(record.set_status(RunStatus::Failed).is_err());
    }

    #[test]
    fn test_mutation_advances_updated_at() {
        let mut record = valid_record();
        let before = record.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        record.set_duration(12.5);
        assert!(record.updated_at > before);
        assert_eq!(record.duration_seconds, 12.5);
    }

    #[test]
    fn test_negative_duration_clamped() {
        let mut record = valid_record();
        record.set_duration(-3.0);
        assert_eq!(record.duration_seconds, 0.0);
    }

    #[test]
    fn test_resource_usage_totals() {
        let usage = ResourceUsage::new(1000, 250, 0.42);
        assert_eq!(usage.total_units, 1250);
        assert_eq!(usage.total_cost, 0.42);

        let clamped = ResourceUsage::new(10, 10, -1.0);
        assert_eq!(clamped.total_cost, 0.0);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut record = valid_record();
        record.set_resource_usage(ResourceUsage::new(100, 50, 0.01));
        record.insert_metadata("source", serde_json::json!("unit-test"));

        let json = serde_json::to_string(&record).unwrap();
        let back: AnalysisRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in RunStatus::ALL {
            let parsed: RunStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<RunStatus>().is_err());
    }
}
