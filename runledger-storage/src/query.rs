//! Query construction for the history store.
//!
//! List queries are built from a constrained filter vocabulary rather than
//! raw query strings: every value travels through a bind parameter, free
//! text is stripped of pattern metacharacters, and sort fields are
//! whitelisted with a safe fallback.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use runledger_core::record::{MarketCategory, RunStatus, Worker};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Sort fields accepted by `list`; anything else falls back to `created_at`.
pub const SORT_FIELDS: &[&str] = &[
    "created_at",
    "updated_at",
    "event_date",
    "subject_symbol",
    "duration_seconds",
    "status",
];

static FREE_TEXT_SANITIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s.\-]").expect("static pattern"));

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The constrained filter vocabulary for list queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordFilter {
    /// Case-insensitive substring match on the subject symbol
    pub symbol: Option<String>,
    /// Case-insensitive substring match on the subject name
    pub name: Option<String>,
    pub category: Option<MarketCategory>,
    pub status: Option<RunStatus>,
    /// Membership test against `workers_used`
    pub worker: Option<Worker>,
    /// Inclusive lower bound on `created_at`
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub date_to: Option<DateTime<Utc>>,
    /// Full-text search over subject symbol and name
    pub search_text: Option<String>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_category(mut self, category: MarketCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_worker(mut self, worker: Worker) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_date_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_search_text(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }
}

/// A bind parameter value for a built query.
#[derive(Debug, Clone)]
pub enum BindValue {
    Str(String),
    Datetime(surrealdb::sql::Datetime),
}

/// A WHERE clause plus its bind parameters.
#[derive(Debug, Clone, Default)]
pub struct QueryParts {
    pub where_clause: String,
    pub binds: Vec<(String, BindValue)>,
}

impl QueryParts {
    /// The clause with a leading ` WHERE `, or empty when unfiltered.
    pub fn where_fragment(&self) -> String {
        if self.where_clause.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.where_clause)
        }
    }
}

/// Build the WHERE clause and binds for a filter.
pub fn build_where(filter: &RecordFilter) -> QueryParts {
    let mut conditions: Vec<String> = Vec::new();
    let mut binds = Vec::new();

    if let Some(symbol) = filter.symbol.as_deref().filter(|s| !s.trim().is_empty()) {
        conditions.push("string::contains(string::lowercase(subject_symbol), $symbol)".into());
        binds.push((
            "symbol".to_string(),
            BindValue::Str(symbol.trim().to_lowercase()),
        ));
    }

    if let Some(name) = filter.name.as_deref().filter(|s| !s.trim().is_empty()) {
        conditions.push("string::contains(string::lowercase(subject_name), $name)".into());
        binds.push(("name".to_string(), BindValue::Str(name.trim().to_lowercase())));
    }

    if let Some(category) = filter.category {
        conditions.push("category = $category".into());
        binds.push((
            "category".to_string(),
            BindValue::Str(category.as_str().to_string()),
        ));
    }

    if let Some(status) = filter.status {
        conditions.push("status = $status".into());
        binds.push((
            "status".to_string(),
            BindValue::Str(status.as_str().to_string()),
        ));
    }

    if let Some(worker) = filter.worker {
        conditions.push("workers_used CONTAINS $worker".into());
        binds.push((
            "worker".to_string(),
            BindValue::Str(worker.as_str().to_string()),
        ));
    }

    if let Some(from) = filter.date_from {
        conditions.push("created_at >= $date_from".into());
        binds.push(("date_from".to_string(), BindValue::Datetime(from.into())));
    }

    if let Some(to) = filter.date_to {
        conditions.push("created_at <= $date_to".into());
        binds.push(("date_to".to_string(), BindValue::Datetime(to.into())));
    }

    if let Some(text) = filter.search_text.as_deref() {
        let sanitized = sanitize_free_text(text);
        if !sanitized.is_empty() {
            conditions.push("(subject_symbol @@ $search OR subject_name @@ $search)".into());
            binds.push(("search".to_string(), BindValue::Str(sanitized)));
        }
    }

    QueryParts {
        where_clause: conditions.join(" AND "),
        binds,
    }
}

/// Attach built bind parameters to a query.
pub fn apply_binds<'r>(
    mut query: surrealdb::method::Query<'r, surrealdb::engine::any::Any>,
    binds: Vec<(String, BindValue)>,
) -> surrealdb::method::Query<'r, surrealdb::engine::any::Any> {
    for (key, value) in binds {
        query = match value {
            BindValue::Str(s) => query.bind((key, s)),
            BindValue::Datetime(d) => query.bind((key, d)),
        };
    }
    query
}

/// Strip pattern metacharacters from caller-supplied free text.
pub fn sanitize_free_text(text: &str) -> String {
    FREE_TEXT_SANITIZER
        .replace_all(text.trim(), "")
        .to_string()
}

/// Whitelist a caller-supplied sort field, falling back to `created_at DESC`.
pub fn sanitize_sort(field: &str, direction: SortDirection) -> (&'static str, SortDirection) {
    match SORT_FIELDS.iter().find(|f| **f == field) {
        Some(f) => (f, direction),
        None => {
            warn!(
                "Invalid sort field '{}', falling back to created_at DESC",
                field
            );
            ("created_at", SortDirection::Desc)
        }
    }
}

/// Deterministic signature of a full query, used as the cache key for
/// list-query results.
pub fn query_signature(
    filter: &RecordFilter,
    page: usize,
    page_size: usize,
    sort_field: &str,
    sort_direction: SortDirection,
) -> String {
    #[derive(Serialize)]
    struct Signature<'a> {
        filter: &'a RecordFilter,
        page: usize,
        page_size: usize,
        sort_field: &'a str,
        sort_direction: SortDirection,
    }

    let signature = Signature {
        filter,
        page,
        page_size,
        sort_field,
        sort_direction,
    };
    // RecordFilter serializes with a fixed field order, so the JSON is stable
    let serialized =
        serde_json::to_string(&signature).unwrap_or_else(|_| format!("{:?}", filter));
    format!("{:x}", md5::compute(serialized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_has_no_clause() {
        let parts = build_where(&RecordFilter::default());
        assert!(parts.where_clause.is_empty());
        assert!(parts.binds.is_empty());
        assert_eq!(parts.where_fragment(), "");
    }

    #[test]
    fn test_symbol_filter_is_case_insensitive_contains() {
        let filter = RecordFilter::default().with_symbol("  AaPl ");
        let parts = build_where(&filter);
        assert!(parts.where_clause.contains("string::lowercase(subject_symbol)"));
        match &parts.binds[0].1 {
            BindValue::Str(s) => assert_eq!(s, "aapl"),
            other => panic!("unexpected bind: {:?}", other),
        }
    }

    #[test]
    fn test_combined_filters_joined_with_and() {
        let filter = RecordFilter::default()
            .with_category(MarketCategory::Us)
            .with_status(RunStatus::Completed)
            .with_worker(Worker::Market);
        let parts = build_where(&filter);
        assert_eq!(parts.where_clause.matches(" AND ").count(), 2);
        assert!(parts.where_clause.contains("category = $category"));
        assert!(parts.where_clause.contains("status = $status"));
        assert!(parts.where_clause.contains("workers_used CONTAINS $worker"));
        assert_eq!(parts.binds.len(), 3);
    }

    #[test]
    fn test_date_range_bounds() {
        let from = Utc::now() - chrono::Duration::days(7);
        let to = Utc::now();
        let filter = RecordFilter::default().with_date_range(Some(from), Some(to));
        let parts = build_where(&filter);
        assert!(parts.where_clause.contains("created_at >= $date_from"));
        assert!(parts.where_clause.contains("created_at <= $date_to"));
    }

    #[test]
    fn test_free_text_sanitized() {
        assert_eq!(sanitize_free_text("  apple (AAPL)$^ "), "apple AAPL");
        assert_eq!(sanitize_free_text("***"), "");

        // Fully-sanitized input produces no search condition
        let filter = RecordFilter::default().with_search_text("$^*");
        let parts = build_where(&filter);
        assert!(parts.where_clause.is_empty());
    }

    #[test]
    fn test_sort_whitelist_fallback() {
        assert_eq!(
            sanitize_sort("duration_seconds", SortDirection::Asc),
            ("duration_seconds", SortDirection::Asc)
        );
        assert_eq!(
            sanitize_sort("raw_payload.secret; DROP TABLE", SortDirection::Asc),
            ("created_at", SortDirection::Desc)
        );
    }

    #[test]
    fn test_query_signature_deterministic_and_sensitive() {
        let filter = RecordFilter::default().with_category(MarketCategory::Us);
        let a = query_signature(&filter, 1, 20, "created_at", SortDirection::Desc);
        let b = query_signature(&filter, 1, 20, "created_at", SortDirection::Desc);
        assert_eq!(a, b);

        let c = query_signature(&filter, 2, 20, "created_at", SortDirection::Desc);
        assert_ne!(a, c);

        let other = RecordFilter::default().with_category(MarketCategory::Hk);
        let d = query_signature(&other, 1, 20, "created_at", SortDirection::Desc);
        assert_ne!(a, d);
    }
}
