//! Database schema and index definitions for the history store.

use runledger_core::error::{LedgerError, Result};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;

/// Table holding all analysis run records.
pub const TABLE: &str = "analysis_runs";

/// SurrealQL schema for the history store.
///
/// The record identity lives in `run_id` (also the record key), kept as a
/// field so identity queries and the unique index work the same way they
/// do for every other indexed field. Date fields cast incoming values so
/// ISO-8601 strings land as real datetimes.
pub const SCHEMA: &str = r#"
DEFINE TABLE analysis_runs SCHEMAFULL;

DEFINE FIELD run_id ON analysis_runs TYPE string;
DEFINE FIELD subject_symbol ON analysis_runs TYPE string;
DEFINE FIELD subject_name ON analysis_runs TYPE string;
DEFINE FIELD category ON analysis_runs TYPE string;
DEFINE FIELD event_date ON analysis_runs TYPE datetime VALUE <datetime> $value;
DEFINE FIELD created_at ON analysis_runs TYPE datetime VALUE <datetime> $value;
DEFINE FIELD updated_at ON analysis_runs TYPE datetime VALUE <datetime> $value;
DEFINE FIELD status ON analysis_runs TYPE string;
DEFINE FIELD workers_used ON analysis_runs TYPE array<string>;
DEFINE FIELD depth ON analysis_runs TYPE int;
DEFINE FIELD engine_provider ON analysis_runs TYPE string;
DEFINE FIELD engine_model ON analysis_runs TYPE string;
DEFINE FIELD duration_seconds ON analysis_runs TYPE float;
DEFINE FIELD resource_usage ON analysis_runs FLEXIBLE TYPE option<object>;
DEFINE FIELD raw_payload ON analysis_runs TYPE any;
DEFINE FIELD formatted_payload ON analysis_runs TYPE any;
DEFINE FIELD metadata ON analysis_runs FLEXIBLE TYPE object;

-- Identity lookup
DEFINE INDEX runs_run_id ON analysis_runs FIELDS run_id UNIQUE;

-- Chronological queries
DEFINE INDEX runs_created_at ON analysis_runs FIELDS created_at;

-- Symbol and date
DEFINE INDEX runs_symbol_date ON analysis_runs FIELDS subject_symbol, created_at;

-- Status filtering with date
DEFINE INDEX runs_status_date ON analysis_runs FIELDS status, created_at;

-- Compound filtering for category views
DEFINE INDEX runs_category_status_date ON analysis_runs FIELDS category, status, created_at;

-- Provider breakdowns
DEFINE INDEX runs_provider_date ON analysis_runs FIELDS engine_provider, created_at;

-- Full-text search over the subject
DEFINE ANALYZER subject_search TOKENIZERS blank, class FILTERS lowercase, ascii;
DEFINE INDEX runs_subject_search ON analysis_runs
    FIELDS subject_symbol, subject_name SEARCH ANALYZER subject_search BM25;
"#;

/// Initialize the database schema
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    tracing::info!("Initializing history store schema");

    db.query(SCHEMA)
        .await
        .map_err(|e| LedgerError::database(format!("Failed to initialize schema: {}", e)))?;

    tracing::info!("History store schema initialized successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_covers_required_indexes() {
        assert!(SCHEMA.contains("DEFINE INDEX runs_run_id"));
        assert!(SCHEMA.contains("UNIQUE"));
        assert!(SCHEMA.contains("runs_symbol_date"));
        assert!(SCHEMA.contains("runs_status_date"));
        assert!(SCHEMA.contains("runs_category_status_date"));
        assert!(SCHEMA.contains("SEARCH ANALYZER subject_search"));
    }

    #[tokio::test]
    async fn test_schema_applies_cleanly() {
        let db = surrealdb::engine::any::connect("mem://").await.unwrap();
        db.use_ns("runledger").use_db("history").await.unwrap();
        init_schema(&db).await.unwrap();
    }
}
