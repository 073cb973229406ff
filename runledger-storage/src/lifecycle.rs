//! Lifecycle management: batched cleanup, storage monitoring, and
//! export/import of the history collection.
//!
//! These are long-running operations invoked from a scheduler or CLI.
//! They talk to the pool directly, bypassing the cache layer (bulk work
//! churns far too much data to benefit from per-record caching), and
//! every public operation returns a structured report instead of raising,
//! so callers can branch on `success` without exception handling. A
//! failure mid-run leaves a consistent partial result: completed batches
//! stay applied and the remainder can be retried.

use crate::monitor::{OperationMetric, PerformanceMonitor};
use crate::pool::ConnectionPool;
use crate::query::{self, RecordFilter, apply_binds};
use crate::schema::TABLE;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use runledger_core::config::{AlertThresholds, HistoryConfig};
use runledger_core::error::{LedgerError, Result};
use runledger_core::record::AnalysisRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::{error, info, warn};

const DRY_RUN_SAMPLE: usize = 10;
const PROGRESS_EVERY_BATCHES: u64 = 10;
const PROGRESS_EVERY_RECORDS: u64 = 10_000;
const SIZE_SAMPLE: usize = 100;
const EXPORT_VERSION: &str = "1.0";
/// Soft warnings fire at this fraction of each alert threshold.
const WARNING_FRACTION: f64 = 0.8;

/// Summary of one record, used in dry-run previews.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordSummary {
    pub id: String,
    pub subject_symbol: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a cleanup operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CleanupReport {
    pub success: bool,
    pub error: Option<String>,
    pub total_found: u64,
    pub deleted_count: u64,
    pub batches: u64,
    pub duration_secs: f64,
    pub dry_run: bool,
    pub sample: Vec<RecordSummary>,
}

impl CleanupReport {
    fn failure(error: String, dry_run: bool) -> Self {
        Self {
            success: false,
            error: Some(error),
            dry_run,
            ..Default::default()
        }
    }
}

/// Collection size estimates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageInfo {
    pub total_documents: u64,
    pub estimated_size_bytes: u64,
    pub estimated_size_mb: f64,
    pub average_document_size_bytes: u64,
}

/// Duration and cost aggregates across the collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PerformanceAggregate {
    pub avg_duration_seconds: f64,
    pub max_duration_seconds: f64,
    pub min_duration_seconds: f64,
    pub avg_cost: f64,
    pub total_cost: f64,
}

/// Point-in-time storage usage report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageReport {
    pub success: bool,
    pub error: Option<String>,
    pub storage: StorageInfo,
    pub status_distribution: BTreeMap<String, u64>,
    pub category_distribution: BTreeMap<String, u64>,
    pub provider_distribution: BTreeMap<String, u64>,
    /// Daily record counts for the last 30 days, keyed `YYYY-MM-DD`
    pub daily_counts: BTreeMap<String, u64>,
    pub performance: PerformanceAggregate,
    pub duration_secs: f64,
}

/// Kinds of storage alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    StorageSize,
    DocumentCount,
    DailyGrowth,
}

/// One threshold violation (or near-violation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageAlert {
    pub kind: AlertKind,
    pub message: String,
    pub current_value: f64,
    pub threshold: f64,
}

/// Outcome of an alert check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AlertReport {
    pub success: bool,
    pub error: Option<String>,
    pub alerts: Vec<StorageAlert>,
    pub warnings: Vec<StorageAlert>,
}

/// Outcome of an export operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExportReport {
    pub success: bool,
    pub error: Option<String>,
    pub exported_count: u64,
    pub total_found: u64,
    pub output_path: String,
    pub file_size_bytes: u64,
    pub compressed: bool,
    pub duration_secs: f64,
}

/// Outcome of an import operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImportReport {
    pub success: bool,
    pub error: Option<String>,
    pub imported_count: u64,
    pub skipped_count: u64,
    pub error_count: u64,
    pub total_processed: u64,
    pub input_path: String,
    pub duration_secs: f64,
}

/// First line of every export file.
#[derive(Debug, Serialize, Deserialize)]
struct ExportMetadata {
    export_timestamp: DateTime<Utc>,
    total_records: u64,
    filters_applied: RecordFilter,
    version: String,
}

#[derive(Deserialize)]
struct IdRow {
    run_id: String,
}

/// Manager for long-running maintenance operations.
pub struct LifecycleManager {
    pool: Arc<ConnectionPool>,
    monitor: Arc<PerformanceMonitor>,
    config: HistoryConfig,
}

impl LifecycleManager {
    pub fn new(
        pool: Arc<ConnectionPool>,
        monitor: Arc<PerformanceMonitor>,
        config: HistoryConfig,
    ) -> Self {
        Self {
            pool,
            monitor,
            config,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Delete records older than `max_age_days`, in batches.
    ///
    /// Dry run reports what would be deleted, with a small sample, and
    /// performs no writes.
    pub async fn cleanup_old(
        &self,
        max_age_days: i64,
        batch_size: usize,
        dry_run: bool,
    ) -> CleanupReport {
        let start = Instant::now();
        let mut report = match self.try_cleanup_old(max_age_days, batch_size, dry_run).await {
            Ok(report) => report,
            Err(e) => {
                error!("Cleanup failed: {}", e);
                CleanupReport::failure(e.to_string(), dry_run)
            }
        };
        report.duration_secs = start.elapsed().as_secs_f64();
        self.observe("cleanup_old", start, report.success, report.deleted_count);
        report
    }

    /// Cleanup using the configured retention window and batch size.
    pub async fn run_retention_cleanup(&self, dry_run: bool) -> CleanupReport {
        self.cleanup_old(
            self.config.retention.retention_days,
            self.config.retention.cleanup_batch_size,
            dry_run,
        )
        .await
    }

    async fn try_cleanup_old(
        &self,
        max_age_days: i64,
        batch_size: usize,
        dry_run: bool,
    ) -> Result<CleanupReport> {
        let batch_size = batch_size.max(1);
        let cutoff = Utc::now() - ChronoDuration::days(max_age_days);
        let condition = "created_at < $cutoff";
        let db = self.pool.get().await?;

        let total_found = self.count_where(&db, condition, &cutoff).await?;
        if total_found == 0 {
            info!("No records older than {} days found", max_age_days);
            return Ok(CleanupReport {
                success: true,
                dry_run,
                ..Default::default()
            });
        }
        info!(
            "Found {} records older than {} days",
            total_found, max_age_days
        );

        if dry_run {
            let sample = self.sample_where(&db, condition, &cutoff).await?;
            return Ok(CleanupReport {
                success: true,
                total_found,
                dry_run: true,
                sample,
                ..Default::default()
            });
        }

        let (deleted_count, batches) = self
            .delete_in_batches(&db, condition, &cutoff, batch_size, total_found)
            .await?;

        info!("Cleanup completed: deleted {} records", deleted_count);
        Ok(CleanupReport {
            success: true,
            total_found,
            deleted_count,
            batches,
            dry_run: false,
            ..Default::default()
        })
    }

    /// Delete unfinished or failed records older than `max_age_hours`.
    ///
    /// Covers every status except `completed`: stale pending/in-progress
    /// work as well as failed and cancelled runs.
    pub async fn cleanup_failed(&self, max_age_hours: i64, dry_run: bool) -> CleanupReport {
        let start = Instant::now();
        let mut report = match self.try_cleanup_failed(max_age_hours, dry_run).await {
            Ok(report) => report,
            Err(e) => {
                error!("Failed-record cleanup failed: {}", e);
                CleanupReport::failure(e.to_string(), dry_run)
            }
        };
        report.duration_secs = start.elapsed().as_secs_f64();
        self.observe("cleanup_failed", start, report.success, report.deleted_count);
        report
    }

    async fn try_cleanup_failed(&self, max_age_hours: i64, dry_run: bool) -> Result<CleanupReport> {
        let cutoff = Utc::now() - ChronoDuration::hours(max_age_hours);
        let condition = "status != 'completed' AND created_at < $cutoff";
        let db = self.pool.get().await?;

        let total_found = self.count_where(&db, condition, &cutoff).await?;
        if total_found == 0 {
            info!(
                "No unfinished records older than {} hours found",
                max_age_hours
            );
            return Ok(CleanupReport {
                success: true,
                dry_run,
                ..Default::default()
            });
        }

        if dry_run {
            let sample = self.sample_where(&db, condition, &cutoff).await?;
            return Ok(CleanupReport {
                success: true,
                total_found,
                dry_run: true,
                sample,
                ..Default::default()
            });
        }

        db.query(format!("DELETE FROM {} WHERE {} RETURN NONE", TABLE, condition))
            .bind(("cutoff", surrealdb::sql::Datetime::from(cutoff)))
            .await
            .map_err(|e| LedgerError::database(format!("Cleanup delete failed: {}", e)))?
            .check()
            .map_err(|e| LedgerError::database(format!("Cleanup delete failed: {}", e)))?;

        let remaining = self.count_where(&db, condition, &cutoff).await?;
        let deleted_count = total_found.saturating_sub(remaining);
        info!(
            "Cleaned up {} unfinished records older than {} hours",
            deleted_count, max_age_hours
        );

        Ok(CleanupReport {
            success: true,
            total_found,
            deleted_count,
            batches: 1,
            dry_run: false,
            ..Default::default()
        })
    }

    /// Point-in-time storage usage statistics.
    pub async fn storage_statistics(&self) -> StorageReport {
        let start = Instant::now();
        let mut report = match self.try_storage_statistics().await {
            Ok(report) => report,
            Err(e) => {
                error!("Storage statistics failed: {}", e);
                StorageReport {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };
        report.duration_secs = start.elapsed().as_secs_f64();
        self.observe(
            "storage_statistics",
            start,
            report.success,
            report.storage.total_documents,
        );
        report
    }

    async fn try_storage_statistics(&self) -> Result<StorageReport> {
        let db = self.pool.get().await?;
        let db_err =
            |e: surrealdb::Error| LedgerError::database(format!("Statistics query failed: {}", e));
        let parse_err =
            |e: surrealdb::Error| LedgerError::storage(format!("Failed to parse statistics: {}", e));

        let mut response = db
            .query(format!("SELECT count() FROM {} GROUP ALL", TABLE))
            .await
            .map_err(db_err)?;
        let total: Option<u64> = response.take("count").map_err(parse_err)?;
        let total_documents = total.unwrap_or(0);

        // Size is estimated from a sample of recent documents; the
        // embedded engine has no collection-stats command.
        let mut response = db
            .query(format!(
                "SELECT * FROM {} ORDER BY created_at DESC LIMIT $limit",
                TABLE
            ))
            .bind(("limit", SIZE_SAMPLE as i64))
            .await
            .map_err(db_err)?;
        let sample: Vec<AnalysisRecord> = response.take(0).map_err(parse_err)?;
        let average_document_size_bytes = if sample.is_empty() {
            0
        } else {
            let total_bytes: usize = sample
                .iter()
                .map(|r| serde_json::to_string(r).map(|s| s.len()).unwrap_or(0))
                .sum();
            (total_bytes / sample.len()) as u64
        };
        let estimated_size_bytes = average_document_size_bytes * total_documents;

        let status_distribution = self.group_counts(&db, "status").await?;
        let category_distribution = self.group_counts(&db, "category").await?;
        let provider_distribution = self.group_counts(&db, "engine_provider").await?;

        let month_ago = Utc::now() - ChronoDuration::days(30);
        #[derive(Deserialize)]
        struct DayRow {
            day: String,
            count: u64,
        }
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

        #[derive(Deserialize, Default)]
        struct PerfRow {
            avg_duration: Option<f64>,
            max_duration: Option<f64>,
            min_duration: Option<f64>,
            avg_cost: Option<f64>,
            total_cost: Option<f64>,
        }
        let mut response = db
            .query(format!(
                "SELECT math::mean(duration_seconds) AS avg_duration, \
                 math::max(duration_seconds) AS max_duration, \
                 math::min(duration_seconds) AS min_duration, \
                 math::mean(resource_usage.total_cost ?? 0) AS avg_cost, \
                 math::sum(resource_usage.total_cost ?? 0) AS total_cost \
                 FROM {} GROUP ALL",
                TABLE
            ))
            .await
            .map_err(db_err)?;
        let perf: Option<PerfRow> = response.take(0).map_err(parse_err)?;
        let perf = perf.unwrap_or_default();

        Ok(StorageReport {
            success: true,
            error: None,
            storage: StorageInfo {
                total_documents,
                estimated_size_bytes,
                estimated_size_mb: estimated_size_bytes as f64 / 1024.0 / 1024.0,
                average_document_size_bytes,
            },
            status_distribution,
            category_distribution,
            provider_distribution,
            daily_counts,
            performance: PerformanceAggregate {
                avg_duration_seconds: perf.avg_duration.unwrap_or(0.0),
                max_duration_seconds: perf.max_duration.unwrap_or(0.0),
                min_duration_seconds: perf.min_duration.unwrap_or(0.0),
                avg_cost: perf.avg_cost.unwrap_or(0.0),
                total_cost: perf.total_cost.unwrap_or(0.0),
            },
            duration_secs: 0.0,
        })
    }

    /// Compare current usage against thresholds.
    ///
    /// Hard alerts fire at the threshold, soft warnings at 80% of it.
    pub async fn check_alerts(&self, thresholds: &AlertThresholds) -> AlertReport {
        let stats = self.storage_statistics().await;
        if !stats.success {
            return AlertReport {
                success: false,
                error: stats.error,
                ..Default::default()
            };
        }

        let mut alerts = Vec::new();
        let mut warnings = Vec::new();

        classify(
            &mut alerts,
            &mut warnings,
            AlertKind::StorageSize,
            "Storage size",
            "MB",
            stats.storage.estimated_size_mb,
            thresholds.max_size_mb,
        );
        classify(
            &mut alerts,
            &mut warnings,
            AlertKind::DocumentCount,
            "Document count",
            "documents",
            stats.storage.total_documents as f64,
            thresholds.max_documents as f64,
        );

        // Average growth over the most recent days with data
        let recent: Vec<u64> = stats.daily_counts.values().rev().take(3).copied().collect();
        if !recent.is_empty() {
            let avg_daily_growth = recent.iter().sum::<u64>() as f64 / recent.len() as f64;
            classify(
                &mut alerts,
                &mut warnings,
                AlertKind::DailyGrowth,
                "Daily growth",
                "docs/day",
                avg_daily_growth,
                thresholds.max_daily_growth as f64,
            );
        }

        AlertReport {
            success: true,
            error: None,
            alerts,
            warnings,
        }
    }

    /// Alert check using the configured thresholds.
    pub async fn check_configured_alerts(&self) -> AlertReport {
        let thresholds = self.config.alerts.clone();
        self.check_alerts(&thresholds).await
    }

    /// Export matching records as newline-delimited JSON.
    ///
    /// The first line is a metadata header; dates serialize as ISO-8601.
    /// Records are read in bounded batches so memory stays flat, and the
    /// file is gzip-compressed when `compress` is set.
    pub async fn export(
        &self,
        output_path: impl AsRef<Path>,
        filter: &RecordFilter,
        compress: bool,
        batch_size: usize,
    ) -> ExportReport {
        let start = Instant::now();
        let mut report = match self
            .try_export(output_path.as_ref(), filter, compress, batch_size)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!("Export failed: {}", e);
                ExportReport {
                    success: false,
                    error: Some(e.to_string()),
                    output_path: output_path.as_ref().display().to_string(),
                    compressed: compress,
                    ..Default::default()
                }
            }
        };
        report.duration_secs = start.elapsed().as_secs_f64();
        self.observe("export", start, report.success, report.exported_count);
        report
    }

    async fn try_export(
        &self,
        output_path: &Path,
        filter: &RecordFilter,
        compress: bool,
        batch_size: usize,
    ) -> Result<ExportReport> {
        let batch_size = batch_size.max(1);
        let db = self.pool.get().await?;
        let parts = query::build_where(filter);

        let count_query = format!(
            "SELECT count() FROM {}{} GROUP ALL",
            TABLE,
            parts.where_fragment()
        );
        let mut response = apply_binds(db.query(&count_query), parts.binds.clone())
            .await
            .map_err(|e| LedgerError::database(format!("Export count failed: {}", e)))?;
        let total: Option<u64> = response
            .take("count")
            .map_err(|e| LedgerError::storage(format!("Failed to read count: {}", e)))?;
        let total_found = total.unwrap_or(0);

        if total_found == 0 {
            info!("No records found matching export criteria");
            return Ok(ExportReport {
                success: true,
                output_path: output_path.display().to_string(),
                compressed: compress,
                ..Default::default()
            });
        }

        let path = resolve_export_path(output_path, compress);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Exporting {} records to {}", total_found, path.display());

        let file = File::create(&path)?;
        let mut writer: Box<dyn Write> = if compress {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(BufWriter::new(file))
        };

        let metadata = ExportMetadata {
            export_timestamp: Utc::now(),
            total_records: total_found,
            filters_applied: filter.clone(),
            version: EXPORT_VERSION.to_string(),
        };
        writeln!(writer, "{}", serde_json::to_string(&metadata)?)?;

        let page_query = format!(
            "SELECT * FROM {}{} ORDER BY created_at ASC LIMIT $limit START $start",
            TABLE,
            parts.where_fragment()
        );

        let mut exported_count = 0u64;
        let mut offset = 0usize;
        loop {
            let mut response = apply_binds(db.query(&page_query), parts.binds.clone())
                .bind(("limit", batch_size as i64))
                .bind(("start", offset as i64))
                .await
                .map_err(|e| LedgerError::database(format!("Export query failed: {}", e)))?;
            let batch: Vec<AnalysisRecord> = response
                .take(0)
                .map_err(|e| LedgerError::storage(format!("Failed to parse records: {}", e)))?;

            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            for record in batch {
                writeln!(writer, "{}", serde_json::to_string(&record)?)?;
                exported_count += 1;
                if exported_count % PROGRESS_EVERY_RECORDS == 0 {
                    info!("Export progress: {}/{} records", exported_count, total_found);
                }
            }

            if batch_len < batch_size {
                break;
            }
            offset += batch_size;
        }

        writer.flush()?;
        drop(writer);
        let file_size_bytes = std::fs::metadata(&path)?.len();

        info!(
            "Export completed: {} records to {} ({} bytes)",
            exported_count,
            path.display(),
            file_size_bytes
        );

        Ok(ExportReport {
            success: true,
            error: None,
            exported_count,
            total_found,
            output_path: path.display().to_string(),
            file_size_bytes,
            compressed: compress,
            duration_secs: 0.0,
        })
    }

    /// Import newline-delimited records, committing in batches.
    ///
    /// A parse or validation failure on one record is counted and
    /// skipped; it never aborts the import.
    pub async fn import(
        &self,
        input_path: impl AsRef<Path>,
        batch_size: usize,
        skip_existing: bool,
        validate: bool,
    ) -> ImportReport {
        let start = Instant::now();
        let mut report = match self
            .try_import(input_path.as_ref(), batch_size, skip_existing, validate)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!("Import failed: {}", e);
                ImportReport {
                    success: false,
                    error: Some(e.to_string()),
                    input_path: input_path.as_ref().display().to_string(),
                    ..Default::default()
                }
            }
        };
        report.duration_secs = start.elapsed().as_secs_f64();
        self.observe("import", start, report.success, report.imported_count);
        report
    }

    async fn try_import(
        &self,
        input_path: &Path,
        batch_size: usize,
        skip_existing: bool,
        validate: bool,
    ) -> Result<ImportReport> {
        if !input_path.exists() {
            return Err(LedgerError::invalid_input(format!(
                "Input file not found: {}",
                input_path.display()
            )));
        }
        let batch_size = batch_size.max(1);
        let db = self.pool.get().await?;

        let file = File::open(input_path)?;
        let reader: Box<dyn BufRead> = if input_path.extension().is_some_and(|e| e == "gz") {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut imported_count = 0u64;
        let mut skipped_count = 0u64;
        let mut error_count = 0u64;
        let mut batch: Vec<AnalysisRecord> = Vec::with_capacity(batch_size);
        let mut first_line = true;

        info!("Starting import from {}", input_path.display());

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // The first line is usually the export metadata header
            if first_line {
                first_line = false;
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
                    if value.get("export_timestamp").is_some() {
                        info!(
                            "Importing data exported at {}",
                            value["export_timestamp"].as_str().unwrap_or("unknown")
                        );
                        continue;
                    }
                }
            }

            let record: AnalysisRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Invalid record at line {}: {}", line_num + 1, e);
                    error_count += 1;
                    continue;
                }
            };

            if validate {
                if let Err(e) = record.validate() {
                    warn!("Record validation failed at line {}: {}", line_num + 1, e);
                    error_count += 1;
                    continue;
                }
            }

            if skip_existing && self.record_exists(&db, &record.id.to_string()).await? {
                skipped_count += 1;
                continue;
            }

            batch.push(record);
            if batch.len() >= batch_size {
                let (imported, errors) = self.import_batch(&db, std::mem::take(&mut batch)).await;
                imported_count += imported;
                error_count += errors;
                if imported_count % PROGRESS_EVERY_RECORDS < batch_size as u64 {
                    info!("Import progress: {} records imported", imported_count);
                }
            }
        }

        if !batch.is_empty() {
            let (imported, errors) = self.import_batch(&db, batch).await;
            imported_count += imported;
            error_count += errors;
        }

        info!(
            "Import completed: {} imported, {} skipped, {} errors",
            imported_count, skipped_count, error_count
        );

        Ok(ImportReport {
            success: true,
            error: None,
            imported_count,
            skipped_count,
            error_count,
            total_processed: imported_count + skipped_count + error_count,
            input_path: input_path.display().to_string(),
            duration_secs: 0.0,
        })
    }

    async fn import_batch(&self, db: &Surreal<Any>, records: Vec<AnalysisRecord>) -> (u64, u64) {
        let mut imported = 0u64;
        let mut errors = 0u64;
        for record in records {
            let id = record.id.to_string();
            let outcome: std::result::Result<Option<AnalysisRecord>, surrealdb::Error> =
                db.upsert((TABLE, id.as_str())).content(record).await;
            match outcome {
                Ok(_) => imported += 1,
                Err(e) => {
                    warn!("Error importing record {}: {}", id, e);
                    errors += 1;
                }
            }
        }
        (imported, errors)
    }

    async fn record_exists(&self, db: &Surreal<Any>, id: &str) -> Result<bool> {
        let mut response = db
            .query(format!(
                "SELECT run_id FROM {} WHERE run_id = $id LIMIT 1",
                TABLE
            ))
            .bind(("id", id.to_string()))
            .await
            .map_err(|e| LedgerError::database(format!("Existence check failed: {}", e)))?;
        let rows: Vec<IdRow> = response
            .take(0)
            .map_err(|e| LedgerError::storage(format!("Failed to parse existence check: {}", e)))?;
        Ok(!rows.is_empty())
    }

    async fn count_where(
        &self,
        db: &Surreal<Any>,
        condition: &str,
        cutoff: &DateTime<Utc>,
    ) -> Result<u64> {
        let mut response = db
            .query(format!(
                "SELECT count() FROM {} WHERE {} GROUP ALL",
                TABLE, condition
            ))
            .bind(("cutoff", surrealdb::sql::Datetime::from(*cutoff)))
            .await
            .map_err(|e| LedgerError::database(format!("Count query failed: {}", e)))?;
        let count: Option<u64> = response
            .take("count")
            .map_err(|e| LedgerError::storage(format!("Failed to read count: {}", e)))?;
        Ok(count.unwrap_or(0))
    }

    async fn sample_where(
        &self,
        db: &Surreal<Any>,
        condition: &str,
        cutoff: &DateTime<Utc>,
    ) -> Result<Vec<RecordSummary>> {
        #[derive(Deserialize)]
        struct SummaryRow {
            run_id: String,
            subject_symbol: String,
            status: String,
            created_at: DateTime<Utc>,
        }

        let mut response = db
            .query(format!(
                "SELECT run_id, subject_symbol, status, created_at \
                 FROM {} WHERE {} LIMIT $limit",
                TABLE, condition
            ))
            .bind(("cutoff", surrealdb::sql::Datetime::from(*cutoff)))
            .bind(("limit", DRY_RUN_SAMPLE as i64))
            .await
            .map_err(|e| LedgerError::database(format!("Sample query failed: {}", e)))?;
        let rows: Vec<SummaryRow> = response
            .take(0)
            .map_err(|e| LedgerError::storage(format!("Failed to parse sample: {}", e)))?;
        Ok(rows
            .into_iter()
            .map(|row| RecordSummary {
                id: row.run_id,
                subject_symbol: row.subject_symbol,
                status: row.status,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn delete_in_batches(
        &self,
        db: &Surreal<Any>,
        condition: &str,
        cutoff: &DateTime<Utc>,
        batch_size: usize,
        total_found: u64,
    ) -> Result<(u64, u64)> {
        let mut deleted_count = 0u64;
        let mut batches = 0u64;

        loop {
            let mut response = db
                .query(format!(
                    "SELECT run_id FROM {} WHERE {} LIMIT $limit",
                    TABLE, condition
                ))
                .bind(("cutoff", surrealdb::sql::Datetime::from(*cutoff)))
                .bind(("limit", batch_size as i64))
                .await
                .map_err(|e| LedgerError::database(format!("Batch select failed: {}", e)))?;
            let rows: Vec<IdRow> = response
                .take(0)
                .map_err(|e| LedgerError::storage(format!("Failed to parse batch: {}", e)))?;

            if rows.is_empty() {
                break;
            }
            let ids: Vec<String> = rows.into_iter().map(|row| row.run_id).collect();
            let fetched = ids.len();

            let mut response = db
                .query(format!(
                    "DELETE FROM {} WHERE run_id IN $ids RETURN BEFORE",
                    TABLE
                ))
                .bind(("ids", ids))
                .await
                .map_err(|e| LedgerError::database(format!("Batch delete failed: {}", e)))?;
            let removed: Vec<AnalysisRecord> = response
                .take(0)
                .map_err(|e| LedgerError::storage(format!("Failed to parse batch delete: {}", e)))?;

            deleted_count += removed.len() as u64;
            batches += 1;
            if batches % PROGRESS_EVERY_BATCHES == 0 {
                info!(
                    "Cleanup progress: {}/{} records deleted",
                    deleted_count, total_found
                );
            }

            if fetched < batch_size {
                break;
            }
        }

        Ok((deleted_count, batches))
    }

    fn observe(&self, operation: &str, start: Instant, success: bool, record_count: u64) {
        self.monitor.record(
            OperationMetric::new(operation, start.elapsed(), success)
                .with_record_count(record_count as usize),
        );
    }
}

fn classify(
    alerts: &mut Vec<StorageAlert>,
    warnings: &mut Vec<StorageAlert>,
    kind: AlertKind,
    label: &str,
    unit: &str,
    current: f64,
    threshold: f64,
) {
    if current > threshold {
        alerts.push(StorageAlert {
            kind,
            message: format!(
                "{} ({:.2} {}) exceeds limit ({:.2} {})",
                label, current, unit, threshold, unit
            ),
            current_value: current,
            threshold,
        });
    } else if current > threshold * WARNING_FRACTION {
        warnings.push(StorageAlert {
            kind,
            message: format!(
                "{} ({:.2} {}) approaching limit ({:.2} {})",
                label, current, unit, threshold, unit
            ),
            current_value: current,
            threshold,
        });
    }
}

fn resolve_export_path(path: &Path, compress: bool) -> PathBuf {
    if compress && path.extension().is_none_or(|e| e != "gz") {
        let mut os = path.as_os_str().to_os_string();
        os.push(".gz");
        PathBuf::from(os)
    } else {
        path.to_path_buf()
    }
}
