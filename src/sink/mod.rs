//! Record sinks: where normalized chart-pattern records end up.
//!
//! - [`CsvSink`] overwrites one delimited file per run (header + rows).
//! - [`RepositorySink`] inserts each record in its own transaction, so a bad
//!   record is rolled back and skipped without stopping the batch.

use crate::models::ChartPatternRecord;
use crate::storage::Repository;
use crate::utils;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkReport {
    pub written: usize,
    pub failed: usize,
}

pub trait RecordSink {
    fn write(&self, records: &[ChartPatternRecord]) -> Result<SinkReport>;
}

// ── CSV ───────────────────────────────────────────────────────────────────────

pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvSink {
    fn write(&self, records: &[ChartPatternRecord]) -> Result<SinkReport> {
        if records.is_empty() {
            info!("No new records to write.");
            return Ok(SinkReport::default());
        }

        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to create {:?}", self.path))?;
        for record in records {
            writer
                .serialize(record)
                .with_context(|| format!("write {} to {:?}", record.symbol, self.path))?;
        }
        writer.flush()?;

        info!("Wrote {} records to {:?}", records.len(), self.path);
        Ok(SinkReport {
            written: records.len(),
            failed: 0,
        })
    }
}

/// Read a file written by [`CsvSink`].
pub fn read_records(path: &Path) -> Result<Vec<ChartPatternRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let mut records = Vec::new();
    for (i, result) in reader.deserialize().enumerate() {
        let record: ChartPatternRecord =
            result.with_context(|| format!("Row {} in {:?}", i + 1, path))?;
        records.push(record);
    }
    Ok(records)
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct RepositorySink {
    repo: Repository,
    run_id: String,
    clock: Box<dyn Fn() -> DateTime<FixedOffset>>,
}

impl RepositorySink {
    /// Stamps every row with a run id and the IST wall clock at insert.
    pub fn new(repo: Repository) -> Self {
        let run_id = utils::screener_run_id(&utils::now_ist());
        Self::with_clock(repo, run_id, utils::now_ist)
    }

    pub fn with_clock(
        repo: Repository,
        run_id: impl Into<String>,
        clock: impl Fn() -> DateTime<FixedOffset> + 'static,
    ) -> Self {
        Self {
            repo,
            run_id: run_id.into(),
            clock: Box::new(clock),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl RecordSink for RepositorySink {
    fn write(&self, records: &[ChartPatternRecord]) -> Result<SinkReport> {
        if records.is_empty() {
            info!("No new records to insert.");
            return Ok(SinkReport::default());
        }

        info!("Starting database insertion for {} records...", records.len());
        let run_id = self.run_id.as_str();
        if let Err(e) = self.repo.begin_scrape_run(run_id) {
            warn!("Could not record scrape run {}: {:#}", run_id, e);
        }

        let mut report = SinkReport::default();
        for record in records {
            let at = (self.clock)();
            match self.repo.insert_pattern(record, run_id, &at) {
                Ok(_) => report.written += 1,
                Err(e) => {
                    error!("Failed to insert EOD chart pattern: {:#}", e);
                    report.failed += 1;
                }
            }
        }

        let error_msg = (report.failed > 0).then(|| format!("{} records failed", report.failed));
        if let Err(e) = self.repo.finish_scrape_run(
            run_id,
            records.len(),
            report.written,
            report.failed,
            error_msg.as_deref(),
        ) {
            warn!("Could not finish scrape run {}: {:#}", run_id, e);
        }

        info!(
            "Inserted {} of {} records ({} failed)",
            report.written,
            records.len(),
            report.failed
        );
        Ok(report)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
