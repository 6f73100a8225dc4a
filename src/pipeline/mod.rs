//! Pipeline orchestrator: ties scraper → normalizer → sink together.
//!
//! ## Run shape
//!
//! 1. Drive the screener through both tabs and collect the raw rows.
//!    Scrape failures degrade to fewer (or zero) rows, never an error.
//! 2. Normalize each row; rows with an unparseable formation date are dropped.
//! 3. Hand the records to the chosen sink (CSV file or the DuckDB table).
//!
//! An empty scrape leaves the destination untouched.

use crate::config::AppConfig;
use crate::scraper::cleaner::normalize_rows;
use crate::scraper::{IntradayScreener, PatternSource};
use crate::sink::{CsvSink, RecordSink, RepositorySink};
use crate::storage::Database;
use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Overwrite the configured CSV file
    Csv,
    /// Insert into the sg_eod_chart_patterns table
    Db,
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, kind: SinkKind) -> Result<PipelineStats> {
        let source = IntradayScreener::new(&self.config.screener)
            .context("Failed to build screener scraper")?;

        match kind {
            SinkKind::Csv => {
                let sink = CsvSink::new(&self.config.sink.csv_path);
                run_once(&source, &sink).await
            }
            SinkKind::Db => {
                let db = Database::open(&self.config.storage.db_path)
                    .context("Failed to open DuckDB")?;
                let repo = db.session()?;
                if self.config.storage.run_migrations {
                    repo.run_migrations()?;
                }
                let sink = RepositorySink::new(repo);
                info!("Run id: {}", sink.run_id());

                let stats = run_once(&source, &sink).await;
                drop(sink);
                db.close()?;
                stats
            }
        }
    }
}

/// One scrape → normalize → write pass.
pub async fn run_once<S, K>(source: &S, sink: &K) -> Result<PipelineStats>
where
    S: PatternSource + ?Sized,
    K: RecordSink + ?Sized,
{
    info!("=== Step 1: Scraping chart patterns ===");
    let rows = source.fetch_rows().await;
    if rows.is_empty() {
        info!("No rows scraped; nothing to write.");
        return Ok(PipelineStats::default());
    }

    info!("=== Step 2: Normalizing {} rows ===", rows.len());
    let (records, skipped) = normalize_rows(&rows);

    info!("=== Step 3: Writing {} records ===", records.len());
    let report = sink.write(&records)?;

    let stats = PipelineStats {
        rows_scraped: rows.len(),
        rows_skipped: skipped,
        records_written: report.written,
        records_failed: report.failed,
    };
    info!(
        "=== Done: {} rows | {} skipped | {} written | {} failed ===",
        stats.rows_scraped, stats.rows_skipped, stats.records_written, stats.records_failed,
    );
    Ok(stats)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub rows_scraped: usize,
    pub rows_skipped: usize,
    pub records_written: usize,
    pub records_failed: usize,
}
