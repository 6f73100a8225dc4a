mod config;
mod models;
mod pipeline;
mod scraper;
mod signals;
mod sink;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;
use crate::models::SCREENER_CHART_PATTERNS;
use crate::pipeline::{Pipeline, SinkKind};
use crate::sink::{read_records, RecordSink, RepositorySink};
use crate::storage::Database;

#[derive(Parser)]
#[command(
    name = "eod-chart-patterns",
    about = "EOD chart pattern scraper and TradingView signal loader",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape today's EOD chart patterns from both tabs
    Scrape {
        /// Where the normalized records go
        #[arg(short, long, value_enum, default_value = "db")]
        sink: SinkKind,
    },

    /// Run the TradingView signal webhook server
    Serve,

    /// List stored chart patterns
    Patterns {
        #[arg(short, long, default_value = SCREENER_CHART_PATTERNS)]
        screener: String,

        /// Screener date, YYYY-MM-DD
        #[arg(short, long, conflicts_with = "pattern_type")]
        date: Option<String>,

        #[arg(short, long)]
        pattern_type: Option<String>,
    },

    /// Import a CSV written by `scrape --sink csv` into the database
    LoadCsv {
        /// CSV file (default: the configured sink path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "eod_chart_patterns=info,warn",
        1 => "eod_chart_patterns=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scrape { sink } => {
            let _t = utils::Timer::start("EOD chart pattern scrape");
            Pipeline::new(config).run(sink).await?;
        }

        Command::Serve => {
            let db = Database::open(&config.storage.db_path)?;
            if config.storage.run_migrations {
                db.session()?.run_migrations()?;
            }
            let db = Arc::new(db);
            signals::serve(&config.server, Arc::clone(&db)).await?;

            Arc::try_unwrap(db)
                .map_err(|_| anyhow::anyhow!("database still in use at shutdown"))?
                .close()?;
            info!("Signal loader stopped.");
        }

        Command::Patterns {
            screener,
            date,
            pattern_type,
        } => {
            let db = Database::open(&config.storage.db_path)?;
            let repo = db.session()?;
            let rows = match (date, pattern_type) {
                (Some(d), _) => repo.patterns_by_screener_and_date(&screener, &d)?,
                (None, Some(p)) => repo.patterns_by_screener_and_pattern_type(&screener, &p)?,
                (None, None) => repo.patterns_by_screener(&screener)?,
            };

            if rows.is_empty() {
                println!("No patterns, run `eod-chart-patterns scrape` first.");
            } else {
                println!("{} patterns:", rows.len());
                for r in &rows {
                    println!(
                        "  {:<12} {:>10} {:>7} {:<10} {:<4} {:<4} {}",
                        r.symbol,
                        r.ltp.map(|v| format!("{:.2}", v)).unwrap_or_default(),
                        r.percentage_change.map(|v| format!("{:+.2}%", v)).unwrap_or_default(),
                        r.date_of_formation.map(|d| d.to_string()).unwrap_or_default(),
                        r.trade_type.as_deref().unwrap_or(""),
                        r.stock_type.as_deref().unwrap_or(""),
                        r.pattern_type.as_deref().unwrap_or(""),
                    );
                }
            }
            drop(repo);
            db.close()?;
        }

        Command::LoadCsv { file } => {
            let _t = utils::Timer::start("CSV import");
            let path = file.unwrap_or_else(|| config.sink.csv_path.clone());
            let records = read_records(&path)?;
            info!("Read {} records from {:?}", records.len(), path);

            let db = Database::open(&config.storage.db_path)?;
            let repo = db.session()?;
            repo.run_migrations()?;
            let sink = RepositorySink::new(repo);
            let report = sink.write(&records)?;
            if report.failed > 0 {
                warn!("{} records could not be imported", report.failed);
            }
            info!("Done: {} records imported under run {}", report.written, sink.run_id());
            drop(sink);
            db.close()?;
        }

        Command::Stats => {
            let db = Database::open(&config.storage.db_path)?;
            let repo = db.session()?;
            let patterns = repo.pattern_count()?;
            let signals = repo.signal_count()?;
            let (min, max) = repo.screener_date_range().unwrap_or((None, None));
            let last_run = repo.last_scrape_run().context("read last scrape run")?;
            println!("─────────────────────────────────");
            println!("  EOD Chart Patterns: Database Stats");
            println!("─────────────────────────────────");
            println!("  Patterns : {}", utils::fmt_number(patterns));
            println!("  Signals  : {}", utils::fmt_number(signals));
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            match last_run {
                Some((run_id, started, status)) => {
                    println!("  Last run : {} ({}, {})", run_id, started, status)
                }
                None => println!("  Last run : —"),
            }
            println!("─────────────────────────────────");
            drop(repo);
            db.close()?;
        }

        Command::Migrate => {
            let db = Database::open(&config.storage.db_path)?;
            db.session()?.run_migrations()?;
            db.close()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
