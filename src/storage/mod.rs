use crate::models::{ChartPatternRecord, PatternRow, SCREENER_CHART_PATTERNS, SCREENER_TYPE_EOD};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_sg_eod_chart_patterns START 1;
CREATE SEQUENCE IF NOT EXISTS seq_tv_signal_log START 1;

CREATE TABLE IF NOT EXISTS sg_eod_chart_patterns (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('seq_sg_eod_chart_patterns'),
    run_id              VARCHAR   NOT NULL,
    screener_date       DATE      NOT NULL,
    screener_time       TIME      NOT NULL,
    screener_type       VARCHAR   NOT NULL DEFAULT 'EOD',
    screener            VARCHAR   NOT NULL DEFAULT 'CHART PATTERNS',
    symbol              VARCHAR   NOT NULL CHECK (length(symbol) > 0),
    ltp                 DOUBLE,
    date_of_formation   DATE,
    pattern_type        VARCHAR,
    percentage_change   DOUBLE,
    trade_type          VARCHAR,
    -- CASH or FNO
    stock_type          VARCHAR,
    updated_time        TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS tv_signal_log (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('seq_tv_signal_log'),
    logger_name         VARCHAR   NOT NULL,
    source_repo         VARCHAR,
    exchange            VARCHAR   NOT NULL,
    ticker              VARCHAR   NOT NULL,
    trade_type          VARCHAR   NOT NULL,
    order_type          VARCHAR   NOT NULL,
    quantity            BIGINT    NOT NULL,
    limit_price         DOUBLE    NOT NULL,
    -- IST string, or "UTC: <raw>" when conversion failed
    signal_time         VARCHAR   NOT NULL,
    strategy            VARCHAR   NOT NULL,
    signal_interval     VARCHAR   NOT NULL,
    alert_name          VARCHAR   NOT NULL,
    open_price          DOUBLE    NOT NULL,
    close_price         DOUBLE    NOT NULL,
    high_price          DOUBLE    NOT NULL,
    low_price           DOUBLE    NOT NULL,
    indicators          VARCHAR,
    order_details       VARCHAR   NOT NULL,
    alert_message       VARCHAR   NOT NULL,
    received_at         TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    run_id          VARCHAR PRIMARY KEY,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    rows_seen       BIGINT DEFAULT 0,
    rows_inserted   BIGINT DEFAULT 0,
    rows_failed     BIGINT DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_patterns_screener_date ON sg_eod_chart_patterns (screener, screener_date);
CREATE INDEX IF NOT EXISTS idx_patterns_pattern_type  ON sg_eod_chart_patterns (screener, pattern_type);
CREATE INDEX IF NOT EXISTS idx_signals_ticker         ON tv_signal_log (ticker);
"#;

const PATTERN_COLUMNS: &str = "id, run_id, screener_date, screener_time, screener_type, screener, \
     symbol, ltp, date_of_formation, pattern_type, percentage_change, trade_type, stock_type, updated_time";

// ── Database (session provider) ───────────────────────────────────────────────

/// Process-wide handle to the DuckDB database. Hands out one connection per
/// unit of work; close it explicitly at shutdown.
pub struct Database {
    root: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { root: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { root: Mutex::new(Connection::open_in_memory()?) })
    }

    /// A fresh connection to the same database.
    pub fn session(&self) -> Result<Repository> {
        let root = self.root.lock().map_err(|_| anyhow!("database handle poisoned"))?;
        let conn = root.try_clone().context("Failed to open DuckDB session")?;
        Ok(Repository { conn })
    }

    pub fn close(self) -> Result<()> {
        let conn = self
            .root
            .into_inner()
            .map_err(|_| anyhow!("database handle poisoned"))?;
        conn.close().map_err(|(_, e)| e).context("Failed to close DuckDB")?;
        info!("Database closed.");
        Ok(())
    }
}

// ── Signal log entry ──────────────────────────────────────────────────────────

/// One row of `tv_signal_log`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalLogEntry {
    pub logger_name: String,
    pub source_repo: Option<String>,
    pub exchange: String,
    pub ticker: String,
    pub trade_type: String,
    pub order_type: String,
    pub quantity: i64,
    pub limit_price: f64,
    pub signal_time: String,
    pub strategy: String,
    pub interval: String,
    pub alert_name: String,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub indicators: Option<String>,
    pub order_details: String,
    pub alert_message: String,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Chart patterns ────────────────────────────────────────────────────────

    /// Insert and commit one record in its own transaction. Rolls back on failure.
    /// `at` (IST) supplies `screener_date`, `screener_time` and `updated_time`.
    pub fn insert_pattern(
        &self,
        record: &ChartPatternRecord,
        run_id: &str,
        at: &DateTime<FixedOffset>,
    ) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;

        let inserted: Result<i64, duckdb::Error> = tx.query_row(
            r#"INSERT INTO sg_eod_chart_patterns
                   (run_id, screener_date, screener_time, screener_type, screener,
                    symbol, ltp, date_of_formation, pattern_type, percentage_change,
                    trade_type, stock_type, updated_time)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               RETURNING id"#,
            params![
                run_id,
                at.date_naive(),
                at.time(),
                SCREENER_TYPE_EOD,
                SCREENER_CHART_PATTERNS,
                record.symbol,
                record.ltp,
                record.date_of_formation,
                record.pattern_type,
                record.percentage_change,
                record.trade_type.as_str(),
                record.source_tab.as_str(),
                at.naive_local(),
            ],
            |r| r.get(0),
        );

        match inserted {
            Ok(id) => {
                tx.commit()
                    .with_context(|| format!("commit chart pattern {}", record.symbol))?;
                info!("Successfully inserted EOD chart pattern for {}", record.symbol);
                Ok(id)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    error!("Rollback failed: {}", rb);
                }
                Err(e).with_context(|| format!("insert chart pattern {}", record.symbol))
            }
        }
    }

    pub fn patterns_by_screener(&self, screener: &str) -> Result<Vec<PatternRow>> {
        self.query_patterns("screener = ?", &[screener])
    }

    /// `date` must be `YYYY-MM-DD`; anything else yields no rows.
    pub fn patterns_by_screener_and_date(&self, screener: &str, date: &str) -> Result<Vec<PatternRow>> {
        let day = match NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d") {
            Ok(d) => d,
            Err(e) => {
                warn!("Invalid date format for '{}': {}", date, e);
                return Ok(Vec::new());
            }
        };

        let sql = format!(
            "SELECT {} FROM sg_eod_chart_patterns WHERE screener = ? AND screener_date = ? ORDER BY id",
            PATTERN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![screener, day], pattern_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn patterns_by_screener_and_pattern_type(
        &self,
        screener: &str,
        pattern_type: &str,
    ) -> Result<Vec<PatternRow>> {
        self.query_patterns("screener = ? AND pattern_type = ?", &[screener, pattern_type])
    }

    fn query_patterns(&self, filter: &str, args: &[&str]) -> Result<Vec<PatternRow>> {
        let sql = format!(
            "SELECT {} FROM sg_eod_chart_patterns WHERE {} ORDER BY id",
            PATTERN_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(args.iter()), pattern_row)?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("query chart patterns where {}", filter))?;
        Ok(rows)
    }

    pub fn pattern_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM sg_eod_chart_patterns")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn screener_date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self
            .conn
            .prepare("SELECT MIN(screener_date), MAX(screener_date) FROM sg_eod_chart_patterns")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Signal log ────────────────────────────────────────────────────────────

    pub fn log_signal(&self, entry: &SignalLogEntry) -> Result<i64> {
        let id: i64 = self
            .conn
            .query_row(
                r#"INSERT INTO tv_signal_log
                       (logger_name, source_repo, exchange, ticker, trade_type, order_type,
                        quantity, limit_price, signal_time, strategy, signal_interval, alert_name,
                        open_price, close_price, high_price, low_price, indicators, order_details, alert_message, received_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   RETURNING id"#,
                params![
                    entry.logger_name,
                    entry.source_repo,
                    entry.exchange,
                    entry.ticker,
                    entry.trade_type,
                    entry.order_type,
                    entry.quantity,
                    entry.limit_price,
                    entry.signal_time,
                    entry.strategy,
                    entry.interval,
                    entry.alert_name,
                    entry.open,
                    entry.close,
                    entry.high,
                    entry.low,
                    entry.indicators,
                    entry.order_details,
                    entry.alert_message,
                    Utc::now().naive_utc(),
                ],
                |r| r.get(0),
            )
            .with_context(|| format!("log signal for {}", entry.ticker))?;
        debug!("Logged signal {} as row {}", entry.ticker, id);
        Ok(id)
    }

    /// Stored signal time for a log row.
    #[cfg(test)]
    pub fn signal_time(&self, id: i64) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT signal_time FROM tv_signal_log WHERE id = ?")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn signal_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM tv_signal_log")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, run_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO scrape_runs (run_id, started_at, status) VALUES (?, ?, 'running')",
            params![run_id, Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    pub fn finish_scrape_run(
        &self,
        run_id: &str,
        seen: usize,
        inserted: usize,
        failed: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               rows_seen = ?, rows_inserted = ?, rows_failed = ?, error_msg = ?
               WHERE run_id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                seen as i64,
                inserted as i64,
                failed as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn scrape_run_status(&self, run_id: &str) -> Result<Option<(String, i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, rows_inserted, rows_failed FROM scrape_runs WHERE run_id = ?")?;
        let mut rows = stmt.query(params![run_id])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?, row.get(2)?))),
            None => Ok(None),
        }
    }

    pub fn last_scrape_run(&self) -> Result<Option<(String, NaiveDateTime, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, started_at, status FROM scrape_runs ORDER BY started_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?, row.get(2)?))),
            None => Ok(None),
        }
    }
}

fn pattern_row(r: &Row<'_>) -> duckdb::Result<PatternRow> {
    Ok(PatternRow {
        id: r.get(0)?,
        run_id: r.get(1)?,
        screener_date: r.get(2)?,
        screener_time: r.get(3)?,
        screener_type: r.get(4)?,
        screener: r.get(5)?,
        symbol: r.get(6)?,
        ltp: r.get(7)?,
        date_of_formation: r.get(8)?,
        pattern_type: r.get(9)?,
        percentage_change: r.get(10)?,
        trade_type: r.get(11)?,
        stock_type: r.get(12)?,
        updated_time: r.get(13)?,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Tab, TradeDirection};
    use crate::utils::ist;
    use chrono::{NaiveTime, TimeZone};

    const RUN: &str = "EOD-CP-TEST";

    fn repo() -> (Database, Repository) {
        let db = Database::open_in_memory().unwrap();
        let repo = db.session().unwrap();
        repo.run_migrations().unwrap();
        (db, repo)
    }

    fn at(date: (i32, u32, u32)) -> DateTime<FixedOffset> {
        ist().with_ymd_and_hms(date.0, date.1, date.2, 16, 5, 0).unwrap()
    }

    fn record(symbol: &str, pattern: &str, change: f64) -> ChartPatternRecord {
        ChartPatternRecord {
            symbol: symbol.into(),
            ltp: 100.5,
            percentage_change: change,
            date_of_formation: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            pattern_type: pattern.into(),
            trade_type: if change > 0.0 { TradeDirection::Buy } else { TradeDirection::Sell },
            source_tab: Tab::Cash,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let (_db, repo) = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.pattern_count().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_query_patterns() {
        let (_db, repo) = repo();
        let m = at((2024, 1, 5));
        let id1 = repo.insert_pattern(&record("INFY", "Double Bottom", 1.2), RUN, &m).unwrap();
        let id2 = repo.insert_pattern(&record("TCS", "Flag", -0.4), RUN, &m).unwrap();
        assert!(id2 > id1);

        let all = repo.patterns_by_screener(SCREENER_CHART_PATTERNS).unwrap();
        assert_eq!(all.len(), 2);
        let first = &all[0];
        assert_eq!(first.symbol, "INFY");
        assert_eq!(first.screener_type, "EOD");
        assert_eq!(first.screener, "CHART PATTERNS");
        assert_eq!(first.run_id, "EOD-CP-TEST");
        assert_eq!(first.trade_type.as_deref(), Some("BUY"));
        assert_eq!(first.stock_type.as_deref(), Some("CASH"));
        assert_eq!(first.screener_time, NaiveTime::from_hms_opt(16, 5, 0).unwrap());

        let flags = repo
            .patterns_by_screener_and_pattern_type(SCREENER_CHART_PATTERNS, "Flag")
            .unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].symbol, "TCS");

        assert!(repo.patterns_by_screener("INTRADAY").unwrap().is_empty());
    }

    #[test]
    fn test_query_by_date() {
        let (_db, repo) = repo();
        repo.insert_pattern(&record("INFY", "Flag", 1.0), RUN, &at((2024, 1, 5))).unwrap();
        repo.insert_pattern(&record("TCS", "Flag", 1.0), RUN, &at((2024, 1, 6))).unwrap();

        let rows = repo
            .patterns_by_screener_and_date(SCREENER_CHART_PATTERNS, "2024-01-06")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "TCS");
    }

    #[test]
    fn test_query_by_invalid_date_is_empty() {
        let (_db, repo) = repo();
        repo.insert_pattern(&record("INFY", "Flag", 1.0), RUN, &at((2024, 1, 5))).unwrap();

        for bad in ["not-a-date", "05 Jan 2024", "2024/01/05", ""] {
            let rows = repo.patterns_by_screener_and_date(SCREENER_CHART_PATTERNS, bad).unwrap();
            assert!(rows.is_empty(), "{bad:?} should match nothing");
        }
    }

    #[test]
    fn test_failed_insert_rolls_back() {
        let (_db, repo) = repo();
        let m = at((2024, 1, 5));
        assert!(repo.insert_pattern(&record("", "Flag", 1.0), RUN, &m).is_err());
        assert_eq!(repo.pattern_count().unwrap(), 0);

        repo.insert_pattern(&record("SBIN", "Flag", 1.0), RUN, &m).unwrap();
        assert_eq!(repo.pattern_count().unwrap(), 1);
    }

    #[test]
    fn test_screener_date_range() {
        let (_db, repo) = repo();
        assert_eq!(repo.screener_date_range().unwrap(), (None, None));

        repo.insert_pattern(&record("INFY", "Flag", 1.0), RUN, &at((2024, 1, 8))).unwrap();
        repo.insert_pattern(&record("TCS", "Flag", 1.0), RUN, &at((2024, 1, 5))).unwrap();
        assert_eq!(
            repo.screener_date_range().unwrap(),
            (NaiveDate::from_ymd_opt(2024, 1, 5), NaiveDate::from_ymd_opt(2024, 1, 8))
        );
    }

    #[test]
    fn test_sessions_share_data() {
        let (db, repo) = repo();
        repo.insert_pattern(&record("INFY", "Flag", 1.0), RUN, &at((2024, 1, 5))).unwrap();

        let other = db.session().unwrap();
        assert_eq!(other.pattern_count().unwrap(), 1);
    }

    #[test]
    fn test_scrape_run_log() {
        let (_db, repo) = repo();
        repo.begin_scrape_run("RUN-1").unwrap();
        assert_eq!(
            repo.scrape_run_status("RUN-1").unwrap(),
            Some(("running".to_string(), 0, 0))
        );

        repo.finish_scrape_run("RUN-1", 5, 4, 1, Some("1 failed")).unwrap();
        assert_eq!(
            repo.scrape_run_status("RUN-1").unwrap(),
            Some(("error".to_string(), 4, 1))
        );
        assert_eq!(repo.last_scrape_run().unwrap().map(|r| r.0).as_deref(), Some("RUN-1"));
    }

    #[test]
    fn test_database_close() {
        let (db, repo) = repo();
        drop(repo);
        db.close().unwrap();
    }
}
