use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Tab ───────────────────────────────────────────────────────────────────────

/// Market segment tab on the screener page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tab {
    #[serde(rename = "CASH")]
    Cash,
    #[serde(rename = "FNO")]
    Fno,
}

impl Tab {
    pub const ALL: [Tab; 2] = [Tab::Cash, Tab::Fno];

    /// Label stored in the database and CSV output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tab::Cash => "CASH",
            Tab::Fno => "FNO",
        }
    }

    /// Button caption on the screener UI.
    pub fn ui_label(&self) -> &'static str {
        match self {
            Tab::Cash => "Cash",
            Tab::Fno => "F&O",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Trade direction ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "BUY",
            TradeDirection::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Raw scraped row ───────────────────────────────────────────────────────────

/// One visible results-table row.
/// Cells: symbol | LTP (change%) | date of formation | pattern type | ...
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub cells: Vec<String>,
    pub tab: Tab,
}

impl RawRow {
    pub fn new(cells: Vec<String>, tab: Tab) -> Self {
        Self { cells, tab }
    }
}

// ── Normalized record ─────────────────────────────────────────────────────────

/// Field order here is the CSV column order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartPatternRecord {
    pub symbol: String,
    pub ltp: f64,
    pub percentage_change: f64,
    pub date_of_formation: NaiveDate,
    pub pattern_type: String,
    pub trade_type: TradeDirection,
    pub source_tab: Tab,
}

// ── Persisted row ─────────────────────────────────────────────────────────────

pub const SCREENER_TYPE_EOD: &str = "EOD";
pub const SCREENER_CHART_PATTERNS: &str = "CHART PATTERNS";

/// A row of `sg_eod_chart_patterns`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatternRow {
    pub id: i64,
    pub run_id: String,
    pub screener_date: NaiveDate,
    pub screener_time: NaiveTime,
    pub screener_type: String,
    pub screener: String,
    pub symbol: String,
    pub ltp: Option<f64>,
    pub date_of_formation: Option<NaiveDate>,
    pub pattern_type: Option<String>,
    pub percentage_change: Option<f64>,
    pub trade_type: Option<String>,
    pub stock_type: Option<String>,
    pub updated_time: NaiveDateTime,
}
