use crate::models::{ChartPatternRecord, RawRow, TradeDirection};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

/// First number before the change token: "1,234.56" | "₹610" | "LTP 98.10"
static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\d(]*(\d[\d,]*(?:\.\d+)?)").expect("price regex"));

/// Parenthesised change token: "(+1.23%)" | "( -0.5 % )"
static CHANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*([-+]?\d+(?:\.\d+)?)\s*%\s*\)").expect("change regex")
});

/// Screener date format: "05 Jan 2024"
pub const FORMATION_DATE_FORMAT: &str = "%d %b %Y";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid formation date {input:?}")]
    FormationDate {
        input: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("row has {found} cells, expected at least 4")]
    MissingCell { found: usize },
}

// ── Field parsers ─────────────────────────────────────────────────────────────

/// Split an LTP cell such as "1,234.56 (+1.23%)" into (1234.56, 1.23).
/// A missing token becomes 0.0.
pub fn parse_price_and_change(text: &str) -> (f64, f64) {
    let price = PRICE_RE
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse::<f64>().ok());
    let change = CHANGE_RE
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok());

    if price.is_none() {
        warn!("No price in LTP text {:?}, defaulting to 0", text);
    }
    if change.is_none() {
        warn!("No percentage change in LTP text {:?}, defaulting to 0", text);
    }

    (price.unwrap_or(0.0), change.unwrap_or(0.0))
}

pub fn parse_formation_date(text: &str) -> Result<NaiveDate, ParseError> {
    let input = text.trim();
    NaiveDate::parse_from_str(input, FORMATION_DATE_FORMAT).map_err(|source| {
        ParseError::FormationDate {
            input: input.to_string(),
            source,
        }
    })
}

/// Zero is SELL.
pub fn classify_trade_direction(change_pct: f64) -> TradeDirection {
    if change_pct > 0.0 {
        TradeDirection::Buy
    } else {
        TradeDirection::Sell
    }
}

// ── Row → record ──────────────────────────────────────────────────────────────

pub fn normalize_row(row: &RawRow) -> Result<ChartPatternRecord, ParseError> {
    let [symbol, ltp_text, date_text, pattern_type] = match row.cells.as_slice() {
        [a, b, c, d, ..] => [a, b, c, d],
        cells => return Err(ParseError::MissingCell { found: cells.len() }),
    };

    let (ltp, percentage_change) = parse_price_and_change(ltp_text);
    let date_of_formation = parse_formation_date(date_text)?;

    Ok(ChartPatternRecord {
        symbol: symbol.trim().to_string(),
        ltp,
        percentage_change,
        date_of_formation,
        pattern_type: pattern_type.trim().to_string(),
        trade_type: classify_trade_direction(percentage_change),
        source_tab: row.tab,
    })
}

/// Normalize a batch; rows that fail are logged and dropped.
/// Returns the records and the number of rows skipped.
pub fn normalize_rows(rows: &[RawRow]) -> (Vec<ChartPatternRecord>, usize) {
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;

    for row in rows {
        match normalize_row(row) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(tab = %row.tab, "Skipping row {:?}: {}", row.cells, e);
                skipped += 1;
            }
        }
    }

    (records, skipped)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tab;

    fn row(cells: &[&str], tab: Tab) -> RawRow {
        RawRow::new(cells.iter().map(|s| s.to_string()).collect(), tab)
    }

    #[test]
    fn test_parse_price_and_change() {
        assert_eq!(parse_price_and_change("1,234.56 (+1.23%)"), (1234.56, 1.23));
        assert_eq!(parse_price_and_change("98.10 (-0.45%)"), (98.10, -0.45));
        assert_eq!(parse_price_and_change("12,34,567.00 (2.50%)"), (1234567.0, 2.5));
        assert_eq!(parse_price_and_change("610\n(+0.00%)"), (610.0, 0.0));
    }

    #[test]
    fn test_parse_price_and_change_defaults_to_zero() {
        assert_eq!(parse_price_and_change("1,234.56"), (1234.56, 0.0));
        assert_eq!(parse_price_and_change("N/A"), (0.0, 0.0));
        assert_eq!(parse_price_and_change(""), (0.0, 0.0));
    }

    #[test]
    fn test_parse_price_with_leading_text() {
        assert_eq!(parse_price_and_change("₹1,234.56 (+1.23%)"), (1234.56, 1.23));
        assert_eq!(parse_price_and_change("LTP 1,234.56 (+1.23%)"), (1234.56, 1.23));
        assert_eq!(parse_price_and_change("  Rs. 98.10 (-0.45%)"), (98.10, -0.45));
    }

    #[test]
    fn test_change_token_not_mistaken_for_price() {
        assert_eq!(parse_price_and_change("(+1.23%)"), (0.0, 1.23));
    }

    #[test]
    fn test_classify_trade_direction() {
        assert_eq!(classify_trade_direction(0.01), TradeDirection::Buy);
        assert_eq!(classify_trade_direction(12.0), TradeDirection::Buy);
        assert_eq!(classify_trade_direction(0.0), TradeDirection::Sell);
        assert_eq!(classify_trade_direction(-0.0), TradeDirection::Sell);
        assert_eq!(classify_trade_direction(-3.4), TradeDirection::Sell);
        assert_eq!(classify_trade_direction(f64::NAN), TradeDirection::Sell);
    }

    #[test]
    fn test_parse_formation_date() {
        assert_eq!(
            parse_formation_date("05 Jan 2024").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
        );
        assert_eq!(
            parse_formation_date(" 28 Feb 2025 ").unwrap(),
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
        );
        assert!(matches!(
            parse_formation_date("2024-01-05"),
            Err(ParseError::FormationDate { .. })
        ));
        assert!(parse_formation_date("31 Feb 2024").is_err());
    }

    #[test]
    fn test_normalize_row() {
        let rec = normalize_row(&row(
            &[" RELIANCE ", "2,901.35 (+1.12%)", "05 Jan 2024", "Double Bottom ", "extra"],
            Tab::Fno,
        ))
        .unwrap();

        assert_eq!(rec.symbol, "RELIANCE");
        assert_eq!(rec.ltp, 2901.35);
        assert_eq!(rec.percentage_change, 1.12);
        assert_eq!(rec.date_of_formation, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(rec.pattern_type, "Double Bottom");
        assert_eq!(rec.trade_type, TradeDirection::Buy);
        assert_eq!(rec.source_tab, Tab::Fno);
    }

    #[test]
    fn test_normalize_row_errors() {
        let short = row(&["TCS", "3,500.00 (-0.10%)", "05 Jan 2024"], Tab::Cash);
        assert!(matches!(normalize_row(&short), Err(ParseError::MissingCell { found: 3 })));

        let bad_date = row(&["TCS", "3,500.00 (-0.10%)", "2024-01-05", "Flag"], Tab::Cash);
        assert!(matches!(normalize_row(&bad_date), Err(ParseError::FormationDate { .. })));
    }

    #[test]
    fn test_normalize_rows_skips_failures() {
        let rows = vec![
            row(&["INFY", "1,500.00 (+0.50%)", "02 Jan 2024", "Cup and Handle"], Tab::Cash),
            row(&["WIPRO", "450.00 (-1.00%)", "not a date", "Pennant"], Tab::Cash),
            row(&["SBIN", "620.40 (0.00%)", "03 Jan 2024", "Triangle"], Tab::Fno),
        ];

        let (records, skipped) = normalize_rows(&rows);
        assert_eq!(skipped, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].symbol, "INFY");
        assert_eq!(records[1].trade_type, TradeDirection::Sell);
    }
}
