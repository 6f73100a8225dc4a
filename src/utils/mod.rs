use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.elapsed()
        );
    }
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.abs().to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    if n < 0 {
        result.push('-');
    }
    result.chars().rev().collect()
}

// ── IST ──────────────────────────────────────────────────────────────────────

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// TradingView alert timestamp format.
pub const UTC_SIGNAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn now_ist() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&ist())
}

pub fn now_ist_string() -> String {
    format_ist(&now_ist())
}

fn format_ist(t: &DateTime<FixedOffset>) -> String {
    format!("{} IST", t.format("%Y-%m-%d %I:%M:%S %p"))
}

/// "2024-01-05T09:15:00Z" → "2024-01-05 02:45:00 PM IST".
/// Anything else becomes "UTC: <raw>".
pub fn convert_to_ist(utc_time: &str) -> String {
    match NaiveDateTime::parse_from_str(utc_time, UTC_SIGNAL_FORMAT) {
        Ok(naive) => format_ist(&Utc.from_utc_datetime(&naive).with_timezone(&ist())),
        Err(_) => format!("UTC: {}", utc_time),
    }
}

/// Opaque tag grouping the rows of one scrape run.
pub fn screener_run_id(at: &DateTime<FixedOffset>) -> String {
    format!("EOD-CP-{}", at.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(-42_000), "-42,000");
        assert_eq!(fmt_number(999), "999");
    }

    #[test]
    fn test_convert_to_ist() {
        assert_eq!(convert_to_ist("2024-01-05T09:15:00Z"), "2024-01-05 02:45:00 PM IST");
        assert_eq!(convert_to_ist("2024-01-05T20:00:00Z"), "2024-01-06 01:30:00 AM IST");
    }

    #[test]
    fn test_convert_to_ist_falls_back_to_raw() {
        assert_eq!(convert_to_ist("yesterday"), "UTC: yesterday");
        assert_eq!(convert_to_ist("2024-01-05 09:15:00"), "UTC: 2024-01-05 09:15:00");
        assert_eq!(convert_to_ist(""), "UTC: ");
    }

    #[test]
    fn test_screener_run_id() {
        let at = ist().with_ymd_and_hms(2024, 1, 5, 16, 5, 9).unwrap();
        assert_eq!(screener_run_id(&at), "EOD-CP-20240105-160509");
    }
}
