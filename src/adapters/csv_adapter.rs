//! CSV file market data adapter.
//!
//! Reads `datetime,open,high,low,close,volume` files. Columns are located by
//! header name (case-insensitive) with the first column as the timestamp, so
//! exports with an index column or extra fields load unchanged. Empty and
//! `NaN` price cells are kept as NaN; rows with an unparsable timestamp are
//! skipped with a warning.

use crate::domain::error::SlicetraderError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::MarketDataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

pub struct CsvAdapter {
    path: PathBuf,
}

impl CsvAdapter {
    /// `path` is either a single CSV file or a directory holding
    /// `{symbol}_{timeframe}.csv` files.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn csv_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        if self.path.is_dir() {
            self.path.join(format!("{}_{}.csv", symbol, timeframe))
        } else {
            self.path.clone()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let timestamp = ["datetime", "timestamp", "date", "time"]
            .iter()
            .find_map(|n| column(*n))
            .unwrap_or(0);
        Columns {
            timestamp,
            open: column("open").unwrap_or(1),
            high: column("high").unwrap_or(2),
            low: column("low").unwrap_or(3),
            close: column("close").unwrap_or(4),
            volume: column("volume").or(Some(5)),
        }
    }
}

/// Parse a timestamp cell: ISO-like date-times, plain dates, RFC 3339 with
/// offset (normalized to UTC) or epoch seconds / milliseconds.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    let epoch: i64 = value.parse().ok()?;
    // 10^11 seconds is year 5138, so anything larger is milliseconds
    let parsed = if epoch.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    };
    parsed.map(|ts| ts.naive_utc())
}

fn parse_number(cell: Option<&str>) -> f64 {
    match cell.map(str::trim) {
        None | Some("") => f64::NAN,
        Some(s) => s.parse().unwrap_or(f64::NAN),
    }
}

fn read_bars(path: &Path, symbol: &str) -> Result<Vec<OhlcvBar>, SlicetraderError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| SlicetraderError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

    let headers = rdr
        .headers()
        .map_err(|e| SlicetraderError::Data {
            reason: format!("failed to read header of {}: {}", path.display(), e),
        })?
        .clone();
    let columns = Columns::from_headers(&headers);

    let mut bars = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), line = line + 2, error = %e, "skipping unreadable row");
                continue;
            }
        };
        let Some(timestamp) = record.get(columns.timestamp).and_then(parse_timestamp) else {
            warn!(
                path = %path.display(),
                line = line + 2,
                value = record.get(columns.timestamp).unwrap_or(""),
                "skipping row with unparsable timestamp"
            );
            continue;
        };

        bars.push(OhlcvBar {
            symbol: symbol.to_string(),
            timestamp,
            open: parse_number(record.get(columns.open)),
            high: parse_number(record.get(columns.high)),
            low: parse_number(record.get(columns.low)),
            close: parse_number(record.get(columns.close)),
            volume: columns
                .volume
                .map(|i| parse_number(record.get(i)))
                .unwrap_or(f64::NAN),
        });
    }
    Ok(bars)
}

impl MarketDataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<OhlcvBar>, SlicetraderError> {
        let path = self.csv_path(symbol, timeframe);
        let mut bars = read_bars(&path, symbol)?;

        bars.retain(|b| {
            start.is_none_or(|s| b.timestamp >= s) && end.is_none_or(|e| b.timestamp <= e)
        });
        // stable, so duplicate timestamps stay adjacent in file order
        bars.sort_by_key(|b| b.timestamp);

        debug!(path = %path.display(), symbol, bars = bars.len(), "loaded bars");
        Ok(bars)
    }
}
