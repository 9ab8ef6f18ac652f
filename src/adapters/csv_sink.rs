//! CSV trade and equity sink.
//!
//! Appends to `trade_history.csv` and `equity_curve.csv` so a resumed run
//! extends the files of the run it continues. Headers are written only when a
//! file is new or empty.
//!
//! Bars replayed after a crash between checkpoints produce rows the files
//! already hold. Trades already present (same timestamp, symbol, strategy and
//! action) and equity rows not newer than the last one on disk are skipped.

use chrono::NaiveDateTime;
use crate::domain::error::SlicetraderError;
use crate::domain::trade::{EquitySnapshot, TradeRecord};
use crate::ports::config_port::ConfigPort;
use crate::ports::sink_port::TradeSink;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TRADE_HEADER: &[&str] = &[
    "timestamp",
    "symbol",
    "strategy",
    "action",
    "price",
    "quantity",
    "fee",
    "pnl",
    "paper_traded",
];

pub struct CsvSink {
    trades_path: PathBuf,
    equity_path: PathBuf,
    trades: Option<csv::Writer<File>>,
    equity: Option<csv::Writer<File>>,
    /// Strategy columns of the equity file, fixed by the first snapshot.
    equity_columns: Vec<String>,
    written_trades: HashSet<String>,
    equity_watermark: Option<NaiveDateTime>,
}

fn trade_key(timestamp: &str, symbol: &str, strategy: &str, action: &str) -> String {
    format!("{timestamp}|{symbol}|{strategy}|{action}")
}

fn sink_error(path: &Path, e: impl std::fmt::Display) -> SlicetraderError {
    SlicetraderError::Sink {
        reason: format!("{}: {}", path.display(), e),
    }
}

/// Open `path` for appending; the bool is true when a header is needed.
///
/// A last line cut short by a crash is terminated so new rows start clean.
fn open_append(path: &Path) -> Result<(csv::Writer<File>, bool), SlicetraderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| sink_error(path, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| sink_error(path, e))?;
    let len = file.metadata().map_err(|e| sink_error(path, e))?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| sink_error(path, e))?;
        if last[0] != b'\n' {
            file.write_all(b"\n").map_err(|e| sink_error(path, e))?;
        }
    }
    let writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    Ok((writer, len == 0))
}

/// Data rows already in `path`; a missing file has none.
fn existing_rows(path: &Path) -> Result<Vec<csv::StringRecord>, SlicetraderError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| sink_error(path, e))?;
    reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| sink_error(path, e))
}

fn remove_if_present(path: &Path) -> Result<(), SlicetraderError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(sink_error(path, e)),
    }
}

impl CsvSink {
    pub fn new(trades_path: impl Into<PathBuf>, equity_path: impl Into<PathBuf>) -> Self {
        Self {
            trades_path: trades_path.into(),
            equity_path: equity_path.into(),
            trades: None,
            equity: None,
            equity_columns: Vec::new(),
            written_trades: HashSet::new(),
            equity_watermark: None,
        }
    }

    /// Sink writing the two default file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("trade_history.csv"), dir.join("equity_curve.csv"))
    }

    /// Sink for `[sink] trades_csv` / `equity_csv`; `None` when neither is set.
    pub fn from_config(config: &dyn ConfigPort) -> Option<Self> {
        let trades_csv = config.get_string("sink", "trades_csv");
        let equity_csv = config.get_string("sink", "equity_csv");
        if trades_csv.is_none() && equity_csv.is_none() {
            return None;
        }
        Some(Self::new(
            trades_csv.unwrap_or_else(|| "trade_history.csv".to_string()),
            equity_csv.unwrap_or_else(|| "equity_curve.csv".to_string()),
        ))
    }

    pub fn trades_path(&self) -> &Path {
        &self.trades_path
    }

    pub fn equity_path(&self) -> &Path {
        &self.equity_path
    }

    /// Delete both files so the next write starts a new history.
    pub fn clear(&mut self) -> Result<(), SlicetraderError> {
        self.trades = None;
        self.equity = None;
        self.equity_columns.clear();
        self.written_trades.clear();
        self.equity_watermark = None;
        remove_if_present(&self.trades_path)?;
        remove_if_present(&self.equity_path)
    }

    fn trades_writer(&mut self) -> Result<&mut csv::Writer<File>, SlicetraderError> {
        if self.trades.is_none() {
            self.written_trades = existing_rows(&self.trades_path)?
                .iter()
                .map(|row| {
                    trade_key(
                        row.get(0).unwrap_or_default(),
                        row.get(1).unwrap_or_default(),
                        row.get(2).unwrap_or_default(),
                        row.get(3).unwrap_or_default(),
                    )
                })
                .collect();
            let (mut writer, needs_header) = open_append(&self.trades_path)?;
            if needs_header {
                writer
                    .write_record(TRADE_HEADER)
                    .map_err(|e| sink_error(&self.trades_path, e))?;
            }
            self.trades = Some(writer);
        }
        self.trades
            .as_mut()
            .ok_or_else(|| sink_error(&self.trades_path, "writer unavailable"))
    }

    fn equity_writer(
        &mut self,
        snapshot: &EquitySnapshot,
    ) -> Result<&mut csv::Writer<File>, SlicetraderError> {
        if self.equity.is_none() {
            self.equity_columns = snapshot.slice_equity.keys().cloned().collect();
            self.equity_watermark = existing_rows(&self.equity_path)?
                .iter()
                .filter_map(|row| row.get(0))
                .filter_map(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok())
                .max();
            let (mut writer, needs_header) = open_append(&self.equity_path)?;
            if needs_header {
                let mut header = vec!["timestamp".to_string(), "total_equity".to_string()];
                header.extend(self.equity_columns.iter().map(|id| format!("{}_equity", id.to_lowercase())));
                header.push("open_positions".to_string());
                header.push("unrealized_pnl".to_string());
                writer
                    .write_record(&header)
                    .map_err(|e| sink_error(&self.equity_path, e))?;
            }
            self.equity = Some(writer);
        }
        self.equity
            .as_mut()
            .ok_or_else(|| sink_error(&self.equity_path, "writer unavailable"))
    }
}

impl TradeSink for CsvSink {
    fn record_trade(&mut self, trade: &TradeRecord) -> Result<(), SlicetraderError> {
        let path = self.trades_path.clone();
        let timestamp = trade.timestamp.format(TIMESTAMP_FORMAT).to_string();
        let action = trade.action.to_string();
        self.trades_writer()?;

        let key = trade_key(&timestamp, &trade.symbol, &trade.strategy_id, &action);
        if !self.written_trades.insert(key) {
            return Ok(());
        }
        match self.trades.as_mut() {
            Some(writer) => writer
                .write_record([
                    timestamp,
                    trade.symbol.clone(),
                    trade.strategy_id.clone(),
                    action,
                    trade.price.to_string(),
                    trade.quantity.to_string(),
                    trade.fee.to_string(),
                    trade.pnl.to_string(),
                    trade.paper_traded.to_string(),
                ])
                .map_err(|e| sink_error(&path, e)),
            None => Err(sink_error(&path, "writer unavailable")),
        }
    }

    fn record_equity(&mut self, snapshot: &EquitySnapshot) -> Result<(), SlicetraderError> {
        let path = self.equity_path.clone();
        self.equity_writer(snapshot)?;
        if self
            .equity_watermark
            .is_some_and(|last| snapshot.timestamp <= last)
        {
            return Ok(());
        }

        let mut row = vec![
            snapshot.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            snapshot.total_equity.to_string(),
        ];
        row.extend(self.equity_columns.iter().map(|id| {
            snapshot
                .slice_equity
                .get(id)
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        row.push(snapshot.open_positions.to_string());
        row.push(snapshot.unrealized_pnl.to_string());

        match self.equity.as_mut() {
            Some(writer) => writer.write_record(&row).map_err(|e| sink_error(&path, e)),
            None => Err(sink_error(&path, "writer unavailable")),
        }
    }

    fn flush(&mut self) -> Result<(), SlicetraderError> {
        if let Some(writer) = self.trades.as_mut() {
            writer.flush().map_err(|e| sink_error(&self.trades_path, e))?;
        }
        if let Some(writer) = self.equity.as_mut() {
            writer.flush().map_err(|e| sink_error(&self.equity_path, e))?;
        }
        Ok(())
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::TradeAction;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn trade(action: TradeAction, pnl: f64) -> TradeRecord {
        TradeRecord {
            timestamp: ts(1),
            symbol: "BTCUSDT".into(),
            strategy_id: "ICHIMOKU".into(),
            action,
            price: 100.05,
            quantity: 1.5,
            fee: 0.150075,
            pnl,
            paper_traded: true,
        }
    }

    fn snapshot(hour: u32, total: f64) -> EquitySnapshot {
        EquitySnapshot {
            timestamp: ts(hour),
            total_equity: total,
            slice_equity: BTreeMap::from([
                ("ICHIMOKU".to_string(), total * 0.9),
                ("REVERSAL".to_string(), total * 0.1),
            ]),
            open_positions: 1,
            unrealized_pnl: 2.5,
        }
    }

    #[test]
    fn writes_trades_with_header() {
        let dir = TempDir::new().unwrap();
        {
            let mut sink = CsvSink::in_dir(dir.path());
            sink.record_trade(&trade(TradeAction::Buy, 0.0)).unwrap();
            sink.record_trade(&trade(TradeAction::Sell, 4.2)).unwrap();
            sink.flush().unwrap();
        }
        let content = fs::read_to_string(dir.path().join("trade_history.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], TRADE_HEADER.join(","));
        assert!(lines[1].starts_with("2024-01-01 01:00:00,BTCUSDT,ICHIMOKU,BUY,100.05,1.5"));
        assert!(lines[2].contains(",SELL,"));
        assert!(lines[2].ends_with(",4.2,true"));
    }

    #[test]
    fn equity_columns_follow_strategies() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::in_dir(dir.path());
        sink.record_equity(&snapshot(0, 1000.0)).unwrap();
        sink.record_equity(&snapshot(1, 1010.0)).unwrap();
        sink.flush().unwrap();

        let content = fs::read_to_string(dir.path().join("equity_curve.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "timestamp,total_equity,ichimoku_equity,reversal_equity,open_positions,unrealized_pnl"
        );
        assert_eq!(lines[1], "2024-01-01 00:00:00,1000,900,100,1,2.5");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn reopening_appends_without_second_header() {
        let dir = TempDir::new().unwrap();
        for _ in 0..2 {
            let mut sink = CsvSink::in_dir(dir.path());
            sink.record_trade(&trade(TradeAction::Buy, 0.0)).unwrap();
        }
        let content = fs::read_to_string(dir.path().join("trade_history.csv")).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert_eq!(content.matches("timestamp").count(), 1);
    }

    #[test]
    fn replayed_rows_are_not_written_twice() {
        let dir = TempDir::new().unwrap();
        {
            let mut sink = CsvSink::in_dir(dir.path());
            sink.record_trade(&trade(TradeAction::Buy, 0.0)).unwrap();
            sink.record_equity(&snapshot(1, 1000.0)).unwrap();
            sink.record_equity(&snapshot(2, 1001.0)).unwrap();
        }

        // a resumed process replays bars 1 and 2, then moves on to bar 3
        let mut sink = CsvSink::in_dir(dir.path());
        sink.record_equity(&snapshot(1, 1000.0)).unwrap();
        sink.record_trade(&trade(TradeAction::Buy, 0.0)).unwrap();
        sink.record_equity(&snapshot(2, 1001.0)).unwrap();
        sink.record_trade(&trade(TradeAction::Sell, 4.2)).unwrap();
        sink.record_equity(&snapshot(3, 1004.2)).unwrap();
        sink.flush().unwrap();

        let trades = fs::read_to_string(dir.path().join("trade_history.csv")).unwrap();
        assert_eq!(trades.lines().count(), 3);
        assert_eq!(trades.matches(",BUY,").count(), 1);
        assert_eq!(trades.matches(",SELL,").count(), 1);

        let equity = fs::read_to_string(dir.path().join("equity_curve.csv")).unwrap();
        let lines: Vec<&str> = equity.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[3].starts_with("2024-01-01 03:00:00,1004.2,"));
    }

    #[test]
    fn torn_last_line_is_terminated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trade_history.csv");
        fs::write(
            &path,
            format!("{}\n2024-01-01 00:00:00,BTCUSDT,ICHI", TRADE_HEADER.join(",")),
        )
        .unwrap();

        {
            let mut sink = CsvSink::in_dir(dir.path());
            sink.record_trade(&trade(TradeAction::Buy, 0.0)).unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "2024-01-01 00:00:00,BTCUSDT,ICHI");
        assert!(lines[2].starts_with("2024-01-01 01:00:00,BTCUSDT,ICHIMOKU,BUY,"));
    }

    #[test]
    fn clear_removes_previous_history() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::in_dir(dir.path());
        sink.record_trade(&trade(TradeAction::Buy, 0.0)).unwrap();
        sink.record_equity(&snapshot(1, 1000.0)).unwrap();
        sink.flush().unwrap();

        sink.clear().unwrap();
        assert!(!sink.trades_path().exists());
        assert!(!sink.equity_path().exists());

        // the same trade is history of the cleared run, so it is written again
        sink.record_trade(&trade(TradeAction::Buy, 0.0)).unwrap();
        sink.flush().unwrap();
        let content = fs::read_to_string(sink.trades_path()).unwrap();
        assert_eq!(content.lines().count(), 2);

        // clearing twice is fine
        sink.clear().unwrap();
        sink.clear().unwrap();
    }
}
