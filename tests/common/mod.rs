#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use slicetrader::domain::checkpoint::RunCheckpoint;
use slicetrader::domain::error::SlicetraderError;
pub use slicetrader::domain::ohlcv::OhlcvBar;
use slicetrader::domain::strategy::Strategy;
use slicetrader::domain::trade::{EquitySnapshot, TradeRecord};
use slicetrader::ports::checkpoint_port::CheckpointPort;
use slicetrader::ports::data_port::MarketDataPort;
use slicetrader::ports::execution_port::{ExecutionPort, OrderAck, OrderRequest};
use slicetrader::ports::sink_port::TradeSink;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub const SYMBOL: &str = "BTCUSDT";

pub fn ts(i: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(4 * i as i64)
}

/// Bar `i` of a 4h series, with high/low five either side of the close.
pub fn make_bar(i: usize, close: f64) -> OhlcvBar {
    OhlcvBar {
        symbol: SYMBOL.to_string(),
        timestamp: ts(i),
        open: close,
        high: close + 5.0,
        low: close - 5.0,
        close,
        volume: 1000.0,
    }
}

/// `n` bars closing at 100 with a constant true range of 10.
pub fn flat_bars(n: usize) -> Vec<OhlcvBar> {
    (0..n).map(|i| make_bar(i, 100.0)).collect()
}

pub fn bars_from_closes(closes: &[f64]) -> Vec<OhlcvBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(i, c))
        .collect()
}

/// Deterministic oscillating closes, for runs that should trade repeatedly.
pub fn wave_bars(n: usize) -> Vec<OhlcvBar> {
    (0..n)
        .map(|i| {
            let phase = (i % 20) as f64;
            let close = if phase < 10.0 { 100.0 + phase * 2.0 } else { 120.0 - (phase - 10.0) * 2.0 };
            make_bar(i, close)
        })
        .collect()
}

/// Signals on a fixed schedule of bar timestamps.
#[derive(Debug, Clone)]
pub struct ScriptedStrategy {
    pub id: String,
    pub allocation: f64,
    pub entries: HashSet<NaiveDateTime>,
    pub exits: HashSet<NaiveDateTime>,
}

impl ScriptedStrategy {
    pub fn new(id: &str, allocation: f64) -> Self {
        Self {
            id: id.to_string(),
            allocation,
            entries: HashSet::new(),
            exits: HashSet::new(),
        }
    }

    pub fn enter_at(mut self, bars: &[usize]) -> Self {
        self.entries.extend(bars.iter().map(|&i| ts(i)));
        self
    }

    pub fn exit_at(mut self, bars: &[usize]) -> Self {
        self.exits.extend(bars.iter().map(|&i| ts(i)));
        self
    }

    pub fn boxed(self) -> Box<dyn Strategy + Send> {
        Box::new(self)
    }
}

impl Strategy for ScriptedStrategy {
    fn strategy_id(&self) -> &str {
        &self.id
    }

    fn allocation(&self) -> f64 {
        self.allocation
    }

    fn precompute(&mut self, _bars: &[OhlcvBar]) {}

    fn entry_signal(&self, ts: NaiveDateTime) -> bool {
        self.entries.contains(&ts)
    }

    fn exit_signal(&self, ts: NaiveDateTime, _entry_price: f64) -> bool {
        self.exits.contains(&ts)
    }
}

/// Captures everything the driver emits. Clones share the same buffers.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub trades: Arc<Mutex<Vec<TradeRecord>>>,
    pub equity: Arc<Mutex<Vec<EquitySnapshot>>>,
    pub flushes: Arc<Mutex<usize>>,
}

impl TradeSink for RecordingSink {
    fn record_trade(&mut self, trade: &TradeRecord) -> Result<(), SlicetraderError> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }

    fn record_equity(&mut self, snapshot: &EquitySnapshot) -> Result<(), SlicetraderError> {
        self.equity.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SlicetraderError> {
        *self.flushes.lock().unwrap() += 1;
        Ok(())
    }
}

/// A sink that rejects everything.
pub struct BrokenSink;

impl TradeSink for BrokenSink {
    fn record_trade(&mut self, _trade: &TradeRecord) -> Result<(), SlicetraderError> {
        Err(SlicetraderError::Sink {
            reason: "disk full".into(),
        })
    }

    fn record_equity(&mut self, _snapshot: &EquitySnapshot) -> Result<(), SlicetraderError> {
        Err(SlicetraderError::Sink {
            reason: "disk full".into(),
        })
    }
}

/// A venue that refuses every order but remembers them.
#[derive(Debug, Clone, Default)]
pub struct FailingExecution {
    pub attempts: Arc<Mutex<Vec<OrderRequest>>>,
}

impl ExecutionPort for FailingExecution {
    fn submit(&mut self, order: &OrderRequest) -> Result<OrderAck, SlicetraderError> {
        self.attempts.lock().unwrap().push(order.clone());
        Err(SlicetraderError::ExternalExecution {
            symbol: order.symbol.clone(),
            reason: "venue unavailable".into(),
            retryable: false,
        })
    }
}

/// In-memory checkpoint store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub saved: Arc<Mutex<Vec<RunCheckpoint>>>,
    pub fail: Arc<Mutex<bool>>,
}

impl MemoryStore {
    pub fn save_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<RunCheckpoint> {
        self.saved.lock().unwrap().last().cloned()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl CheckpointPort for MemoryStore {
    fn save(&self, checkpoint: &RunCheckpoint) -> Result<(), SlicetraderError> {
        if *self.fail.lock().unwrap() {
            return Err(SlicetraderError::Persistence {
                path: "memory".into(),
                reason: "store offline".into(),
            });
        }
        self.saved.lock().unwrap().push(checkpoint.clone());
        Ok(())
    }

    fn load(&self) -> Option<RunCheckpoint> {
        self.last()
    }
}

/// Market data backed by a shared, growable bar list.
#[derive(Debug, Clone, Default)]
pub struct MockMarketData {
    pub bars: Arc<Mutex<Vec<OhlcvBar>>>,
    pub fail: Arc<Mutex<bool>>,
    pub fetches: Arc<Mutex<usize>>,
}

impl MockMarketData {
    pub fn with_bars(bars: Vec<OhlcvBar>) -> Self {
        let data = Self::default();
        *data.bars.lock().unwrap() = bars;
        data
    }

    pub fn push(&self, bar: OhlcvBar) {
        self.bars.lock().unwrap().push(bar);
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

impl MarketDataPort for MockMarketData {
    fn fetch_bars(
        &self,
        symbol: &str,
        _timeframe: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<OhlcvBar>, SlicetraderError> {
        *self.fetches.lock().unwrap() += 1;
        if *self.fail.lock().unwrap() {
            return Err(SlicetraderError::Data {
                reason: "exchange timeout".into(),
            });
        }
        Ok(self
            .bars
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.symbol == symbol)
            .filter(|b| start.is_none_or(|s| b.timestamp >= s))
            .filter(|b| end.is_none_or(|e| b.timestamp <= e))
            .cloned()
            .collect())
    }
}

/// Write bars as a CSV file in the layout the CSV adapter reads.
pub fn write_bars_csv(path: &std::path::Path, bars: &[OhlcvBar]) {
    let mut out = String::from("datetime,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    std::fs::write(path, out).unwrap();
}
