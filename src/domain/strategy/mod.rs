//! Strategy capability interface and the built-in strategies.
//!
//! The driver only ever sees `dyn Strategy`. Each strategy owns one capital
//! slice, precomputes its indicators over the current bar window, and then
//! answers entry/exit questions by timestamp. A timestamp outside the
//! precomputed window never signals.

pub mod ichimoku;
pub mod rsi_reversal;

use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::domain::error::SlicetraderError;
use crate::domain::ohlcv::OhlcvBar;

pub use ichimoku::Ichimoku;
pub use rsi_reversal::RsiReversal;

pub trait Strategy {
    fn strategy_id(&self) -> &str;

    /// Fraction of initial capital assigned to this strategy's slice.
    fn allocation(&self) -> f64;

    /// Compute indicators over `bars`. Called again whenever the window changes.
    fn precompute(&mut self, bars: &[OhlcvBar]);

    fn entry_signal(&self, ts: NaiveDateTime) -> bool;

    fn exit_signal(&self, ts: NaiveDateTime, entry_price: f64) -> bool;
}

/// Maps bar timestamps to positions in the precomputed window.
#[derive(Debug, Clone, Default)]
pub struct BarIndex {
    positions: HashMap<NaiveDateTime, usize>,
    closes: Vec<f64>,
}

impl BarIndex {
    pub fn build(bars: &[OhlcvBar]) -> Self {
        BarIndex {
            positions: bars
                .iter()
                .enumerate()
                .map(|(i, b)| (b.timestamp, i))
                .collect(),
            closes: bars.iter().map(|b| b.close).collect(),
        }
    }

    pub fn locate(&self, ts: NaiveDateTime) -> Option<usize> {
        self.positions.get(&ts).copied()
    }

    /// Finite close at `index`.
    pub fn close(&self, index: usize) -> Option<f64> {
        self.closes.get(index).copied().filter(|c| c.is_finite())
    }
}

/// Strategies that ship with the binary, selectable by id.
#[derive(Debug, Clone)]
pub enum BuiltinStrategy {
    Ichimoku(Ichimoku),
    RsiReversal(RsiReversal),
}

impl BuiltinStrategy {
    pub const KNOWN_IDS: &'static [&'static str] = &[ichimoku::STRATEGY_ID, rsi_reversal::STRATEGY_ID];

    pub fn from_id(id: &str, allocation: f64) -> Result<Self, SlicetraderError> {
        match id.trim().to_uppercase().as_str() {
            ichimoku::STRATEGY_ID => Ok(BuiltinStrategy::Ichimoku(Ichimoku::new(allocation))),
            rsi_reversal::STRATEGY_ID => {
                Ok(BuiltinStrategy::RsiReversal(RsiReversal::new(allocation)))
            }
            other => Err(SlicetraderError::invalid(format!(
                "unknown strategy '{other}', expected one of {}",
                Self::KNOWN_IDS.join(", ")
            ))),
        }
    }

    /// Default allocation when none is configured.
    pub fn default_allocation(id: &str) -> Option<f64> {
        match id.trim().to_uppercase().as_str() {
            ichimoku::STRATEGY_ID => Some(ichimoku::DEFAULT_ALLOCATION),
            rsi_reversal::STRATEGY_ID => Some(rsi_reversal::DEFAULT_ALLOCATION),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn Strategy {
        match self {
            BuiltinStrategy::Ichimoku(s) => s,
            BuiltinStrategy::RsiReversal(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Strategy {
        match self {
            BuiltinStrategy::Ichimoku(s) => s,
            BuiltinStrategy::RsiReversal(s) => s,
        }
    }
}

impl Strategy for BuiltinStrategy {
    fn strategy_id(&self) -> &str {
        self.inner().strategy_id()
    }

    fn allocation(&self) -> f64 {
        self.inner().allocation()
    }

    fn precompute(&mut self, bars: &[OhlcvBar]) {
        self.inner_mut().precompute(bars)
    }

    fn entry_signal(&self, ts: NaiveDateTime) -> bool {
        self.inner().entry_signal(ts)
    }

    fn exit_signal(&self, ts: NaiveDateTime, entry_price: f64) -> bool {
        self.inner().exit_signal(ts, entry_price)
    }
}
