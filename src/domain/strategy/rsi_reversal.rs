//! Oversold RSI reversal with trend, momentum and volatility filters.

use chrono::NaiveDateTime;

use super::{BarIndex, Strategy};
use crate::domain::indicator::rolling::{calculate_rolling_high, calculate_sma};
use crate::domain::indicator::rsi::calculate_rsi;
use crate::domain::indicator::IndicatorSeries;
use crate::domain::indicator_helpers::calc_atr;
use crate::domain::ohlcv::OhlcvBar;

pub const STRATEGY_ID: &str = "REVERSAL";
pub const DEFAULT_ALLOCATION: f64 = 0.1;

const RSI_LEN: usize = 14;
const OVERSOLD: f64 = 30.0;
const OVERBOUGHT: f64 = 70.0;
const ATR_LEN: usize = 14;
const STOP_ATR_MULT: f64 = 1.5;
const RR_TARGET: f64 = 2.5;
const MIN_RSI_MOMENTUM: f64 = 5.0;
const RSI_MOMENTUM_LAG: usize = 3;
const TREND_PERIOD: usize = 50;
const RECENT_HIGH_PERIOD: usize = 10;

#[derive(Debug, Clone, Default)]
struct Series {
    rsi: Option<IndicatorSeries>,
    atr: Option<IndicatorSeries>,
    sma: Option<IndicatorSeries>,
    recent_high: Option<IndicatorSeries>,
}

#[derive(Debug, Clone)]
pub struct RsiReversal {
    allocation: f64,
    index: BarIndex,
    series: Series,
}

impl RsiReversal {
    pub fn new(allocation: f64) -> Self {
        RsiReversal {
            allocation,
            index: BarIndex::default(),
            series: Series::default(),
        }
    }

    fn rsi(&self, i: usize) -> Option<f64> {
        self.series.rsi.as_ref()?.at(i)
    }

    fn atr(&self, i: usize) -> Option<f64> {
        self.series.atr.as_ref()?.at(i)
    }

    fn sma(&self, i: usize) -> Option<f64> {
        self.series.sma.as_ref()?.at(i)
    }

    fn entry_at(&self, i: usize) -> Option<bool> {
        let rsi = self.rsi(i)?;
        let prev_rsi = self.rsi(i.checked_sub(1)?)?;
        let lagged_rsi = self.rsi(i.checked_sub(RSI_MOMENTUM_LAG)?)?;
        let close = self.index.close(i)?;
        let sma = self.sma(i)?;
        let atr = self.atr(i)?;
        let recent_high = self.series.recent_high.as_ref()?.at(i)?;

        let crossed_up = prev_rsi < OVERSOLD && rsi >= OVERSOLD;
        let momentum_ok = rsi - lagged_rsi > MIN_RSI_MOMENTUM;
        let trend_ok = close >= sma * 0.98;
        let atr_ok = atr > 0.0;
        let near_high = close >= recent_high * 0.95;

        Some(crossed_up && momentum_ok && trend_ok && atr_ok && near_high)
    }

    fn exit_at(&self, i: usize, entry_price: f64) -> bool {
        let Some(close) = self.index.close(i) else {
            return false;
        };

        if let Some(atr) = self.atr(i) {
            let risk = STOP_ATR_MULT * atr;
            if close <= entry_price - risk || close >= entry_price + RR_TARGET * risk {
                return true;
            }
        }
        if self.rsi(i).is_some_and(|rsi| rsi >= OVERBOUGHT) {
            return true;
        }
        self.sma(i).is_some_and(|sma| close < sma * 0.95)
    }
}

impl Strategy for RsiReversal {
    fn strategy_id(&self) -> &str {
        STRATEGY_ID
    }

    fn allocation(&self) -> f64 {
        self.allocation
    }

    fn precompute(&mut self, bars: &[OhlcvBar]) {
        self.index = BarIndex::build(bars);
        self.series = Series {
            rsi: Some(calculate_rsi(bars, RSI_LEN)),
            atr: Some(calc_atr(bars, ATR_LEN)),
            sma: Some(calculate_sma(bars, TREND_PERIOD)),
            recent_high: Some(calculate_rolling_high(bars, RECENT_HIGH_PERIOD)),
        };
    }

    fn entry_signal(&self, ts: NaiveDateTime) -> bool {
        self.index
            .locate(ts)
            .and_then(|i| self.entry_at(i))
            .unwrap_or(false)
    }

    fn exit_signal(&self, ts: NaiveDateTime, entry_price: f64) -> bool {
        self.index
            .locate(ts)
            .is_some_and(|i| self.exit_at(i, entry_price))
    }
}
