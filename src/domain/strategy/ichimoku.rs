//! Ichimoku trend-following strategy.
//!
//! tenkan = MIDPOINT(9), kijun = MIDPOINT(26),
//! senkou A = (tenkan + kijun) / 2 and senkou B = MIDPOINT(52), both projected
//! 26 bars forward. The lagging-span confirmation compares the current close
//! with the close 26 bars earlier, so no future bar is read.

use chrono::NaiveDateTime;

use super::{BarIndex, Strategy};
use crate::domain::indicator::rolling::calculate_midpoint;
use crate::domain::indicator::IndicatorSeries;
use crate::domain::ohlcv::OhlcvBar;

pub const STRATEGY_ID: &str = "ICHIMOKU";
pub const DEFAULT_ALLOCATION: f64 = 0.9;

const TENKAN: usize = 9;
const KIJUN: usize = 26;
const SENKOU_B: usize = 52;

#[derive(Debug, Clone)]
pub struct Ichimoku {
    allocation: f64,
    index: BarIndex,
    tenkan: Option<IndicatorSeries>,
    kijun: Option<IndicatorSeries>,
    senkou_b_base: Option<IndicatorSeries>,
}

impl Ichimoku {
    pub fn new(allocation: f64) -> Self {
        Ichimoku {
            allocation,
            index: BarIndex::default(),
            tenkan: None,
            kijun: None,
            senkou_b_base: None,
        }
    }

    fn lines(&self, i: usize) -> Option<(f64, f64)> {
        let tenkan = self.tenkan.as_ref()?.at(i)?;
        let kijun = self.kijun.as_ref()?.at(i)?;
        Some((tenkan, kijun))
    }

    /// Cloud boundaries at bar `i`, projected from bar `i - KIJUN`.
    fn cloud(&self, i: usize) -> Option<(f64, f64)> {
        let src = i.checked_sub(KIJUN)?;
        let (tenkan, kijun) = self.lines(src)?;
        let senkou_b = self.senkou_b_base.as_ref()?.at(src)?;
        Some(((tenkan + kijun) / 2.0, senkou_b))
    }
}

impl Strategy for Ichimoku {
    fn strategy_id(&self) -> &str {
        STRATEGY_ID
    }

    fn allocation(&self) -> f64 {
        self.allocation
    }

    fn precompute(&mut self, bars: &[OhlcvBar]) {
        self.index = BarIndex::build(bars);
        self.tenkan = Some(calculate_midpoint(bars, TENKAN));
        self.kijun = Some(calculate_midpoint(bars, KIJUN));
        self.senkou_b_base = Some(calculate_midpoint(bars, SENKOU_B));
    }

    fn entry_signal(&self, ts: NaiveDateTime) -> bool {
        let Some(i) = self.index.locate(ts) else {
            return false;
        };
        let (Some((tenkan, kijun)), Some((ssa, ssb)), Some(close), Some(lagged_close)) = (
            self.lines(i),
            self.cloud(i),
            self.index.close(i),
            i.checked_sub(KIJUN).and_then(|j| self.index.close(j)),
        ) else {
            return false;
        };

        tenkan > kijun && close > ssa.max(ssb) && close > lagged_close && ssa > ssb
    }

    fn exit_signal(&self, ts: NaiveDateTime, _entry_price: f64) -> bool {
        self.index
            .locate(ts)
            .and_then(|i| self.lines(i))
            .is_some_and(|(tenkan, kijun)| tenkan < kijun)
    }
}
