//! Market data port trait.

use crate::domain::error::SlicetraderError;
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDateTime;

pub trait MarketDataPort {
    /// Bars for `symbol` at `timeframe`, ascending by timestamp, restricted to
    /// `[start, end]` where given.
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<OhlcvBar>, SlicetraderError>;

    /// The most recent `count` bars, used by live polling.
    fn latest_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<OhlcvBar>, SlicetraderError> {
        let mut bars = self.fetch_bars(symbol, timeframe, None, None)?;
        let skip = bars.len().saturating_sub(count);
        Ok(bars.split_off(skip))
    }
}
