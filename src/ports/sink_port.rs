//! Write-only observers of trades and equity.

use crate::domain::error::SlicetraderError;
use crate::domain::trade::{EquitySnapshot, TradeRecord};

pub trait TradeSink {
    fn record_trade(&mut self, trade: &TradeRecord) -> Result<(), SlicetraderError>;

    fn record_equity(&mut self, snapshot: &EquitySnapshot) -> Result<(), SlicetraderError>;

    fn flush(&mut self) -> Result<(), SlicetraderError> {
        Ok(())
    }
}
