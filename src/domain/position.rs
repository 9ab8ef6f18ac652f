//! Position records and their identity.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Identity key of a position: `(symbol, strategy_id, entry_time)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionId {
    pub symbol: String,
    pub strategy_id: String,
    pub entry_time: NaiveDateTime,
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.symbol,
            self.strategy_id,
            self.entry_time.format("%Y-%m-%dT%H:%M:%S")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub strategy_id: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub stop_loss: Option<f64>,
    pub status: PositionStatus,
    pub unrealized_pnl: f64,
    /// Price of the last mark-to-market, if any.
    #[serde(default)]
    pub mark_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<NaiveDateTime>,
    pub realized_pnl: Option<f64>,
    pub fees_paid: f64,
}

impl Position {
    pub fn id(&self) -> PositionId {
        PositionId {
            symbol: self.symbol.clone(),
            strategy_id: self.strategy_id.clone(),
            entry_time: self.entry_time,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    /// Value at the last mark, falling back to cost basis before the first mark.
    pub fn marked_value(&self) -> f64 {
        self.market_value(self.mark_price.unwrap_or(self.entry_price))
    }

    pub fn unrealized_pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity
    }

    /// Structural check used when restoring a checkpoint.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(format!("{}: quantity {} must be positive", self.id(), self.quantity));
        }
        if !(self.entry_price.is_finite() && self.entry_price > 0.0) {
            return Err(format!(
                "{}: entry_price {} must be positive",
                self.id(),
                self.entry_price
            ));
        }
        match self.status {
            PositionStatus::Open if self.exit_price.is_some() => {
                Err(format!("{}: open position carries an exit price", self.id()))
            }
            PositionStatus::Closed if self.exit_price.is_none() => {
                Err(format!("{}: closed position has no exit price", self.id()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn sample_position() -> Position {
        Position {
            symbol: "BTCUSDT".into(),
            strategy_id: "ICHIMOKU".into(),
            quantity: 2.0,
            entry_price: 50.0,
            entry_time: ts(15),
            stop_loss: Some(45.0),
            status: PositionStatus::Open,
            unrealized_pnl: 0.0,
            mark_price: None,
            exit_price: None,
            exit_time: None,
            realized_pnl: None,
            fees_paid: 0.1,
        }
    }

    #[test]
    fn id_display_joins_components() {
        let pos = sample_position();
        assert_eq!(pos.id().to_string(), "BTCUSDT_ICHIMOKU_2024-01-15T09:30:00");
    }

    #[test]
    fn ids_order_by_symbol_then_strategy_then_time() {
        let mut a = sample_position().id();
        let mut b = a.clone();
        b.entry_time = ts(16);
        assert!(a < b);
        a.strategy_id = "REVERSAL".into();
        assert!(a > b);
    }

    #[test]
    fn marked_value_uses_entry_price_before_first_mark() {
        let mut pos = sample_position();
        assert!((pos.marked_value() - 100.0).abs() < f64::EPSILON);
        pos.mark_price = Some(55.0);
        assert!((pos.marked_value() - 110.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrealized_pnl_at_price() {
        let pos = sample_position();
        assert!((pos.unrealized_pnl_at(60.0) - 20.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl_at(40.0) + 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invariants_reject_open_with_exit_price() {
        let mut pos = sample_position();
        assert!(pos.check_invariants().is_ok());
        pos.exit_price = Some(51.0);
        assert!(pos.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_non_positive_quantity() {
        let mut pos = sample_position();
        pos.quantity = -1.0;
        assert!(pos.check_invariants().is_err());
        pos.quantity = f64::NAN;
        assert!(pos.check_invariants().is_err());
    }
}
