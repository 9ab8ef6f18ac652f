//! In-memory position ledger.
//!
//! Owns every position of a run, open and closed. Closed positions are never
//! mutated again and their identity is never reused, so the ledger doubles as
//! the append-only position history that gets checkpointed.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use super::error::SlicetraderError;
use super::position::{Position, PositionId, PositionStatus};

#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: BTreeMap<PositionId, Position>,
}

fn check_price(name: &str, value: f64) -> Result<(), SlicetraderError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SlicetraderError::invalid(format!(
            "{name} must be a positive finite number, got {value}"
        )))
    }
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from checkpointed positions.
    pub fn restore(positions: Vec<Position>) -> Result<Self, SlicetraderError> {
        let mut ledger = Self::new();
        for position in positions {
            position
                .check_invariants()
                .map_err(SlicetraderError::invalid)?;
            ledger.positions.insert(position.id(), position);
        }
        Ok(ledger)
    }

    /// Open a long position.
    ///
    /// An existing *open* position with the same identity is replaced
    /// (last write wins). A closed identity is never reopened.
    pub fn open(
        &mut self,
        symbol: &str,
        strategy_id: &str,
        quantity: f64,
        entry_price: f64,
        entry_time: NaiveDateTime,
        stop_loss: Option<f64>,
    ) -> Result<PositionId, SlicetraderError> {
        if symbol.trim().is_empty() {
            return Err(SlicetraderError::invalid("symbol must not be empty"));
        }
        if strategy_id.trim().is_empty() {
            return Err(SlicetraderError::invalid("strategy_id must not be empty"));
        }
        check_price("quantity", quantity)?;
        check_price("entry_price", entry_price)?;
        if let Some(stop) = stop_loss {
            check_price("stop_loss", stop)?;
        }

        let id = PositionId {
            symbol: symbol.to_string(),
            strategy_id: strategy_id.to_string(),
            entry_time,
        };

        match self.positions.get(&id) {
            Some(existing) if !existing.is_open() => {
                return Err(SlicetraderError::AlreadyClosed { id: id.to_string() });
            }
            Some(_) => {
                warn!(position = %id, "replacing open position with identical id");
            }
            None => {}
        }

        self.positions.insert(
            id.clone(),
            Position {
                symbol: id.symbol.clone(),
                strategy_id: id.strategy_id.clone(),
                quantity,
                entry_price,
                entry_time,
                stop_loss,
                status: PositionStatus::Open,
                unrealized_pnl: 0.0,
                mark_price: None,
                exit_price: None,
                exit_time: None,
                realized_pnl: None,
                fees_paid: 0.0,
            },
        );
        Ok(id)
    }

    /// Close an open position and return its realized P&L,
    /// `(exit_price - entry_price) * quantity`.
    pub fn close(
        &mut self,
        id: &PositionId,
        exit_price: f64,
        exit_time: NaiveDateTime,
    ) -> Result<f64, SlicetraderError> {
        let position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| SlicetraderError::NotFound { id: id.to_string() })?;

        if !position.is_open() {
            return Err(SlicetraderError::AlreadyClosed { id: id.to_string() });
        }
        check_price("exit_price", exit_price)?;
        if exit_time < position.entry_time {
            return Err(SlicetraderError::invalid(format!(
                "exit_time {exit_time} precedes entry_time {}",
                position.entry_time
            )));
        }

        let realized = (exit_price - position.entry_price) * position.quantity;
        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.exit_time = Some(exit_time);
        position.realized_pnl = Some(realized);
        position.unrealized_pnl = 0.0;
        Ok(realized)
    }

    /// Accumulate fees against an open position.
    pub fn add_fees(&mut self, id: &PositionId, fee: f64) -> Result<(), SlicetraderError> {
        if !(fee.is_finite() && fee >= 0.0) {
            return Err(SlicetraderError::invalid(format!(
                "fee must be non-negative, got {fee}"
            )));
        }
        let position = self
            .positions
            .get_mut(id)
            .ok_or_else(|| SlicetraderError::NotFound { id: id.to_string() })?;
        if !position.is_open() {
            return Err(SlicetraderError::AlreadyClosed { id: id.to_string() });
        }
        position.fees_paid += fee;
        Ok(())
    }

    /// Recompute unrealized P&L for open positions with a usable price.
    /// Positions whose symbol is missing from `prices` keep their last value.
    pub fn mark_to_market(&mut self, prices: &HashMap<String, f64>) {
        for position in self.positions.values_mut().filter(|p| p.is_open()) {
            if let Some(&price) = prices.get(&position.symbol) {
                if price.is_finite() && price > 0.0 {
                    position.unrealized_pnl = position.unrealized_pnl_at(price);
                    position.mark_price = Some(price);
                }
            }
        }
    }

    pub fn get(&self, id: &PositionId) -> Option<&Position> {
        self.positions.get(id)
    }

    /// Open positions, optionally filtered by symbol and/or strategy.
    pub fn query(&self, symbol: Option<&str>, strategy_id: Option<&str>) -> Vec<&Position> {
        self.positions
            .values()
            .filter(|p| p.is_open())
            .filter(|p| symbol.is_none_or(|s| p.symbol == s))
            .filter(|p| strategy_id.is_none_or(|s| p.strategy_id == s))
            .collect()
    }

    pub fn has_open(&self, symbol: &str, strategy_id: &str) -> bool {
        self.positions
            .values()
            .any(|p| p.is_open() && p.symbol == symbol && p.strategy_id == strategy_id)
    }

    /// Total open quantity held in `symbol` across strategies.
    pub fn total_exposure(&self, symbol: &str) -> f64 {
        self.query(Some(symbol), None)
            .iter()
            .map(|p| p.quantity)
            .sum()
    }

    /// Value of a strategy's open positions at their last mark.
    pub fn market_value(&self, strategy_id: &str) -> f64 {
        self.query(None, Some(strategy_id))
            .iter()
            .map(|p| p.marked_value())
            .sum()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.query(None, None).iter().map(|p| p.unrealized_pnl).sum()
    }

    /// Closed positions in identity order.
    pub fn history(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| !p.is_open())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Every position, open and closed, for checkpointing.
    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }
}
