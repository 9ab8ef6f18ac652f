//! Executed trade records.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
        }
    }
}

/// Immutable fact describing one executed trade. Buys carry zero P&L;
/// sells carry P&L net of both the entry and exit fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: NaiveDateTime,
    pub symbol: String,
    pub strategy_id: String,
    pub action: TradeAction,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    pub pnl: f64,
    pub paper_traded: bool,
}

/// Point-in-time portfolio valuation, emitted once per processed bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: NaiveDateTime,
    pub total_equity: f64,
    pub slice_equity: std::collections::BTreeMap<String, f64>,
    pub open_positions: usize,
    pub unrealized_pnl: f64,
}
