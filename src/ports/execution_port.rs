//! Order execution port trait.

use crate::domain::error::SlicetraderError;
use crate::domain::trade::TradeAction;
use chrono::NaiveDateTime;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub strategy_id: String,
    pub side: TradeAction,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub filled_price: Option<f64>,
}

/// An external venue that accepts orders. Failures are reported as
/// [`SlicetraderError::ExternalExecution`]; the simulated state never
/// depends on the outcome.
pub trait ExecutionPort {
    fn submit(&mut self, order: &OrderRequest) -> Result<OrderAck, SlicetraderError>;
}
