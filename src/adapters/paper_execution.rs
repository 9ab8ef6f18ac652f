//! Local paper-trading venue.

use crate::domain::error::SlicetraderError;
use crate::ports::execution_port::{ExecutionPort, OrderAck, OrderRequest};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Accepts every well-formed order at its requested price and keeps a log
/// that can be inspected through a cloned handle.
#[derive(Debug, Clone, Default)]
pub struct PaperExecution {
    orders: Arc<Mutex<Vec<OrderRequest>>>,
}

impl PaperExecution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders
            .lock()
            .map(|orders| orders.clone())
            .unwrap_or_default()
    }
}

impl ExecutionPort for PaperExecution {
    fn submit(&mut self, order: &OrderRequest) -> Result<OrderAck, SlicetraderError> {
        if !(order.quantity.is_finite() && order.quantity > 0.0) {
            return Err(SlicetraderError::ExternalExecution {
                symbol: order.symbol.clone(),
                reason: format!("invalid quantity {}", order.quantity),
                retryable: false,
            });
        }

        let mut orders = self
            .orders
            .lock()
            .map_err(|_| SlicetraderError::ExternalExecution {
                symbol: order.symbol.clone(),
                reason: "paper order log poisoned".to_string(),
                retryable: false,
            })?;
        orders.push(order.clone());
        let order_id = format!("PAPER-{}", orders.len());

        info!(
            order_id = %order_id,
            symbol = %order.symbol,
            strategy = %order.strategy_id,
            side = %order.side,
            quantity = order.quantity,
            price = order.price,
            "paper order filled"
        );
        Ok(OrderAck {
            order_id,
            filled_price: Some(order.price),
        })
    }
}
