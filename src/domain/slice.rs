//! Per-strategy capital slices.

use serde::{Deserialize, Serialize};

use super::error::SlicetraderError;

/// Tolerance for float dust left after a cash-clamped entry.
const CASH_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySlice {
    pub strategy_id: String,
    pub allocation: f64,
    pub cash_balance: f64,
}

impl StrategySlice {
    /// A fresh slice funded with `initial_capital * allocation`.
    pub fn fund(
        strategy_id: &str,
        allocation: f64,
        initial_capital: f64,
    ) -> Result<Self, SlicetraderError> {
        check_allocation(strategy_id, allocation)?;
        Ok(Self {
            strategy_id: strategy_id.to_string(),
            allocation,
            cash_balance: initial_capital * allocation,
        })
    }

    pub fn debit(&mut self, amount: f64) -> Result<(), SlicetraderError> {
        if !(amount.is_finite() && amount >= 0.0) {
            return Err(SlicetraderError::invalid(format!(
                "debit amount must be non-negative, got {amount}"
            )));
        }
        if amount > self.cash_balance + CASH_EPSILON {
            return Err(SlicetraderError::InsufficientFunds {
                strategy: self.strategy_id.clone(),
                required: amount,
                available: self.cash_balance,
            });
        }
        self.cash_balance = (self.cash_balance - amount).max(0.0);
        Ok(())
    }

    pub fn credit(&mut self, amount: f64) -> Result<(), SlicetraderError> {
        if !amount.is_finite() {
            return Err(SlicetraderError::invalid(format!(
                "credit amount must be finite, got {amount}"
            )));
        }
        self.cash_balance = (self.cash_balance + amount).max(0.0);
        Ok(())
    }
}

fn check_allocation(strategy_id: &str, allocation: f64) -> Result<(), SlicetraderError> {
    if allocation.is_finite() && allocation > 0.0 && allocation <= 1.0 {
        Ok(())
    } else {
        Err(SlicetraderError::invalid(format!(
            "allocation for {strategy_id} must be in (0, 1], got {allocation}"
        )))
    }
}

/// Allocations must each be in (0, 1] and sum to at most 1.
pub fn validate_allocations<'a>(
    allocations: impl IntoIterator<Item = (&'a str, f64)>,
) -> Result<(), SlicetraderError> {
    let mut total = 0.0;
    for (id, allocation) in allocations {
        check_allocation(id, allocation)?;
        total += allocation;
    }
    if total > 1.0 + CASH_EPSILON {
        return Err(SlicetraderError::invalid(format!(
            "allocations sum to {total:.4}, which exceeds 1"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fund_splits_capital_by_allocation() {
        let slice = StrategySlice::fund("ICHIMOKU", 0.9, 4000.0).unwrap();
        assert!((slice.cash_balance - 3600.0).abs() < 1e-9);
    }

    #[test]
    fn fund_rejects_out_of_range_allocation() {
        assert!(StrategySlice::fund("X", 0.0, 1000.0).is_err());
        assert!(StrategySlice::fund("X", 1.2, 1000.0).is_err());
    }

    #[test]
    fn debit_beyond_balance_fails() {
        let mut slice = StrategySlice::fund("REVERSAL", 0.1, 1000.0).unwrap();
        let err = slice.debit(100.5).unwrap_err();
        assert!(matches!(err, SlicetraderError::InsufficientFunds { .. }));
        assert!((slice.cash_balance - 100.0).abs() < 1e-9);
    }

    #[test]
    fn debit_absorbs_float_dust() {
        let mut slice = StrategySlice::fund("REVERSAL", 0.1, 1000.0).unwrap();
        slice.debit(100.0 + 1e-12).unwrap();
        assert_eq!(slice.cash_balance, 0.0);
    }

    #[test]
    fn credit_adds_to_balance() {
        let mut slice = StrategySlice::fund("REVERSAL", 0.5, 100.0).unwrap();
        slice.credit(25.0).unwrap();
        assert!((slice.cash_balance - 75.0).abs() < 1e-9);
        assert!(slice.credit(f64::NAN).is_err());
    }

    #[test]
    fn allocations_must_not_exceed_one() {
        assert!(validate_allocations([("ICHIMOKU", 0.9), ("REVERSAL", 0.1)]).is_ok());
        assert!(validate_allocations([("ICHIMOKU", 0.9), ("REVERSAL", 0.2)]).is_err());
        assert!(validate_allocations([("ICHIMOKU", -0.1)]).is_err());
    }
}
