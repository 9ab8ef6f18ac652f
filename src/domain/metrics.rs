//! End-of-run summary metrics.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::trade::{TradeAction, TradeRecord};

const DAYS_PER_YEAR: f64 = 365.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// Final state of one strategy slice.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyBreakdown {
    pub strategy_id: String,
    pub initial_allocation: f64,
    pub final_equity: f64,
    /// Sum of sell-side P&L, net of fees.
    pub realized_pnl: f64,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub elapsed_days: f64,
    /// Worst peak-to-trough decline over the whole run's equity curve.
    pub max_drawdown: f64,
    pub total_trades: u64,
    pub total_fees_paid: f64,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub strategies: Vec<StrategyBreakdown>,
    /// Whether the final checkpoint was written.
    pub checkpoint_saved: bool,
}

/// Inputs gathered by the driver at completion.
pub struct SummaryInput<'a> {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    pub equity_curve: &'a [EquityPoint],
    pub trades: &'a [TradeRecord],
    pub total_trades: u64,
    pub total_fees_paid: f64,
    /// `(strategy_id, allocation, final_equity)` in declaration order.
    pub slices: Vec<(String, f64, f64)>,
    pub checkpoint_saved: bool,
}

impl RunSummary {
    pub fn compute(input: SummaryInput<'_>) -> Self {
        let initial_capital = input.initial_capital;
        let final_equity = if input.final_equity.is_finite() {
            input.final_equity
        } else {
            initial_capital
        };

        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let elapsed_days = match (input.first_timestamp, input.last_timestamp) {
            (Some(first), Some(last)) if last > first => {
                (last - first).num_seconds() as f64 / 86_400.0
            }
            _ => 0.0,
        };
        let annualized_return = annualize(total_return, elapsed_days);

        let sells: Vec<&TradeRecord> = input
            .trades
            .iter()
            .filter(|t| t.action == TradeAction::Sell)
            .collect();
        let trades_won = sells.iter().filter(|t| t.pnl > 0.0).count();
        let trades_lost = sells.iter().filter(|t| t.pnl < 0.0).count();
        let total_wins: f64 = sells.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let total_losses: f64 = sells
            .iter()
            .filter(|t| t.pnl < 0.0)
            .map(|t| t.pnl.abs())
            .sum();

        let win_rate = if sells.is_empty() {
            0.0
        } else {
            trades_won as f64 / sells.len() as f64
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let strategies = input
            .slices
            .into_iter()
            .map(|(strategy_id, allocation, final_equity)| {
                let own = input.trades.iter().filter(|t| t.strategy_id == strategy_id);
                let (realized_pnl, entries) = own.fold((0.0, 0usize), |(pnl, n), t| match t.action {
                    TradeAction::Sell => (pnl + t.pnl, n),
                    TradeAction::Buy => (pnl, n + 1),
                });
                StrategyBreakdown {
                    initial_allocation: initial_capital * allocation,
                    final_equity,
                    realized_pnl,
                    entries,
                    strategy_id,
                }
            })
            .collect();

        RunSummary {
            initial_capital,
            final_equity,
            total_return,
            annualized_return,
            elapsed_days,
            max_drawdown: compute_drawdown(input.equity_curve),
            total_trades: input.total_trades,
            total_fees_paid: input.total_fees_paid,
            trades_won,
            trades_lost,
            win_rate,
            profit_factor,
            strategies,
            checkpoint_saved: input.checkpoint_saved,
        }
    }
}

fn annualize(total_return: f64, elapsed_days: f64) -> f64 {
    if elapsed_days <= 0.0 || !total_return.is_finite() || total_return <= -1.0 {
        return 0.0;
    }
    let years = elapsed_days / DAYS_PER_YEAR;
    (1.0 + total_return).powf(1.0 / years) - 1.0
}

fn compute_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NAN;
    let mut max_dd = 0.0_f64;

    for point in equity_curve.iter().filter(|p| p.equity.is_finite()) {
        if peak.is_nan() || point.equity > peak {
            peak = point.equity;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
        }
    }

    max_dd
}
