//! Execution cost model.
//!
//! Slippage-adjusted fill prices, proportional fees, risk-based position
//! sizing and the minimum-profit exit gate. All rates are fractions
//! (`0.001` is 0.1%). Nothing here touches a ledger or a slice; the driver
//! applies the returned orders.

/// Cost parameters for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CostConfig {
    pub fee_rate: f64,
    pub slippage_rate: f64,
    /// Fraction of slice cash put at risk per ATR unit.
    pub risk_pct: f64,
    /// Minimum net return required before a signalled exit is taken.
    pub min_profit_pct: f64,
    /// Net loss at which an exit is always permitted.
    pub stop_loss_floor_pct: f64,
    /// When false, slippage, fees and the profit gate are all disabled.
    pub realistic_costs: bool,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            fee_rate: 0.001,
            slippage_rate: 0.0005,
            risk_pct: 0.015,
            min_profit_pct: 0.005,
            stop_loss_floor_pct: 0.05,
            realistic_costs: true,
        }
    }
}

impl CostConfig {
    fn effective_fee_rate(&self) -> f64 {
        if self.realistic_costs { self.fee_rate } else { 0.0 }
    }

    fn effective_slippage(&self) -> f64 {
        if self.realistic_costs { self.slippage_rate } else { 0.0 }
    }
}

/// Buy fill: mid * (1 + slip)
pub fn entry_execution_price(mid: f64, slip: f64) -> f64 {
    mid * (1.0 + slip)
}

/// Sell fill: mid * (1 - slip)
pub fn exit_execution_price(mid: f64, slip: f64) -> f64 {
    mid * (1.0 - slip)
}

pub fn fee(notional: f64, rate: f64) -> f64 {
    notional * rate
}

/// Units such that one ATR of adverse movement costs `cash * risk_pct`.
/// Returns 0 when ATR is missing, zero or negative.
pub fn size_by_risk(cash: f64, risk_pct: f64, atr: f64) -> f64 {
    if atr.is_finite() && atr > 0.0 {
        cash * risk_pct / atr
    } else {
        0.0
    }
}

/// Shrink `size` so that `size * price` plus its fee fits in `cash`.
pub fn fit_to_cash(size: f64, price: f64, fee_rate: f64, cash: f64) -> f64 {
    if !(price.is_finite() && price > 0.0) || cash <= 0.0 {
        return 0.0;
    }
    let gross_unit = price * (1.0 + fee_rate);
    if size * gross_unit > cash {
        cash / gross_unit
    } else {
        size
    }
}

/// Net return of a round trip relative to its cost basis.
pub fn net_return(entry: f64, exit: f64, fee_total: f64, qty: f64) -> f64 {
    let basis = entry * qty;
    if basis <= 0.0 {
        return 0.0;
    }
    ((exit - entry) * qty - fee_total) / basis
}

/// Minimum-profit gate. An exit passes when its net return reaches
/// `min_profit_pct`, or when the net loss has reached the stop-loss floor.
pub fn profit_ok(
    entry: f64,
    exit: f64,
    fee_total: f64,
    qty: f64,
    min_profit_pct: f64,
    stop_loss_floor_pct: f64,
) -> bool {
    let net = net_return(entry, exit, fee_total, qty);
    net >= min_profit_pct || net <= -stop_loss_floor_pct
}

/// A sized, priced entry ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOrder {
    pub quantity: f64,
    pub execution_price: f64,
    pub notional: f64,
    pub fee: f64,
}

impl EntryOrder {
    /// Cash leaving the slice: notional plus fee.
    pub fn total_cost(&self) -> f64 {
        self.notional + self.fee
    }
}

/// Size and price an entry at `mid`. `None` when ATR is unusable or the
/// slice cannot afford any quantity.
pub fn plan_entry(cash: f64, mid: f64, atr: f64, config: &CostConfig) -> Option<EntryOrder> {
    let fee_rate = config.effective_fee_rate();
    let execution_price = entry_execution_price(mid, config.effective_slippage());
    let raw = size_by_risk(cash, config.risk_pct, atr);
    let quantity = fit_to_cash(raw, execution_price, fee_rate, cash);
    if !(quantity.is_finite() && quantity > 0.0) {
        return None;
    }
    let notional = quantity * execution_price;
    Some(EntryOrder {
        quantity,
        execution_price,
        notional,
        fee: fee(notional, fee_rate),
    })
}

/// A priced exit together with the profit-gate verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitOrder {
    pub execution_price: f64,
    pub proceeds: f64,
    pub fee: f64,
    /// Round-trip P&L after entry and exit fees.
    pub net_pnl: f64,
    pub permitted: bool,
}

/// Price an exit of `quantity` units entered at `entry_price`, having
/// already paid `entry_fee`.
pub fn plan_exit(
    entry_price: f64,
    quantity: f64,
    entry_fee: f64,
    mid: f64,
    config: &CostConfig,
) -> ExitOrder {
    let execution_price = exit_execution_price(mid, config.effective_slippage());
    let proceeds = quantity * execution_price;
    let exit_fee = fee(proceeds, config.effective_fee_rate());
    let fee_total = entry_fee + exit_fee;
    let permitted = !config.realistic_costs
        || profit_ok(
            entry_price,
            execution_price,
            fee_total,
            quantity,
            config.min_profit_pct,
            config.stop_loss_floor_pct,
        );
    ExitOrder {
        execution_price,
        proceeds,
        fee: exit_fee,
        net_pnl: (execution_price - entry_price) * quantity - fee_total,
        permitted,
    }
}
