//! Resumable simulation driver.
//!
//! Walks time-ordered bars, asks each strategy for signals, prices orders
//! through the cost model, applies them to the ledger and slice cash, and
//! checkpoints at a configurable cadence. On start it resumes from the last
//! committed checkpoint and only processes bars newer than its cursor, so a
//! decision is applied to local state exactly once across restarts.

use chrono::{NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::checkpoint::RunCheckpoint;
use super::cost_model::{self, CostConfig};
use super::error::SlicetraderError;
use super::indicator_helpers::calc_atr;
use super::ledger::PositionLedger;
use super::metrics::{EquityPoint, RunSummary, SummaryInput};
use super::ohlcv::OhlcvBar;
use super::position::Position;
use super::slice::{validate_allocations, StrategySlice};
use super::strategy::Strategy;
use super::trade::{EquitySnapshot, TradeAction, TradeRecord};
use crate::ports::checkpoint_port::CheckpointPort;
use crate::ports::execution_port::{ExecutionPort, OrderRequest};
use crate::ports::sink_port::TradeSink;

/// Metadata key holding cash of checkpointed slices no longer configured.
pub const DROPPED_SLICES_KEY: &str = "dropped_slices";

/// Upper bound on the default bar cadence between checkpoints.
const MAX_DEFAULT_SAVE_FREQUENCY: usize = 100;

/// Default checkpoint cadence: `max(1, min(100, total_bars / 10))`.
pub fn default_save_frequency(total_bars: usize) -> usize {
    (total_bars / 10).clamp(1, MAX_DEFAULT_SAVE_FREQUENCY)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub symbol: String,
    pub initial_capital: f64,
    pub costs: CostConfig,
    pub atr_period: usize,
    /// Bars between checkpoints; defaults to [`default_save_frequency`].
    pub save_every_bars: Option<usize>,
    /// Wall-clock time between checkpoints, checked after each bar.
    pub save_interval: Option<Duration>,
    pub paper_trading: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            symbol: "BTCUSDT".to_string(),
            initial_capital: 4000.0,
            costs: CostConfig::default(),
            atr_period: 14,
            save_every_bars: None,
            save_interval: None,
            paper_trading: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Resuming,
    Fresh,
    Running,
    Checkpointing,
    Complete,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::Resuming => "resuming",
            RunPhase::Fresh => "fresh",
            RunPhase::Running => "running",
            RunPhase::Checkpointing => "checkpointing",
            RunPhase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Outcome of feeding one bar window to [`SimulationDriver::step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub processed: usize,
    pub already_processed: usize,
    pub malformed: usize,
}

pub struct SimulationDriver {
    config: DriverConfig,
    strategies: Vec<Box<dyn Strategy + Send>>,
    store: Arc<dyn CheckpointPort>,
    sinks: Vec<Box<dyn TradeSink + Send>>,
    execution: Option<Box<dyn ExecutionPort + Send>>,
    phase: RunPhase,
    initial_capital: f64,
    ledger: PositionLedger,
    /// Slices as funded from the configured capital, cloned on a fresh start.
    funded: Vec<StrategySlice>,
    slices: Vec<StrategySlice>,
    slice_equity: BTreeMap<String, f64>,
    first_timestamp: Option<NaiveDateTime>,
    last_processed: Option<NaiveDateTime>,
    total_trades: u64,
    total_fees_paid: f64,
    trades: Vec<TradeRecord>,
    metadata: BTreeMap<String, Value>,
    equity_curve: Vec<EquityPoint>,
    bars_since_save: usize,
    last_save: Instant,
}

impl SimulationDriver {
    pub fn new(
        config: DriverConfig,
        strategies: Vec<Box<dyn Strategy + Send>>,
        store: Arc<dyn CheckpointPort>,
    ) -> Result<Self, SlicetraderError> {
        if config.symbol.trim().is_empty() {
            return Err(SlicetraderError::invalid("symbol must not be empty"));
        }
        if !(config.initial_capital.is_finite() && config.initial_capital > 0.0) {
            return Err(SlicetraderError::invalid(format!(
                "initial_capital must be positive, got {}",
                config.initial_capital
            )));
        }
        if strategies.is_empty() {
            return Err(SlicetraderError::invalid("at least one strategy is required"));
        }
        validate_allocations(strategies.iter().map(|s| (s.strategy_id(), s.allocation())))?;

        let mut ids: Vec<&str> = strategies.iter().map(|s| s.strategy_id()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(SlicetraderError::invalid("strategy ids must be unique"));
        }

        let initial_capital = config.initial_capital;
        let funded = strategies
            .iter()
            .map(|s| StrategySlice::fund(s.strategy_id(), s.allocation(), initial_capital))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SimulationDriver {
            config,
            strategies,
            store,
            sinks: Vec::new(),
            execution: None,
            phase: RunPhase::Init,
            initial_capital,
            ledger: PositionLedger::new(),
            funded,
            slices: Vec::new(),
            slice_equity: BTreeMap::new(),
            first_timestamp: None,
            last_processed: None,
            total_trades: 0,
            total_fees_paid: 0.0,
            trades: Vec::new(),
            metadata: BTreeMap::new(),
            equity_curve: Vec::new(),
            bars_since_save: 0,
            last_save: Instant::now(),
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn TradeSink + Send>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_execution(mut self, execution: Box<dyn ExecutionPort + Send>) -> Self {
        self.execution = Some(execution);
        self
    }

    /// Resume from the last checkpoint or start fresh.
    pub fn initialize(&mut self) -> RunPhase {
        self.phase = RunPhase::Init;
        let phase = match self.store.load() {
            Some(checkpoint) => match self.restore(checkpoint) {
                Ok(()) => RunPhase::Resuming,
                Err(e) => {
                    error!(error = %e, "checkpoint could not be restored, starting fresh");
                    self.start_fresh();
                    RunPhase::Fresh
                }
            },
            None => {
                self.start_fresh();
                RunPhase::Fresh
            }
        };
        self.phase = phase;

        info!(
            phase = %phase,
            symbol = %self.config.symbol,
            last_processed = ?self.last_processed,
            open_positions = self.ledger.query(None, None).len(),
            "driver initialized"
        );

        if phase == RunPhase::Fresh {
            if let Err(e) = self.checkpoint() {
                error!(error = %e, "initial checkpoint failed, will retry at next cadence");
            }
        }
        self.last_save = Instant::now();
        phase
    }

    fn start_fresh(&mut self) {
        self.initial_capital = self.config.initial_capital;
        self.ledger = PositionLedger::new();
        self.slices = self.funded.clone();
        self.first_timestamp = None;
        self.last_processed = None;
        self.total_trades = 0;
        self.total_fees_paid = 0.0;
        self.trades.clear();
        self.metadata.clear();
        self.equity_curve.clear();
        self.refresh_slice_equity();
    }

    fn restore(&mut self, mut checkpoint: RunCheckpoint) -> Result<(), SlicetraderError> {
        if let Some(symbol) = checkpoint.metadata.get("symbol").and_then(Value::as_str) {
            if symbol != self.config.symbol {
                return Err(SlicetraderError::invalid(format!(
                    "checkpoint belongs to symbol {symbol}, configured symbol is {}",
                    self.config.symbol
                )));
            }
        }
        let ledger = PositionLedger::restore(checkpoint.positions)?;

        if (checkpoint.initial_capital - self.config.initial_capital).abs() > f64::EPSILON {
            warn!(
                checkpoint = checkpoint.initial_capital,
                configured = self.config.initial_capital,
                "initial capital differs from checkpoint, keeping checkpoint value"
            );
        }

        let mut dropped = match checkpoint.metadata.remove(DROPPED_SLICES_KEY) {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };

        let mut slices = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let id = strategy.strategy_id();
            let mut slice =
                StrategySlice::fund(id, strategy.allocation(), checkpoint.initial_capital)?;
            let parked = dropped.remove(id).and_then(|v| v.as_f64());
            match checkpoint.strategy_cash.remove(id) {
                Some(cash) => slice.cash_balance = cash,
                None => match parked {
                    Some(cash) => {
                        info!(strategy = id, cash, "strategy re-enabled, restoring its dropped cash");
                        slice.cash_balance = cash;
                    }
                    None => {
                        warn!(strategy = id, "strategy missing from checkpoint, funding a new slice");
                    }
                },
            }
            slices.push(slice);
        }

        for (id, cash) in checkpoint.strategy_cash {
            let open_positions = ledger.query(None, Some(&id)).len();
            warn!(
                strategy = %id,
                cash,
                open_positions,
                "checkpointed strategy is no longer configured, keeping its cash in metadata"
            );
            dropped.insert(id, Value::from(cash));
        }
        if !dropped.is_empty() {
            checkpoint
                .metadata
                .insert(DROPPED_SLICES_KEY.to_string(), Value::Object(dropped));
        }

        self.initial_capital = checkpoint.initial_capital;
        self.ledger = ledger;
        self.slices = slices;
        self.first_timestamp = checkpoint.first_timestamp;
        self.last_processed = checkpoint.last_processed_timestamp;
        self.total_trades = checkpoint.total_trades;
        self.total_fees_paid = checkpoint.total_fees_paid;
        self.trades = checkpoint.trades;
        self.equity_curve = checkpoint.equity_history;
        self.metadata = checkpoint.metadata;
        self.refresh_slice_equity();
        Ok(())
    }

    fn refresh_slice_equity(&mut self) {
        self.slice_equity = self
            .slices
            .iter()
            .map(|s| {
                (
                    s.strategy_id.clone(),
                    s.cash_balance + self.ledger.market_value(&s.strategy_id),
                )
            })
            .collect();
    }

    /// Process every bar in `window` newer than the cursor.
    ///
    /// Strategies and ATR are precomputed over the whole (well-ordered)
    /// window, so callers should pass history along with the new bars.
    pub fn step(&mut self, window: &[OhlcvBar]) -> StepReport {
        if self.phase == RunPhase::Init {
            self.initialize();
        }
        self.phase = RunPhase::Running;

        let mut report = StepReport::default();
        let bars = self.well_ordered(window, &mut report);
        if bars.is_empty() {
            return report;
        }

        let atr = calc_atr(&bars, self.config.atr_period);
        for strategy in self.strategies.iter_mut() {
            strategy.precompute(&bars);
        }

        let cadence = self
            .config
            .save_every_bars
            .unwrap_or_else(|| default_save_frequency(bars.len()))
            .max(1);

        for (i, bar) in bars.iter().enumerate() {
            if self.last_processed.is_some_and(|last| bar.timestamp <= last) {
                report.already_processed += 1;
                continue;
            }
            self.process_bar(bar, atr.at(i));
            report.processed += 1;
            self.bars_since_save += 1;

            let interval_due = self
                .config
                .save_interval
                .is_some_and(|interval| self.last_save.elapsed() >= interval);
            if self.bars_since_save >= cadence || interval_due {
                self.scheduled_checkpoint();
            }
        }

        debug!(
            processed = report.processed,
            already_processed = report.already_processed,
            malformed = report.malformed,
            "step finished"
        );
        report
    }

    /// Drop bars that do not advance strictly in time.
    fn well_ordered(&self, window: &[OhlcvBar], report: &mut StepReport) -> Vec<OhlcvBar> {
        let mut bars: Vec<OhlcvBar> = Vec::with_capacity(window.len());
        for bar in window {
            if let Some(prev) = bars.last() {
                if bar.timestamp <= prev.timestamp {
                    warn!(
                        symbol = %bar.symbol,
                        timestamp = %bar.timestamp,
                        previous = %prev.timestamp,
                        "skipping out-of-order or duplicate bar"
                    );
                    report.malformed += 1;
                    continue;
                }
            }
            bars.push(bar.clone());
        }
        bars
    }

    fn process_bar(&mut self, bar: &OhlcvBar, atr: Option<f64>) {
        let first_bar = self.first_timestamp.is_none();
        if first_bar {
            self.first_timestamp = Some(bar.timestamp);
        }

        if bar.has_usable_price() {
            let prices = HashMap::from([(self.config.symbol.clone(), bar.close)]);
            self.ledger.mark_to_market(&prices);

            for k in 0..self.strategies.len() {
                let strategy_id = self.slices[k].strategy_id.clone();
                let open = self
                    .ledger
                    .query(Some(&self.config.symbol), Some(&strategy_id))
                    .first()
                    .map(|p| (*p).clone());

                match open {
                    None => {
                        if self.strategies[k].entry_signal(bar.timestamp) {
                            self.try_enter(k, bar, atr);
                        }
                    }
                    Some(position) => {
                        if self.strategies[k].exit_signal(bar.timestamp, position.entry_price) {
                            self.try_exit(k, &position, bar);
                        }
                    }
                }
            }

            self.ledger.mark_to_market(&prices);
            self.refresh_slice_equity();
        } else {
            debug!(
                symbol = %bar.symbol,
                timestamp = %bar.timestamp,
                "no usable price, carrying equity forward"
            );
        }

        let mut total: f64 = self.slice_equity.values().sum();
        if !total.is_finite() && first_bar {
            total = self.initial_capital;
        }

        self.last_processed = Some(bar.timestamp);
        self.equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            equity: total,
        });

        let snapshot = EquitySnapshot {
            timestamp: bar.timestamp,
            total_equity: total,
            slice_equity: self.slice_equity.clone(),
            open_positions: self.ledger.query(None, None).len(),
            unrealized_pnl: self.ledger.unrealized_pnl(),
        };
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.record_equity(&snapshot) {
                warn!(error = %e, "sink rejected equity snapshot");
            }
        }
    }

    fn try_enter(&mut self, k: usize, bar: &OhlcvBar, atr: Option<f64>) {
        let strategy_id = self.slices[k].strategy_id.clone();
        let Some(atr) = atr.filter(|a| *a > 0.0) else {
            debug!(strategy = %strategy_id, timestamp = %bar.timestamp, "entry skipped, ATR unavailable");
            return;
        };
        let Some(order) = cost_model::plan_entry(
            self.slices[k].cash_balance,
            bar.close,
            atr,
            &self.config.costs,
        ) else {
            debug!(strategy = %strategy_id, timestamp = %bar.timestamp, "entry skipped, insufficient cash");
            return;
        };

        if let Err(e) = self.slices[k].debit(order.total_cost()) {
            warn!(strategy = %strategy_id, error = %e, "entry aborted");
            return;
        }
        let id = match self.ledger.open(
            &self.config.symbol,
            &strategy_id,
            order.quantity,
            order.execution_price,
            bar.timestamp,
            None,
        ) {
            Ok(id) => id,
            Err(e) => {
                warn!(strategy = %strategy_id, timestamp = %bar.timestamp, error = %e, "entry rejected by ledger");
                if let Err(e) = self.slices[k].credit(order.total_cost()) {
                    error!(strategy = %strategy_id, error = %e, "failed to refund slice");
                }
                return;
            }
        };
        if let Err(e) = self.ledger.add_fees(&id, order.fee) {
            warn!(position = %id, error = %e, "could not attribute entry fee");
        }

        info!(
            symbol = %self.config.symbol,
            strategy = %strategy_id,
            timestamp = %bar.timestamp,
            quantity = order.quantity,
            price = order.execution_price,
            fee = order.fee,
            "opened position"
        );

        self.record_trade(TradeRecord {
            timestamp: bar.timestamp,
            symbol: self.config.symbol.clone(),
            strategy_id,
            action: TradeAction::Buy,
            price: order.execution_price,
            quantity: order.quantity,
            fee: order.fee,
            pnl: 0.0,
            paper_traded: self.config.paper_trading,
        });
    }

    fn try_exit(&mut self, k: usize, position: &Position, bar: &OhlcvBar) {
        let strategy_id = self.slices[k].strategy_id.clone();
        let order = cost_model::plan_exit(
            position.entry_price,
            position.quantity,
            position.fees_paid,
            bar.close,
            &self.config.costs,
        );
        if !order.permitted {
            debug!(
                strategy = %strategy_id,
                timestamp = %bar.timestamp,
                net_pnl = order.net_pnl,
                "exit held back by profit gate"
            );
            return;
        }

        let id = position.id();
        if let Err(e) = self.ledger.close(&id, order.execution_price, bar.timestamp) {
            warn!(position = %id, error = %e, "exit rejected by ledger");
            return;
        }
        if let Err(e) = self.slices[k].credit(order.proceeds - order.fee) {
            error!(strategy = %strategy_id, error = %e, "failed to credit exit proceeds");
        }

        info!(
            symbol = %self.config.symbol,
            strategy = %strategy_id,
            timestamp = %bar.timestamp,
            quantity = position.quantity,
            price = order.execution_price,
            pnl = order.net_pnl,
            "closed position"
        );

        self.record_trade(TradeRecord {
            timestamp: bar.timestamp,
            symbol: self.config.symbol.clone(),
            strategy_id,
            action: TradeAction::Sell,
            price: order.execution_price,
            quantity: position.quantity,
            fee: order.fee,
            pnl: order.net_pnl,
            paper_traded: self.config.paper_trading,
        });
    }

    fn record_trade(&mut self, trade: TradeRecord) {
        self.total_trades += 1;
        self.total_fees_paid += trade.fee;

        if let Some(execution) = self.execution.as_mut() {
            let request = OrderRequest {
                symbol: trade.symbol.clone(),
                strategy_id: trade.strategy_id.clone(),
                side: trade.action,
                quantity: trade.quantity,
                price: trade.price,
                timestamp: trade.timestamp,
            };
            if let Err(e) = execution.submit(&request) {
                warn!(
                    symbol = %trade.symbol,
                    strategy = %trade.strategy_id,
                    error = %e,
                    "order forwarding failed, simulated state kept"
                );
            }
        }

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.record_trade(&trade) {
                warn!(error = %e, "sink rejected trade");
            }
        }
        self.trades.push(trade);
    }

    fn scheduled_checkpoint(&mut self) {
        if let Err(e) = self.checkpoint() {
            error!(error = %e, "checkpoint failed, will retry at next cadence");
        }
        self.bars_since_save = 0;
        self.last_save = Instant::now();
    }

    /// Snapshot of the current run state.
    pub fn to_checkpoint(&self) -> RunCheckpoint {
        let mut metadata = self.metadata.clone();
        metadata.insert("symbol".to_string(), Value::String(self.config.symbol.clone()));

        let mut checkpoint = RunCheckpoint::fresh(
            self.initial_capital,
            self.slices
                .iter()
                .map(|s| (s.strategy_id.clone(), s.cash_balance))
                .collect(),
            Utc::now().naive_utc(),
        );
        checkpoint.first_timestamp = self.first_timestamp;
        checkpoint.last_processed_timestamp = self.last_processed;
        checkpoint.positions = self.ledger.snapshot();
        checkpoint.total_trades = self.total_trades;
        checkpoint.total_fees_paid = self.total_fees_paid;
        checkpoint.trades = self.trades.clone();
        checkpoint.equity_history = self.equity_curve.clone();
        checkpoint.metadata = metadata;
        checkpoint
    }

    /// Persist the current state now.
    pub fn checkpoint(&mut self) -> Result<(), SlicetraderError> {
        let previous = self.phase;
        self.phase = RunPhase::Checkpointing;
        let result = self.store.save(&self.to_checkpoint());
        self.phase = previous;
        if result.is_ok() {
            debug!(last_processed = ?self.last_processed, "checkpoint saved");
        }
        result
    }

    /// Final save, sink flush and summary.
    pub fn complete(&mut self) -> RunSummary {
        if self.phase == RunPhase::Init {
            self.initialize();
        }
        let checkpoint_saved = match self.checkpoint() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "final checkpoint failed");
                false
            }
        };
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.flush() {
                warn!(error = %e, "sink flush failed");
            }
        }
        self.phase = RunPhase::Complete;

        let summary = self.summary(checkpoint_saved);
        info!(
            final_equity = summary.final_equity,
            total_return = summary.total_return,
            total_trades = summary.total_trades,
            "run complete"
        );
        summary
    }

    /// Resume or start, process all bars, then complete.
    pub fn run(&mut self, bars: &[OhlcvBar]) -> RunSummary {
        if self.phase == RunPhase::Init {
            self.initialize();
        }
        self.step(bars);
        self.complete()
    }

    pub fn summary(&self, checkpoint_saved: bool) -> RunSummary {
        RunSummary::compute(SummaryInput {
            initial_capital: self.initial_capital,
            final_equity: self.total_equity(),
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_processed,
            equity_curve: &self.equity_curve,
            trades: &self.trades,
            total_trades: self.total_trades,
            total_fees_paid: self.total_fees_paid,
            slices: self
                .slices
                .iter()
                .map(|s| {
                    let equity = self
                        .slice_equity
                        .get(&s.strategy_id)
                        .copied()
                        .unwrap_or(s.cash_balance);
                    (s.strategy_id.clone(), s.allocation, equity)
                })
                .collect(),
            checkpoint_saved,
        })
    }

    pub fn total_equity(&self) -> f64 {
        self.slice_equity.values().sum()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn slices(&self) -> &[StrategySlice] {
        &self.slices
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn last_processed(&self) -> Option<NaiveDateTime> {
        self.last_processed
    }

    pub fn total_fees_paid(&self) -> f64 {
        self.total_fees_paid
    }

    pub fn store(&self) -> Arc<dyn CheckpointPort> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}
