//! End-to-end driver tests against in-memory and on-disk stores.

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use slicetrader::adapters::state_store::StateStore;
use slicetrader::domain::driver::{DriverConfig, RunPhase, SimulationDriver, DROPPED_SLICES_KEY};
use slicetrader::domain::trade::TradeAction;
use slicetrader::ports::checkpoint_port::CheckpointPort;
use std::sync::Arc;

fn config(capital: f64) -> DriverConfig {
    DriverConfig {
        symbol: SYMBOL.to_string(),
        initial_capital: capital,
        ..DriverConfig::default()
    }
}

fn driver(
    config: DriverConfig,
    strategies: Vec<ScriptedStrategy>,
    store: Arc<dyn CheckpointPort>,
) -> SimulationDriver {
    SimulationDriver::new(
        config,
        strategies.into_iter().map(ScriptedStrategy::boxed).collect(),
        store,
    )
    .unwrap()
}

/// 20 flat bars at 100, then one bar at `exit_close`.
fn entry_exit_bars(exit_close: f64) -> Vec<OhlcvBar> {
    let mut bars = flat_bars(20);
    bars.push(make_bar(20, exit_close));
    bars
}

mod scenarios {
    use super::*;

    #[test]
    fn entry_then_profitable_exit() {
        let store = Arc::new(MemoryStore::default());
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]).exit_at(&[20]);
        let mut d = driver(config(1000.0), vec![strategy], store);

        let summary = d.run(&entry_exit_bars(103.0));

        let trades = d.trades();
        assert_eq!(trades.len(), 2);

        let buy = &trades[0];
        assert_eq!(buy.action, TradeAction::Buy);
        assert_eq!(buy.timestamp, ts(15));
        assert_abs_diff_eq!(buy.price, 100.05, epsilon = 1e-9);
        assert_abs_diff_eq!(buy.quantity, 1.5, epsilon = 1e-9);
        assert_abs_diff_eq!(buy.fee, 0.150075, epsilon = 1e-9);
        assert_eq!(buy.pnl, 0.0);

        let sell = &trades[1];
        assert_eq!(sell.action, TradeAction::Sell);
        assert_abs_diff_eq!(sell.price, 102.9485, epsilon = 1e-9);
        assert_abs_diff_eq!(sell.fee, 0.154423, epsilon = 1e-6);
        assert_abs_diff_eq!(sell.pnl, 4.04325, epsilon = 1e-4);

        assert_abs_diff_eq!(d.slices()[0].cash_balance, 1004.04325, epsilon = 1e-4);
        assert_abs_diff_eq!(summary.final_equity, 1004.04325, epsilon = 1e-4);
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.trades_won, 1);
        assert!(d.ledger().query(None, None).is_empty());
    }

    #[test]
    fn profit_gate_holds_marginal_exit() {
        let store = Arc::new(MemoryStore::default());
        let mut cfg = config(1000.0);
        cfg.costs.min_profit_pct = 0.015;
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]).exit_at(&[20]);
        let mut d = driver(cfg, vec![strategy], store);

        d.run(&entry_exit_bars(100.3));

        assert_eq!(d.trades().len(), 1);
        let open = d.ledger().query(Some(SYMBOL), Some("SCRIPTED"));
        assert_eq!(open.len(), 1);
        assert_abs_diff_eq!(open[0].entry_price, 100.05, epsilon = 1e-9);
    }

    #[test]
    fn stop_loss_floor_releases_losing_exit() {
        let store = Arc::new(MemoryStore::default());
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]).exit_at(&[20]);
        let mut d = driver(config(1000.0), vec![strategy], store);

        d.run(&entry_exit_bars(90.0));

        assert_eq!(d.trades().len(), 2);
        assert!(d.trades()[1].pnl < 0.0);
        assert!(d.ledger().query(None, None).is_empty());
    }

    #[test]
    fn idealized_costs_trade_at_mid_without_fees() {
        let store = Arc::new(MemoryStore::default());
        let mut cfg = config(1000.0);
        cfg.costs.realistic_costs = false;
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]).exit_at(&[20]);
        let mut d = driver(cfg, vec![strategy], store);

        d.run(&entry_exit_bars(100.3));

        let trades = d.trades();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, 100.0);
        assert_eq!(trades[0].fee, 0.0);
        assert_abs_diff_eq!(trades[1].pnl, 0.45, epsilon = 1e-9);
        assert_eq!(d.total_fees_paid(), 0.0);
    }

    #[test]
    fn entry_needs_atr_warmup() {
        let store = Arc::new(MemoryStore::default());
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[3]);
        let mut d = driver(config(1000.0), vec![strategy], store);

        d.run(&flat_bars(20));

        assert!(d.trades().is_empty());
        assert_abs_diff_eq!(d.total_equity(), 1000.0, epsilon = 1e-12);
    }

    #[test]
    fn slices_trade_independently() {
        let store = Arc::new(MemoryStore::default());
        let a = ScriptedStrategy::new("A", 0.5).enter_at(&[15]).exit_at(&[20]);
        let b = ScriptedStrategy::new("B", 0.5);
        let mut d = driver(config(2000.0), vec![a, b], store);

        d.run(&entry_exit_bars(103.0));

        let slices = d.slices();
        assert_abs_diff_eq!(slices[0].cash_balance, 1004.04325, epsilon = 1e-4);
        assert_eq!(slices[1].cash_balance, 1000.0);
    }
}

mod resume {
    use super::*;

    fn strategies() -> Vec<ScriptedStrategy> {
        vec![
            ScriptedStrategy::new("SWING", 0.6)
                .enter_at(&[15, 45, 70])
                .exit_at(&[30, 58, 85]),
            ScriptedStrategy::new("HOLD", 0.3).enter_at(&[20]),
        ]
    }

    #[test]
    fn restart_after_completion_processes_nothing() {
        let store = Arc::new(MemoryStore::default());
        let bars = wave_bars(100);

        let mut first = driver(config(4000.0), strategies(), store.clone());
        let done = first.run(&bars);

        let mut second = driver(config(4000.0), strategies(), store.clone());
        assert_eq!(second.initialize(), RunPhase::Resuming);
        let report = second.step(&bars);
        assert_eq!(report.processed, 0);
        assert_eq!(report.already_processed, 100);

        let again = second.complete();
        assert_abs_diff_eq!(again.final_equity, done.final_equity, epsilon = 1e-9);
        assert_eq!(second.trades(), first.trades());
    }

    #[test]
    fn split_run_matches_single_run() {
        let bars = wave_bars(100);

        let single_store = Arc::new(MemoryStore::default());
        let mut single = driver(config(4000.0), strategies(), single_store);
        let whole = single.run(&bars);

        let split_store = Arc::new(MemoryStore::default());
        let mut part_one = driver(config(4000.0), strategies(), split_store.clone());
        part_one.run(&bars[..60]);
        assert_eq!(part_one.last_processed(), Some(ts(59)));

        let mut part_two = driver(config(4000.0), strategies(), split_store);
        let resumed = part_two.run(&bars);

        assert!(whole.total_trades > 0);
        assert_eq!(resumed.total_trades, whole.total_trades);
        assert_eq!(part_two.trades(), single.trades());
        assert_abs_diff_eq!(resumed.final_equity, whole.final_equity, epsilon = 1e-9);
        assert!(whole.max_drawdown > 0.0);
        assert_abs_diff_eq!(resumed.max_drawdown, whole.max_drawdown, epsilon = 1e-12);
        for (a, b) in part_two.slices().iter().zip(single.slices()) {
            assert_eq!(a.strategy_id, b.strategy_id);
            assert_abs_diff_eq!(a.cash_balance, b.cash_balance, epsilon = 1e-9);
        }
    }

    #[test]
    fn resume_through_state_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state/trading_state.json");
        let bars = wave_bars(100);

        let mut single = driver(
            config(4000.0),
            strategies(),
            Arc::new(MemoryStore::default()),
        );
        let whole = single.run(&bars);

        let mut part_one = driver(config(4000.0), strategies(), Arc::new(StateStore::new(&path)));
        part_one.run(&bars[..60]);
        assert!(path.exists());

        let mut part_two = driver(config(4000.0), strategies(), Arc::new(StateStore::new(&path)));
        assert_eq!(part_two.initialize(), RunPhase::Resuming);
        let resumed = part_two.run(&bars);

        assert_eq!(resumed.total_trades, whole.total_trades);
        assert_abs_diff_eq!(resumed.final_equity, whole.final_equity, epsilon = 1e-9);
        assert_abs_diff_eq!(resumed.max_drawdown, whole.max_drawdown, epsilon = 1e-12);
    }

    #[test]
    fn open_position_survives_restart() {
        let store = Arc::new(MemoryStore::default());
        let bars = wave_bars(40);

        let mut first = driver(config(4000.0), strategies(), store.clone());
        first.run(&bars[..25]);
        let open_before = first.ledger().query(None, None).len();
        assert_eq!(open_before, 2);

        let mut second = driver(config(4000.0), strategies(), store.clone());
        second.initialize();
        assert_eq!(second.ledger().query(None, None).len(), 2);
        second.run(&bars);
        assert_eq!(second.ledger().query(Some(SYMBOL), Some("SWING")).len(), 0);
        assert_eq!(second.ledger().query(Some(SYMBOL), Some("HOLD")).len(), 1);
    }

    #[test]
    fn checkpoint_of_another_symbol_starts_fresh() {
        let store = Arc::new(MemoryStore::default());
        let mut btc = driver(config(4000.0), strategies(), store.clone());
        btc.run(&wave_bars(40));
        assert!(!btc.ledger().query(Some(SYMBOL), None).is_empty());

        let mut eth_config = config(4000.0);
        eth_config.symbol = "ETHUSDT".to_string();
        let eth_bars: Vec<OhlcvBar> = wave_bars(60)
            .into_iter()
            .map(|mut bar| {
                bar.symbol = "ETHUSDT".to_string();
                bar
            })
            .collect();

        let mut eth = driver(eth_config, strategies(), store.clone());
        assert_eq!(eth.initialize(), RunPhase::Fresh);
        assert!(eth.ledger().query(None, None).is_empty());
        assert_eq!(eth.last_processed(), None);

        let report = eth.step(&eth_bars);
        assert_eq!(report.processed, 60);
        assert_eq!(report.already_processed, 0);
        assert!(eth.ledger().query(Some(SYMBOL), None).is_empty());

        let summary = eth.complete();
        assert_eq!(summary.total_trades, eth.trades().len() as u64);
        assert!(eth.trades().iter().all(|t| t.symbol == "ETHUSDT"));
        assert_eq!(store.last().unwrap().metadata["symbol"], "ETHUSDT");
    }

    #[test]
    fn removed_strategy_cash_is_parked_and_restored() {
        let store = Arc::new(MemoryStore::default());
        let mut first = driver(config(4000.0), strategies(), store.clone());
        first.run(&wave_bars(40));
        let hold_cash = first.slices()[1].cash_balance;
        assert_eq!(first.slices()[1].strategy_id, "HOLD");

        let swing_only: Vec<ScriptedStrategy> = strategies().into_iter().take(1).collect();
        let mut second = driver(config(4000.0), swing_only, store.clone());
        assert_eq!(second.initialize(), RunPhase::Resuming);
        second.complete();

        let saved = store.last().unwrap();
        assert!(!saved.strategy_cash.contains_key("HOLD"));
        assert_eq!(saved.metadata[DROPPED_SLICES_KEY]["HOLD"], hold_cash);
        // the open HOLD position stays in the ledger
        assert_eq!(second.ledger().query(Some(SYMBOL), Some("HOLD")).len(), 1);

        let mut third = driver(config(4000.0), strategies(), store.clone());
        assert_eq!(third.initialize(), RunPhase::Resuming);
        assert_eq!(third.slices()[1].cash_balance, hold_cash);
        third.complete();

        let saved = store.last().unwrap();
        assert_eq!(saved.strategy_cash["HOLD"], hold_cash);
        assert!(!saved.metadata.contains_key(DROPPED_SLICES_KEY));
    }
}

mod robustness {
    use super::*;

    #[test]
    fn default_cadence_saves_every_tenth_bar() {
        let store = Arc::new(MemoryStore::default());
        let mut d = driver(config(4000.0), vec![ScriptedStrategy::new("S", 1.0)], store.clone());
        let summary = d.run(&flat_bars(100));

        // fresh start + ten cadence saves + final
        assert_eq!(store.save_count(), 12);
        assert!(summary.checkpoint_saved);
        assert_eq!(store.last().unwrap().last_processed_timestamp, Some(ts(99)));
    }

    #[test]
    fn failing_store_does_not_stop_the_run() {
        let store = Arc::new(MemoryStore::default());
        store.set_failing(true);
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]).exit_at(&[20]);
        let mut d = driver(config(1000.0), vec![strategy], store.clone());

        let summary = d.run(&entry_exit_bars(103.0));

        assert!(!summary.checkpoint_saved);
        assert_eq!(summary.total_trades, 2);
        assert_eq!(d.phase(), RunPhase::Complete);
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn missing_price_carries_equity_forward() {
        let store = Arc::new(MemoryStore::default());
        let sink = RecordingSink::default();
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]);
        let mut bars = flat_bars(25);
        bars[18].close = f64::NAN;
        bars[19].close = 0.0;

        let mut d = driver(config(1000.0), vec![strategy], store).with_sink(Box::new(sink.clone()));
        d.run(&bars);

        let equity = sink.equity.lock().unwrap();
        assert_eq!(equity.len(), 25);
        assert!(equity.iter().all(|s| s.total_equity.is_finite()));
        assert_eq!(equity[18].total_equity, equity[17].total_equity);
        assert_eq!(equity[19].total_equity, equity[17].total_equity);
        assert_eq!(*sink.flushes.lock().unwrap(), 1);
    }

    #[test]
    fn out_of_order_bars_are_skipped() {
        let store = Arc::new(MemoryStore::default());
        let mut d = driver(config(1000.0), vec![ScriptedStrategy::new("S", 1.0)], store);
        let bars = vec![make_bar(0, 100.0), make_bar(1, 100.0), make_bar(1, 101.0), make_bar(0, 99.0), make_bar(2, 100.0)];

        let report = d.step(&bars);

        assert_eq!(report.processed, 3);
        assert_eq!(report.malformed, 2);
        assert_eq!(d.last_processed(), Some(ts(2)));
    }

    #[test]
    fn broken_sink_and_venue_do_not_affect_state() {
        let store = Arc::new(MemoryStore::default());
        let venue = FailingExecution::default();
        let mut cfg = config(1000.0);
        cfg.paper_trading = true;
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]).exit_at(&[20]);

        let mut d = driver(cfg, vec![strategy], store)
            .with_sink(Box::new(BrokenSink))
            .with_execution(Box::new(venue.clone()));
        let summary = d.run(&entry_exit_bars(103.0));

        assert_eq!(venue.attempts.lock().unwrap().len(), 2);
        assert_eq!(summary.total_trades, 2);
        assert!(d.trades().iter().all(|t| t.paper_traded));
        assert_abs_diff_eq!(summary.final_equity, 1004.04325, epsilon = 1e-4);
    }

    #[test]
    fn sink_sees_every_trade_and_bar() {
        let store = Arc::new(MemoryStore::default());
        let sink = RecordingSink::default();
        let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]).exit_at(&[20]);
        let mut d = driver(config(1000.0), vec![strategy], store).with_sink(Box::new(sink.clone()));

        d.run(&entry_exit_bars(103.0));

        assert_eq!(sink.trades.lock().unwrap().len(), 2);
        let equity = sink.equity.lock().unwrap();
        assert_eq!(equity.len(), 21);
        assert_eq!(equity[16].open_positions, 1);
        assert_eq!(equity[20].open_positions, 0);
    }
}
