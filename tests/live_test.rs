//! Live runner tests against a growable in-memory market.

mod common;

use common::*;
use slicetrader::domain::driver::{DriverConfig, SimulationDriver};
use slicetrader::live::{LiveConfig, LiveRunner};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn live_config(lookback_bars: usize) -> LiveConfig {
    LiveConfig {
        timeframe: "4h".into(),
        poll_interval: Duration::from_millis(10),
        lookback_bars,
    }
}

fn driver(store: &Arc<MemoryStore>) -> SimulationDriver {
    let config = DriverConfig {
        save_every_bars: Some(1),
        ..DriverConfig::default()
    };
    let strategy = ScriptedStrategy::new("SCRIPTED", 1.0).enter_at(&[15]).exit_at(&[32]);
    SimulationDriver::new(config, vec![strategy.boxed()], store.clone()).unwrap()
}

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn last_processed(store: &MemoryStore) -> Option<chrono::NaiveDateTime> {
    store.last().and_then(|c| c.last_processed_timestamp)
}

#[test]
fn processes_backlog_then_new_bars() {
    let store = Arc::new(MemoryStore::default());
    let market = MockMarketData::with_bars(flat_bars(30));
    let handle =
        LiveRunner::spawn(driver(&store), Box::new(market.clone()), live_config(200)).unwrap();

    wait_for("backlog", || last_processed(&store) == Some(ts(29)));
    assert!(handle.is_running());

    market.push(make_bar(30, 101.0));
    market.push(make_bar(31, 102.0));
    wait_for("new bars", || last_processed(&store) == Some(ts(31)));

    let report = handle.stop().unwrap();
    assert_eq!(report.bars_processed, 32);
    assert_eq!(report.fetch_errors, 0);
    assert!(report.polls >= 2);
    assert!(report.summary.checkpoint_saved);
    assert_eq!(report.summary.total_trades, 1);
}

#[test]
fn fetch_failures_are_retried_at_next_poll() {
    let store = Arc::new(MemoryStore::default());
    let market = MockMarketData::with_bars(flat_bars(20));
    market.set_failing(true);
    let handle =
        LiveRunner::spawn(driver(&store), Box::new(market.clone()), live_config(200)).unwrap();

    wait_for("failed polls", || market.fetch_count() >= 3);
    market.set_failing(false);
    wait_for("recovery", || last_processed(&store) == Some(ts(19)));

    let report = handle.stop().unwrap();
    assert!(report.fetch_errors >= 3);
    assert_eq!(report.bars_processed, 20);
}

#[test]
fn lookback_limits_the_first_window() {
    let store = Arc::new(MemoryStore::default());
    let market = MockMarketData::with_bars(flat_bars(30));
    let handle =
        LiveRunner::spawn(driver(&store), Box::new(market.clone()), live_config(5)).unwrap();

    wait_for("window", || last_processed(&store) == Some(ts(29)));
    let report = handle.stop().unwrap();

    assert_eq!(report.bars_processed, 5);
    // too few bars for ATR, so no entry
    assert_eq!(report.summary.total_trades, 0);
}

#[test]
fn cleared_stop_signal_ends_the_loop() {
    let store = Arc::new(MemoryStore::default());
    let market = MockMarketData::with_bars(flat_bars(10));
    let handle =
        LiveRunner::spawn(driver(&store), Box::new(market), live_config(200)).unwrap();

    wait_for("first poll", || last_processed(&store) == Some(ts(9)));
    let saves_before = store.save_count();
    handle.stop_signal().store(false, Ordering::Release);

    let report = handle.wait().unwrap();
    assert_eq!(report.bars_processed, 10);
    assert_eq!(store.save_count(), saves_before + 1);
}

#[test]
fn restarted_runner_only_processes_new_bars() {
    let store = Arc::new(MemoryStore::default());
    let market = MockMarketData::with_bars(flat_bars(20));

    let first =
        LiveRunner::spawn(driver(&store), Box::new(market.clone()), live_config(200)).unwrap();
    wait_for("first session", || last_processed(&store) == Some(ts(19)));
    let first_report = first.stop().unwrap();
    assert_eq!(first_report.bars_processed, 20);
    assert_eq!(first_report.summary.total_trades, 1);

    for i in 20..35 {
        market.push(make_bar(i, 104.0));
    }
    let second =
        LiveRunner::spawn(driver(&store), Box::new(market.clone()), live_config(200)).unwrap();
    wait_for("second session", || last_processed(&store) == Some(ts(34)));
    let second_report = second.stop().unwrap();

    assert_eq!(second_report.bars_processed, 15);
    // the entry from the first session is closed at bar 32
    assert_eq!(second_report.summary.total_trades, 2);
    assert!(second_report.summary.checkpoint_saved);
}
