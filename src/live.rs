//! Live polling loop.
//!
//! A background thread owns the driver. Each poll fetches a look-back window
//! of recent bars and steps the driver over it; bars already processed are
//! skipped by the driver's cursor, so overlapping windows are harmless.
//! [`LiveHandle::stop`] is cooperative: the bar in flight always completes,
//! then the thread writes a final checkpoint and exits.

use crate::domain::driver::SimulationDriver;
use crate::domain::error::SlicetraderError;
use crate::domain::metrics::RunSummary;
use crate::ports::checkpoint_port::CheckpointPort;
use crate::ports::data_port::MarketDataPort;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Upper bound on how long a stop request waits for the sleeping poller.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub timeframe: String,
    pub poll_interval: Duration,
    pub lookback_bars: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            timeframe: "4h".to_string(),
            poll_interval: Duration::from_secs(60),
            lookback_bars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveReport {
    pub polls: u64,
    pub bars_processed: usize,
    pub fetch_errors: u64,
    pub summary: RunSummary,
}

pub struct LiveHandle {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<LiveReport>>,
    store: Arc<dyn CheckpointPort>,
}

pub struct LiveRunner;

impl LiveRunner {
    pub fn spawn(
        driver: SimulationDriver,
        market_data: Box<dyn MarketDataPort + Send>,
        config: LiveConfig,
    ) -> Result<LiveHandle, SlicetraderError> {
        let running = Arc::new(AtomicBool::new(true));
        let store = driver.store();
        let flag = Arc::clone(&running);

        let worker = thread::Builder::new()
            .name("live-runner".into())
            .spawn(move || live_loop(driver, market_data, config, flag))?;

        Ok(LiveHandle {
            running,
            worker: Some(worker),
            store,
        })
    }
}

impl LiveHandle {
    /// Shared store, for read-only `load()` from the foreground.
    pub fn store(&self) -> Arc<dyn CheckpointPort> {
        Arc::clone(&self.store)
    }

    /// Flag the loop polls; clearing it requests a stop.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Request a stop and wait for the final checkpoint.
    pub fn stop(mut self) -> Option<LiveReport> {
        self.running.store(false, Ordering::Release);
        self.join_worker()
    }

    /// Wait until the loop exits on its own (e.g. after a Ctrl-C cleared the
    /// stop signal).
    pub fn wait(mut self) -> Option<LiveReport> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Option<LiveReport> {
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(report) => Some(report),
            Err(_) => {
                error!("live runner thread panicked");
                None
            }
        }
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.join_worker();
    }
}

fn live_loop(
    mut driver: SimulationDriver,
    market_data: Box<dyn MarketDataPort + Send>,
    config: LiveConfig,
    running: Arc<AtomicBool>,
) -> LiveReport {
    let phase = driver.initialize();
    let symbol = driver.config().symbol.clone();
    info!(
        symbol = %symbol,
        phase = %phase,
        timeframe = %config.timeframe,
        poll_secs = config.poll_interval.as_secs_f64(),
        "live runner started"
    );

    let mut polls = 0u64;
    let mut bars_processed = 0usize;
    let mut fetch_errors = 0u64;

    while running.load(Ordering::Acquire) {
        polls += 1;
        match market_data.latest_bars(&symbol, &config.timeframe, config.lookback_bars) {
            Ok(bars) if bars.is_empty() => {
                warn!(symbol = %symbol, "no bars returned, will retry at next poll");
            }
            Ok(bars) => {
                let report = driver.step(&bars);
                bars_processed += report.processed;
                if report.processed > 0 {
                    info!(
                        symbol = %symbol,
                        processed = report.processed,
                        equity = driver.total_equity(),
                        "processed new bars"
                    );
                }
            }
            Err(e) => {
                fetch_errors += 1;
                warn!(symbol = %symbol, error = %e, "market data fetch failed, will retry at next poll");
            }
        }
        sleep_while_running(&running, config.poll_interval);
    }

    info!(symbol = %symbol, "live runner stopping");
    let summary = driver.complete();
    LiveReport {
        polls,
        bars_processed,
        fetch_errors,
        summary,
    }
}

fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(STOP_CHECK_INTERVAL.min(deadline - now));
    }
}
