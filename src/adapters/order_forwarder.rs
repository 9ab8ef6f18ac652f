//! Non-blocking bridge to an external execution venue.
//!
//! The driver hands orders to [`OrderForwarder::submit`], which only enqueues
//! them. A worker thread owns the real venue and submits each order in turn,
//! retrying retryable failures with exponential backoff. Whatever the venue
//! answers, the simulated state has already been updated.

use crate::domain::error::SlicetraderError;
use crate::ports::execution_port::{ExecutionPort, OrderAck, OrderRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Counters shared with the worker thread.
#[derive(Debug, Default)]
pub struct ForwarderStats {
    pub queued: AtomicU64,
    pub acknowledged: AtomicU64,
    pub failed: AtomicU64,
    pub retries: AtomicU64,
}

enum Command {
    Forward(OrderRequest),
    Shutdown,
}

pub struct OrderForwarder {
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<ForwarderStats>,
}

impl OrderForwarder {
    pub fn spawn(
        venue: Box<dyn ExecutionPort + Send>,
        policy: RetryPolicy,
    ) -> Result<Self, SlicetraderError> {
        let (tx, rx) = mpsc::channel();
        let stats = Arc::new(ForwarderStats::default());
        let worker_stats = Arc::clone(&stats);

        let worker = thread::Builder::new()
            .name("order-forwarder".into())
            .spawn(move || forward_loop(rx, venue, policy, worker_stats))?;

        Ok(Self {
            tx,
            worker: Some(worker),
            stats,
        })
    }

    pub fn stats(&self) -> Arc<ForwarderStats> {
        Arc::clone(&self.stats)
    }

    /// Stop accepting orders, wait for the queue to drain and join the worker.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.tx.send(Command::Shutdown);
        if worker.join().is_err() {
            error!("order forwarder thread panicked");
        }
    }
}

impl ExecutionPort for OrderForwarder {
    fn submit(&mut self, order: &OrderRequest) -> Result<OrderAck, SlicetraderError> {
        if self.worker.is_none() {
            return Err(SlicetraderError::ExternalExecution {
                symbol: order.symbol.clone(),
                reason: "forwarder is shut down".to_string(),
                retryable: false,
            });
        }
        self.tx
            .send(Command::Forward(order.clone()))
            .map_err(|_| SlicetraderError::ExternalExecution {
                symbol: order.symbol.clone(),
                reason: "forwarder worker is gone".to_string(),
                retryable: false,
            })?;
        let n = self.stats.queued.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(OrderAck {
            order_id: format!("queued-{n}"),
            filled_price: None,
        })
    }
}

impl Drop for OrderForwarder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn forward_loop(
    rx: Receiver<Command>,
    mut venue: Box<dyn ExecutionPort + Send>,
    policy: RetryPolicy,
    stats: Arc<ForwarderStats>,
) {
    loop {
        match rx.recv() {
            Ok(Command::Shutdown) | Err(_) => break,
            Ok(Command::Forward(order)) => {
                match submit_with_retry(venue.as_mut(), &order, policy, &stats) {
                    Ok(ack) => {
                        stats.acknowledged.fetch_add(1, Ordering::Relaxed);
                        info!(
                            order_id = %ack.order_id,
                            symbol = %order.symbol,
                            strategy = %order.strategy_id,
                            side = %order.side,
                            timestamp = %order.timestamp,
                            "order acknowledged"
                        );
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            symbol = %order.symbol,
                            strategy = %order.strategy_id,
                            side = %order.side,
                            timestamp = %order.timestamp,
                            error = %e,
                            "order failed, simulated state unaffected"
                        );
                    }
                }
            }
        }
    }
    debug!("order forwarder stopped");
}

fn submit_with_retry(
    venue: &mut dyn ExecutionPort,
    order: &OrderRequest,
    policy: RetryPolicy,
    stats: &ForwarderStats,
) -> Result<OrderAck, SlicetraderError> {
    let mut attempt = 0;
    loop {
        match venue.submit(order) {
            Ok(ack) => return Ok(ack),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.base_delay * 2u32.pow(attempt);
                attempt += 1;
                stats.retries.fetch_add(1, Ordering::Relaxed);
                debug!(symbol = %order.symbol, attempt, error = %e, "retrying order");
                thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
