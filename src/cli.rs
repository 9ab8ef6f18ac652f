//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_sink::CsvSink;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::order_forwarder::{OrderForwarder, RetryPolicy};
use crate::adapters::paper_execution::PaperExecution;
use crate::adapters::state_store::StateStore;
use crate::domain::config_validation::{
    run_bounds, strategy_allocations, validate_live_config, validate_run_config,
};
use crate::domain::cost_model::CostConfig;
use crate::domain::driver::{DriverConfig, SimulationDriver};
use crate::domain::error::SlicetraderError;
use crate::domain::metrics::RunSummary;
use crate::domain::strategy::{BuiltinStrategy, Strategy};
use crate::live::{LiveConfig, LiveRunner};
use crate::logging;
use crate::ports::checkpoint_port::CheckpointPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::MarketDataPort;
use crate::ports::sink_port::TradeSink;

pub const DEFAULT_STATE_PATH: &str = "state/trading_state.json";
pub const DEFAULT_TIMEFRAME: &str = "4h";

#[derive(Parser, Debug)]
#[command(name = "slicetrader", about = "Crash-safe multi-strategy trading simulator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest, resuming from the last checkpoint when one exists
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Archive any saved state and start over
        #[arg(long)]
        fresh: bool,
    },
    /// Poll for new bars and trade them until interrupted
    Live {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the last saved checkpoint
    Status {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Archive and delete saved state
    ClearState {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run { config, fresh } => run_backtest(&config, fresh),
        Command::Live { config } => run_live(&config),
        Command::Status { config } => run_status(&config),
        Command::ClearState { config } => run_clear_state(&config),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = SlicetraderError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn init_logging(config: &dyn ConfigPort) {
    let level = config
        .get_string("logging", "level")
        .unwrap_or_else(|| logging::DEFAULT_LEVEL.to_string());
    let file = config.get_string("logging", "file").map(PathBuf::from);
    if let Err(e) = logging::init(&level, file.as_deref()) {
        eprintln!("warning: logging not initialized: {e}");
    }
}

fn required_string(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, SlicetraderError> {
    config
        .get_string(section, key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SlicetraderError::ConfigMissing {
            section: section.into(),
            key: key.into(),
        })
}

pub fn build_cost_config(config: &dyn ConfigPort) -> CostConfig {
    let defaults = CostConfig::default();
    CostConfig {
        fee_rate: config.get_double("costs", "fee_rate", defaults.fee_rate),
        slippage_rate: config.get_double("costs", "slippage_rate", defaults.slippage_rate),
        risk_pct: config.get_double("costs", "risk_pct", defaults.risk_pct),
        min_profit_pct: config.get_double("costs", "min_profit_pct", defaults.min_profit_pct),
        stop_loss_floor_pct: config.get_double(
            "costs",
            "stop_loss_floor_pct",
            defaults.stop_loss_floor_pct,
        ),
        realistic_costs: config.get_bool("costs", "realistic_costs", defaults.realistic_costs),
    }
}

pub fn build_driver_config(config: &dyn ConfigPort) -> Result<DriverConfig, SlicetraderError> {
    let defaults = DriverConfig::default();
    let save_every_bars = config
        .has_key("state", "save_every_bars")
        .then(|| config.get_int("state", "save_every_bars", 1).max(1) as usize);
    let save_interval = config
        .has_key("state", "save_interval_secs")
        .then(|| Duration::try_from_secs_f64(config.get_double("state", "save_interval_secs", 0.0)).ok())
        .flatten()
        .filter(|d| !d.is_zero());

    Ok(DriverConfig {
        symbol: required_string(config, "run", "symbol")?,
        initial_capital: config.get_double("run", "initial_capital", defaults.initial_capital),
        costs: build_cost_config(config),
        atr_period: config.get_int("run", "atr_period", defaults.atr_period as i64).max(1) as usize,
        save_every_bars,
        save_interval,
        paper_trading: config.get_bool("run", "paper_trading", false),
    })
}

pub fn build_strategies(config: &dyn ConfigPort) -> Result<Vec<Box<dyn Strategy + Send>>, SlicetraderError> {
    strategy_allocations(config)?
        .into_iter()
        .map(|(id, allocation)| {
            BuiltinStrategy::from_id(&id, allocation).map(|s| Box::new(s) as Box<dyn Strategy + Send>)
        })
        .collect()
}

pub fn build_sinks(config: &dyn ConfigPort) -> Result<Vec<Box<dyn TradeSink + Send>>, SlicetraderError> {
    let mut sinks: Vec<Box<dyn TradeSink + Send>> = Vec::new();

    if let Some(csv) = CsvSink::from_config(config) {
        sinks.push(Box::new(csv));
    }

    if config.has_key("sink", "sqlite_path") {
        #[cfg(feature = "sqlite")]
        {
            use crate::adapters::sqlite_sink::SqliteSink;
            sinks.push(Box::new(SqliteSink::from_config(config)?));
        }
        #[cfg(not(feature = "sqlite"))]
        warn!("sqlite_path is set but the sqlite feature is disabled, ignoring");
    }

    Ok(sinks)
}

pub fn state_store(config: &dyn ConfigPort) -> StateStore {
    StateStore::new(
        config
            .get_string("state", "path")
            .unwrap_or_else(|| DEFAULT_STATE_PATH.to_string()),
    )
}

/// Archive any existing state and remove it, along with the configured trade
/// and equity outputs, so the next run starts fresh.
pub fn reset_state(config: &dyn ConfigPort, store: &StateStore) -> Result<(), SlicetraderError> {
    if let Some(archive) = store.archive()? {
        eprintln!("Archived previous state to {}", archive.display());
    }
    store.clear()?;
    store.cleanup_backups(archive_keep(config));

    if let Some(mut csv) = CsvSink::from_config(config) {
        csv.clear()?;
        info!(
            trades = %csv.trades_path().display(),
            equity = %csv.equity_path().display(),
            "cleared csv outputs"
        );
    }
    #[cfg(feature = "sqlite")]
    {
        if config.has_key("sink", "sqlite_path") {
            crate::adapters::sqlite_sink::SqliteSink::from_config(config)?.clear()?;
            info!("cleared sqlite outputs");
        }
    }
    Ok(())
}

/// Refuse to resume state saved for a different symbol.
pub fn check_state_symbol(store: &dyn CheckpointPort, symbol: &str) -> Result<(), SlicetraderError> {
    let Some(checkpoint) = store.load() else {
        return Ok(());
    };
    match checkpoint.metadata.get("symbol").and_then(|v| v.as_str()) {
        Some(saved) if saved != symbol => Err(SlicetraderError::ConfigInvalid {
            section: "run".into(),
            key: "symbol".into(),
            reason: format!(
                "saved state belongs to {saved}, not {symbol}; use --fresh, clear-state or another [state] path"
            ),
        }),
        _ => Ok(()),
    }
}

fn archive_keep(config: &dyn ConfigPort) -> usize {
    config.get_int("state", "archive_keep", 5).max(0) as usize
}

/// Driver with configured strategies, sinks and (when paper trading) a
/// paper venue behind the order forwarder.
pub fn build_driver(
    config: &dyn ConfigPort,
    driver_config: DriverConfig,
    store: Arc<dyn CheckpointPort>,
) -> Result<SimulationDriver, SlicetraderError> {
    let paper_trading = driver_config.paper_trading;
    let mut driver = SimulationDriver::new(driver_config, build_strategies(config)?, store)?;
    for sink in build_sinks(config)? {
        driver = driver.with_sink(sink);
    }
    if paper_trading {
        let forwarder = OrderForwarder::spawn(Box::new(PaperExecution::new()), RetryPolicy::default())?;
        driver = driver.with_execution(Box::new(forwarder));
    }
    Ok(driver)
}

/// Load bars, resume or start, process everything and complete.
pub fn run_backtest_pipeline(
    config: &dyn ConfigPort,
    data: &dyn MarketDataPort,
    store: Arc<dyn CheckpointPort>,
) -> Result<RunSummary, SlicetraderError> {
    let driver_config = build_driver_config(config)?;
    let symbol = driver_config.symbol.clone();
    let timeframe = config
        .get_string("run", "timeframe")
        .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string());
    let (start, end) = run_bounds(config)?;

    let bars = data.fetch_bars(&symbol, &timeframe, start, end)?;
    if bars.is_empty() {
        return Err(SlicetraderError::NoData { symbol });
    }
    eprintln!("Loaded {} bars for {} ({})", bars.len(), symbol, timeframe);

    let mut driver = build_driver(config, driver_config, store)?;
    let phase = driver.initialize();
    match driver.last_processed() {
        Some(last) => eprintln!("Start mode: {phase} (last processed {last})"),
        None => eprintln!("Start mode: {phase}"),
    }
    Ok(driver.run(&bars))
}

fn run_backtest(config_path: &Path, fresh: bool) -> ExitCode {
    // Stage 1: Load config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    init_logging(&adapter);

    // Stage 2: Validate
    if let Err(e) = validate_run_config(&adapter) {
        eprintln!("error: {e}");
        return (&e).into();
    }

    // Stage 3: Resolve state
    let store = state_store(&adapter);
    let start_fresh = fresh
        || adapter.get_bool("run", "clear_state", false)
        || !adapter.get_bool("run", "resume", true);
    let resolved = if start_fresh {
        reset_state(&adapter, &store)
    } else {
        build_driver_config(&adapter).and_then(|c| check_state_symbol(&store, &c.symbol))
    };
    if let Err(e) = resolved {
        eprintln!("error: {e}");
        return (&e).into();
    }

    // Stage 4: Data source
    let data_path = match required_string(&adapter, "run", "data_path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    let data = CsvAdapter::new(data_path);

    // Stage 5: Simulate
    let store: Arc<StateStore> = Arc::new(store);
    let summary = match run_backtest_pipeline(&adapter, &data, store.clone()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    print_summary(&summary);
    store.cleanup_backups(archive_keep(&adapter));
    if summary.checkpoint_saved {
        eprintln!("\nState saved to {}", store.path().display());
        ExitCode::SUCCESS
    } else {
        eprintln!("\nerror: final state could not be saved to {}", store.path().display());
        ExitCode::from(4)
    }
}

pub fn live_config(config: &dyn ConfigPort) -> LiveConfig {
    let defaults = LiveConfig::default();
    LiveConfig {
        timeframe: config
            .get_string("run", "timeframe")
            .unwrap_or(defaults.timeframe),
        poll_interval: Duration::try_from_secs_f64(config.get_double(
            "live",
            "poll_interval_secs",
            defaults.poll_interval.as_secs_f64(),
        ))
        .unwrap_or(defaults.poll_interval),
        lookback_bars: config
            .get_int("live", "lookback_bars", defaults.lookback_bars as i64)
            .max(2) as usize,
    }
}

fn run_live(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    init_logging(&adapter);

    if let Err(e) = validate_live_config(&adapter) {
        eprintln!("error: {e}");
        return (&e).into();
    }

    let mut driver_config = match build_driver_config(&adapter) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    // every new live bar is checkpointed unless configured otherwise
    driver_config.save_every_bars.get_or_insert(1);

    let data_path = match required_string(&adapter, "run", "data_path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let store = state_store(&adapter);
    let resolved = if adapter.get_bool("run", "clear_state", false) {
        reset_state(&adapter, &store)
    } else {
        check_state_symbol(&store, &driver_config.symbol)
    };
    if let Err(e) = resolved {
        eprintln!("error: {e}");
        return (&e).into();
    }
    let state_path = store.path().to_path_buf();

    let driver = match build_driver(&adapter, driver_config, Arc::new(store)) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let handle = match LiveRunner::spawn(driver, Box::new(CsvAdapter::new(data_path)), live_config(&adapter)) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let stop = handle.stop_signal();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("received shutdown signal");
        stop.store(false, Ordering::Release);
    }) {
        warn!(error = %e, "failed to set Ctrl-C handler, stop the process to exit");
    }
    eprintln!("Live runner started, state at {} (Ctrl-C to stop)", state_path.display());

    match handle.wait() {
        Some(report) => {
            info!(
                polls = report.polls,
                bars = report.bars_processed,
                fetch_errors = report.fetch_errors,
                "live runner finished"
            );
            print_summary(&report.summary);
            if report.summary.checkpoint_saved {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(4)
            }
        }
        None => ExitCode::from(5),
    }
}

fn run_status(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let store = state_store(&adapter);

    let Some(checkpoint) = store.load() else {
        eprintln!("No saved state at {}", store.path().display());
        return ExitCode::SUCCESS;
    };

    println!("state file:      {}", store.path().display());
    println!("schema version:  {}", checkpoint.schema_version);
    println!("saved at:        {}", checkpoint.saved_at);
    match checkpoint.last_processed_timestamp {
        Some(ts) => println!("last processed:  {ts}"),
        None => println!("last processed:  (none)"),
    }
    println!("initial capital: {:.2}", checkpoint.initial_capital);
    println!("total trades:    {}", checkpoint.total_trades);
    println!("fees paid:       {:.4}", checkpoint.total_fees_paid);
    for (strategy, cash) in &checkpoint.strategy_cash {
        println!("cash {strategy:<10}  {cash:.2}");
    }

    let open: Vec<_> = checkpoint.positions.iter().filter(|p| p.is_open()).collect();
    println!("open positions:  {}", open.len());
    for position in open {
        println!(
            "  {}  qty {:.6} @ {:.4}  unrealized {:.2}",
            position.id(),
            position.quantity,
            position.entry_price,
            position.unrealized_pnl
        );
    }
    ExitCode::SUCCESS
}

fn run_clear_state(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let store = state_store(&adapter);
    match reset_state(&adapter, &store) {
        Ok(()) => {
            eprintln!("Cleared state at {}", store.path().display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_run_config(&adapter) {
        eprintln!("error: {e}");
        return (&e).into();
    }

    let driver_config = match build_driver_config(&adapter) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    let allocations = match strategy_allocations(&adapter) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    eprintln!("\nRun:");
    eprintln!("  symbol:          {}", driver_config.symbol);
    eprintln!("  initial capital: {:.2}", driver_config.initial_capital);
    eprintln!("  fee / slippage:  {} / {}", driver_config.costs.fee_rate, driver_config.costs.slippage_rate);
    eprintln!("\nStrategies:");
    for (id, allocation) in &allocations {
        eprintln!(
            "  {:<10} {:>5.1}%  ({:.2})",
            id,
            allocation * 100.0,
            driver_config.initial_capital * allocation
        );
    }
    eprintln!("\nState: {}", state_store(&adapter).path().display());
    eprintln!("\nConfiguration is valid");
    ExitCode::SUCCESS
}

pub fn print_summary(summary: &RunSummary) {
    eprintln!("\n=== Results ===");
    eprintln!("Initial Capital:  {:.2}", summary.initial_capital);
    eprintln!("Final Equity:     {:.2}", summary.final_equity);
    eprintln!("Total Return:     {:.2}%", summary.total_return * 100.0);
    eprintln!(
        "Annualized:       {:.2}% over {:.1} days",
        summary.annualized_return * 100.0,
        summary.elapsed_days
    );
    eprintln!("Max Drawdown:     -{:.1}%", summary.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", summary.total_trades);
    eprintln!("Fees Paid:        {:.2}", summary.total_fees_paid);
    eprintln!("Win Rate:         {:.1}%", summary.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", summary.profit_factor);

    if !summary.strategies.is_empty() {
        eprintln!("\n=== Per-Strategy ===");
        for s in &summary.strategies {
            eprintln!(
                "  {:<10} start {:>10.2}  end {:>10.2}  realized {:>9.2}  entries {}",
                s.strategy_id, s.initial_allocation, s.final_equity, s.realized_pnl, s.entries
            );
        }
    }
}
