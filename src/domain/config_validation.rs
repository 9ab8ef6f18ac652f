//! Configuration validation.
//!
//! Validates every config field before a run starts, so a bad value fails
//! fast with the section and key that caused it.

use crate::domain::error::SlicetraderError;
use crate::domain::strategy::BuiltinStrategy;
use crate::ports::config_port::ConfigPort;
use chrono::{NaiveDate, NaiveDateTime};

pub const MIN_INITIAL_CAPITAL: f64 = 100.0;
pub const MAX_RISK_PCT: f64 = 0.5;

const ALLOCATION_EPSILON: f64 = 1e-9;

pub fn validate_run_config(config: &dyn ConfigPort) -> Result<(), SlicetraderError> {
    validate_symbol(config)?;
    validate_initial_capital(config)?;
    validate_atr_period(config)?;
    validate_bounds(config)?;
    validate_costs(config)?;
    validate_state(config)?;
    strategy_allocations(config)?;
    Ok(())
}

pub fn validate_live_config(config: &dyn ConfigPort) -> Result<(), SlicetraderError> {
    validate_run_config(config)?;
    if config.get_double("live", "poll_interval_secs", 60.0) <= 0.0 {
        return Err(invalid("live", "poll_interval_secs", "poll_interval_secs must be positive"));
    }
    if config.get_int("live", "lookback_bars", 200) < 2 {
        return Err(invalid("live", "lookback_bars", "lookback_bars must be at least 2"));
    }
    Ok(())
}

fn invalid(section: &str, key: &str, reason: &str) -> SlicetraderError {
    SlicetraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_symbol(config: &dyn ConfigPort) -> Result<(), SlicetraderError> {
    match config.get_string("run", "symbol") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(SlicetraderError::ConfigMissing {
            section: "run".to_string(),
            key: "symbol".to_string(),
        }),
    }
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), SlicetraderError> {
    let value = config.get_double("run", "initial_capital", 4000.0);
    if !(value.is_finite() && value >= MIN_INITIAL_CAPITAL) {
        return Err(invalid(
            "run",
            "initial_capital",
            "initial_capital must be at least 100",
        ));
    }
    Ok(())
}

fn validate_atr_period(config: &dyn ConfigPort) -> Result<(), SlicetraderError> {
    if config.get_int("run", "atr_period", 14) < 1 {
        return Err(invalid("run", "atr_period", "atr_period must be at least 1"));
    }
    Ok(())
}

/// Parse a `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` bound.
pub fn parse_bound(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn read_bound(config: &dyn ConfigPort, key: &str) -> Result<Option<NaiveDateTime>, SlicetraderError> {
    match config.get_string("run", key) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_bound(&s).map(Some).ok_or_else(|| {
            SlicetraderError::ConfigInvalid {
                section: "run".to_string(),
                key: key.to_string(),
                reason: format!("invalid {key} format, expected YYYY-MM-DD[ HH:MM:SS]"),
            }
        }),
    }
}

/// Optional `[run] start` / `end` window.
pub fn run_bounds(
    config: &dyn ConfigPort,
) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>), SlicetraderError> {
    Ok((read_bound(config, "start")?, read_bound(config, "end")?))
}

fn validate_bounds(config: &dyn ConfigPort) -> Result<(), SlicetraderError> {
    if let (Some(start), Some(end)) = run_bounds(config)? {
        if start >= end {
            return Err(invalid("run", "start", "start must be before end"));
        }
    }
    Ok(())
}

fn validate_rate(config: &dyn ConfigPort, key: &str, default: f64) -> Result<(), SlicetraderError> {
    let value = config.get_double("costs", key, default);
    if !(0.0..1.0).contains(&value) {
        return Err(SlicetraderError::ConfigInvalid {
            section: "costs".to_string(),
            key: key.to_string(),
            reason: format!("{key} must be in [0, 1), got {value}"),
        });
    }
    Ok(())
}

fn validate_costs(config: &dyn ConfigPort) -> Result<(), SlicetraderError> {
    validate_rate(config, "fee_rate", 0.001)?;
    validate_rate(config, "slippage_rate", 0.0005)?;
    validate_rate(config, "min_profit_pct", 0.005)?;
    validate_rate(config, "stop_loss_floor_pct", 0.05)?;

    let risk = config.get_double("costs", "risk_pct", 0.015);
    if !(risk > 0.0 && risk <= MAX_RISK_PCT) {
        return Err(invalid("costs", "risk_pct", "risk_pct must be in (0, 0.5]"));
    }
    Ok(())
}

fn validate_state(config: &dyn ConfigPort) -> Result<(), SlicetraderError> {
    if config.has_key("state", "save_every_bars") && config.get_int("state", "save_every_bars", 0) < 1 {
        return Err(invalid("state", "save_every_bars", "save_every_bars must be at least 1"));
    }
    if config.has_key("state", "save_interval_secs")
        && config.get_double("state", "save_interval_secs", 0.0) <= 0.0
    {
        return Err(invalid(
            "state",
            "save_interval_secs",
            "save_interval_secs must be positive",
        ));
    }
    if config.get_int("state", "archive_keep", 5) < 0 {
        return Err(invalid("state", "archive_keep", "archive_keep must be non-negative"));
    }
    Ok(())
}

/// Enabled strategies with their allocations, in declaration order.
///
/// `[strategies] enabled` defaults to every built-in strategy; each
/// allocation comes from `[<id lowercased>] allocation` or the strategy's
/// default.
pub fn strategy_allocations(config: &dyn ConfigPort) -> Result<Vec<(String, f64)>, SlicetraderError> {
    let enabled: Vec<String> = match config.get_string("strategies", "enabled") {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => BuiltinStrategy::KNOWN_IDS.iter().map(|s| s.to_string()).collect(),
    };

    if enabled.is_empty() {
        return Err(invalid("strategies", "enabled", "at least one strategy must be enabled"));
    }

    let mut allocations: Vec<(String, f64)> = Vec::with_capacity(enabled.len());
    let mut total = 0.0;
    for id in enabled {
        if allocations.iter().any(|(existing, _)| *existing == id) {
            return Err(SlicetraderError::ConfigInvalid {
                section: "strategies".to_string(),
                key: "enabled".to_string(),
                reason: format!("strategy {id} listed twice"),
            });
        }
        let Some(default) = BuiltinStrategy::default_allocation(&id) else {
            return Err(SlicetraderError::ConfigInvalid {
                section: "strategies".to_string(),
                key: "enabled".to_string(),
                reason: format!(
                    "unknown strategy {id}, expected one of {}",
                    BuiltinStrategy::KNOWN_IDS.join(", ")
                ),
            });
        };
        let section = id.to_lowercase();
        let allocation = config.get_double(&section, "allocation", default);
        if !(allocation > 0.0 && allocation <= 1.0) {
            return Err(SlicetraderError::ConfigInvalid {
                section,
                key: "allocation".to_string(),
                reason: format!("allocation must be in (0, 1], got {allocation}"),
            });
        }
        total += allocation;
        allocations.push((id, allocation));
    }

    if total > 1.0 + ALLOCATION_EPSILON {
        return Err(SlicetraderError::ConfigInvalid {
            section: "strategies".to_string(),
            key: "allocation".to_string(),
            reason: format!("allocations sum to {total:.4}, which exceeds 1"),
        });
    }
    Ok(allocations)
}
