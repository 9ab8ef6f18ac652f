//! Versioned run checkpoint.
//!
//! A checkpoint is the complete state needed to resume a run: every position,
//! per-strategy cash, the progress cursor and the trade history. Its checksum
//! is a blake3 digest over the canonical JSON form (object keys sorted, the
//! `checksum` field removed), so any edit to the payload is detected on load.
//!
//! Top-level fields this version does not know are moved under `metadata`
//! instead of being dropped.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use super::error::SlicetraderError;
use super::metrics::EquityPoint;
use super::position::Position;
use super::trade::TradeRecord;

pub const SCHEMA_VERSION: u32 = 1;

const CHECKSUM_FIELD: &str = "checksum";

const KNOWN_FIELDS: &[&str] = &[
    "schema_version",
    "saved_at",
    "initial_capital",
    "first_timestamp",
    "last_processed_timestamp",
    "positions",
    "strategy_cash",
    "total_trades",
    "total_fees_paid",
    "trades",
    "equity_history",
    "metadata",
    CHECKSUM_FIELD,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub schema_version: u32,
    pub saved_at: NaiveDateTime,
    pub initial_capital: f64,
    /// First bar ever processed by this run, kept for annualisation.
    #[serde(default)]
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_processed_timestamp: Option<NaiveDateTime>,
    pub positions: Vec<Position>,
    pub strategy_cash: BTreeMap<String, f64>,
    pub total_trades: u64,
    pub total_fees_paid: f64,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    /// Total equity after every processed bar, for drawdown across restarts.
    #[serde(default)]
    pub equity_history: Vec<EquityPoint>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub checksum: String,
}

impl RunCheckpoint {
    /// An empty checkpoint for a fresh run.
    pub fn fresh(initial_capital: f64, strategy_cash: BTreeMap<String, f64>, now: NaiveDateTime) -> Self {
        RunCheckpoint {
            schema_version: SCHEMA_VERSION,
            saved_at: now,
            initial_capital,
            first_timestamp: None,
            last_processed_timestamp: None,
            positions: Vec::new(),
            strategy_cash,
            total_trades: 0,
            total_fees_paid: 0.0,
            trades: Vec::new(),
            equity_history: Vec::new(),
            metadata: BTreeMap::new(),
            checksum: String::new(),
        }
    }

    /// Canonical JSON value of the payload, without the checksum.
    fn payload(&self) -> Result<Value, SlicetraderError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove(CHECKSUM_FIELD);
        }
        Ok(value)
    }

    pub fn compute_checksum(&self) -> Result<String, SlicetraderError> {
        digest(&self.payload()?)
    }

    /// Stamp the checksum and return the exact bytes to persist.
    pub fn seal(&mut self) -> Result<Vec<u8>, SlicetraderError> {
        self.checksum = self.compute_checksum()?;
        Ok(serde_json::to_vec_pretty(&serde_json::to_value(&*self)?)?)
    }

    /// Parse persisted bytes, verifying checksum and structure.
    ///
    /// Any failure is reported as a reason string; the caller decides
    /// whether that means corruption or falling back to a backup.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| format!("unparsable JSON: {e}"))?;
        let Value::Object(mut map) = value else {
            return Err("top-level value is not an object".to_string());
        };

        let stored = match map.remove(CHECKSUM_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => return Err("missing checksum".to_string()),
        };
        let computed = digest(&Value::Object(map.clone())).map_err(|e| e.to_string())?;
        if computed != stored {
            return Err(format!("checksum mismatch: stored {stored}, computed {computed}"));
        }

        let map = preserve_unknown_fields(map);
        let mut checkpoint: RunCheckpoint =
            serde_json::from_value(Value::Object(map)).map_err(|e| format!("schema error: {e}"))?;
        checkpoint.checksum = stored;

        if checkpoint.schema_version > SCHEMA_VERSION {
            warn!(
                found = checkpoint.schema_version,
                supported = SCHEMA_VERSION,
                "checkpoint written by a newer schema version"
            );
        }
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Structural invariants: open positions carry no exit price, quantities
    /// and prices are positive, cash balances are non-negative.
    pub fn validate(&self) -> Result<(), String> {
        for position in &self.positions {
            position.check_invariants()?;
        }
        for (strategy, cash) in &self.strategy_cash {
            if !(cash.is_finite() && *cash >= 0.0) {
                return Err(format!("cash for {strategy} is {cash}"));
            }
        }
        if !(self.total_fees_paid.is_finite() && self.total_fees_paid >= 0.0) {
            return Err(format!("total_fees_paid is {}", self.total_fees_paid));
        }
        if let Some(point) = self.equity_history.iter().find(|p| !p.equity.is_finite()) {
            return Err(format!("equity at {} is {}", point.timestamp, point.equity));
        }
        Ok(())
    }
}

fn digest(value: &Value) -> Result<String, SlicetraderError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn preserve_unknown_fields(mut map: Map<String, Value>) -> Map<String, Value> {
    let unknown: Vec<String> = map
        .keys()
        .filter(|k| !KNOWN_FIELDS.contains(&k.as_str()))
        .cloned()
        .collect();
    if unknown.is_empty() {
        return map;
    }

    let mut metadata = match map.remove("metadata") {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    };
    for key in unknown {
        if let Some(v) = map.remove(&key) {
            metadata.insert(key, v);
        }
    }
    map.insert("metadata".to_string(), Value::Object(metadata));
    map
}
