//! SQLite trade and equity sink.
//!
//! Keeps the `trades` and `equity_snapshots` tables a dashboard reads from.
//! Per-strategy equity is stored as a JSON object so any strategy set fits
//! the same schema.
//!
//! A trade is identified by (timestamp, symbol, strategy, action) and a
//! snapshot by its timestamp, so rows replayed after a crash are ignored.

use crate::domain::error::SlicetraderError;
use crate::domain::trade::{EquitySnapshot, TradeRecord};
use crate::ports::config_port::ConfigPort;
use crate::ports::sink_port::TradeSink;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteSink {
    pool: Pool<SqliteConnectionManager>,
}

/// One row of the `trades` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTrade {
    pub timestamp: String,
    pub symbol: String,
    pub strategy: String,
    pub action: String,
    pub quantity: f64,
    pub price: f64,
    pub pnl: f64,
    pub fee: f64,
    pub paper_traded: bool,
}

fn pool_error(e: r2d2::Error) -> SlicetraderError {
    SlicetraderError::Sink {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> SlicetraderError {
    SlicetraderError::Sink {
        reason: e.to_string(),
    }
}

impl SqliteSink {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SlicetraderError> {
        let db_path = config.get_string("sink", "sqlite_path").ok_or_else(|| {
            SlicetraderError::ConfigMissing {
                section: "sink".into(),
                key: "sqlite_path".into(),
            }
        })?;
        Self::open(&db_path)
    }

    pub fn open(db_path: &str) -> Result<Self, SlicetraderError> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(2).build(manager).map_err(pool_error)?;
        let sink = Self { pool };
        sink.initialize_schema()?;
        Ok(sink)
    }

    pub fn in_memory() -> Result<Self, SlicetraderError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_error)?;
        let sink = Self { pool };
        sink.initialize_schema()?;
        Ok(sink)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, SlicetraderError> {
        self.pool.get().map_err(pool_error)
    }

    fn initialize_schema(&self) -> Result<(), SlicetraderError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS trades (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    symbol TEXT NOT NULL,
                    strategy TEXT NOT NULL,
                    action TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    price REAL NOT NULL,
                    pnl REAL DEFAULT 0,
                    fee REAL DEFAULT 0,
                    paper_traded BOOLEAN DEFAULT FALSE
                );
                CREATE TABLE IF NOT EXISTS equity_snapshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    total_equity REAL NOT NULL,
                    slice_equity TEXT NOT NULL DEFAULT '{}',
                    open_positions INTEGER DEFAULT 0,
                    unrealized_pnl REAL DEFAULT 0
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_trades_identity
                    ON trades(timestamp, symbol, strategy, action);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_equity_timestamp_unique
                    ON equity_snapshots(timestamp);",
            )
            .map_err(query_error)
    }

    /// Most recent trades first.
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<StoredTrade>, SlicetraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, symbol, strategy, action, quantity, price, pnl, fee, paper_traded
                 FROM trades ORDER BY id DESC LIMIT ?1",
            )
            .map_err(query_error)?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(StoredTrade {
                    timestamp: row.get(0)?,
                    symbol: row.get(1)?,
                    strategy: row.get(2)?,
                    action: row.get(3)?,
                    quantity: row.get(4)?,
                    price: row.get(5)?,
                    pnl: row.get(6)?,
                    fee: row.get(7)?,
                    paper_traded: row.get(8)?,
                })
            })
            .map_err(query_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }

    /// Delete every trade and snapshot, keeping the schema.
    pub fn clear(&self) -> Result<(), SlicetraderError> {
        self.conn()?
            .execute_batch("DELETE FROM trades; DELETE FROM equity_snapshots;")
            .map_err(query_error)
    }

    pub fn snapshot_count(&self) -> Result<u64, SlicetraderError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM equity_snapshots", [], |row| row.get(0))
            .map_err(query_error)?;
        Ok(count as u64)
    }
}

impl TradeSink for SqliteSink {
    fn record_trade(&mut self, trade: &TradeRecord) -> Result<(), SlicetraderError> {
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO trades (timestamp, symbol, strategy, action, quantity, price, pnl, fee, paper_traded)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    trade.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    trade.symbol,
                    trade.strategy_id,
                    trade.action.to_string(),
                    trade.quantity,
                    trade.price,
                    trade.pnl,
                    trade.fee,
                    trade.paper_traded,
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }

    fn record_equity(&mut self, snapshot: &EquitySnapshot) -> Result<(), SlicetraderError> {
        let slice_equity = serde_json::to_string(&snapshot.slice_equity)?;
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO equity_snapshots (timestamp, total_equity, slice_equity, open_positions, unrealized_pnl)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    snapshot.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    snapshot.total_equity,
                    slice_equity,
                    snapshot.open_positions as i64,
                    snapshot.unrealized_pnl,
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }
}
