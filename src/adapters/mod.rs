//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod csv_sink;
pub mod file_config_adapter;
pub mod order_forwarder;
pub mod paper_execution;
#[cfg(feature = "sqlite")]
pub mod sqlite_sink;
pub mod state_store;
