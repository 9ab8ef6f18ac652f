//! slicetrader: crash-safe multi-strategy trading simulator.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`]. [`live`] drives the simulation on a
//! background thread against a polled market-data source.

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod live;
pub mod logging;
pub mod cli;
