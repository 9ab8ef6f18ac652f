//! Core domain types and logic. Nothing in here performs I/O except through
//! the port traits.

pub mod ohlcv;
pub mod position;
pub mod ledger;
pub mod slice;
pub mod trade;
pub mod cost_model;
pub mod checkpoint;
pub mod indicator;
pub mod indicator_helpers;
pub mod strategy;
pub mod driver;
pub mod metrics;
pub mod config_validation;
pub mod error;
