//! Tracing subscriber setup for the binary.
//!
//! `RUST_LOG` overrides the configured level. When a log file is given, events
//! are written there as well, without ANSI colors.

use crate::domain::error::SlicetraderError;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const DEFAULT_LEVEL: &str = "info";

pub fn filter(level: &str) -> Result<EnvFilter, SlicetraderError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| SlicetraderError::ConfigInvalid {
            section: "logging".to_string(),
            key: "level".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(level: &str, file: Option<&Path>) -> Result<(), SlicetraderError> {
    let file_layer = match file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    Registry::default()
        .with(filter(level)?)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| SlicetraderError::Io(std::io::Error::other(e)))
}
