//! Shared types for ruuvi-forwarder

use std::collections::BTreeMap;
use thiserror::Error;

/// Readings keyed by device address. Values are passed through untouched.
pub type ReadingSet = BTreeMap<String, serde_json::Value>;

/// Errors that can end a collection run
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status: {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to serialize readings: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ForwardError {
    /// True for failures of the outgoing POST request
    pub fn is_http(&self) -> bool {
        matches!(self, ForwardError::Http(_) | ForwardError::Status(_))
    }
}

/// Split a comma-separated list of device addresses
pub fn parse_macs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|mac| !mac.is_empty())
        .map(String::from)
        .collect()
}
