//! Collect readings once and forward them

use crate::forward::Forwarder;
use crate::sensors::bluetooth::ReadingSource;
use crate::shared::ForwardError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Number of devices whose readings reached the API
    Forwarded(usize),
    Failed,
}

/// Log which sensors were requested. An empty list still proceeds to a scan.
pub fn announce_macs(macs: &[String]) {
    if macs.is_empty() {
        tracing::info!("No MAC addresses provided.");
    } else {
        tracing::info!("MAC addresses: {:?}", macs);
    }
}

/// Fetch readings from `source` and POST them through `forwarder`
pub async fn run<S: ReadingSource>(
    source: &S,
    forwarder: &Forwarder,
    macs: &[String],
    timeout: Duration,
) -> Result<usize, ForwardError> {
    let readings = source.fetch(macs, timeout).await?;
    tracing::info!("Ruuvi sensor data has been fetched");

    if macs.iter().any(|m| !readings.keys().any(|k| k.eq_ignore_ascii_case(m))) {
        tracing::debug!("Some requested sensors were not heard from within {:?}", timeout);
    }

    forwarder.post(&readings).await?;
    tracing::info!("Ruuvi sensor data has been POST to API");

    Ok(readings.len())
}

/// Run once and log any failure instead of propagating it
pub async fn execute<S: ReadingSource>(
    source: &S,
    forwarder: &Forwarder,
    macs: &[String],
    timeout: Duration,
) -> Outcome {
    match run(source, forwarder, macs, timeout).await {
        Ok(count) => Outcome::Forwarded(count),
        Err(e) if e.is_http() => {
            tracing::error!("Error making POST request: {}", e);
            Outcome::Failed
        }
        Err(e) => {
            tracing::error!("Error in script: {}", e);
            Outcome::Failed
        }
    }
}
