//! Forwarding readings to the HTTP API

use crate::shared::{ForwardError, ReadingSet};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    endpoint: String,
}

impl Forwarder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ruuvi-forwarder/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST the readings as a JSON object, failing on any non-2xx status
    pub async fn post(&self, readings: &ReadingSet) -> Result<(), ForwardError> {
        let response = self.client.post(&self.endpoint).json(readings).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status));
        }

        tracing::debug!("{} accepted readings with status {}", self.endpoint, status);
        Ok(())
    }
}
