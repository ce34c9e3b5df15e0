//! Watchlist alert client.
//!
//! Live tracking reports every newly funded address to an external watchlist
//! service. Calls are fire-and-forget: failures are logged and never reach
//! the tracer.

use std::time::Duration;

use alloy::primitives::{Address, B256};
use serde::Serialize;

use crate::types::Transfer;

/// Transfer summary sent alongside the recipient address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub tx_hash: B256,
    pub from: Address,
    pub to: Address,
    pub block_number: u64,
    /// Full-precision amount with token symbol.
    pub amount: String,
}

impl AlertSummary {
    pub fn from_transfer(transfer: &Transfer, amount: String) -> Self {
        Self {
            tx_hash: transfer.tx_hash,
            from: transfer.from,
            to: transfer.to,
            block_number: transfer.block_number,
            amount,
        }
    }
}

/// Receiver of recipient alerts.
pub trait AlertSink: Send + Sync {
    /// Must return immediately; delivery happens in the background.
    fn notify(&self, recipient: Address, summary: AlertSummary);
}

/// Sink used when no watchlist service is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAlerts;

impl AlertSink for NoopAlerts {
    fn notify(&self, recipient: Address, _summary: AlertSummary) {
        tracing::debug!(recipient = %recipient, "alerting disabled, skipping");
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckAddressRequest {
    address: String,
    /// The service expects the summary as a JSON-encoded string.
    tx_detail: String,
}

/// HTTP client for the watchlist `check-address` endpoint.
#[derive(Clone, Debug)]
pub struct WatchlistClient {
    client: reqwest::Client,
    url: String,
}

impl WatchlistClient {
    /// `base_url` is the service root, e.g. `http://localhost:4500`.
    pub fn new(base_url: &str) -> Self {
        let url = format!("{}/check-address", base_url.trim_end_matches('/'));
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts one alert and returns the service's message.
    ///
    /// # Errors
    /// Returns error if the request fails or the service answers with a non-2xx status.
    pub async fn check_address(
        &self,
        recipient: Address,
        summary: &AlertSummary,
    ) -> eyre::Result<String> {
        let request = CheckAddressRequest {
            address: recipient.to_string().to_lowercase(),
            tx_detail: serde_json::to_string(summary)?,
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(10))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        Ok(body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

impl AlertSink for WatchlistClient {
    fn notify(&self, recipient: Address, summary: AlertSummary) {
        let client = self.clone();
        tokio::spawn(async move {
            match client.check_address(recipient, &summary).await {
                Ok(message) => {
                    tracing::info!(recipient = %recipient, message = %message, "alert check completed")
                }
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "alert check failed")
                }
            }
        });
    }
}
