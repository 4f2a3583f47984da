//! TronGrid transaction-history client
//!
//! Pull side of the polling ingester: fetches confirmed TRC20 transfers for
//! the tracked treasury account. The server-side `min_timestamp` filter is
//! advisory only; the poller re-sorts and re-filters everything it returns.

use crate::config::PollingConfig;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// One raw transaction row as returned by the history endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRow {
    pub transaction_id: String,
    pub block_timestamp: i64,
    pub from: String,
    pub to: String,
    /// Raw integer amount in the token's smallest unit
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    #[serde(default)]
    data: Vec<TransferRow>,
}

/// Source of transfer rows for the polling ingester
#[async_trait]
pub trait TransferFeed: Send + Sync {
    /// Fetch confirmed rows with `block_timestamp >= min_timestamp`, up to
    /// `limit` rows. Ordering is not guaranteed by the remote API.
    async fn fetch(&self, min_timestamp: i64, limit: u32) -> Result<Vec<TransferRow>>;
}

/// TronGrid REST client
#[derive(Clone)]
pub struct TronGridClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    treasury_address: String,
    contract_address: String,
}

impl TronGridClient {
    pub fn new(config: &PollingConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            treasury_address: config.treasury_address.clone(),
            contract_address: config.contract_address.clone(),
        })
    }
}

#[async_trait]
impl TransferFeed for TronGridClient {
    async fn fetch(&self, min_timestamp: i64, limit: u32) -> Result<Vec<TransferRow>> {
        let url = format!(
            "{}/v1/accounts/{}/transactions/trc20",
            self.api_url, self.treasury_address
        );

        let min_timestamp = min_timestamp.to_string();
        let limit = limit.to_string();
        let mut request = self.client.get(&url).query(&[
            ("contract_address", self.contract_address.as_str()),
            ("only_confirmed", "true"),
            ("min_timestamp", min_timestamp.as_str()),
            ("limit", limit.as_str()),
        ]);

        if let Some(key) = &self.api_key {
            request = request.header("TRON-PRO-API-KEY", key);
        }

        let response = request.send().await?.error_for_status()?;
        let body: TransferResponse = response.json().await?;

        debug!(
            "Fetched {} transfer rows (min_timestamp={})",
            body.data.len(),
            min_timestamp
        );
        Ok(body.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_row_deserialization() {
        let json = r#"{
            "data": [
                {
                    "transaction_id": "abc123",
                    "block_timestamp": 1700000000000,
                    "from": "TSender",
                    "to": "TReceiver",
                    "value": "250000000000000",
                    "type": "Transfer"
                }
            ],
            "success": true,
            "meta": {}
        }"#;

        let parsed: TransferResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].transaction_id, "abc123");
        assert_eq!(parsed.data[0].block_timestamp, 1_700_000_000_000);
        assert_eq!(parsed.data[0].value, "250000000000000");
    }

    #[test]
    fn test_empty_response_defaults() {
        let parsed: TransferResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(parsed.data.is_empty());
    }
}
