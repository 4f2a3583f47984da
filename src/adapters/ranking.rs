//! Known-actor directory client
//!
//! Read-only view onto the external trader-ranking service: the monitor only
//! consumes the resulting set of addresses, never the ranking details.

use crate::config::ActorConfig;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Source of the full known-actor address set
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn fetch_addresses(&self) -> Result<HashSet<String>>;
}

#[derive(Debug, Deserialize)]
struct TraderEntry {
    address: String,
}

/// Ranking-service client returning tracked trader addresses
#[derive(Clone)]
pub struct RankingClient {
    client: Client,
    api_url: String,
}

impl RankingClient {
    pub fn new(config: &ActorConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }
}

#[async_trait]
impl ActorDirectory for RankingClient {
    async fn fetch_addresses(&self) -> Result<HashSet<String>> {
        let response = self
            .client
            .get(&self.api_url)
            .send()
            .await?
            .error_for_status()?;

        let entries: Vec<TraderEntry> = response.json().await?;
        let addresses: HashSet<String> = entries
            .into_iter()
            .map(|e| e.address.to_lowercase())
            .collect();

        debug!("Fetched {} known actor addresses", addresses.len());
        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trader_entry_deserialization() {
        let json = r#"[
            {"address": "0xAbC123", "pnl": 120000.5},
            {"address": "0xDeF456"}
        ]"#;

        let entries: Vec<TraderEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, "0xAbC123");
    }
}
