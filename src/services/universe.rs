//! Background universe discovery. Periodically pulls the exchange's
//! instrument metadata and subscribes the trade stream to anything new.

use crate::config::StreamConfig;
use crate::error::Result;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct MetaResponse {
    universe: Vec<UniverseAsset>,
}

#[derive(Debug, Deserialize)]
struct UniverseAsset {
    name: String,
}

/// Instruments present in the fetched universe but not yet subscribed
pub fn new_instruments(current: &BTreeSet<String>, fetched: &[String]) -> Vec<String> {
    fetched
        .iter()
        .filter(|name| !current.contains(*name))
        .cloned()
        .collect()
}

pub struct UniverseService {
    info_url: String,
    client: reqwest::Client,
    refresh_interval: Duration,
    subscriptions: Arc<RwLock<BTreeSet<String>>>,
    add_tx: mpsc::Sender<String>,
}

impl UniverseService {
    pub fn new(
        config: &StreamConfig,
        subscriptions: Arc<RwLock<BTreeSet<String>>>,
        add_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            info_url: config.info_url.clone(),
            client: reqwest::Client::new(),
            refresh_interval: Duration::from_secs(config.universe_refresh_secs),
            subscriptions,
            add_tx,
        }
    }

    /// Run the refresh loop until shutdown (call from a spawned task)
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "UniverseService: starting (interval={:?})",
            self.refresh_interval
        );

        let mut ticker = time::interval(self.refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!("UniverseService: refresh failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("UniverseService: stopped");
    }

    /// Execute a single refresh cycle
    pub async fn run_once(&self) -> Result<()> {
        let response = self
            .client
            .post(&self.info_url)
            .json(&json!({ "type": "meta" }))
            .send()
            .await?
            .error_for_status()?;

        let meta: MetaResponse = response.json().await?;
        let fetched: Vec<String> = meta.universe.into_iter().map(|a| a.name).collect();

        let added = {
            let mut subscriptions = self.subscriptions.write().await;
            let added = new_instruments(&subscriptions, &fetched);
            for name in &added {
                subscriptions.insert(name.clone());
            }
            added
        };

        if added.is_empty() {
            debug!(
                "UniverseService: no new instruments ({} known)",
                fetched.len()
            );
            return Ok(());
        }

        info!("UniverseService: discovered {} new instruments", added.len());
        for name in added {
            // The stream may be mid-reconnect; it picks the instrument up
            // from the shared set on its next connect anyway.
            if self.add_tx.send(name.clone()).await.is_err() {
                warn!("UniverseService: stream channel closed, {} queued for reconnect", name);
            }
        }

        Ok(())
    }
}
