//! Background known-actor refresh. Keeps the classifier's address set
//! current from the ranking directory; a failed refresh keeps serving the
//! previous snapshot.

use crate::adapters::ActorDirectory;
use crate::config::ActorConfig;
use crate::error::Result;
use crate::pipeline::KnownActorCache;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{info, warn};

pub struct ActorRefreshService<D: ActorDirectory> {
    directory: D,
    cache: KnownActorCache,
    refresh_interval: Duration,
}

impl<D: ActorDirectory> ActorRefreshService<D> {
    pub fn new(config: &ActorConfig, directory: D, cache: KnownActorCache) -> Self {
        Self {
            directory,
            cache,
            refresh_interval: Duration::from_secs(config.refresh_interval_secs),
        }
    }

    /// Run the refresh loop until shutdown (call from a spawned task)
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "ActorRefreshService: starting (interval={:?})",
            self.refresh_interval
        );

        let mut ticker = time::interval(self.refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        let cached = self.cache.len().await;
                        warn!(
                            "ActorRefreshService: refresh failed, keeping {} cached addresses: {}",
                            cached, e
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("ActorRefreshService: stopped");
    }

    /// Fetch the directory and swap the cache snapshot
    pub async fn run_once(&self) -> Result<()> {
        let addresses = self.directory.fetch_addresses().await?;
        info!(
            "ActorRefreshService: refreshed {} known actors",
            addresses.len()
        );
        self.cache.replace(addresses).await;
        Ok(())
    }
}
