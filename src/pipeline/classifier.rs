//! Event classification against the whale threshold and known-actor set

use crate::domain::{Classification, NormalizedEvent};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Classify an event against a threshold and an actor-set snapshot.
///
/// Addresses in the snapshot are lowercase; lookups normalize the same way
/// so hex-address casing differences never hide a known actor.
pub fn classify(
    event: &NormalizedEvent,
    whale_threshold: Decimal,
    actors: &HashSet<String>,
) -> Classification {
    let is_whale = event.notional >= whale_threshold;

    let is_known_actor = event
        .participants
        .iter()
        .chain(event.counterparty_from.iter())
        .chain(event.counterparty_to.iter())
        .any(|addr| actors.contains(&addr.to_lowercase()));

    Classification {
        is_whale,
        is_known_actor,
    }
}

/// Periodically refreshed set of known trader addresses.
///
/// Readers take a snapshot (`Arc` clone); refreshes swap the whole inner set
/// so a refresh in progress never exposes a partially-populated view.
#[derive(Clone, Default)]
pub struct KnownActorCache {
    inner: Arc<RwLock<Arc<HashSet<String>>>>,
}

impl KnownActorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of the actor set
    pub async fn snapshot(&self) -> Arc<HashSet<String>> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Replace the whole set with a freshly fetched one
    pub async fn replace(&self, addresses: HashSet<String>) {
        let count = addresses.len();
        *self.inner.write().await = Arc::new(addresses);
        info!("Known actor cache updated, {} addresses", count);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
