//! Common event pipeline shared by all ingesters
//!
//! classify -> dedup-persist -> alert -> broadcast. Each step is isolated:
//! a persistence or dispatch failure never blocks the steps after it, and
//! nothing here propagates an error back into the ingester loops.

pub mod classifier;
pub mod formatter;

pub use classifier::{classify, KnownActorCache};
pub use formatter::{format_alert, format_operational_error, AlertPayload};

use crate::adapters::{DedupStore, Notifier};
use crate::domain::{BroadcastEvent, NormalizedEvent};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Hard cap on each external call so one slow dependency cannot starve the
/// ingester timers behind it
const EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Broadcast channel capacity for classified events
pub const BROADCAST_CAPACITY: usize = 1024;

/// One pipeline instance per ingester, sharing the store, notifier and actor
/// cache but carrying its own minimum notional and broadcast topic.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn DedupStore>,
    notifier: Arc<dyn Notifier>,
    actors: KnownActorCache,
    broadcast_tx: broadcast::Sender<BroadcastEvent>,
    whale_threshold: Decimal,
    min_notional: Decimal,
    topic: &'static str,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn DedupStore>,
        notifier: Arc<dyn Notifier>,
        actors: KnownActorCache,
        broadcast_tx: broadcast::Sender<BroadcastEvent>,
        whale_threshold: Decimal,
        min_notional: Decimal,
        topic: &'static str,
    ) -> Self {
        Self {
            store,
            notifier,
            actors,
            broadcast_tx,
            whale_threshold,
            min_notional,
            topic,
        }
    }

    /// Get a receiver for classified events
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Run one normalized event through the pipeline.
    ///
    /// Returns the classification when the event was alert-worthy, `None`
    /// when it was dropped or ordinary.
    pub async fn process(&self, event: NormalizedEvent) -> Option<crate::domain::Classification> {
        if event.size.is_zero() || event.notional < self.min_notional {
            trace!(
                "Dropping {} event {} below minimum (notional {})",
                event.source_chain,
                event.identifier,
                event.notional
            );
            return None;
        }

        let snapshot = self.actors.snapshot().await;
        let classification = classify(&event, self.whale_threshold, &snapshot);

        if !classification.alert_worthy() {
            trace!(
                "Ordinary {} event {}, no alert",
                event.source_chain,
                event.identifier
            );
            return None;
        }

        // Persist first; duplicates and storage failures both fall through to
        // alerting so a whale alert is never lost to the database.
        match tokio::time::timeout(
            EXTERNAL_CALL_TIMEOUT,
            self.store.insert_if_absent(&event, classification),
        )
        .await
        {
            Ok(Ok(true)) => debug!("Persisted event {}", event.identifier),
            Ok(Ok(false)) => debug!("Duplicate event {}, not re-persisted", event.identifier),
            Ok(Err(e)) => warn!("Failed to persist event {}: {}", event.identifier, e),
            Err(_) => warn!("Persisting event {} timed out", event.identifier),
        }

        let payload = format_alert(&event, classification);
        match tokio::time::timeout(
            EXTERNAL_CALL_TIMEOUT,
            self.notifier
                .send(&payload.message, &payload.title, &payload.sound),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Notification dispatch failed for {}: {}", event.identifier, e),
            Err(_) => warn!("Notification dispatch timed out for {}", event.identifier),
        }

        // Fire-and-forget: a send error just means no observers are connected.
        let _ = self.broadcast_tx.send(BroadcastEvent {
            topic: self.topic,
            event,
            classification,
        });

        Some(classification)
    }

    /// Send an operational error notification outside the event path
    pub async fn notify_error(&self, component: &str, detail: &str) {
        let payload = format_operational_error(component, detail);
        match tokio::time::timeout(
            EXTERNAL_CALL_TIMEOUT,
            self.notifier
                .send(&payload.message, &payload.title, &payload.sound),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to send {} error notification: {}", component, e),
            Err(_) => warn!("{} error notification timed out", component),
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Stub collaborators shared by pipeline and ingester tests

    use super::*;
    use crate::domain::{Classification, StoredEvent};
    use crate::error::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory dedup store with the same at-most-once contract as Postgres
    #[derive(Default)]
    pub struct MemoryStore {
        events: Mutex<HashMap<String, StoredEvent>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.events.lock().unwrap().len()
        }

        /// Stored identifiers in insertion order
        pub fn identifiers(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .map(|e| e.identifier)
                .collect()
        }

        /// Stored events in insertion order
        pub fn events(&self) -> Vec<StoredEvent> {
            let events = self.events.lock().unwrap();
            let mut all: Vec<StoredEvent> = events.values().cloned().collect();
            all.sort_by_key(|e| e.id);
            all
        }
    }

    #[async_trait]
    impl DedupStore for MemoryStore {
        async fn find_by_identifier(&self, identifier: &str) -> Result<Option<StoredEvent>> {
            Ok(self.events.lock().unwrap().get(identifier).cloned())
        }

        async fn insert_if_absent(
            &self,
            event: &NormalizedEvent,
            classification: Classification,
        ) -> Result<bool> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::error::WatchError::Internal(
                    "stub storage failure".to_string(),
                ));
            }
            let mut events = self.events.lock().unwrap();
            if events.contains_key(&event.identifier) {
                return Ok(false);
            }
            let id = events.len() as i64 + 1;
            events.insert(
                event.identifier.clone(),
                StoredEvent {
                    id,
                    source_chain: event.source_chain,
                    identifier: event.identifier.clone(),
                    counterparty_from: event.counterparty_from.clone(),
                    counterparty_to: event.counterparty_to.clone(),
                    instrument: event.instrument.clone(),
                    direction: event.direction,
                    price: event.price,
                    size: event.size,
                    notional: event.notional,
                    occurred_at: event.occurred_at,
                    participants: event.participants.clone(),
                    fill_count: event.fill_count,
                    is_whale: classification.is_whale,
                    is_known_actor: classification.is_known_actor,
                    created_at: Utc::now(),
                },
            );
            Ok(true)
        }

        async fn recent(&self, limit: i64) -> Result<Vec<StoredEvent>> {
            let events = self.events.lock().unwrap();
            let mut all: Vec<StoredEvent> = events.values().cloned().collect();
            all.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
            all.truncate(limit.max(0) as usize);
            Ok(all)
        }
    }

    /// Notifier that records every dispatched payload
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str, title: &str, sound: &str) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::error::WatchError::Notify("stub failure".to_string()));
            }
            self.sent.lock().unwrap().push((
                message.to_string(),
                title.to_string(),
                sound.to_string(),
            ));
            Ok(())
        }
    }

    /// Build a pipeline wired to in-memory collaborators
    pub fn test_pipeline(
        whale_threshold: Decimal,
        min_notional: Decimal,
    ) -> (Pipeline, Arc<MemoryStore>, Arc<RecordingNotifier>, KnownActorCache) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let actors = KnownActorCache::new();
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let pipeline = Pipeline::new(
            Arc::clone(&store) as Arc<dyn DedupStore>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            actors.clone(),
            tx,
            whale_threshold,
            min_notional,
            "test-events",
        );
        (pipeline, store, notifier, actors)
    }
}
