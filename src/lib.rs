pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod services;

pub use adapters::{DedupStore, Notifier, PostgresStore, PushoverNotifier, TronGridClient};
pub use config::AppConfig;
pub use domain::{BroadcastEvent, Classification, Direction, NormalizedEvent, SourceChain, StoredEvent};
pub use error::{Result, WatchError};
pub use ingest::{LogSubscriber, TradeStream, TransferPoller};
pub use pipeline::{KnownActorCache, Pipeline};
