pub mod postgres;
pub mod pushover;
pub mod ranking;
pub mod trongrid;

pub use postgres::{DedupStore, PostgresStore};
pub use pushover::{Notifier, NullNotifier, PushoverNotifier};
pub use ranking::{ActorDirectory, RankingClient};
pub use trongrid::{TransferFeed, TransferRow, TronGridClient};
