//! Event ingesters
//!
//! Three independent sources feed the shared pipeline: a streaming trade
//! feed, a cursor-driven transfer poller, and a contract log subscription.

pub mod logs;
pub mod poller;
pub mod stream;

pub use logs::LogSubscriber;
pub use poller::TransferPoller;
pub use stream::TradeStream;
