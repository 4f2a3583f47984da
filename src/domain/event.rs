use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which feed an event originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceChain {
    ExchangeStream,
    Tron,
    Ethereum,
}

impl SourceChain {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceChain::ExchangeStream => "EXCHANGE_STREAM",
            SourceChain::Tron => "TRON",
            SourceChain::Ethereum => "ETHEREUM",
        }
    }
}

impl std::fmt::Display for SourceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceChain {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "EXCHANGE_STREAM" => Ok(SourceChain::ExchangeStream),
            "TRON" => Ok(SourceChain::Tron),
            "ETHEREUM" => Ok(SourceChain::Ethereum),
            _ => Err("invalid source chain"),
        }
    }
}

/// Trade side or transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
    Inflow,
    Outflow,
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Inflow => "INFLOW",
            Direction::Outflow => "OUTFLOW",
            Direction::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "BUY" => Ok(Direction::Buy),
            "SELL" => Ok(Direction::Sell),
            "INFLOW" => Ok(Direction::Inflow),
            "OUTFLOW" => Ok(Direction::Outflow),
            "UNKNOWN" => Ok(Direction::Unknown),
            _ => Err("invalid direction"),
        }
    }
}

/// A trade or transfer normalized from any feed, ready for classification.
///
/// Constructed once per raw message/log/poll row and immutable afterwards.
/// `identifier` is the dedup key: a transaction hash, or the first fill's
/// hash when the event aggregates a batch of fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub source_chain: SourceChain,
    pub identifier: String,
    pub counterparty_from: Option<String>,
    pub counterparty_to: Option<String>,
    pub instrument: String,
    pub direction: Direction,
    pub price: Decimal,
    pub size: Decimal,
    /// price * size, or the decoded token amount for transfers
    pub notional: Decimal,
    /// Source-reported epoch milliseconds; ingestion time when the source
    /// provides none
    pub occurred_at: i64,
    /// Accounts involved in the trade batch (streaming feed only)
    pub participants: Vec<String>,
    /// Number of raw fills aggregated into this event
    pub fill_count: u32,
}

/// Outcome of classifying an event against the threshold and actor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_whale: bool,
    pub is_known_actor: bool,
}

impl Classification {
    pub fn alert_worthy(&self) -> bool {
        self.is_whale || self.is_known_actor
    }
}

/// A persisted event row as read back from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub source_chain: SourceChain,
    pub identifier: String,
    pub counterparty_from: Option<String>,
    pub counterparty_to: Option<String>,
    pub instrument: String,
    pub direction: Direction,
    pub price: Decimal,
    pub size: Decimal,
    pub notional: Decimal,
    pub occurred_at: i64,
    pub participants: Vec<String>,
    pub fill_count: u32,
    pub is_whale: bool,
    pub is_known_actor: bool,
    pub created_at: DateTime<Utc>,
}

/// Classified event as published on the live broadcast channel
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    pub topic: &'static str,
    pub event: NormalizedEvent,
    pub classification: Classification,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_chain_round_trip() {
        for chain in [
            SourceChain::ExchangeStream,
            SourceChain::Tron,
            SourceChain::Ethereum,
        ] {
            assert_eq!(chain.as_str().parse::<SourceChain>().unwrap(), chain);
        }
    }

    #[test]
    fn test_direction_round_trip() {
        for dir in [
            Direction::Buy,
            Direction::Sell,
            Direction::Inflow,
            Direction::Outflow,
            Direction::Unknown,
        ] {
            assert_eq!(dir.as_str().parse::<Direction>().unwrap(), dir);
        }
    }

    #[test]
    fn test_alert_worthy() {
        let whale = Classification {
            is_whale: true,
            is_known_actor: false,
        };
        let actor = Classification {
            is_whale: false,
            is_known_actor: true,
        };
        let neither = Classification {
            is_whale: false,
            is_known_actor: false,
        };
        assert!(whale.alert_worthy());
        assert!(actor.alert_worthy());
        assert!(!neither.alert_worthy());
    }
}
