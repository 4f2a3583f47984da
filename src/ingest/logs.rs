//! Contract log subscription ingester
//!
//! Subscribes over WebSocket JSON-RPC to ERC-20 Transfer logs on the token
//! contract and turns treasury-touching transfers into events. Unlike the
//! trade stream this ingester does not reconnect: losing the subscription is
//! treated as fatal for the task, after an operational alert.

use crate::config::LogWatchConfig;
use crate::domain::{Direction, NormalizedEvent, SourceChain};
use crate::error::{Result, WatchError};
use crate::pipeline::Pipeline;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// eth_subscription notification envelope
#[derive(Debug, Deserialize)]
struct RpcNotification {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<RpcParams>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RpcParams {
    result: LogEntry,
}

#[derive(Debug, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    pub topics: Vec<String>,
    pub data: String,
}

/// Last 20 bytes of a 32-byte topic word, as an 0x-prefixed address
pub fn topic_to_address(topic: &str) -> Option<String> {
    let hex = topic.strip_prefix("0x").unwrap_or(topic);
    if hex.len() < 40 {
        return None;
    }
    Some(format!("0x{}", &hex[hex.len() - 40..]))
}

/// Decode the uint256 amount word and scale it down by the token's decimals
pub fn decode_amount(data: &str, decimals: u32) -> Option<Decimal> {
    let hex = data.strip_prefix("0x").unwrap_or(data);
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let significant = hex.trim_start_matches('0');
    let raw = if significant.is_empty() {
        0u128
    } else {
        u128::from_str_radix(significant, 16).ok()?
    };
    let mut amount = Decimal::from(raw);
    amount.set_scale(decimals).ok()?;
    Some(amount.normalize())
}

/// Turn a Transfer log into an event when the treasury is either party
pub fn normalize_log(
    log: &LogEntry,
    treasury_address: &str,
    decimals: u32,
) -> Option<NormalizedEvent> {
    if log.topics.len() < 3 || !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return None;
    }

    let from = topic_to_address(&log.topics[1])?;
    let to = topic_to_address(&log.topics[2])?;
    let amount = decode_amount(&log.data, decimals)?;

    let direction = if to.eq_ignore_ascii_case(treasury_address) {
        Direction::Inflow
    } else if from.eq_ignore_ascii_case(treasury_address) {
        Direction::Outflow
    } else {
        return None;
    };

    Some(NormalizedEvent {
        source_chain: SourceChain::Ethereum,
        identifier: log.transaction_hash.clone(),
        counterparty_from: Some(from.clone()),
        counterparty_to: Some(to.clone()),
        instrument: "USDT".to_string(),
        direction,
        price: Decimal::ONE,
        size: amount,
        notional: amount,
        // log notifications carry no block timestamp
        occurred_at: Utc::now().timestamp_millis(),
        participants: vec![from, to],
        fill_count: 1,
    })
}

/// Contract log subscription ingester
pub struct LogSubscriber {
    ws_url: String,
    contract_address: String,
    treasury_address: String,
    token_decimals: u32,
    pipeline: Pipeline,
}

impl LogSubscriber {
    pub fn new(config: &LogWatchConfig, pipeline: Pipeline) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            contract_address: config.contract_address.clone(),
            treasury_address: config.treasury_address.clone(),
            token_decimals: config.token_decimals,
            pipeline,
        }
    }

    /// Run until the subscription drops or shutdown is requested
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.subscribe_and_stream(&mut shutdown).await {
            Ok(()) => {
                info!("Log subscriber stopped");
            }
            Err(e) => {
                error!("Log subscription lost: {}", e);
                self.pipeline
                    .notify_error("Log Subscriber", &e.to_string())
                    .await;
            }
        }
    }

    async fn subscribe_and_stream(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        info!("Connecting to log endpoint: {}", self.ws_url);

        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(&self.ws_url))
            .await
            .map_err(|_| WatchError::Subscription("connection timeout".to_string()))?
            .map_err(WatchError::WebSocket)?;

        let (mut write, mut read) = ws_stream.split();

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": [
                "logs",
                {
                    "address": self.contract_address,
                    "topics": [TRANSFER_TOPIC],
                }
            ]
        });
        write.send(Message::Text(request.to_string())).await?;

        info!(
            "Subscribed to Transfer logs on {} (treasury {})",
            self.contract_address, self.treasury_address
        );

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(WatchError::Subscription(format!(
                                "endpoint closed the connection: {:?}",
                                frame
                            )));
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            return Err(WatchError::Subscription(
                                "stream ended".to_string(),
                            ));
                        }
                        _ => {}
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_message(&self, text: &str) {
        let notification: RpcNotification = match serde_json::from_str(text) {
            Ok(n) => n,
            Err(e) => {
                warn!("Undecodable log message: {}", e);
                return;
            }
        };

        if let Some(error) = notification.error {
            error!("Log endpoint error: {}", error);
            return;
        }

        if notification.method.as_deref() != Some("eth_subscription") {
            if let Some(result) = notification.result {
                debug!("Subscription acknowledged: {}", result);
            }
            return;
        }

        let Some(params) = notification.params else {
            return;
        };

        match normalize_log(&params.result, &self.treasury_address, self.token_decimals) {
            Some(event) => {
                self.pipeline.process(event).await;
            }
            None => {
                debug!(
                    "Discarded log {} (treasury not involved or undecodable)",
                    params.result.transaction_hash
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TREASURY: &str = "0x5754284f345afc66a98fbb0a0afe71e0f00f37e3";

    fn topic_for(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    fn transfer_log(from: &str, to: &str, data: &str) -> LogEntry {
        LogEntry {
            transaction_hash: "0xdeadbeef".to_string(),
            topics: vec![
                TRANSFER_TOPIC.to_string(),
                topic_for(from),
                topic_for(to),
            ],
            data: data.to_string(),
        }
    }

    #[test]
    fn test_topic_to_address_takes_low_bytes() {
        let topic = topic_for("0x5754284f345afc66a98fbb0a0afe71e0f00f37e3");
        assert_eq!(topic.len(), 66);
        assert_eq!(
            topic_to_address(&topic).unwrap(),
            "0x5754284f345afc66a98fbb0a0afe71e0f00f37e3"
        );
        assert!(topic_to_address("0x1234").is_none());
    }

    #[test]
    fn test_decode_amount_scales_by_decimals() {
        // 0x2540be400 = 10_000_000_000 raw units, 10_000 at 6 decimals
        assert_eq!(decode_amount("0x2540be400", 6), Some(dec!(10000)));
        assert_eq!(decode_amount(&format!("0x{:0>64}", "2540be400"), 6), Some(dec!(10000)));
        assert_eq!(decode_amount(&format!("0x{:0>64}", ""), 6), Some(Decimal::ZERO));
        assert!(decode_amount("0x", 6).is_none());
    }

    #[test]
    fn test_inflow_when_treasury_receives() {
        let log = transfer_log("0xaabbccddeeff00112233445566778899aabbccdd", TREASURY, "0x2540be400");
        let event = normalize_log(&log, TREASURY, 6).unwrap();
        assert_eq!(event.direction, Direction::Inflow);
        assert_eq!(event.size, dec!(10000));
        assert_eq!(event.identifier, "0xdeadbeef");
        assert_eq!(event.source_chain, SourceChain::Ethereum);
    }

    #[test]
    fn test_outflow_is_case_insensitive() {
        let log = transfer_log(
            &TREASURY.to_uppercase().replace("0X", "0x"),
            "0xaabbccddeeff00112233445566778899aabbccdd",
            "0x2540be400",
        );
        let event = normalize_log(&log, TREASURY, 6).unwrap();
        assert_eq!(event.direction, Direction::Outflow);
    }

    #[test]
    fn test_unrelated_transfer_discarded() {
        let log = transfer_log(
            "0xaabbccddeeff00112233445566778899aabbccdd",
            "0x1122334455667788990011223344556677889900",
            "0x2540be400",
        );
        assert!(normalize_log(&log, TREASURY, 6).is_none());
    }

    #[test]
    fn test_non_transfer_topic_discarded() {
        let mut log = transfer_log(
            "0xaabbccddeeff00112233445566778899aabbccdd",
            TREASURY,
            "0x2540be400",
        );
        log.topics[0] = "0x0000000000000000000000000000000000000000000000000000000000000000"
            .to_string();
        assert!(normalize_log(&log, TREASURY, 6).is_none());
    }

    #[test]
    fn test_subscription_notification_decodes() {
        let text = format!(
            r#"{{"jsonrpc":"2.0","method":"eth_subscription","params":{{"subscription":"0xabc","result":{{"transactionHash":"0xfeed","topics":["{}","{}","{}"],"data":"0x2540be400"}}}}}}"#,
            TRANSFER_TOPIC,
            topic_for("0x1111111111111111111111111111111111111111"),
            topic_for(TREASURY),
        );
        let notification: RpcNotification = serde_json::from_str(&text).unwrap();
        assert_eq!(notification.method.as_deref(), Some("eth_subscription"));
        let log = notification.params.unwrap().result;
        assert_eq!(log.transaction_hash, "0xfeed");
        let event = normalize_log(&log, TREASURY, 6).unwrap();
        assert_eq!(event.direction, Direction::Inflow);
    }
}
