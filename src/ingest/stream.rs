//! Streaming trade ingester
//!
//! Owns one persistent WebSocket connection to the exchange trade feed.
//! Trades arrive in batches; fills sharing (instrument, direction) within a
//! batch are aggregated into a single event before classification. The
//! connection is guarded by a heartbeat watchdog and reconnects with capped
//! exponential backoff until shutdown is requested.

use crate::config::StreamConfig;
use crate::domain::{Direction, NormalizedEvent, SourceChain};
use crate::error::{Result, WatchError};
use crate::pipeline::Pipeline;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Connect handshake timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnect delay for a given attempt: min(base * 2^attempt, cap)
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
}

/// Whether the liveness watchdog should force a reconnect.
///
/// Fires when no inbound traffic has been seen for more than 1.5x the probe
/// interval; a silently dead connection is terminated rather than left to
/// decay.
pub fn watchdog_expired(since_liveness: Duration, heartbeat_interval: Duration) -> bool {
    since_liveness > heartbeat_interval + heartbeat_interval / 2
}

/// One raw fill from a batched trade message
#[derive(Debug, Clone, Deserialize)]
pub struct RawFill {
    pub coin: String,
    pub side: String,
    pub px: String,
    pub sz: String,
    #[serde(default)]
    pub time: i64,
    pub hash: String,
    #[serde(default)]
    pub users: Vec<String>,
}

/// Inbound frame, discriminated by channel/method
#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    method: &'static str,
    subscription: Subscription<'a>,
}

#[derive(Serialize)]
struct Subscription<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    coin: &'a str,
}

fn subscribe_message(coin: &str) -> Result<Message> {
    let request = SubscribeRequest {
        method: "subscribe",
        subscription: Subscription {
            kind: "trades",
            coin,
        },
    };
    Ok(Message::Text(serde_json::to_string(&request)?))
}

fn side_to_direction(side: &str) -> Direction {
    match side {
        "B" => Direction::Buy,
        "A" | "S" => Direction::Sell,
        _ => Direction::Unknown,
    }
}

/// Aggregate a batch of raw fills into one event per (instrument, direction).
///
/// Each aggregate carries the summed size, the notional-weighted average
/// price, the union of participant accounts, and the first fill's hash as
/// its identifier. Groups whose total size is zero are discarded.
pub fn aggregate_fills(fills: &[RawFill]) -> Vec<NormalizedEvent> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: std::collections::HashMap<(String, String), Vec<&RawFill>> =
        std::collections::HashMap::new();

    for fill in fills {
        let key = (fill.coin.clone(), fill.side.clone());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(fill);
    }

    let mut events = Vec::with_capacity(order.len());
    for key in order {
        let group = &groups[&key];
        let mut total_size = Decimal::ZERO;
        let mut total_notional = Decimal::ZERO;
        let mut participants: Vec<String> = Vec::new();
        let mut aggregated = 0u32;

        for fill in group {
            let (px, sz) = match (fill.px.parse::<Decimal>(), fill.sz.parse::<Decimal>()) {
                (Ok(px), Ok(sz)) => (px, sz),
                _ => {
                    warn!("Skipping fill with unparseable price/size in {}", fill.coin);
                    continue;
                }
            };
            total_size += sz;
            total_notional += px * sz;
            aggregated += 1;
            for user in &fill.users {
                if !participants.contains(user) {
                    participants.push(user.clone());
                }
            }
        }

        if total_size.is_zero() {
            continue;
        }

        let first = group[0];
        let occurred_at = if first.time > 0 {
            first.time
        } else {
            Utc::now().timestamp_millis()
        };

        events.push(NormalizedEvent {
            source_chain: SourceChain::ExchangeStream,
            identifier: first.hash.clone(),
            counterparty_from: None,
            counterparty_to: None,
            instrument: first.coin.clone(),
            direction: side_to_direction(&first.side),
            price: total_notional / total_size,
            size: total_size,
            notional: total_notional,
            occurred_at,
            participants,
            fill_count: aggregated,
        });
    }

    events
}

/// How the connected loop ended
enum StreamExit {
    /// Remote close or end of stream; reconnect applies
    Closed,
    /// Shutdown requested; no reconnect
    Shutdown,
}

/// Streaming trade ingester
pub struct TradeStream {
    ws_url: String,
    heartbeat_interval: Duration,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    pipeline: Pipeline,
    subscriptions: Arc<RwLock<BTreeSet<String>>>,
    add_rx: mpsc::Receiver<String>,
}

impl TradeStream {
    /// Build the ingester. The returned sender feeds newly discovered
    /// instruments into the live connection; the shared set is what gets
    /// re-subscribed after every reconnect.
    pub fn new(
        config: &StreamConfig,
        pipeline: Pipeline,
        subscriptions: Arc<RwLock<BTreeSet<String>>>,
    ) -> (Self, mpsc::Sender<String>) {
        let (add_tx, add_rx) = mpsc::channel(256);

        (
            Self {
                ws_url: config.ws_url.clone(),
                heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
                backoff_base_ms: config.backoff_base_ms,
                backoff_cap_ms: config.backoff_cap_ms,
                pipeline,
                subscriptions,
                add_rx,
            },
            add_tx,
        )
    }

    /// Run until shutdown, reconnecting with backoff after every disconnect
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_stream(&mut shutdown, &mut attempt).await {
                Ok(StreamExit::Shutdown) => break,
                Ok(StreamExit::Closed) => {
                    info!("Trade stream connection closed, reconnecting");
                }
                Err(e) => {
                    error!("Trade stream error (attempt {}): {}", attempt + 1, e);
                }
            }

            let delay = backoff_delay(attempt, self.backoff_base_ms, self.backoff_cap_ms);
            attempt = attempt.saturating_add(1);
            info!("Reconnecting to trade stream in {:?}", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Trade stream ingester stopped");
    }

    async fn connect_and_stream(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        attempt: &mut u32,
    ) -> Result<StreamExit> {
        info!("Connecting to trade stream: {}", self.ws_url);

        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(&self.ws_url))
            .await
            .map_err(|_| WatchError::FeedUnavailable("connection timeout".to_string()))?
            .map_err(WatchError::WebSocket)?;

        info!("Connected to trade stream");
        *attempt = 0;

        let (mut write, mut read) = ws_stream.split();

        // Re-issue the full subscription set; the feed treats repeated
        // subscribes for the same instrument as a no-op.
        let coins: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        for coin in &coins {
            write.send(subscribe_message(coin)?).await?;
        }
        info!("Subscribed to {} instruments", coins.len());

        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.tick().await; // first tick is immediate
        let mut last_liveness = Instant::now();
        let mut adds_open = true;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_liveness = Instant::now();
                            self.handle_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_liveness = Instant::now();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Received close frame from trade stream");
                            return Ok(StreamExit::Closed);
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            info!("Trade stream ended");
                            return Ok(StreamExit::Closed);
                        }
                        _ => {}
                    }
                }
                _ = heartbeat.tick() => {
                    let silent_for = last_liveness.elapsed();
                    if watchdog_expired(silent_for, self.heartbeat_interval) {
                        return Err(WatchError::FeedUnavailable(format!(
                            "no liveness for {:?}; terminating connection",
                            silent_for
                        )));
                    }
                    write.send(Message::Text(r#"{"method":"ping"}"#.to_string())).await?;
                    debug!("Sent ping to trade stream");
                }
                added = self.add_rx.recv(), if adds_open => {
                    match added {
                        Some(coin) => {
                            write.send(subscribe_message(&coin)?).await?;
                            info!("Subscribed to new instrument {}", coin);
                        }
                        None => {
                            // Sender gone; stop polling a closed channel.
                            adds_open = false;
                            debug!("Instrument channel closed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Intentional close must not look like an abnormal
                        // disconnect to the reconnect path.
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(StreamExit::Shutdown);
                    }
                }
            }
        }
    }

    /// Decode one inbound frame and feed any trade batch through the
    /// pipeline. Decode failures are confined to the offending message.
    async fn handle_message(&self, text: &str) {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Undecodable trade stream message: {}", e);
                return;
            }
        };

        match (message.channel.as_deref(), message.method.as_deref()) {
            (Some("trades"), _) => {
                let Some(data) = message.data else {
                    debug!("Trades message without data payload");
                    return;
                };
                let fills: Vec<RawFill> = match serde_json::from_value(data) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("Undecodable trade batch: {}", e);
                        return;
                    }
                };

                for event in aggregate_fills(&fills) {
                    self.pipeline.process(event).await;
                }
            }
            (Some("pong"), _) | (_, Some("pong")) => {
                debug!("Received pong");
            }
            (Some("subscriptionResponse"), _) => {}
            (Some("error"), _) => {
                error!("Trade stream error notice: {}", text);
            }
            _ => {
                debug!("Unhandled trade stream message ({} bytes)", text.len());
            }
        }
    }
}
