//! Cursor-driven transfer poller
//!
//! Polls a paginated transfer feed on a fixed interval and advances a
//! timestamp cursor so each confirmed transfer is delivered exactly once
//! per process lifetime. The cursor starts at process start time; history
//! before startup is never replayed.

use crate::config::PollingConfig;
use crate::domain::{Direction, NormalizedEvent, SourceChain};
use crate::adapters::{TransferFeed, TransferRow};
use crate::pipeline::Pipeline;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Cursor-driven transfer poller
pub struct TransferPoller<F: TransferFeed> {
    feed: F,
    pipeline: Pipeline,
    treasury_address: String,
    token_decimals: u32,
    poll_interval: Duration,
    page_size: u32,
    cursor_ms: i64,
    busy: Arc<AtomicBool>,
}

impl<F: TransferFeed> TransferPoller<F> {
    pub fn new(config: &PollingConfig, feed: F, pipeline: Pipeline) -> Self {
        Self {
            feed,
            pipeline,
            treasury_address: config.treasury_address.clone(),
            token_decimals: 6,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            page_size: config.page_size,
            cursor_ms: Utc::now().timestamp_millis(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the polling loop until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Transfer poller started, cursor at {} ms, interval {:?}",
            self.cursor_ms, self.poll_interval
        );

        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Transfer poller stopped");
    }

    /// One poll cycle. Overlapping cycles are skipped outright; a slow
    /// upstream must not stack requests.
    pub async fn poll_once(&mut self) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Previous poll still in flight, skipping tick");
            return;
        }

        let outcome = self.fetch_and_process().await;
        self.busy.store(false, Ordering::SeqCst);

        if let Err(e) = outcome {
            error!("Transfer poll failed: {}", e);
            self.pipeline
                .notify_error("Treasury Poller", &e.to_string())
                .await;
        }
    }

    async fn fetch_and_process(&mut self) -> crate::error::Result<()> {
        let rows = self.feed.fetch(self.cursor_ms, self.page_size).await?;
        if rows.is_empty() {
            debug!("No new transfers past cursor {}", self.cursor_ms);
            return Ok(());
        }

        // The feed's ordering is not trusted; process oldest first so the
        // cursor never jumps over an unprocessed row.
        let mut rows = rows;
        rows.sort_by_key(|r| r.block_timestamp);

        let mut max_seen = self.cursor_ms - 1;
        for row in rows {
            if row.block_timestamp < self.cursor_ms {
                continue;
            }
            max_seen = max_seen.max(row.block_timestamp);

            match self.normalize(&row) {
                Some(event) => {
                    self.pipeline.process(event).await;
                }
                None => {
                    warn!(
                        "Skipping transfer {} with unparseable value {}",
                        row.transaction_id, row.value
                    );
                }
            }
        }

        if max_seen >= self.cursor_ms {
            self.cursor_ms = max_seen + 1;
            debug!("Cursor advanced to {}", self.cursor_ms);
        }

        Ok(())
    }

    fn normalize(&self, row: &TransferRow) -> Option<NormalizedEvent> {
        let raw: Decimal = row.value.parse().ok()?;
        let mut amount = raw;
        amount.set_scale(self.token_decimals).ok()?;
        let amount = amount.normalize();

        let direction = if row.to.eq_ignore_ascii_case(&self.treasury_address) {
            Direction::Inflow
        } else if row.from.eq_ignore_ascii_case(&self.treasury_address) {
            Direction::Outflow
        } else {
            Direction::Unknown
        };

        Some(NormalizedEvent {
            source_chain: SourceChain::Tron,
            identifier: row.transaction_id.clone(),
            counterparty_from: Some(row.from.clone()),
            counterparty_to: Some(row.to.clone()),
            instrument: "USDT".to_string(),
            direction,
            price: Decimal::ONE,
            size: amount,
            notional: amount,
            occurred_at: row.block_timestamp,
            participants: vec![row.from.clone(), row.to.clone()],
            fill_count: 1,
        })
    }

    #[cfg(test)]
    pub fn cursor_ms(&self) -> i64 {
        self.cursor_ms
    }

    #[cfg(test)]
    pub fn set_cursor_ms(&mut self, cursor_ms: i64) {
        self.cursor_ms = cursor_ms;
    }
}
