//! Ingestion Scheduler (C4): classifies the startup gap between the
//! watermark and the chain tip, replays it in bounded batches, then settles
//! into a steady-state poll loop.
//!
//! Grounded on the teacher's `monitor` sync loop (gap-aware batching against
//! a persisted cursor, `tokio::select!`-driven shutdown) generalized from a
//! single-chain PIVX `getblock` walk to a per-poll, all-token `eth_getLogs`
//! sweep. The scheduler owns an in-memory polling cursor distinct from the
//! durable [`WatermarkStore`]; the batch writer is the only component that
//! advances the durable watermark, and only after a batch commits (see
//! `DESIGN.md`, Open Question Decision #1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::chain_client::ChainClient;
use crate::decoder::{self, DecoderConfig};
use crate::error::AppError;
use crate::metrics;
use crate::queue::EventQueue;
use crate::token_registry::TokenRegistry;
use crate::watermark::WatermarkStore;

/// Below this gap, startup resumes directly in the steady-state poll loop.
const SMALL_GAP_THRESHOLD: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapClass {
    /// Small enough to catch up inline before entering the poll loop.
    Normal,
    /// Large enough to require fixed-size batches with inter-batch pacing.
    CatchUp,
    /// So large that replaying it in full isn't worth it; the scheduler
    /// skips ahead and logs the dropped range.
    Truncated,
}

pub fn classify_gap(gap: u64, catch_up_max_gap: u64) -> GapClass {
    if gap <= SMALL_GAP_THRESHOLD {
        GapClass::Normal
    } else if gap <= catch_up_max_gap {
        GapClass::CatchUp
    } else {
        GapClass::Truncated
    }
}

pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub max_blocks_per_poll: u64,
    pub max_retry_attempts: u32,
    pub rate_limit_backoff: Duration,
    pub catch_up_batch_size: u64,
    pub catch_up_batch_delay: Duration,
    pub catch_up_max_gap: u64,
    pub catch_up_max_blocks: u64,
    pub ignore_zero_value_transfers: bool,
}

/// Polls the chain for Transfer logs across every monitored token and feeds
/// decoded events into the shared [`EventQueue`].
///
/// Maintains its own in-memory polling cursor (`cursor`); the durable
/// watermark belongs to the batch writer and is read here only once, at
/// startup, to decide where to resume from.
pub struct IngestionScheduler {
    chain_client: Arc<ChainClient>,
    watermark: Arc<WatermarkStore>,
    registry: Arc<TokenRegistry>,
    queue: Arc<EventQueue>,
    decoder_config: DecoderConfig,
    config: SchedulerConfig,
    cursor: AtomicU64,
}

impl IngestionScheduler {
    pub fn new(
        chain_client: Arc<ChainClient>,
        watermark: Arc<WatermarkStore>,
        registry: Arc<TokenRegistry>,
        queue: Arc<EventQueue>,
        config: SchedulerConfig,
    ) -> Self {
        let decoder_config = DecoderConfig { ignore_zero_value: config.ignore_zero_value_transfers };
        Self {
            chain_client,
            watermark,
            registry,
            queue,
            decoder_config,
            config,
            cursor: AtomicU64::new(0),
        }
    }

    /// Current in-memory polling cursor, for health reporting.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Classifies and replays the startup gap, then runs the steady-state
    /// poll loop until `shutdown` fires.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        self.startup_catch_up().await?;
        self.steady_state(shutdown).await;
        Ok(())
    }

    async fn startup_catch_up(&self) -> Result<(), AppError> {
        let latest = self.chain_client.latest_block().await?;
        let watermark = self.watermark.load().await?;
        let gap = latest.saturating_sub(watermark);

        match classify_gap(gap, self.config.catch_up_max_gap) {
            GapClass::Normal => {
                self.cursor.store(watermark, Ordering::Release);
                Ok(())
            }
            GapClass::CatchUp => {
                tracing::info!(gap, watermark, latest, "catching up before steady-state polling");
                self.cursor.store(watermark, Ordering::Release);
                self.replay_in_batches(latest).await
            }
            GapClass::Truncated => {
                let resume_from = latest.saturating_sub(self.config.catch_up_max_blocks);
                tracing::warn!(
                    gap,
                    dropped_blocks = resume_from.saturating_sub(watermark),
                    resume_from,
                    latest,
                    "startup gap exceeds catch-up limit, skipping ahead"
                );
                self.cursor.store(resume_from, Ordering::Release);
                self.replay_in_batches(latest).await
            }
        }
    }

    /// Walks forward from the current cursor to `to` in
    /// `catch_up_batch_size`-block chunks, pacing with
    /// `catch_up_batch_delay` between chunks.
    async fn replay_in_batches(&self, to: u64) -> Result<(), AppError> {
        loop {
            let cursor = self.cursor.load(Ordering::Acquire);
            if cursor >= to {
                return Ok(());
            }
            let end = (cursor + self.config.catch_up_batch_size).min(to);
            self.process_range(cursor + 1, end).await?;
            self.cursor.store(end, Ordering::Release);
            tokio::time::sleep(self.config.catch_up_batch_delay).await;
        }
    }

    async fn steady_state(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "poll iteration failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("ingestion scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<(), AppError> {
        let latest = self.chain_client.latest_block().await?;
        let cursor = self.cursor.load(Ordering::Acquire);
        if latest <= cursor {
            return Ok(());
        }
        let end = latest.min(cursor + self.config.max_blocks_per_poll);
        self.process_range(cursor + 1, end).await?;
        self.cursor.store(end, Ordering::Release);
        Ok(())
    }

    /// Fetches logs for every monitored token across `[from, to]` in one
    /// call, decodes each, and enqueues successes. Blocks within the range
    /// are covered by a single `eth_getLogs` call, so there is no
    /// per-block ordering to enforce beyond the ascending range itself.
    async fn process_range(&self, from: u64, to: u64) -> Result<(), AppError> {
        let addresses = self.registry.active_addresses();
        if addresses.is_empty() {
            return Ok(());
        }

        let logs = self.fetch_logs_with_retry(&addresses, from, to).await?;
        metrics::BLOCKS_POLLED.inc_by(to - from + 1);

        let mut block_timestamps: HashMap<u64, DateTime<Utc>> = HashMap::new();
        for log in logs {
            let timestamp = match block_timestamps.get(&log.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self
                        .chain_client
                        .get_block_timestamp(log.block_number)
                        .await
                        .unwrap_or_else(Utc::now);
                    block_timestamps.insert(log.block_number, ts);
                    ts
                }
            };

            match decoder::decode_transfer_log(&log, &self.registry, &self.decoder_config, timestamp) {
                Ok(event) => {
                    metrics::EVENTS_DECODED.inc();
                    self.queue.push(event).await;
                }
                Err(reason) => {
                    metrics::EVENTS_DROPPED.with_label_values(&[&reason.to_string()]).inc();
                }
            }
        }

        Ok(())
    }

    /// Retries `getLogs` up to `max_retry_attempts` times, sleeping
    /// `rate_limit_backoff` on a rate-limit classification and an
    /// exponential `1s * 2^attempt` backoff otherwise. Re-raises the last
    /// error once attempts are exhausted.
    async fn fetch_logs_with_retry(
        &self,
        addresses: &[String],
        from: u64,
        to: u64,
    ) -> Result<Vec<crate::chain_client::RawLog>, AppError> {
        let mut last_err = None;
        for attempt in 0..self.config.max_retry_attempts {
            match self.chain_client.get_logs(addresses, from, to).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    if e.is_rate_limited() {
                        tokio::time::sleep(self.config.rate_limit_backoff).await;
                    } else {
                        tokio::time::sleep(Duration::from_secs(1) * 2u32.pow(attempt)).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(AppError::Rpc("getLogs retries exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_gap_classifies_as_normal() {
        assert_eq!(classify_gap(500, 100_000), GapClass::Normal);
    }

    #[test]
    fn gap_above_small_threshold_classifies_as_catch_up() {
        assert_eq!(classify_gap(5_000, 100_000), GapClass::CatchUp);
    }

    #[test]
    fn gap_above_max_classifies_as_truncated() {
        assert_eq!(classify_gap(200_000, 100_000), GapClass::Truncated);
    }

    #[test]
    fn zero_gap_is_normal() {
        assert_eq!(classify_gap(0, 100_000), GapClass::Normal);
    }

    #[test]
    fn gap_exactly_at_max_is_catch_up_not_truncated() {
        assert_eq!(classify_gap(100_000, 100_000), GapClass::CatchUp);
    }
}
