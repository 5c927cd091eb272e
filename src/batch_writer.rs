//! Event Queue & Batch Writer (C5): drains the bounded [`EventQueue`] on a
//! fixed interval and commits each batch in one persistence transaction —
//! bulk insert, per-event statistics update, and `NEW_TRANSACTION`
//! broadcast, all inside the same transaction boundary as the insert.
//!
//! On any error within a drain the transaction aborts and the batch is
//! **not** re-enqueued (see `DESIGN.md`, Open Question Decision #1: the
//! watermark only advances after a batch owning it commits, so the same
//! blocks are re-observed on the next poll rather than silently losing
//! events).

use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::chain_client::ChainClient;
use crate::error::AppError;
use crate::metrics;
use crate::queue::EventQueue;
use crate::statistics;
use crate::types::{DecodedTransfer, Direction, EventFrame, Transaction};
use crate::watermark::WatermarkStore;

pub struct BatchWriter {
    pool: PgPool,
    queue: Arc<EventQueue>,
    chain_client: Arc<ChainClient>,
    watermark: Arc<WatermarkStore>,
    broadcast_tx: broadcast::Sender<EventFrame>,
    batch_size: usize,
    whale_threshold: BigDecimal,
    enable_tx_details: bool,
}

impl BatchWriter {
    pub fn new(
        pool: PgPool,
        queue: Arc<EventQueue>,
        chain_client: Arc<ChainClient>,
        watermark: Arc<WatermarkStore>,
        broadcast_tx: broadcast::Sender<EventFrame>,
        batch_size: usize,
        whale_threshold: num_bigint::BigUint,
        enable_tx_details: bool,
    ) -> Self {
        let whale_threshold = BigDecimal::from_str(&whale_threshold.to_string())
            .unwrap_or_else(|_| BigDecimal::from(0));
        Self {
            pool,
            queue,
            chain_client,
            watermark,
            broadcast_tx,
            batch_size,
            whale_threshold,
            enable_tx_details,
        }
    }

    /// Runs the drain loop until `shutdown` fires. The current drain (if
    /// any) always finishes before the loop exits.
    pub async fn run(&self, process_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(process_interval) => {
                    if let Err(e) = self.drain_once().await {
                        tracing::error!(error = %e, "batch drain failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("batch writer draining final backlog before shutdown");
                        let _ = self.drain_once().await;
                        break;
                    }
                }
            }
        }
    }

    /// Drains at most `batch_size` events and commits them in one
    /// transaction. Returns the number of events successfully persisted.
    pub async fn drain_once(&self) -> Result<usize, AppError> {
        let events = self.queue.drain(self.batch_size).await;
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut persisted = Vec::with_capacity(events.len());
        let mut duplicates = 0u64;

        for event in &events {
            let (gas_price, gas_used) = if self.enable_tx_details {
                self.chain_client
                    .get_transaction_receipt(&event.tx_hash)
                    .await
                    .map(|(price, used)| {
                        (
                            BigDecimal::from_str(&price.to_string()).unwrap_or_default(),
                            BigDecimal::from_str(&used.to_string()).unwrap_or_default(),
                        )
                    })
                    .unwrap_or((BigDecimal::from(0), BigDecimal::from(0)))
            } else {
                (BigDecimal::from(0), BigDecimal::from(0))
            };

            let row = to_transaction_row(event, &gas_price, &gas_used);

            let inserted: Option<(String,)> = sqlx::query_as(
                "INSERT INTO transactions (
                    hash, block_number, block_hash, transaction_index, log_index,
                    from_address, to_address, value, token_address, token_symbol,
                    token_decimals, gas_price, gas_used, block_timestamp, is_anomaly, anomaly_score
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
                ON CONFLICT (hash) DO NOTHING
                RETURNING hash",
            )
            .bind(&row.hash)
            .bind(row.block_number)
            .bind(&row.block_hash)
            .bind(row.transaction_index)
            .bind(row.log_index)
            .bind(&row.from_address)
            .bind(&row.to_address)
            .bind(&row.value)
            .bind(&row.token_address)
            .bind(&row.token_symbol)
            .bind(row.token_decimals)
            .bind(&row.gas_price)
            .bind(&row.gas_used)
            .bind(row.timestamp)
            .bind(row.is_anomaly)
            .bind(row.anomaly_score)
            .fetch_optional(&mut *tx)
            .await?;

            if inserted.is_some() {
                statistics::upsert(
                    &mut tx,
                    &event.from,
                    &event.token_address,
                    Direction::Sent,
                    &event.value,
                    event.timestamp,
                    &self.whale_threshold,
                )
                .await?;
                statistics::upsert(
                    &mut tx,
                    &event.to,
                    &event.token_address,
                    Direction::Received,
                    &event.value,
                    event.timestamp,
                    &self.whale_threshold,
                )
                .await?;
                persisted.push(row);
            } else {
                duplicates += 1;
            }
        }

        if let Err(e) = tx.commit().await {
            metrics::BATCH_COMMIT_FAILURES.inc();
            return Err(e.into());
        }

        metrics::TRANSACTIONS_PERSISTED.inc_by(persisted.len() as u64);
        metrics::DUPLICATE_TRANSACTIONS.inc_by(duplicates);
        metrics::BATCH_SIZE.observe(persisted.len() as f64);

        // The durable watermark only advances once this batch's transaction
        // has committed, so a crash mid-batch re-observes these blocks.
        if let Some(max_block) = events.iter().map(|e| e.block_number).max() {
            if let Err(e) = self.watermark.save(max_block).await {
                tracing::error!(error = %e, "failed to persist watermark after batch commit");
            }
        }

        for row in &persisted {
            let _ = self.broadcast_tx.send(EventFrame::NewTransaction(row.clone()));
        }

        Ok(persisted.len())
    }
}

fn to_transaction_row(event: &DecodedTransfer, gas_price: &BigDecimal, gas_used: &BigDecimal) -> Transaction {
    Transaction {
        hash: event.tx_hash.clone(),
        block_number: event.block_number as i64,
        block_hash: event.block_hash.clone(),
        transaction_index: event.transaction_index,
        log_index: event.log_index,
        from_address: event.from.clone(),
        to_address: event.to.clone(),
        value: event.value.clone(),
        token_address: event.token_address.clone(),
        token_symbol: event.token_symbol.clone(),
        token_decimals: event.token_decimals as i16,
        gas_price: gas_price.clone(),
        gas_used: gas_used.clone(),
        timestamp: event.timestamp,
        is_anomaly: false,
        anomaly_score: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_row_carries_decoded_fields_through() {
        let event = DecodedTransfer {
            from: "0xaaaa".to_string(),
            to: "0xbbbb".to_string(),
            value: BigDecimal::from(42),
            token_address: "0xtoken".to_string(),
            token_symbol: "TKN".to_string(),
            token_decimals: 18,
            block_number: 100,
            block_hash: "0xblock".to_string(),
            tx_hash: "0xtx".to_string(),
            transaction_index: 1,
            log_index: 2,
            timestamp: chrono::Utc::now(),
        };
        let row = to_transaction_row(&event, &BigDecimal::from(0), &BigDecimal::from(0));
        assert_eq!(row.hash, "0xtx");
        assert_eq!(row.block_number, 100);
        assert_eq!(row.value, BigDecimal::from(42));
        assert!(!row.is_anomaly);
    }
}
