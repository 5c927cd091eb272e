//! Bounded event queue (C5, producer half): single producer (the ingestion
//! scheduler), single consumer (the batch writer's drain loop).
//!
//! Drop-oldest-on-overflow, per the queue-full policy recorded in
//! `DESIGN.md` ("Open Question Decisions" #2): a live dashboard favors
//! recency over completeness for a bounded backlog, and the watermark/
//! re-poll mechanism gives a path back to missed ranges on the next
//! catch-up pass.

use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::metrics;
use crate::types::DecodedTransfer;

pub struct EventQueue {
    inner: Mutex<VecDeque<DecodedTransfer>>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Enqueues one event, dropping the oldest queued event if at capacity.
    pub async fn push(&self, event: DecodedTransfer) {
        let mut guard = self.inner.lock().await;
        if guard.len() >= self.capacity {
            guard.pop_front();
            metrics::QUEUE_OVERFLOW.inc();
            tracing::warn!(capacity = self.capacity, "event queue full, dropped oldest event");
        }
        guard.push_back(event);
        metrics::QUEUE_DEPTH.set(guard.len() as i64);
    }

    /// Drains up to `max` events in FIFO order, leaving any remainder queued.
    pub async fn drain(&self, max: usize) -> Vec<DecodedTransfer> {
        let mut guard = self.inner.lock().await;
        let n = max.min(guard.len());
        let drained: Vec<_> = guard.drain(..n).collect();
        metrics::QUEUE_DEPTH.set(guard.len() as i64);
        drained
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn sample(n: u8) -> DecodedTransfer {
        DecodedTransfer {
            from: format!("0x{n:040x}"),
            to: "0xbb".to_string(),
            value: BigDecimal::from(n as i64),
            token_address: "0xtoken".to_string(),
            token_symbol: "TKN".to_string(),
            token_decimals: 18,
            block_number: n as u64,
            block_hash: "0xblock".to_string(),
            tx_hash: format!("0xtx{n}"),
            transaction_index: 0,
            log_index: 0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn drains_in_fifo_order() {
        let q = EventQueue::new(10);
        for n in 0..5 {
            q.push(sample(n)).await;
        }
        let drained = q.drain(10).await;
        assert_eq!(drained.len(), 5);
        assert_eq!(drained[0].block_number, 0);
        assert_eq!(drained[4].block_number, 4);
        assert_eq!(q.len().await, 0);
    }

    #[tokio::test]
    async fn drops_oldest_when_full() {
        let q = EventQueue::new(3);
        for n in 0..5 {
            q.push(sample(n)).await;
        }
        assert_eq!(q.len().await, 3);
        let drained = q.drain(10).await;
        // Oldest two (blocks 0, 1) were dropped; 2,3,4 remain.
        assert_eq!(drained.iter().map(|e| e.block_number).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn drain_respects_max_and_leaves_remainder() {
        let q = EventQueue::new(10);
        for n in 0..5 {
            q.push(sample(n)).await;
        }
        let first = q.drain(2).await;
        assert_eq!(first.len(), 2);
        assert_eq!(q.len().await, 3);
    }
}
