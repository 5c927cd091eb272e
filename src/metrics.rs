//! Prometheus instrumentation for the ingestion pipeline and read path.
//!
//! A single global `Registry` with one counter/gauge/histogram per
//! observable named in the component design: poll throughput, decode drops,
//! persistence outcomes, cache hit rate, queue depth, and broadcast fan-out.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use lazy_static::lazy_static;

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Blocks observed by the poll loop, whether or not they contained logs.
    pub static ref BLOCKS_POLLED: IntCounter = IntCounter::new(
        "chainpulse_blocks_polled_total",
        "Total blocks observed by the ingestion scheduler"
    ).unwrap();

    /// Transfer logs decoded, before any drop filtering.
    pub static ref EVENTS_DECODED: IntCounter = IntCounter::new(
        "chainpulse_events_decoded_total",
        "Total Transfer logs successfully decoded"
    ).unwrap();

    /// Logs dropped by the decoder, labeled by reason.
    pub static ref EVENTS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("chainpulse_events_dropped_total", "Total Transfer logs dropped by the decoder"),
        &["reason"]
    ).unwrap();

    /// Transaction rows persisted by the batch writer.
    pub static ref TRANSACTIONS_PERSISTED: IntCounter = IntCounter::new(
        "chainpulse_transactions_persisted_total",
        "Total transaction rows persisted"
    ).unwrap();

    /// Duplicate rows skipped by the unique-hash constraint.
    pub static ref DUPLICATE_TRANSACTIONS: IntCounter = IntCounter::new(
        "chainpulse_duplicate_transactions_total",
        "Total duplicate transaction rows skipped on re-ingestion"
    ).unwrap();

    /// Batch commits that aborted due to a persistence error.
    pub static ref BATCH_COMMIT_FAILURES: IntCounter = IntCounter::new(
        "chainpulse_batch_commit_failures_total",
        "Total drain batches that failed to commit"
    ).unwrap();

    /// Events dropped because the in-memory queue was full.
    pub static ref QUEUE_OVERFLOW: IntCounter = IntCounter::new(
        "chainpulse_queue_overflow_total",
        "Total decoded events dropped because the event queue was full"
    ).unwrap();

    /// Current depth of the event queue.
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "chainpulse_queue_depth",
        "Current number of decoded events awaiting persistence"
    ).unwrap();

    /// RPC call latency, labeled by method.
    pub static ref RPC_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("chainpulse_rpc_latency_seconds", "Chain RPC call latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["method"]
    ).unwrap();

    /// Chain endpoint failovers (primary -> backup).
    pub static ref RPC_FAILOVERS: IntCounter = IntCounter::new(
        "chainpulse_rpc_failovers_total",
        "Total times the chain client switched to a backup endpoint"
    ).unwrap();

    /// Rate-limit responses observed on `getLogs` calls.
    pub static ref RATE_LIMIT_HITS: IntCounter = IntCounter::new(
        "chainpulse_rate_limit_hits_total",
        "Total rate-limit responses observed from the chain endpoint"
    ).unwrap();

    /// Cache operations, labeled by outcome.
    pub static ref CACHE_HITS: IntCounter = IntCounter::new(
        "chainpulse_cache_hits_total", "Total cache-aside hits"
    ).unwrap();
    pub static ref CACHE_MISSES: IntCounter = IntCounter::new(
        "chainpulse_cache_misses_total", "Total cache-aside misses"
    ).unwrap();
    pub static ref CACHE_SETS: IntCounter = IntCounter::new(
        "chainpulse_cache_sets_total", "Total cache writes"
    ).unwrap();

    /// Current connected WebSocket subscribers.
    pub static ref BROADCAST_SUBSCRIBERS: IntGauge = IntGauge::new(
        "chainpulse_broadcast_subscribers",
        "Current number of connected broadcast subscribers"
    ).unwrap();

    /// Frames sent to subscribers, labeled by frame type.
    pub static ref BROADCAST_FRAMES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("chainpulse_broadcast_frames_sent_total", "Total frames fanned out to subscribers"),
        &["frame_type"]
    ).unwrap();

    /// Watermark value, for dashboards that want to chart indexing progress.
    pub static ref WATERMARK_HEIGHT: IntGauge = IntGauge::new(
        "chainpulse_watermark_height",
        "Last processed block height"
    ).unwrap();

    /// Drain batch size histogram.
    pub static ref BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new("chainpulse_batch_size", "Number of events committed per drain batch")
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0])
    ).unwrap();
}

/// Registers every metric with the global registry. Call once at startup.
pub fn register_all() {
    let _ = REGISTRY.register(Box::new(BLOCKS_POLLED.clone()));
    let _ = REGISTRY.register(Box::new(EVENTS_DECODED.clone()));
    let _ = REGISTRY.register(Box::new(EVENTS_DROPPED.clone()));
    let _ = REGISTRY.register(Box::new(TRANSACTIONS_PERSISTED.clone()));
    let _ = REGISTRY.register(Box::new(DUPLICATE_TRANSACTIONS.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_COMMIT_FAILURES.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_OVERFLOW.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(RPC_LATENCY.clone()));
    let _ = REGISTRY.register(Box::new(RPC_FAILOVERS.clone()));
    let _ = REGISTRY.register(Box::new(RATE_LIMIT_HITS.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_HITS.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_MISSES.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_SETS.clone()));
    let _ = REGISTRY.register(Box::new(BROADCAST_SUBSCRIBERS.clone()));
    let _ = REGISTRY.register(Box::new(BROADCAST_FRAMES_SENT.clone()));
    let _ = REGISTRY.register(Box::new(WATERMARK_HEIGHT.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_SIZE.clone()));
}

/// Renders the registry in Prometheus text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
