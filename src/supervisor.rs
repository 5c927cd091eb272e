//! Lifecycle Supervisor (C11): startup ordering, a post-chain-client health
//! gate, and the signal-driven shutdown sequence.
//!
//! Grounded on the teacher's `main`/`start_web_server` split (build shared
//! state, spawn background services, run until a signal arrives),
//! generalized into an explicit ordered startup with a health gate rather
//! than `main` inlining every step.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;

use crate::batch_writer::BatchWriter;
use crate::cache::{CacheConfig, CacheLayer, TtlClass};
use crate::chain_client::{ChainClient, ConnectionState};
use crate::config::AppConfig;
use crate::dashboard::DashboardQueryService;
use crate::error::AppError;
use crate::queue::EventQueue;
use crate::ranking::RankingEngine;
use crate::scheduler::{IngestionScheduler, SchedulerConfig};
use crate::token_registry::TokenRegistry;
use crate::types::EventFrame;
use crate::watermark::WatermarkStore;
use crate::websocket::BroadcastHub;

/// Every long-lived component the supervisor starts and, in reverse
/// dependency order, shuts down.
pub struct Supervisor {
    pub pool: PgPool,
    pub watermark: Arc<WatermarkStore>,
    pub registry: Arc<TokenRegistry>,
    pub cache: Arc<CacheLayer>,
    pub dashboard: Arc<DashboardQueryService>,
    pub ranking: Arc<RankingEngine>,
    pub broadcast: Arc<BroadcastHub>,
    pub chain_client: Arc<ChainClient>,
    pub scheduler: Arc<IngestionScheduler>,
    pub batch_writer: Arc<BatchWriter>,
    pub queue: Arc<EventQueue>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    /// Builds every component in the order named in the component design:
    /// watermark -> token registry -> cache -> persistence -> dashboard
    /// service -> broadcast hub -> chain client -> ingestion scheduler.
    /// Persistence itself (the pool) is supplied already-connected by the
    /// caller, since acquiring it is part of process startup in `main`.
    pub async fn start(config: &AppConfig, pool: PgPool) -> Result<Self, AppError> {
        let watermark = Arc::new(WatermarkStore::new(pool.clone()));
        watermark.load().await?;

        let registry = Arc::new(TokenRegistry::new(&config.tokens));

        let cache_config = CacheConfig {
            prefix: config.cache_key_prefix.clone(),
            ttl_address_stats: Duration::from_secs(config.cache_ttl_address_stats),
            ttl_whale_addresses: Duration::from_secs(config.cache_ttl_whale_addresses),
            ttl_risky_addresses: Duration::from_secs(config.cache_ttl_risky_addresses),
            ttl_rankings: Duration::from_secs(config.cache_ttl_rankings),
            ttl_summary: Duration::from_secs(config.cache_ttl_summary),
        };
        let redis_url = build_redis_url(config);
        let cache = Arc::new(CacheLayer::connect(&redis_url, cache_config).await);

        let dashboard = Arc::new(DashboardQueryService::new(pool.clone(), cache.clone()));
        let ranking = Arc::new(RankingEngine::new(pool.clone(), cache.clone()));

        let broadcast = Arc::new(BroadcastHub::new(config.ws_max_connections, 1024));

        let chain_client = Arc::new(ChainClient::new(
            config.primary_rpc_endpoint.clone(),
            config.backup_rpc_endpoint.clone(),
            config.rpc_timeout(),
            config.rpc_max_reconnect_attempts,
        ));

        let queue = Arc::new(EventQueue::new(config.batch_size * 20));

        let scheduler = Arc::new(IngestionScheduler::new(
            chain_client.clone(),
            watermark.clone(),
            registry.clone(),
            queue.clone(),
            SchedulerConfig {
                poll_interval: config.poll_interval(),
                max_blocks_per_poll: config.max_blocks_per_poll,
                max_retry_attempts: config.max_retry_attempts,
                rate_limit_backoff: Duration::from_millis(config.rate_limit_backoff_ms),
                catch_up_batch_size: config.catch_up_batch_size,
                catch_up_batch_delay: Duration::from_millis(config.catch_up_batch_delay_ms),
                catch_up_max_gap: config.catch_up_max_gap,
                catch_up_max_blocks: config.catch_up_max_blocks,
                ignore_zero_value_transfers: config.ignore_zero_value_transfers,
            },
        ));

        let batch_writer = Arc::new(BatchWriter::new(
            pool.clone(),
            queue.clone(),
            chain_client.clone(),
            watermark.clone(),
            broadcast.sender(),
            config.batch_size,
            config.whale_threshold.clone(),
            config.enable_tx_details,
        ));

        health_gate(&pool, &cache, &chain_client, &broadcast).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            pool,
            watermark,
            registry,
            cache,
            dashboard,
            ranking,
            broadcast,
            chain_client,
            scheduler,
            batch_writer,
            queue,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Spawns the batch writer drain loop, the ingestion scheduler, the
    /// heartbeat timer, and the periodic dashboard-snapshot broadcast.
    pub fn spawn_background_tasks(self: &Arc<Self>, config: &AppConfig) {
        let batch_writer = self.batch_writer.clone();
        let processing_interval = config.processing_interval();
        let shutdown = self.shutdown_receiver();
        tokio::spawn(async move {
            batch_writer.run(processing_interval, shutdown).await;
        });

        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown_receiver();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run(shutdown).await {
                tracing::error!(error = %e, "ingestion scheduler exited with error");
            }
        });

        let broadcast = self.broadcast.clone();
        let heartbeat_interval = config.heartbeat_interval();
        tokio::spawn(async move {
            broadcast.run_heartbeat(heartbeat_interval).await;
        });

        let this = self.clone();
        tokio::spawn(async move {
            this.run_snapshot_timer().await;
        });
    }

    /// Every 30s, broadcasts a `stats_update` frame with a fresh realtime
    /// snapshot. Stops when the shutdown signal fires.
    async fn run_snapshot_timer(self: Arc<Self>) {
        let mut shutdown = self.shutdown_receiver();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    match self.dashboard.realtime_stats(1, None).await {
                        Ok(stats) => {
                            if let Ok(value) = serde_json::to_value(&stats) {
                                self.broadcast.broadcast(EventFrame::StatsUpdate(value));
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "snapshot timer failed to compute realtime stats"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Shutdown sequence: stop the periodic timer and scheduler (via the
    /// shared shutdown signal, which both already watch), drain the queue
    /// into one final persisted batch, disconnect the chain client,
    /// notify-and-close the broadcast hub, then drop persistence and cache.
    pub async fn shutdown(&self) {
        tracing::info!("supervisor shutdown sequence starting");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.batch_writer.drain_once().await {
            tracing::error!(error = %e, "final drain before shutdown failed");
        }

        self.broadcast.shutdown().await;

        tracing::info!("supervisor shutdown sequence complete");
    }
}

fn build_redis_url(config: &AppConfig) -> String {
    let auth = config
        .cache_password
        .as_ref()
        .map(|p| format!(":{p}@"))
        .unwrap_or_default();
    format!("redis://{auth}{}:{}/{}", config.cache_host, config.cache_port, config.cache_db)
}

/// Checked once, right after the chain client is constructed: persistence
/// reachable, cache connected-or-degraded (never fatal), chain client not
/// terminal, broadcast hub constructed. Any failure here aborts startup.
async fn health_gate(
    pool: &PgPool,
    cache: &CacheLayer,
    chain_client: &ChainClient,
    broadcast: &BroadcastHub,
) -> Result<(), AppError> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(AppError::from)?;

    let _ = cache.health().await; // degraded is acceptable, a hard error is not raised by health()

    if chain_client.state().await == ConnectionState::ErrorTerminal {
        return Err(AppError::Supervisor("chain client is terminal at startup".to_string()));
    }

    if broadcast.subscriber_count() != 0 {
        return Err(AppError::Supervisor("broadcast hub unexpectedly has subscribers at startup".to_string()));
    }

    Ok(())
}
