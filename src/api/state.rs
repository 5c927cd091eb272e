//! Shared state handed to every HTTP handler.

use std::sync::Arc;
use std::time::Instant;

use crate::cache::CacheLayer;
use crate::chain_client::ChainClient;
use crate::dashboard::DashboardQueryService;
use crate::ranking::RankingEngine;
use crate::scheduler::IngestionScheduler;
use crate::watermark::WatermarkStore;
use crate::websocket::BroadcastHub;

pub struct ApiState {
    pub dashboard: Arc<DashboardQueryService>,
    pub ranking: Arc<RankingEngine>,
    pub broadcast: Arc<BroadcastHub>,
    pub cache: Arc<CacheLayer>,
    pub watermark: Arc<WatermarkStore>,
    pub chain_client: Arc<ChainClient>,
    pub scheduler: Arc<IngestionScheduler>,
    pub started_at: Instant,
}
