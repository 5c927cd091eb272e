//! Thin HTTP read layer (C9's external surface): one `axum::Router` mapping
//! each path named in the component design to a `DashboardQueryService` or
//! `RankingEngine` call, plus `/health`, `/metrics`, and the `/ws` upgrade.
//!
//! Assembled the way the teacher's `start_web_server` assembles its router
//! (CORS layer, one route per handler, shared state via `Extension`/
//! `State`), generalized from the PIVX explorer's REST surface to this
//! crate's read paths.

mod handlers;
mod state;

pub use state::ApiState;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub fn router(state: Arc<ApiState>, cors_origin: &str) -> Router {
    let cors = match cors_origin.parse::<axum::http::HeaderValue>() {
        Ok(_) if cors_origin != "*" => CorsLayer::new()
            .allow_origin(cors_origin.parse::<axum::http::HeaderValue>().unwrap())
            .allow_methods(Any)
            .allow_headers(Any),
        _ => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/statistics/realtime", get(handlers::realtime))
        .route("/statistics/volume/{granularity}", get(handlers::volume))
        .route("/statistics/addresses/top", get(handlers::top_addresses))
        .route("/analytics/addresses/{direction}", get(handlers::addresses_by_direction))
        .route("/statistics/anomalies", get(handlers::anomalies_current))
        .route("/anomalies/timeseries/{granularity}", get(handlers::anomalies_timeseries))
        .route("/statistics/network", get(handlers::network))
        .route("/statistics/distribution/token", get(handlers::token_distribution))
        .route("/ws", get(handlers::ws_upgrade))
        .layer(cors)
        .with_state(state)
}
