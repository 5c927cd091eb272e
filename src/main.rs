mod api;
mod batch_writer;
mod cache;
mod chain_client;
mod config;
mod dashboard;
mod db;
mod decoder;
mod error;
mod metrics;
mod queue;
mod ranking;
mod scheduler;
mod statistics;
mod supervisor;
mod telemetry;
mod token_registry;
mod types;
mod watermark;
mod websocket;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;

use crate::api::ApiState;
use crate::config::{get_global_config, init_global_config, AppConfig};
use crate::supervisor::Supervisor;
use crate::telemetry::TelemetryConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    telemetry::init_tracing(TelemetryConfig {
        log_level: config.log_level.clone(),
        ..TelemetryConfig::default()
    })?;
    metrics::register_all();
    init_global_config(config)?;
    let config = get_global_config();

    tracing::info!(
        primary_rpc = %config.primary_rpc_endpoint,
        tokens = config.tokens.len(),
        "chainpulse starting"
    );

    let pool = db::connect(&config.database_url, 20).await?;
    db::migrate(&pool).await?;

    let supervisor = Arc::new(Supervisor::start(config, pool).await?);
    supervisor.spawn_background_tasks(config);

    let api_state = Arc::new(ApiState {
        dashboard: supervisor.dashboard.clone(),
        ranking: supervisor.ranking.clone(),
        broadcast: supervisor.broadcast.clone(),
        cache: supervisor.cache.clone(),
        watermark: supervisor.watermark.clone(),
        chain_client: supervisor.chain_client.clone(),
        scheduler: supervisor.scheduler.clone(),
        started_at: Instant::now(),
    });

    let app: Router = api::router(api_state, &config.cors_origin);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!(error = %e, "http server exited with error");
    }

    supervisor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
