//! HTTP handlers mapping each read path to a [`DashboardQueryService`] or
//! [`RankingEngine`] call, wrapped in the `{data, filters?, timestamp,
//! cached, ttl?}` response envelope.
//!
//! Grounded on the teacher's `api_v2` handler style (thin functions that
//! pull state out of `Extension`/`State`, build a JSON body, map errors to
//! a status code) generalized from the PIVX explorer's REST surface to the
//! dashboard read paths named in the component design.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::chain_client::ConnectionState;
use crate::dashboard::{Granularity, Metric, Timeframe};
use crate::error::AppError;
use crate::types::EventFrame;

use super::state::ApiState;

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<serde_json::Value>,
    timestamp: chrono::DateTime<Utc>,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u64>,
}

fn ok<T: Serialize>(data: T, filters: Option<serde_json::Value>) -> Json<Envelope<T>> {
    Json(Envelope { data, filters, timestamp: Utc::now(), cached: false, ttl: None })
}

/// Wraps [`AppError`] for the handler layer's `IntoResponse` impl; the core
/// error taxonomy in `error.rs` stays free of an `axum` dependency.
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Persistence(_) | AppError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Supervisor(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        };
        let body = json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

fn granularity_from_path(segment: &str) -> Result<Granularity, ApiError> {
    match segment {
        "minutes" | "minute" => Ok(Granularity::Minute),
        "hourly" | "hour" => Ok(Granularity::Hour),
        "daily" | "day" => Ok(Granularity::Day),
        "weekly" | "week" => Ok(Granularity::Week),
        other => Err(ApiError(AppError::Rpc(format!("unknown granularity: {other}")))),
    }
}

fn metric_from_str(s: Option<&str>) -> Metric {
    match s {
        Some("transactions") => Metric::Transactions,
        Some("uniqueInteractions") => Metric::UniqueInteractions,
        _ => Metric::Volume,
    }
}

fn timeframe_from_str(s: Option<&str>) -> Timeframe {
    match s {
        Some("7d") => Timeframe::D7,
        Some("30d") => Timeframe::D30,
        Some("3m") => Timeframe::M3,
        Some("6m") => Timeframe::M6,
        Some("1y") => Timeframe::Y1,
        Some("all") => Timeframe::All,
        _ => Timeframe::H24,
    }
}

pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let chain_state = state.chain_client.state().await;
    let cache_health = state.cache.health().await;
    let healthy = !matches!(chain_state, ConnectionState::ErrorTerminal);

    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "service": "chainpulse",
        "timestamp": Utc::now(),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "chainConnectionState": format!("{chain_state:?}"),
        "cacheConnected": cache_health.connected,
        "watermark": state.watermark.load().await.unwrap_or(0),
        "cursor": state.scheduler.cursor(),
        "broadcastSubscribers": state.broadcast.subscriber_count(),
    });

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

pub async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct RealtimeQuery {
    hours: Option<i64>,
    token: Option<String>,
}

pub async fn realtime(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<RealtimeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let hours = q.hours.unwrap_or(1);
    let stats = state.dashboard.realtime_stats(hours, q.token.as_deref()).await?;
    Ok(ok(stats, Some(json!({"hours": hours, "token": q.token}))))
}

#[derive(Deserialize)]
pub struct VolumeQuery {
    token: Option<String>,
    limit: Option<usize>,
}

pub async fn volume(
    State(state): State<Arc<ApiState>>,
    Path(granularity): Path<String>,
    Query(q): Query<VolumeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let granularity = granularity_from_path(&granularity)?;
    let limit = q.limit.unwrap_or(24).min(1000);
    let series = state.dashboard.volume_series(granularity, q.token.as_deref(), limit).await?;
    Ok(ok(series, Some(json!({"limit": limit, "token": q.token}))))
}

pub async fn anomalies_timeseries(
    State(state): State<Arc<ApiState>>,
    Path(granularity): Path<String>,
    Query(q): Query<VolumeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let granularity = granularity_from_path(&granularity)?;
    let limit = q.limit.unwrap_or(24).min(1000);
    let series = state.dashboard.anomaly_series(granularity, q.token.as_deref(), limit).await?;
    Ok(ok(series, Some(json!({"limit": limit, "token": q.token}))))
}

/// Current suspicious-address snapshot, sourced from
/// `address_statistics.isSuspicious` rather than per-transaction anomaly
/// scoring (a Non-goal, see `DESIGN.md` Open Question Decision #3).
pub async fn anomalies_current(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    let candidates = state.dashboard.top_addresses(Metric::Volume, Timeframe::All, None, 500).await?;
    let suspicious: Vec<_> = candidates.into_iter().filter(|a| a.is_suspicious).collect();
    Ok(ok(suspicious, None))
}

#[derive(Deserialize)]
pub struct TopAddressesQuery {
    metric: Option<String>,
    timeframe: Option<String>,
    token: Option<String>,
    limit: Option<i64>,
}

pub async fn top_addresses(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<TopAddressesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let metric = metric_from_str(q.metric.as_deref());
    let timeframe = timeframe_from_str(q.timeframe.as_deref());
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let addresses = state.dashboard.top_addresses(metric, timeframe, q.token.as_deref(), limit).await?;
    Ok(ok(
        addresses,
        Some(json!({"metric": q.metric, "timeframe": q.timeframe, "token": q.token, "limit": limit})),
    ))
}

#[derive(Deserialize)]
pub struct DirectionQuery {
    hours: Option<i64>,
    token: Option<String>,
    limit: Option<i64>,
}

pub async fn addresses_by_direction(
    State(state): State<Arc<ApiState>>,
    Path(direction): Path<String>,
    Query(q): Query<DirectionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let timeframe = Timeframe::All;
    let _ = q.hours;
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let addresses = match direction.as_str() {
        "senders" => state.dashboard.top_senders(timeframe, q.token.as_deref(), limit).await?,
        "receivers" => state.dashboard.top_receivers(timeframe, q.token.as_deref(), limit).await?,
        other => return Err(ApiError(AppError::Rpc(format!("unknown direction: {other}")))),
    };
    Ok(ok(addresses, Some(json!({"direction": direction, "token": q.token, "limit": limit}))))
}

#[derive(Deserialize)]
pub struct HoursQuery {
    hours: Option<i64>,
}

pub async fn network(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<HoursQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let hours = q.hours.unwrap_or(1);
    let stats = state.dashboard.network_stats(hours).await?;
    Ok(ok(stats, Some(json!({"hours": hours}))))
}

pub async fn token_distribution(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<HoursQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let hours = q.hours.unwrap_or(24);
    let distribution = state.dashboard.token_distribution(hours).await?;
    Ok(ok(distribution, Some(json!({"hours": hours}))))
}

pub async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> Response {
    let welcome = EventFrame::Connection {
        status: "connected".to_string(),
        client_id: uuid::Uuid::new_v4().to_string(),
        server_time: Utc::now(),
        stats: json!({
            "subscribers": state.broadcast.subscriber_count(),
            "watermark": state.watermark.load().await.unwrap_or(0),
        }),
    };
    state.broadcast.accept(ws, welcome)
}
