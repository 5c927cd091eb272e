//! Dashboard Query Service (C9): read-only aggregations for the HTTP API,
//! flowing through cache-aside (C7) keyed by the argument fingerprint.
//!
//! Zero-filling (§8 invariant 6) is implemented in application code: the
//! database is asked only for buckets that have data, and the gaps are
//! filled in afterward so every series has exactly `limit` contiguous
//! entries, oldest-to-newest.

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;

use crate::cache::{CacheLayer, TtlClass};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Minute,
    Hour,
    Day,
    Week,
}

impl Granularity {
    fn duration(&self) -> Duration {
        match self {
            Granularity::Minute => Duration::minutes(1),
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
            Granularity::Week => Duration::weeks(1),
        }
    }

    /// Field name for Postgres `date_trunc`. Selected from a fixed Rust
    /// enum, never user input, so interpolating it directly into SQL is
    /// safe (no injection surface).
    fn trunc_field(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
        }
    }

    fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Minute => ts.with_second(0).unwrap().with_nanosecond(0).unwrap(),
            Granularity::Hour => ts.with_minute(0).unwrap().with_second(0).unwrap().with_nanosecond(0).unwrap(),
            Granularity::Day => ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc(),
            Granularity::Week => {
                let day = ts.date_naive();
                let iso_week_start = day - chrono::Duration::days(day.weekday().num_days_from_monday() as i64);
                iso_week_start.and_hms_opt(0, 0, 0).unwrap().and_utc()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Volume,
    Transactions,
    UniqueInteractions,
}

#[derive(Debug, Clone, Copy)]
pub enum Timeframe {
    H24,
    D7,
    D30,
    M3,
    M6,
    Y1,
    All,
}

impl Timeframe {
    fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timeframe::H24 => Some(now - Duration::hours(24)),
            Timeframe::D7 => Some(now - Duration::days(7)),
            Timeframe::D30 => Some(now - Duration::days(30)),
            Timeframe::M3 => Some(now - Duration::days(90)),
            Timeframe::M6 => Some(now - Duration::days(180)),
            Timeframe::Y1 => Some(now - Duration::days(365)),
            Timeframe::All => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerTokenBreakdown {
    pub token_symbol: String,
    pub tx_count: i64,
    pub total_volume: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeStats {
    pub total_tx: i64,
    pub total_volume: BigDecimal,
    pub active_addresses: i64,
    pub avg_tx_size: f64,
    pub tx_last_24h: i64,
    pub vol_last_24h: BigDecimal,
    pub active_tokens: i64,
    pub per_token_breakdown: Vec<PerTokenBreakdown>,
    pub current_block: i64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeBucket {
    pub bucket: String,
    pub token_symbol: Option<String>,
    pub tx_count: i64,
    pub total_volume: BigDecimal,
    pub unique_addresses: i64,
    pub avg_volume: f64,
    pub gas_used: BigDecimal,
    pub anomaly_count: i64,
    pub highest_tx: Option<BigDecimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyBucket {
    pub bucket: String,
    pub anomaly_count: i64,
    pub total_checked: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopAddressEntry {
    pub address: String,
    pub total_volume: BigDecimal,
    pub total_sent: BigDecimal,
    pub total_received: BigDecimal,
    pub tx_count: i64,
    pub unique_interactions: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_whale: bool,
    pub is_suspicious: bool,
    pub risk_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDistributionEntry {
    pub token_symbol: String,
    pub tx_count: i64,
    pub total_volume: BigDecimal,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStats {
    pub avg_gas_price: f64,
    pub avg_gas_used: f64,
    pub throughput_tx_per_sec: f64,
    pub window_tx_count: i64,
}

#[derive(sqlx::FromRow)]
struct BucketRow {
    bucket: DateTime<Utc>,
    tx_count: i64,
    total_volume: Option<BigDecimal>,
    gas_used: Option<BigDecimal>,
    anomaly_count: Option<i64>,
    highest_tx: Option<BigDecimal>,
    unique_addresses: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct AddressStatsRow {
    address: String,
    total_sent: BigDecimal,
    total_received: BigDecimal,
    transaction_count_sent: i64,
    transaction_count_received: i64,
    diversity_score: f64,
    risk_score: f64,
    is_whale: bool,
    is_suspicious: bool,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

pub struct DashboardQueryService {
    pool: PgPool,
    cache: Arc<CacheLayer>,
}

impl DashboardQueryService {
    pub fn new(pool: PgPool, cache: Arc<CacheLayer>) -> Self {
        Self { pool, cache }
    }

    pub async fn realtime_stats(&self, hours: i64, token: Option<&str>) -> Result<RealtimeStats, AppError> {
        let cache_key = format!("realtime:{hours}:{}", token.unwrap_or("all"));
        if let Some(cached) = self.cache.get::<RealtimeStats>(&cache_key).await {
            return Ok(cached);
        }

        let now = Utc::now();
        let since_24h = now - Duration::hours(24);
        let since_window = now - Duration::hours(hours);

        // COUNT(*)/SUM(value)/token count run once per transaction row; the
        // distinct-address count needs the from/to unnest, so it's computed
        // in its own subquery rather than joined against `base` (joining
        // would double every other aggregate).
        let (total_tx, total_volume, active_addresses, active_tokens): (i64, Option<BigDecimal>, i64, i64) =
            sqlx::query_as(
                "WITH base AS (
                     SELECT from_address, to_address, value, token_address
                     FROM transactions
                     WHERE block_timestamp >= $1 AND ($2::text IS NULL OR token_address = $2)
                 )
                 SELECT
                     (SELECT COUNT(*) FROM base),
                     (SELECT SUM(value) FROM base),
                     (SELECT COUNT(DISTINCT addr)
                        FROM base, LATERAL unnest(ARRAY[from_address, to_address]) AS addr),
                     (SELECT COUNT(DISTINCT token_address) FROM base)",
            )
            .bind(since_window)
            .bind(token)
            .fetch_one(&self.pool)
            .await?;

        let (tx_last_24h, vol_last_24h): (i64, Option<BigDecimal>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(value) FROM transactions
             WHERE block_timestamp >= $1 AND ($2::text IS NULL OR token_address = $2)",
        )
        .bind(since_24h)
        .bind(token)
        .fetch_one(&self.pool)
        .await?;

        let breakdown_rows: Vec<(String, i64, Option<BigDecimal>)> = sqlx::query_as(
            "SELECT token_symbol, COUNT(*), SUM(value) FROM transactions
             WHERE block_timestamp >= $1 AND ($2::text IS NULL OR token_address = $2)
             GROUP BY token_symbol",
        )
        .bind(since_window)
        .bind(token)
        .fetch_all(&self.pool)
        .await?;

        let current_block: Option<i64> =
            sqlx::query_scalar("SELECT last_processed_block FROM block_processing_status LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        let total_volume = total_volume.unwrap_or_else(|| BigDecimal::from(0));
        let avg_tx_size = if total_tx > 0 {
            total_volume.to_f64().unwrap_or(0.0) / total_tx as f64
        } else {
            0.0
        };

        let stats = RealtimeStats {
            total_tx,
            total_volume,
            active_addresses,
            avg_tx_size,
            tx_last_24h,
            vol_last_24h: vol_last_24h.unwrap_or_else(|| BigDecimal::from(0)),
            active_tokens,
            per_token_breakdown: breakdown_rows
                .into_iter()
                .map(|(token_symbol, tx_count, total_volume)| PerTokenBreakdown {
                    token_symbol,
                    tx_count,
                    total_volume: total_volume.unwrap_or_else(|| BigDecimal::from(0)),
                })
                .collect(),
            current_block: current_block.unwrap_or(0),
            ts: now,
        };

        self.cache.set_ex(&cache_key, &stats, TtlClass::Summary).await;
        Ok(stats)
    }

    async fn bucketed_rows(
        &self,
        granularity: Granularity,
        since: DateTime<Utc>,
        token: Option<&str>,
    ) -> Result<Vec<BucketRow>, AppError> {
        // `base` aggregates tx_count/volume/gas/anomaly/max once per
        // transaction; `addr_counts` is the only query that needs the
        // from/to unnest, kept separate and joined back by bucket so it
        // never doubles the other per-bucket aggregates.
        let sql = format!(
            "WITH base AS (
                 SELECT date_trunc('{field}', block_timestamp) AS bucket,
                        from_address, to_address, value, gas_used, is_anomaly
                 FROM transactions
                 WHERE block_timestamp >= $1 AND ($2::text IS NULL OR token_address = $2)
             ),
             addr_counts AS (
                 SELECT bucket, COUNT(DISTINCT addr) AS unique_addresses
                 FROM base, LATERAL unnest(ARRAY[from_address, to_address]) AS addr
                 GROUP BY bucket
             )
             SELECT b.bucket AS bucket,
                    COUNT(*) AS tx_count,
                    SUM(b.value) AS total_volume,
                    SUM(b.gas_used) AS gas_used,
                    SUM(CASE WHEN b.is_anomaly THEN 1 ELSE 0 END) AS anomaly_count,
                    MAX(b.value) AS highest_tx,
                    ac.unique_addresses AS unique_addresses
             FROM base b
             JOIN addr_counts ac ON ac.bucket = b.bucket
             GROUP BY b.bucket, ac.unique_addresses
             ORDER BY b.bucket",
            field = granularity.trunc_field()
        );

        let rows = sqlx::query_as::<_, BucketRow>(&sql)
            .bind(since)
            .bind(token)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Zero-filled volume series: exactly `limit` contiguous buckets,
    /// newest bucket aligned to the current truncated time, oldest-first.
    pub async fn volume_series(
        &self,
        granularity: Granularity,
        token: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VolumeBucket>, AppError> {
        let now = granularity.truncate(Utc::now());
        let step = granularity.duration();
        let start = now - step * (limit.saturating_sub(1) as i32);

        let rows = self.bucketed_rows(granularity, start, token).await?;
        let mut by_bucket: std::collections::HashMap<DateTime<Utc>, BucketRow> =
            rows.into_iter().map(|r| (r.bucket, r)).collect();

        let mut series = Vec::with_capacity(limit);
        for i in 0..limit {
            let bucket_ts = start + step * i as i32;
            let bucket_label = bucket_ts.to_rfc3339();
            match by_bucket.remove(&bucket_ts) {
                Some(row) => {
                    let tx_count = row.tx_count;
                    let total_volume = row.total_volume.unwrap_or_else(|| BigDecimal::from(0));
                    let avg_volume = if tx_count > 0 {
                        total_volume.to_f64().unwrap_or(0.0) / tx_count as f64
                    } else {
                        0.0
                    };
                    series.push(VolumeBucket {
                        bucket: bucket_label,
                        token_symbol: token.map(str::to_string),
                        tx_count,
                        total_volume,
                        unique_addresses: row.unique_addresses.unwrap_or(0),
                        avg_volume,
                        gas_used: row.gas_used.unwrap_or_else(|| BigDecimal::from(0)),
                        anomaly_count: row.anomaly_count.unwrap_or(0),
                        highest_tx: row.highest_tx,
                    });
                }
                None => series.push(VolumeBucket {
                    bucket: bucket_label,
                    token_symbol: token.map(str::to_string),
                    tx_count: 0,
                    total_volume: BigDecimal::from(0),
                    unique_addresses: 0,
                    avg_volume: 0.0,
                    gas_used: BigDecimal::from(0),
                    anomaly_count: 0,
                    highest_tx: None,
                }),
            }
        }
        Ok(series)
    }

    /// Zero-filled anomaly series. Since per-transaction anomaly scoring is
    /// a non-goal of this core (`DESIGN.md` Open Question Decision #3),
    /// every bucket legitimately reports zero until that scoring is added.
    pub async fn anomaly_series(
        &self,
        granularity: Granularity,
        token: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnomalyBucket>, AppError> {
        let volume = self.volume_series(granularity, token, limit).await?;
        Ok(volume
            .into_iter()
            .map(|b| AnomalyBucket {
                bucket: b.bucket,
                anomaly_count: b.anomaly_count,
                total_checked: b.tx_count,
            })
            .collect())
    }

    async fn top_by(
        &self,
        timeframe: Timeframe,
        token: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AddressStatsRow>, AppError> {
        let now = Utc::now();
        let since = timeframe.since(now);
        let rows = sqlx::query_as::<_, AddressStatsRow>(
            "SELECT address, total_sent, total_received, transaction_count_sent,
                    transaction_count_received, diversity_score, risk_score,
                    is_whale, is_suspicious, first_seen, last_seen
             FROM address_statistics
             WHERE ($1::text IS NULL OR token_address = $1)
               AND ($2::timestamptz IS NULL OR last_seen >= $2)
             LIMIT $3",
        )
        .bind(token)
        .bind(since)
        .bind(limit.max(1) * 5) // over-fetch; final sort/limit happens in Rust
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Top addresses by volume, transaction count, or (as a placeholder
    /// proxy — see `DESIGN.md`) diversity score for `uniqueInteractions`.
    pub async fn top_addresses(
        &self,
        metric: Metric,
        timeframe: Timeframe,
        token: Option<&str>,
        limit: i64,
    ) -> Result<Vec<TopAddressEntry>, AppError> {
        let mut rows = self.top_by(timeframe, token, limit).await?;
        rows.sort_by(|a, b| {
            let key = |r: &AddressStatsRow| match metric {
                Metric::Volume => (r.total_sent.clone() + r.total_received.clone()).to_f64().unwrap_or(0.0),
                Metric::Transactions => (r.transaction_count_sent + r.transaction_count_received) as f64,
                Metric::UniqueInteractions => r.diversity_score,
            };
            key(b).partial_cmp(&key(a)).unwrap()
        });
        rows.truncate(limit.max(0) as usize);

        Ok(rows
            .into_iter()
            .map(|r| TopAddressEntry {
                address: r.address,
                total_volume: r.total_sent.clone() + r.total_received.clone(),
                total_sent: r.total_sent,
                total_received: r.total_received,
                tx_count: r.transaction_count_sent + r.transaction_count_received,
                unique_interactions: r.diversity_score,
                first_seen: r.first_seen,
                last_seen: r.last_seen,
                is_whale: r.is_whale,
                is_suspicious: r.is_suspicious,
                risk_score: r.risk_score,
            })
            .collect())
    }

    pub async fn top_senders(&self, timeframe: Timeframe, token: Option<&str>, limit: i64) -> Result<Vec<TopAddressEntry>, AppError> {
        let mut rows = self.top_by(timeframe, token, limit).await?;
        rows.sort_by(|a, b| b.total_sent.cmp(&a.total_sent));
        rows.truncate(limit.max(0) as usize);
        Ok(rows.into_iter().map(Self::to_entry).collect())
    }

    pub async fn top_receivers(&self, timeframe: Timeframe, token: Option<&str>, limit: i64) -> Result<Vec<TopAddressEntry>, AppError> {
        let mut rows = self.top_by(timeframe, token, limit).await?;
        rows.sort_by(|a, b| b.total_received.cmp(&a.total_received));
        rows.truncate(limit.max(0) as usize);
        Ok(rows.into_iter().map(Self::to_entry).collect())
    }

    fn to_entry(r: AddressStatsRow) -> TopAddressEntry {
        TopAddressEntry {
            address: r.address,
            total_volume: r.total_sent.clone() + r.total_received.clone(),
            total_sent: r.total_sent,
            total_received: r.total_received,
            tx_count: r.transaction_count_sent + r.transaction_count_received,
            unique_interactions: r.diversity_score,
            first_seen: r.first_seen,
            last_seen: r.last_seen,
            is_whale: r.is_whale,
            is_suspicious: r.is_suspicious,
            risk_score: r.risk_score,
        }
    }

    pub async fn token_distribution(&self, hours: i64) -> Result<Vec<TokenDistributionEntry>, AppError> {
        let since = Utc::now() - Duration::hours(hours);
        let rows: Vec<(String, i64, Option<BigDecimal>)> = sqlx::query_as(
            "SELECT token_symbol, COUNT(*), SUM(value) FROM transactions
             WHERE block_timestamp >= $1 GROUP BY token_symbol",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = rows.iter().map(|(_, c, _)| c).sum();
        Ok(rows
            .into_iter()
            .map(|(token_symbol, tx_count, total_volume)| TokenDistributionEntry {
                token_symbol,
                tx_count,
                total_volume: total_volume.unwrap_or_else(|| BigDecimal::from(0)),
                percentage: if total > 0 { 100.0 * tx_count as f64 / total as f64 } else { 0.0 },
            })
            .collect())
    }

    pub async fn network_stats(&self, hours: i64) -> Result<NetworkStats, AppError> {
        let since = Utc::now() - Duration::hours(hours);
        let (window_tx_count, avg_gas_price, avg_gas_used): (i64, Option<f64>, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*), AVG(gas_price), AVG(gas_used) FROM transactions
             WHERE block_timestamp >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let throughput = window_tx_count as f64 / (hours.max(1) as f64 * 3600.0);
        Ok(NetworkStats {
            avg_gas_price: avg_gas_price.unwrap_or(0.0),
            avg_gas_used: avg_gas_used.unwrap_or(0.0),
            throughput_tx_per_sec: throughput,
            window_tx_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hour_truncation_zeroes_minutes_and_seconds() {
        let ts = DateTime::parse_from_rfc3339("2026-07-27T10:42:17Z").unwrap().with_timezone(&Utc);
        let truncated = Granularity::Hour.truncate(ts);
        assert_eq!(truncated.minute(), 0);
        assert_eq!(truncated.second(), 0);
        assert_eq!(truncated.hour(), 10);
    }

    #[test]
    fn day_truncation_zeroes_time_of_day() {
        let ts = DateTime::parse_from_rfc3339("2026-07-27T10:42:17Z").unwrap().with_timezone(&Utc);
        let truncated = Granularity::Day.truncate(ts);
        assert_eq!(truncated.hour(), 0);
        assert_eq!(truncated.minute(), 0);
    }
}
