//! Ranking Engine (C8): percentile scoring and composite address ranking,
//! recomputed on demand or on a periodic schedule, with results cached
//! through [`crate::cache::CacheLayer`].

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::cache::{CacheLayer, TtlClass};
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct RankingWeights {
    pub volume: f64,
    pub frequency: f64,
    pub recency: f64,
    pub diversity: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self { volume: 0.4, frequency: 0.3, recency: 0.2, diversity: 0.1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Whale,
    ActiveTrader,
    Dormant,
    Suspicious,
    HighRisk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedAddress {
    pub rank: usize,
    pub address: String,
    pub total_volume: BigDecimal,
    pub frequency: i64,
    pub composite_score: f64,
    pub categories: Vec<Category>,
    pub risk_score: f64,
    pub is_whale: bool,
    pub is_suspicious: bool,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    address: String,
    total_sent: BigDecimal,
    total_received: BigDecimal,
    transaction_count_sent: i64,
    transaction_count_received: i64,
    risk_score: f64,
    diversity_score: f64,
    is_whale: bool,
    is_suspicious: bool,
    last_seen: chrono::DateTime<Utc>,
}

pub struct RankingEngine {
    pool: PgPool,
    cache: std::sync::Arc<CacheLayer>,
    weights: RankingWeights,
}

impl RankingEngine {
    pub fn new(pool: PgPool, cache: std::sync::Arc<CacheLayer>) -> Self {
        Self { pool, cache, weights: RankingWeights::default() }
    }

    async fn load_rows(&self, token_address: &str) -> Result<Vec<StatsRow>, AppError> {
        let rows = sqlx::query_as::<_, StatsRow>(
            "SELECT address, total_sent, total_received, transaction_count_sent,
                    transaction_count_received, risk_score, diversity_score,
                    is_whale, is_suspicious, last_seen
             FROM address_statistics WHERE token_address = $1",
        )
        .bind(token_address)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Recomputes and caches the three top-N lists (whales, risky, active)
    /// for one token. Returns the full ranked set (not just the cached
    /// slices) so callers with a richer need (e.g. top senders) can reuse it.
    pub async fn recompute(&self, token_address: &str) -> Result<Vec<RankedAddress>, AppError> {
        let rows = self.load_rows(token_address).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();

        let volumes: Vec<f64> = rows
            .iter()
            .map(|r| (r.total_sent.clone() + r.total_received.clone()).to_f64().unwrap_or(0.0))
            .collect();
        let frequencies: Vec<f64> = rows
            .iter()
            .map(|r| (r.transaction_count_sent + r.transaction_count_received) as f64)
            .collect();

        let mut sorted_volumes = volumes.clone();
        sorted_volumes.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut sorted_frequencies = frequencies.clone();
        sorted_frequencies.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let mut ranked: Vec<(RankedAddress, f64)> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let volume = volumes[i];
                let frequency = frequencies[i];
                let volume_pct = percentile_rank(&sorted_volumes, volume);
                let frequency_pct = percentile_rank(&sorted_frequencies, frequency);

                let days_since_last_activity = (now - r.last_seen).num_days().max(0);
                let recency = (100.0 - days_since_last_activity as f64).max(0.0);
                let diversity = r.diversity_score * 100.0;

                let composite = self.weights.volume * volume_pct
                    + self.weights.frequency * frequency_pct
                    + self.weights.recency * recency
                    + self.weights.diversity * diversity;

                let mut categories = Vec::new();
                if volume_pct >= 99.0 {
                    categories.push(Category::Whale);
                }
                if frequency >= 50.0 {
                    categories.push(Category::ActiveTrader);
                }
                if days_since_last_activity >= 30 {
                    categories.push(Category::Dormant);
                }
                if r.risk_score >= 0.8 {
                    categories.push(Category::Suspicious);
                }
                if r.risk_score >= 0.7 {
                    categories.push(Category::HighRisk);
                }

                (
                    RankedAddress {
                        rank: 0,
                        address: r.address.clone(),
                        total_volume: r.total_sent.clone() + r.total_received.clone(),
                        frequency: r.transaction_count_sent + r.transaction_count_received,
                        composite_score: composite,
                        categories,
                        risk_score: r.risk_score,
                        is_whale: r.is_whale,
                        is_suspicious: r.is_suspicious,
                    },
                    r.last_seen.timestamp() as f64,
                )
            })
            .collect();

        ranked.sort_by(|(a, a_last_seen), (b, b_last_seen)| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap()
                .then_with(|| b_last_seen.partial_cmp(a_last_seen).unwrap())
                .then_with(|| a.address.cmp(&b.address))
        });

        let mut ranked: Vec<RankedAddress> = ranked.into_iter().map(|(r, _)| r).collect();
        for (i, r) in ranked.iter_mut().enumerate() {
            r.rank = i + 1;
        }

        let whales: Vec<&RankedAddress> = ranked
            .iter()
            .filter(|r| r.categories.contains(&Category::Whale))
            .take(100)
            .collect();
        let risky: Vec<&RankedAddress> = ranked
            .iter()
            .filter(|r| r.categories.contains(&Category::Suspicious) || r.categories.contains(&Category::HighRisk))
            .take(50)
            .collect();
        let active: Vec<&RankedAddress> = ranked
            .iter()
            .filter(|r| r.categories.contains(&Category::ActiveTrader))
            .take(100)
            .collect();

        self.cache
            .set_ex(&format!("rankings:whales:{token_address}"), &whales, TtlClass::WhaleAddresses)
            .await;
        self.cache
            .set_ex(&format!("rankings:risky:{token_address}"), &risky, TtlClass::RiskyAddresses)
            .await;
        self.cache
            .set_ex(&format!("rankings:active:{token_address}"), &active, TtlClass::Rankings)
            .await;

        Ok(ranked)
    }
}

/// `100 × rank_of_first_≥v / N`, matching the percentile definition in
/// the component design: the fraction of the sorted set at or below the
/// first occurrence of a value greater than or equal to `v`.
fn percentile_rank(sorted_ascending: &[f64], v: f64) -> f64 {
    if sorted_ascending.is_empty() {
        return 0.0;
    }
    let rank = sorted_ascending.partition_point(|&x| x < v);
    100.0 * rank as f64 / sorted_ascending.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_rank_of_minimum_is_zero() {
        let sorted = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile_rank(&sorted, 10.0), 0.0);
    }

    #[test]
    fn percentile_rank_of_maximum_is_near_full() {
        let sorted = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile_rank(&sorted, 40.0), 75.0);
    }

    #[test]
    fn percentile_rank_handles_duplicates_via_first_occurrence() {
        let sorted = vec![5.0, 5.0, 5.0, 10.0];
        assert_eq!(percentile_rank(&sorted, 5.0), 0.0);
        assert_eq!(percentile_rank(&sorted, 10.0), 75.0);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let w = RankingWeights::default();
        assert!((w.volume + w.frequency + w.recency + w.diversity - 1.0).abs() < 1e-9);
    }
}
