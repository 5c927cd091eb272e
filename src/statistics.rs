//! Address Statistics Engine (C6): incremental, O(1)-per-transaction update
//! of the per-`(address, token)` behavioral aggregate.
//!
//! `apply_update` is pure — it takes the existing row (or none) plus one
//! event and returns the next row — so the incremental math in §4.6 is unit
//! testable without a database. [`upsert`] wraps it with the read-then-write
//! against a caller-supplied `sqlx::Transaction`, so the update happens
//! inside the same persistence transaction as the causing insert (C5 owns
//! that scope).

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use std::collections::HashSet;

use crate::error::AppError;
use crate::types::{AddressStatistics, BehavioralFlag, Direction};

const SECONDS_PER_DAY: i64 = 86_400;

/// Builds the first-seen row for an address with no prior activity.
fn initialize(
    address: &str,
    token_address: &str,
    direction: Direction,
    value: &BigDecimal,
    timestamp: DateTime<Utc>,
    whale_threshold: &BigDecimal,
) -> AddressStatistics {
    let zero = BigDecimal::from(0);
    let (sent, received, count_sent, count_received) = match direction {
        Direction::Sent => (value.clone(), zero.clone(), 1, 0),
        Direction::Received => (zero.clone(), value.clone(), 0, 1),
    };

    let mut flags = HashSet::new();
    if value >= whale_threshold {
        flags.insert(BehavioralFlag::LargeTx);
    }

    let is_whale = value >= whale_threshold;
    let velocity_score = 0.5;
    let diversity_score = 0.1;

    // Same composite formula as `apply_existing`'s risk update, folding in
    // the whale/large-tx contribution so a whale's first event doesn't land
    // at a baseline risk score lower than the incremental path would give it.
    let behavior_term = (0.4 * b2f(flags.contains(&BehavioralFlag::SuspiciousPattern))
        + 0.3 * b2f(flags.contains(&BehavioralFlag::Bot))
        + 0.3 * b2f(flags.contains(&BehavioralFlag::HighFrequency)))
    .min(1.0);
    let risk_score = clamp01(
        0.3 * (1.5 * velocity_score).min(1.0)
            + 0.2 * (1.0 - diversity_score)
            + 0.3 * b2f(is_whale)
            + 0.2 * behavior_term,
    );

    AddressStatistics {
        address: address.to_string(),
        token_address: token_address.to_string(),
        total_sent: sent.clone(),
        total_received: received.clone(),
        transaction_count_sent: count_sent,
        transaction_count_received: count_received,
        avg_transaction_size: value.to_f64().unwrap_or(0.0),
        avg_transaction_size_sent: if matches!(direction, Direction::Sent) {
            value.to_f64().unwrap_or(0.0)
        } else {
            0.0
        },
        avg_transaction_size_received: if matches!(direction, Direction::Received) {
            value.to_f64().unwrap_or(0.0)
        } else {
            0.0
        },
        max_transaction_size: value.clone(),
        max_transaction_size_sent: sent,
        max_transaction_size_received: received,
        velocity_score,
        diversity_score,
        risk_score,
        dormancy_period: 0,
        is_whale,
        is_suspicious: risk_score > 0.7,
        is_active: true,
        behavioral_flags: flags,
        last_activity_type: direction,
        first_seen: timestamp,
        last_seen: timestamp,
        updated_at: timestamp,
    }
}

/// Applies one event to an existing row, per the incremental update rules
/// in §4.6: running means, monotone maxima/latched flags, velocity,
/// diversity placeholder, and the composite risk score.
fn apply_existing(
    mut stats: AddressStatistics,
    direction: Direction,
    value: &BigDecimal,
    timestamp: DateTime<Utc>,
    whale_threshold: &BigDecimal,
) -> AddressStatistics {
    let value_f64 = value.to_f64().unwrap_or(0.0);

    match direction {
        Direction::Sent => {
            stats.total_sent += value.clone();
            stats.transaction_count_sent += 1;
            stats.avg_transaction_size_sent = (stats.avg_transaction_size_sent
                * (stats.transaction_count_sent - 1) as f64
                + value_f64)
                / stats.transaction_count_sent as f64;
            if value > &stats.max_transaction_size_sent {
                stats.max_transaction_size_sent = value.clone();
            }
        }
        Direction::Received => {
            stats.total_received += value.clone();
            stats.transaction_count_received += 1;
            stats.avg_transaction_size_received = (stats.avg_transaction_size_received
                * (stats.transaction_count_received - 1) as f64
                + value_f64)
                / stats.transaction_count_received as f64;
            if value > &stats.max_transaction_size_received {
                stats.max_transaction_size_received = value.clone();
            }
        }
    }

    let total_all = stats.total_sent.clone() + stats.total_received.clone();
    let count_all = stats.transaction_count_sent + stats.transaction_count_received;
    stats.avg_transaction_size = if count_all > 0 {
        total_all.to_f64().unwrap_or(0.0) / count_all as f64
    } else {
        0.0
    };
    if value > &stats.max_transaction_size {
        stats.max_transaction_size = value.clone();
    }

    let prev_last_seen = stats.last_seen;
    stats.last_seen = timestamp;
    stats.last_activity_type = direction;
    stats.is_active = true;
    stats.dormancy_period =
        ((timestamp - prev_last_seen).num_seconds().max(0)) / SECONDS_PER_DAY;

    let days_since_first_seen =
        (((timestamp - stats.first_seen).num_seconds().max(0)) / SECONDS_PER_DAY).max(1);
    stats.velocity_score = (count_all as f64 / days_since_first_seen as f64 / 10.0).min(1.0);
    // Placeholder for true counterparty cardinality (see DESIGN.md open
    // question 4); tracked here as a count proxy.
    stats.diversity_score = (count_all as f64 / 100.0).min(1.0);

    stats.is_whale = stats.is_whale || total_all >= *whale_threshold;

    if value >= whale_threshold {
        stats.behavioral_flags.insert(BehavioralFlag::LargeTx);
    }
    // Unlike the other flags, highFrequency tracks current velocity rather
    // than latching once set.
    if stats.velocity_score > 0.8 {
        stats.behavioral_flags.insert(BehavioralFlag::HighFrequency);
    } else {
        stats.behavioral_flags.remove(&BehavioralFlag::HighFrequency);
    }
    if stats.velocity_score > 0.9 && count_all > 50 {
        stats.behavioral_flags.insert(BehavioralFlag::Bot);
    }
    if stats.velocity_score > 0.95 && value >= whale_threshold {
        stats.behavioral_flags.insert(BehavioralFlag::SuspiciousPattern);
    }

    let suspicious_flag = stats.behavioral_flags.contains(&BehavioralFlag::SuspiciousPattern);
    let bot_flag = stats.behavioral_flags.contains(&BehavioralFlag::Bot);
    let high_frequency_flag = stats.behavioral_flags.contains(&BehavioralFlag::HighFrequency);

    let behavior_term = (0.4 * b2f(suspicious_flag) + 0.3 * b2f(bot_flag) + 0.3 * b2f(high_frequency_flag)).min(1.0);
    stats.risk_score = clamp01(
        0.3 * (1.5 * stats.velocity_score).min(1.0)
            + 0.2 * (1.0 - stats.diversity_score)
            + 0.3 * b2f(stats.is_whale)
            + 0.2 * behavior_term,
    );
    stats.is_suspicious = stats.risk_score > 0.7;
    stats.updated_at = timestamp;

    stats
}

fn b2f(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Pure incremental update: absent row -> [`initialize`], present row ->
/// [`apply_existing`].
pub fn apply_update(
    existing: Option<AddressStatistics>,
    address: &str,
    token_address: &str,
    direction: Direction,
    value: &BigDecimal,
    timestamp: DateTime<Utc>,
    whale_threshold: &BigDecimal,
) -> AddressStatistics {
    match existing {
        None => initialize(address, token_address, direction, value, timestamp, whale_threshold),
        Some(stats) => apply_existing(stats, direction, value, timestamp, whale_threshold),
    }
}

async fn fetch_existing(
    tx: &mut Transaction<'_, Postgres>,
    address: &str,
    token_address: &str,
) -> Result<Option<AddressStatistics>, AppError> {
    let row = sqlx::query_as::<_, AddressStatisticsRow>(
        "SELECT * FROM address_statistics WHERE address = $1 AND token_address = $2 FOR UPDATE",
    )
    .bind(address)
    .bind(token_address)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(Into::into))
}

/// Reads, updates, and writes back the statistics row for one event, under
/// the caller's persistence transaction (row-level locking serializes
/// concurrent updates to the same `(address, token)` pair).
pub async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    address: &str,
    token_address: &str,
    direction: Direction,
    value: &BigDecimal,
    timestamp: DateTime<Utc>,
    whale_threshold: &BigDecimal,
) -> Result<AddressStatistics, AppError> {
    let address = address.to_lowercase();
    let existing = fetch_existing(tx, &address, token_address).await?;
    let updated = apply_update(existing, &address, token_address, direction, value, timestamp, whale_threshold);
    write_back(tx, &updated).await?;
    Ok(updated)
}

async fn write_back(tx: &mut Transaction<'_, Postgres>, s: &AddressStatistics) -> Result<(), AppError> {
    let flags: Vec<String> = s.behavioral_flags.iter().map(flag_to_str).map(str::to_string).collect();
    let last_activity_type = match s.last_activity_type {
        Direction::Sent => "sent",
        Direction::Received => "received",
    };

    sqlx::query(
        "INSERT INTO address_statistics (
            address, token_address, total_sent, total_received,
            transaction_count_sent, transaction_count_received,
            avg_transaction_size, avg_transaction_size_sent, avg_transaction_size_received,
            max_transaction_size, max_transaction_size_sent, max_transaction_size_received,
            velocity_score, diversity_score, risk_score, dormancy_period,
            is_whale, is_suspicious, is_active, behavioral_flags, last_activity_type,
            first_seen, last_seen, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
            $17, $18, $19, $20, $21, $22, $23, $24
        )
        ON CONFLICT (address, token_address) DO UPDATE SET
            total_sent = EXCLUDED.total_sent,
            total_received = EXCLUDED.total_received,
            transaction_count_sent = EXCLUDED.transaction_count_sent,
            transaction_count_received = EXCLUDED.transaction_count_received,
            avg_transaction_size = EXCLUDED.avg_transaction_size,
            avg_transaction_size_sent = EXCLUDED.avg_transaction_size_sent,
            avg_transaction_size_received = EXCLUDED.avg_transaction_size_received,
            max_transaction_size = EXCLUDED.max_transaction_size,
            max_transaction_size_sent = EXCLUDED.max_transaction_size_sent,
            max_transaction_size_received = EXCLUDED.max_transaction_size_received,
            velocity_score = EXCLUDED.velocity_score,
            diversity_score = EXCLUDED.diversity_score,
            risk_score = EXCLUDED.risk_score,
            dormancy_period = EXCLUDED.dormancy_period,
            is_whale = EXCLUDED.is_whale,
            is_suspicious = EXCLUDED.is_suspicious,
            is_active = EXCLUDED.is_active,
            behavioral_flags = EXCLUDED.behavioral_flags,
            last_activity_type = EXCLUDED.last_activity_type,
            last_seen = EXCLUDED.last_seen,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(&s.address)
    .bind(&s.token_address)
    .bind(&s.total_sent)
    .bind(&s.total_received)
    .bind(s.transaction_count_sent)
    .bind(s.transaction_count_received)
    .bind(s.avg_transaction_size)
    .bind(s.avg_transaction_size_sent)
    .bind(s.avg_transaction_size_received)
    .bind(&s.max_transaction_size)
    .bind(&s.max_transaction_size_sent)
    .bind(&s.max_transaction_size_received)
    .bind(s.velocity_score)
    .bind(s.diversity_score)
    .bind(s.risk_score)
    .bind(s.dormancy_period)
    .bind(s.is_whale)
    .bind(s.is_suspicious)
    .bind(s.is_active)
    .bind(&flags)
    .bind(last_activity_type)
    .bind(s.first_seen)
    .bind(s.last_seen)
    .bind(s.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn flag_to_str(f: &BehavioralFlag) -> &'static str {
    match f {
        BehavioralFlag::Bot => "bot",
        BehavioralFlag::Exchange => "exchange",
        BehavioralFlag::Contract => "contract",
        BehavioralFlag::HighFrequency => "highFrequency",
        BehavioralFlag::LargeTx => "largeTx",
        BehavioralFlag::SuspiciousPattern => "suspiciousPattern",
    }
}

fn str_to_flag(s: &str) -> Option<BehavioralFlag> {
    match s {
        "bot" => Some(BehavioralFlag::Bot),
        "exchange" => Some(BehavioralFlag::Exchange),
        "contract" => Some(BehavioralFlag::Contract),
        "highFrequency" => Some(BehavioralFlag::HighFrequency),
        "largeTx" => Some(BehavioralFlag::LargeTx),
        "suspiciousPattern" => Some(BehavioralFlag::SuspiciousPattern),
        _ => None,
    }
}

/// Raw row shape as returned by `SELECT *`, kept separate from the domain
/// type so sqlx's `FromRow` derive doesn't dictate the public struct shape.
#[derive(sqlx::FromRow)]
struct AddressStatisticsRow {
    address: String,
    token_address: String,
    total_sent: BigDecimal,
    total_received: BigDecimal,
    transaction_count_sent: i64,
    transaction_count_received: i64,
    avg_transaction_size: f64,
    avg_transaction_size_sent: f64,
    avg_transaction_size_received: f64,
    max_transaction_size: BigDecimal,
    max_transaction_size_sent: BigDecimal,
    max_transaction_size_received: BigDecimal,
    velocity_score: f64,
    diversity_score: f64,
    risk_score: f64,
    dormancy_period: i64,
    is_whale: bool,
    is_suspicious: bool,
    is_active: bool,
    behavioral_flags: Vec<String>,
    last_activity_type: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AddressStatisticsRow> for AddressStatistics {
    fn from(r: AddressStatisticsRow) -> Self {
        AddressStatistics {
            address: r.address,
            token_address: r.token_address,
            total_sent: r.total_sent,
            total_received: r.total_received,
            transaction_count_sent: r.transaction_count_sent,
            transaction_count_received: r.transaction_count_received,
            avg_transaction_size: r.avg_transaction_size,
            avg_transaction_size_sent: r.avg_transaction_size_sent,
            avg_transaction_size_received: r.avg_transaction_size_received,
            max_transaction_size: r.max_transaction_size,
            max_transaction_size_sent: r.max_transaction_size_sent,
            max_transaction_size_received: r.max_transaction_size_received,
            velocity_score: r.velocity_score,
            diversity_score: r.diversity_score,
            risk_score: r.risk_score,
            dormancy_period: r.dormancy_period,
            is_whale: r.is_whale,
            is_suspicious: r.is_suspicious,
            is_active: r.is_active,
            behavioral_flags: r.behavioral_flags.iter().filter_map(|s| str_to_flag(s)).collect(),
            last_activity_type: if r.last_activity_type == "received" {
                Direction::Received
            } else {
                Direction::Sent
            },
            first_seen: r.first_seen,
            last_seen: r.last_seen,
            updated_at: r.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn whale_threshold() -> BigDecimal {
        BigDecimal::from_str("1000000000000000000000").unwrap() // 1e21
    }

    #[test]
    fn first_event_initializes_direction_specific_fields() {
        let value = BigDecimal::from(1000);
        let now = Utc::now();
        let stats = apply_update(None, "0xaa", "0xtoken", Direction::Sent, &value, now, &whale_threshold());

        assert_eq!(stats.total_sent, BigDecimal::from(1000));
        assert_eq!(stats.total_received, BigDecimal::from(0));
        assert_eq!(stats.transaction_count_sent, 1);
        assert_eq!(stats.transaction_count_received, 0);
        assert!(!stats.is_whale);
        assert_eq!(stats.first_seen, now);
        assert_eq!(stats.last_seen, now);
    }

    #[test]
    fn whale_value_on_first_event_sets_whale_and_large_tx() {
        let value = BigDecimal::from_str("1000000000000000000000").unwrap();
        let now = Utc::now();
        let stats = apply_update(None, "0xcc", "0xtoken", Direction::Sent, &value, now, &whale_threshold());

        assert!(stats.is_whale);
        assert!(stats.behavioral_flags.contains(&BehavioralFlag::LargeTx));
        assert!(stats.risk_score >= 0.3);
    }

    #[test]
    fn conservation_over_multiple_events() {
        let now = Utc::now();
        let mut stats = None;
        let events = [
            (Direction::Sent, 100u64),
            (Direction::Received, 50u64),
            (Direction::Sent, 25u64),
        ];
        for (dir, v) in events {
            stats = Some(apply_update(
                stats,
                "0xaa",
                "0xtoken",
                dir,
                &BigDecimal::from(v),
                now,
                &whale_threshold(),
            ));
        }
        let stats = stats.unwrap();
        assert_eq!(stats.total_sent, BigDecimal::from(125));
        assert_eq!(stats.total_received, BigDecimal::from(50));
        assert_eq!(stats.transaction_count_sent, 2);
        assert_eq!(stats.transaction_count_received, 1);
    }

    #[test]
    fn whale_latching_persists_after_later_small_transactions() {
        let now = Utc::now();
        let whale_value = BigDecimal::from_str("1000000000000000000000").unwrap();
        let stats = apply_update(None, "0xcc", "0xtoken", Direction::Sent, &whale_value, now, &whale_threshold());
        assert!(stats.is_whale);

        let stats = apply_update(
            Some(stats),
            "0xcc",
            "0xtoken",
            Direction::Received,
            &BigDecimal::from(1),
            now,
            &whale_threshold(),
        );
        assert!(stats.is_whale, "whale flag must latch across subsequent small transactions");
        assert!(stats.behavioral_flags.contains(&BehavioralFlag::LargeTx));
    }

    #[test]
    fn scores_stay_within_unit_interval() {
        let now = Utc::now();
        let mut stats = None;
        for i in 0..200u64 {
            stats = Some(apply_update(
                stats,
                "0xaa",
                "0xtoken",
                Direction::Sent,
                &BigDecimal::from(i + 1),
                now,
                &whale_threshold(),
            ));
        }
        let stats = stats.unwrap();
        assert!((0.0..=1.0).contains(&stats.velocity_score));
        assert!((0.0..=1.0).contains(&stats.diversity_score));
        assert!((0.0..=1.0).contains(&stats.risk_score));
    }
}
