//! Cache Layer (C7): Redis-backed cache-aside with TTL classes and
//! graceful degradation on outage.
//!
//! Grounded on the `RedisStore` pattern (`format_key`, `ConnectionManager`,
//! JSON-serialized values) from the reference pack's `recache` crate, using
//! the `redis` crate directly rather than introducing its `AsyncCacheStore`
//! trait abstraction — this layer has exactly one backend.
//!
//! All operations are **safe during outage**: a disconnected or erroring
//! Redis degrades every read to "absent" and every write to a no-op,
//! counted but never propagated as an [`AppError`] to the caller. Dashboard
//! correctness must not depend on the cache being up.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::metrics;

/// Named TTL classes, matching the cache sections of [`crate::config::AppConfig`].
#[derive(Debug, Clone, Copy)]
pub enum TtlClass {
    AddressStats,
    WhaleAddresses,
    RiskyAddresses,
    Rankings,
    Summary,
}

pub struct CacheConfig {
    pub prefix: String,
    pub ttl_address_stats: Duration,
    pub ttl_whale_addresses: Duration,
    pub ttl_risky_addresses: Duration,
    pub ttl_rankings: Duration,
    pub ttl_summary: Duration,
}

impl CacheConfig {
    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::AddressStats => self.ttl_address_stats,
            TtlClass::WhaleAddresses => self.ttl_whale_addresses,
            TtlClass::RiskyAddresses => self.ttl_risky_addresses,
            TtlClass::Rankings => self.ttl_rankings,
            TtlClass::Summary => self.ttl_summary,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub gets: u64,
    pub deletes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheHealth {
    pub connected: bool,
    pub ping_ms: Option<f64>,
}

/// Cache-aside client over a single multiplexed Redis connection.
pub struct CacheLayer {
    connection: Option<ConnectionManager>,
    config: CacheConfig,
    stats: RwLock<CacheStats>,
}

impl CacheLayer {
    /// Connects to Redis. A connection failure degrades the layer to
    /// always-miss mode rather than failing startup — per §4.7, correctness
    /// must not depend on the cache.
    pub async fn connect(redis_url: &str, config: CacheConfig) -> Self {
        let connection = match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    tracing::warn!(error = %e, "cache layer starting in degraded mode: connect failed");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "cache layer starting in degraded mode: invalid url");
                None
            }
        };
        Self {
            connection,
            config,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    fn format_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.prefix, key)
    }

    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        self.config.ttl_for(class)
    }

    /// Reads and deserializes a value. Absent on miss, disconnect, or
    /// deserialization failure — never raises.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.stats.write().await.gets += 1;
        let Some(conn) = self.connection.clone() else {
            metrics::CACHE_MISSES.inc();
            return None;
        };
        let mut conn = conn;
        let raw: Option<String> = conn.get(self.format_key(key)).await.ok().flatten();
        let value = raw.and_then(|s| serde_json::from_str(&s).ok());
        if value.is_some() {
            self.stats.write().await.hits += 1;
            metrics::CACHE_HITS.inc();
        } else {
            metrics::CACHE_MISSES.inc();
        }
        value
    }

    /// Writes a value with the given TTL class. No-ops (returns `false`)
    /// during an outage rather than propagating an error.
    pub async fn set_ex<T: Serialize>(&self, key: &str, value: &T, class: TtlClass) -> bool {
        let Some(conn) = self.connection.clone() else {
            return false;
        };
        let mut conn = conn;
        let Ok(json) = serde_json::to_string(value) else {
            return false;
        };
        let ttl_secs = self.config.ttl_for(class).as_secs().max(1) as usize;
        let ok: bool = conn
            .set_ex::<_, _, ()>(self.format_key(key), json, ttl_secs)
            .await
            .is_ok();
        if ok {
            self.stats.write().await.sets += 1;
            metrics::CACHE_SETS.inc();
        }
        ok
    }

    /// Pipelined multi-set, one round-trip.
    pub async fn batch_set<T: Serialize>(&self, entries: &[(String, T, TtlClass)]) -> bool {
        let Some(conn) = self.connection.clone() else {
            return false;
        };
        let mut conn = conn;
        let mut pipe = redis::pipe();
        for (key, value, class) in entries {
            let Ok(json) = serde_json::to_string(value) else {
                continue;
            };
            let ttl_secs = self.config.ttl_for(*class).as_secs().max(1) as usize;
            pipe.set_ex(self.format_key(key), json, ttl_secs).ignore();
        }
        let ok = pipe.query_async::<_, ()>(&mut conn).await.is_ok();
        if ok {
            self.stats.write().await.sets += entries.len() as u64;
            metrics::CACHE_SETS.inc_by(entries.len() as u64);
        }
        ok
    }

    pub async fn invalidate(&self, key: &str) {
        if let Some(conn) = self.connection.clone() {
            let mut conn = conn;
            let _: Result<(), _> = conn.del(self.format_key(key)).await;
            self.stats.write().await.deletes += 1;
        }
    }

    /// Cache-aside helper: return the cached value, or compute, populate,
    /// and return it on a miss.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, class: TtlClass, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return cached;
        }
        let value = compute().await;
        self.set_ex(key, &value, class).await;
        value
    }

    pub async fn health(&self) -> CacheHealth {
        let Some(conn) = self.connection.clone() else {
            return CacheHealth { connected: false, ping_ms: None };
        };
        let mut conn = conn;
        let started = std::time::Instant::now();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => CacheHealth {
                connected: true,
                ping_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
            },
            Err(_) => CacheHealth { connected: false, ping_ms: None },
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CacheConfig {
        CacheConfig {
            prefix: "test".to_string(),
            ttl_address_stats: Duration::from_secs(300),
            ttl_whale_addresses: Duration::from_secs(600),
            ttl_risky_addresses: Duration::from_secs(600),
            ttl_rankings: Duration::from_secs(60),
            ttl_summary: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn degraded_cache_always_misses_and_never_panics() {
        let cache = CacheLayer {
            connection: None,
            config: config(),
            stats: RwLock::new(CacheStats::default()),
        };
        assert!(cache.get::<String>("k").await.is_none());
        assert!(!cache.set_ex("k", &"v".to_string(), TtlClass::Summary).await);
        cache.invalidate("k").await;
        let health = cache.health().await;
        assert!(!health.connected);
    }

    #[tokio::test]
    async fn get_or_compute_falls_through_on_degraded_cache() {
        let cache = CacheLayer {
            connection: None,
            config: config(),
            stats: RwLock::new(CacheStats::default()),
        };
        let value = cache.get_or_compute("k", TtlClass::Summary, || async { 42u64 }).await;
        assert_eq!(value, 42);
    }

    #[test]
    fn ttl_class_maps_to_configured_duration() {
        let cfg = config();
        assert_eq!(cfg.ttl_for(TtlClass::Rankings), Duration::from_secs(60));
        assert_eq!(cfg.ttl_for(TtlClass::WhaleAddresses), Duration::from_secs(600));
    }
}
