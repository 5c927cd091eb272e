//! Process-wide configuration, assembled once at startup.
//!
//! Uses a `OnceCell<Config>` reachable through `init_global_config`/
//! `get_global_config`, but typed: every option in the
//! recognized-options list is a field on [`AppConfig`] with a documented
//! default, loaded from environment variables (the normative source) with an
//! optional `config.toml` for local development and the static token
//! registry.

use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::time::Duration;

static GLOBAL_CONFIG: OnceCell<AppConfig> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Networking
    pub primary_rpc_endpoint: String,
    pub backup_rpc_endpoint: Option<String>,
    pub rpc_timeout_ms: u64,
    pub rpc_reconnect_interval_ms: u64,
    pub rpc_max_reconnect_attempts: u32,

    // Ingestion
    pub block_polling_interval_ms: u64,
    pub batch_size: usize,
    pub processing_interval_ms: u64,
    pub confirmation_blocks: u64,
    pub ignore_zero_value_transfers: bool,
    pub request_delay_ms: u64,
    pub catch_up_batch_size: u64,
    pub catch_up_batch_delay_ms: u64,
    pub catch_up_max_gap: u64,
    pub catch_up_max_blocks: u64,
    pub max_blocks_per_poll: u64,
    pub max_retry_attempts: u32,
    pub rate_limit_backoff_ms: u64,
    pub block_save_interval: u64,
    pub enable_tx_details: bool,
    pub disable_individual_token_fallback: bool,

    // Cache
    pub cache_host: String,
    pub cache_port: u16,
    pub cache_password: Option<String>,
    pub cache_db: u8,
    pub cache_key_prefix: String,
    pub cache_ttl_address_stats: u64,
    pub cache_ttl_whale_addresses: u64,
    pub cache_ttl_risky_addresses: u64,
    pub cache_ttl_rankings: u64,
    pub cache_ttl_summary: u64,

    // Broadcast
    pub ws_port: u16,
    pub ws_heartbeat_interval_ms: u64,
    pub ws_max_connections: usize,

    // Operational
    pub log_level: String,
    pub enable_blockchain_logs: bool,
    pub enable_database_logs: bool,
    pub cors_origin: String,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max: u32,

    // Not part of the normative option list, but required to run the
    // process: database connection string and the static token registry.
    pub database_url: String,
    pub http_port: u16,
    pub tokens: Vec<TokenConfig>,

    /// Whale classification threshold, in the token's smallest unit.
    pub whale_threshold: num_bigint::BigUint,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl AppConfig {
    /// Builds configuration from environment variables, falling back to a
    /// `config.toml` file for the token registry and database URL when they
    /// are not set in the environment. Every field has a default so the
    /// process can start against local defaults without any env vars set.
    pub fn load() -> Result<Self, crate::error::AppError> {
        let file_cfg = config::Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let tokens: Vec<TokenConfig> = file_cfg
            .get("tokens")
            .unwrap_or_else(|_| Vec::new());

        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            file_cfg
                .get_string("database_url")
                .unwrap_or_else(|_| "postgres://localhost/chainpulse".to_string())
        });

        let whale_threshold_str = env_or("WHALE_THRESHOLD", "1000000000000000000000");
        let whale_threshold = whale_threshold_str
            .parse::<num_bigint::BigUint>()
            .map_err(|e| crate::error::AppError::Config(format!("invalid WHALE_THRESHOLD: {e}")))?;

        Ok(Self {
            primary_rpc_endpoint: env_or("PRIMARY_RPC_ENDPOINT", "https://polygon-rpc.com"),
            backup_rpc_endpoint: std::env::var("BACKUP_RPC_ENDPOINT").ok(),
            rpc_timeout_ms: env_parse("RPC_TIMEOUT_MS", 10_000),
            rpc_reconnect_interval_ms: env_parse("RPC_RECONNECT_INTERVAL_MS", 2_000),
            rpc_max_reconnect_attempts: env_parse("RPC_MAX_RECONNECT_ATTEMPTS", 10),

            block_polling_interval_ms: env_parse("BLOCK_POLLING_INTERVAL_MS", 3_000),
            batch_size: env_parse("BATCH_SIZE", 200),
            processing_interval_ms: env_parse("PROCESSING_INTERVAL_MS", 2_000),
            confirmation_blocks: env_parse("CONFIRMATION_BLOCKS", 12),
            ignore_zero_value_transfers: env_bool("IGNORE_ZERO_VALUE_TRANSFERS", true),
            request_delay_ms: env_parse("REQUEST_DELAY_MS", 0),
            catch_up_batch_size: env_parse("CATCH_UP_BATCH_SIZE", 100),
            catch_up_batch_delay_ms: env_parse("CATCH_UP_BATCH_DELAY_MS", 250),
            catch_up_max_gap: env_parse("CATCH_UP_MAX_GAP", 100_000),
            catch_up_max_blocks: env_parse("CATCH_UP_MAX_BLOCKS", 10_000),
            max_blocks_per_poll: env_parse("MAX_BLOCKS_PER_POLL", 50),
            max_retry_attempts: env_parse("MAX_RETRY_ATTEMPTS", 3),
            rate_limit_backoff_ms: env_parse("RATE_LIMIT_BACKOFF_MS", 60_000),
            block_save_interval: env_parse("BLOCK_SAVE_INTERVAL", 50),
            enable_tx_details: env_bool("ENABLE_TX_DETAILS", false),
            disable_individual_token_fallback: env_bool(
                "DISABLE_INDIVIDUAL_TOKEN_FALLBACK",
                false,
            ),

            cache_host: env_or("CACHE_HOST", "127.0.0.1"),
            cache_port: env_parse("CACHE_PORT", 6379),
            cache_password: std::env::var("CACHE_PASSWORD").ok(),
            cache_db: env_parse("CACHE_DB", 0),
            cache_key_prefix: env_or("CACHE_KEY_PREFIX", "chainpulse"),
            cache_ttl_address_stats: env_parse("CACHE_TTL_ADDRESS_STATS", 300),
            cache_ttl_whale_addresses: env_parse("CACHE_TTL_WHALE_ADDRESSES", 600),
            cache_ttl_risky_addresses: env_parse("CACHE_TTL_RISKY_ADDRESSES", 600),
            cache_ttl_rankings: env_parse("CACHE_TTL_RANKINGS", 60),
            cache_ttl_summary: env_parse("CACHE_TTL_SUMMARY", 30),

            ws_port: env_parse("WS_PORT", 8090),
            ws_heartbeat_interval_ms: env_parse("WS_HEARTBEAT_INTERVAL_MS", 30_000),
            ws_max_connections: env_parse("WS_MAX_CONNECTIONS", 1_000),

            log_level: env_or("LOG_LEVEL", "info"),
            enable_blockchain_logs: env_bool("ENABLE_BLOCKCHAIN_LOGS", true),
            enable_database_logs: env_bool("ENABLE_DATABASE_LOGS", false),
            cors_origin: env_or("CORS_ORIGIN", "*"),
            rate_limit_window_ms: env_parse("RATE_LIMIT_WINDOW_MS", 60_000),
            rate_limit_max: env_parse("RATE_LIMIT_MAX", 100),

            database_url,
            http_port: env_parse("HTTP_PORT", 8080),
            tokens,
            whale_threshold,
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_polling_interval_ms)
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.ws_heartbeat_interval_ms)
    }
}

pub fn init_global_config(cfg: AppConfig) -> Result<(), crate::error::AppError> {
    GLOBAL_CONFIG
        .set(cfg)
        .map_err(|_| crate::error::AppError::Config("config already initialized".into()))
}

pub fn get_global_config() -> &'static AppConfig {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}
