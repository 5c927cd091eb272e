//! Closed error taxonomy for the ingestion pipeline and its read path.
//!
//! Mirrors the failure classes enumerated in the error-handling design:
//! transient network errors, rate limits, decode failures, persistence and
//! cache outages, and terminal chain-connectivity loss. Callers use the
//! variant to decide whether to retry, drop-and-log, or escalate to the
//! supervisor.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("rpc call failed: {0}")]
    Rpc(String),

    #[error("rpc rate limited, backing off")]
    RateLimited,

    #[error("log decode failed: {0}")]
    Decode(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("chain endpoint unreachable after {attempts} attempts")]
    ChainUnreachable { attempts: u32 },

    #[error("supervisor startup failed: {0}")]
    Supervisor(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Classifies an RPC failure for the retry policy in the ingestion scheduler.
    pub fn classify_rpc(status: Option<u16>, message: &str) -> Self {
        let lower = message.to_lowercase();
        if status == Some(429) || lower.contains("rate limit") || lower.contains("too many requests")
        {
            AppError::RateLimited
        } else {
            AppError::Rpc(message.to_string())
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::RateLimited)
    }
}

/// Reasons a raw log is dropped by the decoder, surfaced only for logging/metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeDropReason {
    TooFewTopics,
    UnknownToken,
    ZeroValue,
}

impl fmt::Display for DecodeDropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecodeDropReason::TooFewTopics => "too_few_topics",
            DecodeDropReason::UnknownToken => "unknown_token",
            DecodeDropReason::ZeroValue => "zero_value",
        };
        write!(f, "{s}")
    }
}

pub type AppResult<T> = Result<T, AppError>;
