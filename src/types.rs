//! Core domain types: tokens, transactions, address statistics, and the
//! processing watermark, plus the closed set of WebSocket frame variants.
//!
//! Replaces the dynamically-typed event payloads of the reference
//! implementation with explicit variants: decoding either produces a known
//! [`EventFrame`] or is logged and dropped, never passed through as `any`.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A monitored ERC-20 token, as loaded into the in-memory registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Lowercase `0x`-prefixed contract address; primary identity.
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub is_active: bool,
}

/// An immutable, persisted fact: one decoded and stored Transfer event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub block_number: i64,
    pub block_hash: String,
    pub transaction_index: i32,
    pub log_index: i32,

    pub from_address: String,
    pub to_address: String,
    pub value: BigDecimal,

    pub token_address: String,
    pub token_symbol: String,
    pub token_decimals: i16,

    pub gas_price: BigDecimal,
    pub gas_used: BigDecimal,

    pub timestamp: DateTime<Utc>,

    pub is_anomaly: bool,
    pub anomaly_score: f64,
}

/// Direction of a transfer relative to the address a statistics row tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// Latched/level behavioral classifications for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BehavioralFlag {
    Bot,
    Exchange,
    Contract,
    HighFrequency,
    LargeTx,
    SuspiciousPattern,
}

/// Per-`(address, token)` incrementally-updated behavioral aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressStatistics {
    pub address: String,
    pub token_address: String,

    pub total_sent: BigDecimal,
    pub total_received: BigDecimal,
    pub transaction_count_sent: i64,
    pub transaction_count_received: i64,

    pub avg_transaction_size: f64,
    pub avg_transaction_size_sent: f64,
    pub avg_transaction_size_received: f64,

    pub max_transaction_size: BigDecimal,
    pub max_transaction_size_sent: BigDecimal,
    pub max_transaction_size_received: BigDecimal,

    pub velocity_score: f64,
    pub diversity_score: f64,
    pub risk_score: f64,
    pub dormancy_period: i64,

    pub is_whale: bool,
    pub is_suspicious: bool,
    pub is_active: bool,

    pub behavioral_flags: HashSet<BehavioralFlag>,
    pub last_activity_type: Direction,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AddressStatistics {
    pub fn total_volume(&self) -> BigDecimal {
        self.total_sent.clone() + self.total_received.clone()
    }

    pub fn total_frequency(&self) -> i64 {
        self.transaction_count_sent + self.transaction_count_received
    }
}

/// Singleton watermark per chain id: the highest fully-ingested block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessingWatermark {
    pub last_processed_block: u64,
}

/// A single decoded Transfer event, as produced by the log decoder and
/// carried through the event queue to the batch writer and broadcast hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedTransfer {
    pub from: String,
    pub to: String,
    pub value: BigDecimal,
    pub token_address: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub transaction_index: i32,
    pub log_index: i32,
    pub timestamp: DateTime<Utc>,
}

/// The closed set of frames sent to downstream WebSocket subscribers.
/// Replaces the event-emitter string-channel pattern of the reference
/// implementation with explicit, serde-tagged variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventFrame {
    Connection {
        status: String,
        client_id: String,
        server_time: DateTime<Utc>,
        stats: serde_json::Value,
    },
    NewTransaction(Transaction),
    StatsUpdate(serde_json::Value),
    ConnectionStatus {
        state: String,
        endpoint: String,
    },
    Error {
        message: String,
    },
    Pong,
    Disconnected {
        reason: String,
    },
}

impl EventFrame {
    pub fn type_label(&self) -> &'static str {
        match self {
            EventFrame::Connection { .. } => "connection",
            EventFrame::NewTransaction(_) => "new_transaction",
            EventFrame::StatsUpdate(_) => "stats_update",
            EventFrame::ConnectionStatus { .. } => "connection_status",
            EventFrame::Error { .. } => "error",
            EventFrame::Pong => "pong",
            EventFrame::Disconnected { .. } => "disconnected",
        }
    }
}

/// Inbound control frames accepted from subscribers. Anything else decodes
/// to `None` and is logged as an unsupported frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundControlFrame {
    Ping,
    Heartbeat,
    Subscribe { channel: Option<String> },
    Unsubscribe { channel: Option<String> },
}
