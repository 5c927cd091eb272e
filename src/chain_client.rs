//! Chain Client (C1): typed JSON-RPC calls against the upstream EVM node,
//! with primary/backup failover and a connection state machine reported to
//! the supervisor.
//!
//! Grounded on the raw-`reqwest` JSON-RPC pattern used by the monitor loop
//! in the teacher codebase (`monitor::index_block_from_rpc`), generalized
//! from a PIVX `getblock` call to `eth_getLogs`/`eth_blockNumber` and made
//! async end-to-end instead of `reqwest::blocking`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::metrics;

/// A raw, undecoded log as returned by `eth_getLogs`.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: i32,
    pub log_index: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    ErrorTerminal,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Ordered endpoint list {primary, backup} with automatic failover on
/// connection failure or parse error.
pub struct ChainClient {
    endpoints: Vec<String>,
    active: AtomicUsize,
    http: reqwest::Client,
    timeout: Duration,
    max_reconnect_attempts: u32,
    reconnect_attempts: AtomicU32,
    state: RwLock<ConnectionState>,
    request_id: AtomicU32,
}

impl ChainClient {
    pub fn new(primary: String, backup: Option<String>, timeout: Duration, max_reconnect_attempts: u32) -> Self {
        let mut endpoints = vec![primary];
        if let Some(b) = backup {
            endpoints.push(b);
        }
        Self {
            endpoints,
            active: AtomicUsize::new(0),
            http: reqwest::Client::new(),
            timeout,
            max_reconnect_attempts,
            reconnect_attempts: AtomicU32::new(0),
            state: RwLock::new(ConnectionState::Disconnected),
            request_id: AtomicU32::new(1),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    fn active_endpoint(&self) -> &str {
        &self.endpoints[self.active.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    async fn failover(&self) {
        if self.endpoints.len() < 2 {
            return;
        }
        let next = (self.active.load(Ordering::Relaxed) + 1) % self.endpoints.len();
        self.active.store(next, Ordering::Relaxed);
        metrics::RPC_FAILOVERS.inc();
        *self.state.write().await = ConnectionState::Reconnecting;
        tracing::warn!(endpoint = %self.active_endpoint(), "chain client failing over to next endpoint");
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, AppError> {
        let started = Instant::now();
        *self.state.write().await = ConnectionState::Connecting;

        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed) as u64,
            method,
            params,
        };

        let result = self
            .http
            .post(self.active_endpoint())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;

        metrics::RPC_LATENCY
            .with_label_values(&[method])
            .observe(started.elapsed().as_secs_f64());

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.failover().await;
                let attempts = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                if attempts >= self.max_reconnect_attempts {
                    *self.state.write().await = ConnectionState::ErrorTerminal;
                    return Err(AppError::ChainUnreachable { attempts });
                }
                return Err(AppError::classify_rpc(None, &e.to_string()));
            }
        };

        let status = response.status();
        if status.as_u16() == 429 {
            metrics::RATE_LIMIT_HITS.inc();
            return Err(AppError::RateLimited);
        }

        let parsed: RpcResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                self.failover().await;
                return Err(AppError::classify_rpc(Some(status.as_u16()), &e.to_string()));
            }
        };

        if let Some(err) = parsed.error {
            return Err(AppError::classify_rpc(None, &format!("{}: {}", err.code, err.message)));
        }

        self.reconnect_attempts.store(0, Ordering::Relaxed);
        *self.state.write().await = ConnectionState::Connected;
        parsed.result.ok_or_else(|| AppError::Rpc("missing result".to_string()))
    }

    /// `eth_blockNumber` — the current chain tip.
    pub async fn latest_block(&self) -> Result<u64, AppError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex_str = result.as_str().ok_or_else(|| AppError::Rpc("non-string block number".into()))?;
        parse_hex_u64(hex_str).ok_or_else(|| AppError::Rpc(format!("bad block number: {hex_str}")))
    }

    /// `eth_getLogs` across every monitored token address for one block range.
    /// Returns an empty vec on an empty match, per the contract.
    pub async fn get_logs(
        &self,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, AppError> {
        let params = json!([{
            "address": addresses,
            "topics": [crate::decoder::TRANSFER_TOPIC0],
            "fromBlock": to_hex(from_block),
            "toBlock": to_hex(to_block),
        }]);

        let result = self.call("eth_getLogs", params).await?;
        let entries = result.as_array().cloned().unwrap_or_default();

        let mut logs = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(log) = parse_raw_log(&entry) {
                logs.push(log);
            }
        }
        Ok(logs)
    }

    /// `eth_getBlock` — optional enrichment, non-fatal on failure.
    pub async fn get_block_timestamp(&self, block_number: u64) -> Option<chrono::DateTime<chrono::Utc>> {
        let params = json!([to_hex(block_number), false]);
        let result = self.call("eth_getBlockByNumber", params).await.ok()?;
        let ts_hex = result.get("timestamp")?.as_str()?;
        let secs = parse_hex_u64(ts_hex)?;
        chrono::DateTime::from_timestamp(secs as i64, 0)
    }

    /// `eth_getTransactionReceipt` — optional gas enrichment, non-fatal.
    pub async fn get_transaction_receipt(&self, tx_hash: &str) -> Option<(num_bigint::BigUint, num_bigint::BigUint)> {
        let result = self.call("eth_getTransactionReceipt", json!([tx_hash])).await.ok()?;
        let gas_used = parse_hex_biguint(result.get("gasUsed")?.as_str()?)?;
        let gas_price = result
            .get("effectiveGasPrice")
            .and_then(|v| v.as_str())
            .and_then(parse_hex_biguint)
            .unwrap_or_default();
        Some((gas_price, gas_used))
    }
}

fn to_hex(n: u64) -> String {
    format!("0x{n:x}")
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn parse_hex_biguint(s: &str) -> Option<num_bigint::BigUint> {
    num_bigint::BigUint::parse_bytes(s.trim_start_matches("0x").as_bytes(), 16)
}

fn parse_raw_log(entry: &Value) -> Option<RawLog> {
    let address = entry.get("address")?.as_str()?.to_lowercase();
    let topics: Vec<String> = entry
        .get("topics")?
        .as_array()?
        .iter()
        .filter_map(|t| t.as_str().map(|s| s.to_string()))
        .collect();
    let data = entry.get("data")?.as_str()?.to_string();
    let block_number = parse_hex_u64(entry.get("blockNumber")?.as_str()?)?;
    let block_hash = entry.get("blockHash")?.as_str()?.to_string();
    let transaction_hash = entry.get("transactionHash")?.as_str()?.to_string();
    let transaction_index = parse_hex_u64(entry.get("transactionIndex")?.as_str()?)? as i32;
    let log_index = parse_hex_u64(entry.get("logIndex")?.as_str()?)? as i32;

    Some(RawLog {
        address,
        topics,
        data,
        block_number,
        block_hash,
        transaction_hash,
        transaction_index,
        log_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_block_number() {
        assert_eq!(parse_hex_u64("0x64"), Some(100));
    }

    #[test]
    fn to_hex_round_trips() {
        assert_eq!(parse_hex_u64(&to_hex(123456)), Some(123456));
    }

    #[test]
    fn parses_raw_log_from_json() {
        let entry = json!({
            "address": "0xAAAA000000000000000000000000000000aaaa",
            "topics": ["0xtopic0", "0xtopic1", "0xtopic2"],
            "data": "0x00",
            "blockNumber": "0x65",
            "blockHash": "0xblockhash",
            "transactionHash": "0xtxhash",
            "transactionIndex": "0x1",
            "logIndex": "0x2"
        });
        let log = parse_raw_log(&entry).unwrap();
        assert_eq!(log.address, "0xaaaa000000000000000000000000000000aaaa");
        assert_eq!(log.block_number, 101);
        assert_eq!(log.transaction_index, 1);
        assert_eq!(log.log_index, 2);
    }
}

