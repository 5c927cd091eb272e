//! Log Decoder (C3): parses raw `Transfer(address,address,uint256)` logs
//! into [`DecodedTransfer`]s, resolving token metadata from the registry.
//!
//! Grounded on the topic-slicing approach used by ERC-20 indexers in the
//! reference pack: addresses are the last 20 bytes of a left-padded 32-byte
//! indexed topic, and the value is the big-endian integer encoded in the
//! log's data field.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;

use crate::chain_client::RawLog;
use crate::error::DecodeDropReason;
use crate::token_registry::TokenRegistry;
use crate::types::DecodedTransfer;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC0: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub struct DecoderConfig {
    pub ignore_zero_value: bool,
}

/// Strips the left-padding of a 32-byte topic down to the trailing 20-byte
/// address, returning a lowercase `0x`-prefixed hex string.
fn address_from_topic(topic: &str) -> Option<String> {
    let hex_part = topic.trim_start_matches("0x");
    let bytes = hex::decode(hex_part).ok()?;
    if bytes.len() < 20 {
        return None;
    }
    let addr_bytes = &bytes[bytes.len() - 20..];
    Some(format!("0x{}", hex::encode(addr_bytes)))
}

fn value_from_data(data: &str) -> BigUint {
    let hex_part = data.trim_start_matches("0x");
    match hex::decode(hex_part) {
        Ok(bytes) if !bytes.is_empty() => BigUint::from_bytes_be(&bytes),
        _ => BigUint::zero(),
    }
}

/// Decodes one raw log, or returns the reason it was dropped.
///
/// Rejects logs with fewer than three topics, logs whose address is not in
/// the token registry, and — when `ignore_zero_value` is set — zero-value
/// transfers.
pub fn decode_transfer_log(
    log: &RawLog,
    registry: &TokenRegistry,
    config: &DecoderConfig,
    block_timestamp: DateTime<Utc>,
) -> Result<DecodedTransfer, DecodeDropReason> {
    if log.topics.len() < 3 {
        return Err(DecodeDropReason::TooFewTopics);
    }

    let token = registry
        .get(&log.address)
        .ok_or(DecodeDropReason::UnknownToken)?;

    let from = address_from_topic(&log.topics[1]).ok_or(DecodeDropReason::TooFewTopics)?;
    let to = address_from_topic(&log.topics[2]).ok_or(DecodeDropReason::TooFewTopics)?;
    let raw_value = value_from_data(&log.data);

    if config.ignore_zero_value && raw_value.is_zero() {
        return Err(DecodeDropReason::ZeroValue);
    }

    let value = BigDecimal::new(raw_value.into(), 0);

    Ok(DecodedTransfer {
        from,
        to,
        value,
        token_address: token.address,
        token_symbol: token.symbol,
        token_decimals: token.decimals,
        block_number: log.block_number,
        block_hash: log.block_hash.clone(),
        tx_hash: log.transaction_hash.clone(),
        transaction_index: log.transaction_index,
        log_index: log.log_index,
        timestamp: block_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;

    fn registry() -> TokenRegistry {
        TokenRegistry::new(&[TokenConfig {
            address: "0xaaaa000000000000000000000000000000aaaa".to_string(),
            symbol: "MSQ".to_string(),
            name: "Mock Stable".to_string(),
            decimals: 18,
        }])
    }

    fn topic_for(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn sample_log(value_hex: &str) -> RawLog {
        RawLog {
            address: "0xaaaa000000000000000000000000000000aaaa".to_string(),
            topics: vec![
                TRANSFER_TOPIC0.to_string(),
                topic_for("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
                topic_for("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            ],
            data: format!("0x{:0>64}", value_hex),
            block_number: 101,
            block_hash: "0xblockhash".to_string(),
            transaction_hash: "0xtxhash".to_string(),
            transaction_index: 0,
            log_index: 0,
        }
    }

    #[test]
    fn decodes_addresses_and_value() {
        let log = sample_log("3e8"); // 1000
        let cfg = DecoderConfig { ignore_zero_value: true };
        let out = decode_transfer_log(&log, &registry(), &cfg, Utc::now()).unwrap();
        assert_eq!(out.from, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(out.to, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert_eq!(out.value, BigDecimal::from(1000));
    }

    #[test]
    fn drops_too_few_topics() {
        let mut log = sample_log("3e8");
        log.topics.truncate(2);
        let cfg = DecoderConfig { ignore_zero_value: true };
        assert_eq!(
            decode_transfer_log(&log, &registry(), &cfg, Utc::now()).unwrap_err(),
            DecodeDropReason::TooFewTopics
        );
    }

    #[test]
    fn drops_unknown_token() {
        let mut log = sample_log("3e8");
        log.address = "0xdeadbeef00000000000000000000000000dead".to_string();
        let cfg = DecoderConfig { ignore_zero_value: true };
        assert_eq!(
            decode_transfer_log(&log, &registry(), &cfg, Utc::now()).unwrap_err(),
            DecodeDropReason::UnknownToken
        );
    }

    #[test]
    fn drops_zero_value_when_filtering_enabled() {
        let log = sample_log("0");
        let cfg = DecoderConfig { ignore_zero_value: true };
        assert_eq!(
            decode_transfer_log(&log, &registry(), &cfg, Utc::now()).unwrap_err(),
            DecodeDropReason::ZeroValue
        );
    }

    #[test]
    fn keeps_zero_value_when_filtering_disabled() {
        let log = sample_log("0");
        let cfg = DecoderConfig { ignore_zero_value: false };
        assert!(decode_transfer_log(&log, &registry(), &cfg, Utc::now()).is_ok());
    }
}
