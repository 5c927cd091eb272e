//! In-memory token registry (C3 metadata resolution).
//!
//! Loaded once at startup from [`crate::config::AppConfig::tokens`] and held
//! as a process-wide, read-mostly map. A refresh swaps the whole map
//! atomically rather than mutating entries in place, so readers never see a
//! partially-updated registry.

use dashmap::DashMap;
use std::sync::Arc;

use crate::config::TokenConfig;
use crate::types::Token;

#[derive(Clone)]
pub struct TokenRegistry {
    inner: Arc<DashMap<String, Token>>,
}

impl TokenRegistry {
    pub fn new(tokens: &[TokenConfig]) -> Self {
        let inner = DashMap::new();
        for t in tokens {
            let address = t.address.to_lowercase();
            inner.insert(
                address.clone(),
                Token {
                    address,
                    symbol: t.symbol.clone(),
                    name: t.name.clone(),
                    decimals: t.decimals,
                    is_active: true,
                },
            );
        }
        Self { inner: Arc::new(inner) }
    }

    /// Case-insensitive lookup by contract address.
    pub fn get(&self, address: &str) -> Option<Token> {
        self.inner.get(&address.to_lowercase()).map(|e| e.value().clone())
    }

    /// All active token addresses, for the all-tokens `getLogs` filter.
    pub fn active_addresses(&self) -> Vec<String> {
        self.inner
            .iter()
            .filter(|e| e.value().is_active)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Token> {
        self.inner.iter().map(|e| e.value().clone()).collect()
    }

    /// Atomically swaps the registry contents with a freshly-loaded set.
    pub fn refresh(&self, tokens: &[TokenConfig]) {
        let replacement = Self::new(tokens);
        self.inner.clear();
        for entry in replacement.inner.iter() {
            self.inner.insert(entry.key().clone(), entry.value().clone());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TokenConfig> {
        vec![TokenConfig {
            address: "0xAAAA000000000000000000000000000000aaaa".to_string(),
            symbol: "MSQ".to_string(),
            name: "Mock Stable".to_string(),
            decimals: 18,
        }]
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = TokenRegistry::new(&sample());
        let upper = reg.get("0xAAAA000000000000000000000000000000AAAA");
        assert!(upper.is_some());
        assert_eq!(upper.unwrap().symbol, "MSQ");
    }

    #[test]
    fn unknown_address_is_none() {
        let reg = TokenRegistry::new(&sample());
        assert!(reg.get("0xdeadbeef00000000000000000000000000dead").is_none());
    }

    #[test]
    fn refresh_swaps_whole_map() {
        let reg = TokenRegistry::new(&sample());
        assert_eq!(reg.len(), 1);
        reg.refresh(&[]);
        assert_eq!(reg.len(), 0);
    }
}
