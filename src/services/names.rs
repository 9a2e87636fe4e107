//! Human-readable name resolution.

use std::collections::HashMap;

use crate::config::NameConfig;
use crate::networks::{ChainId, NetworkAddress};

/// Resolves names to network-scoped addresses.
pub trait NameService: Send + Sync {
    fn resolve(&self, name: &str, chain_id: ChainId) -> Option<NetworkAddress>;
}

/// Name table loaded from configuration.
///
/// Names are case-insensitive. An entry bound to a network wins over one
/// that applies to every network.
#[derive(Debug, Default, Clone)]
pub struct StaticNameService {
    entries: HashMap<(String, Option<ChainId>), alloy::primitives::Address>,
}

impl StaticNameService {
    pub fn new(names: &[NameConfig]) -> Self {
        let entries = names
            .iter()
            .map(|entry| {
                (
                    (entry.name.to_lowercase(), entry.chain_id.map(ChainId)),
                    entry.address,
                )
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NameService for StaticNameService {
    fn resolve(&self, name: &str, chain_id: ChainId) -> Option<NetworkAddress> {
        let name = name.to_lowercase();
        self.entries
            .get(&(name.clone(), Some(chain_id)))
            .or_else(|| self.entries.get(&(name, None)))
            .map(|address| NetworkAddress::new(*address, chain_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    fn entry(name: &str, byte: u8, chain_id: Option<u64>) -> NameConfig {
        NameConfig {
            name: name.to_string(),
            address: Address::repeat_byte(byte),
            chain_id,
        }
    }

    #[test]
    fn test_resolve_prefers_network_entry() {
        let names = StaticNameService::new(&[
            entry("alice.eth", 1, None),
            entry("alice.eth", 2, Some(10)),
        ]);
        assert_eq!(
            names.resolve("Alice.ETH", ChainId(1)),
            Some(NetworkAddress::new(Address::repeat_byte(1), 1))
        );
        assert_eq!(
            names.resolve("alice.eth", ChainId(10)),
            Some(NetworkAddress::new(Address::repeat_byte(2), 10))
        );
    }

    #[test]
    fn test_unknown_name() {
        let names = StaticNameService::new(&[entry("bob.eth", 3, Some(1))]);
        assert_eq!(names.resolve("bob.eth", ChainId(137)), None);
        assert_eq!(names.resolve("carol.eth", ChainId(1)), None);
    }
}
