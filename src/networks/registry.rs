//! Canonical network instances, looked up by chain ID.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::schema::NetworkConfig;
use crate::networks::types::{ChainId, FeeModel, NativeAsset, Network};

const GWEI: u128 = 1_000_000_000;

fn define(
    chain_id: u64,
    name: &str,
    symbol: &str,
    fee_model: FeeModel,
    fee_floor_wei: u128,
    is_testnet: bool,
) -> Network {
    Network {
        chain_id: ChainId(chain_id),
        name: name.to_string(),
        native_asset: NativeAsset {
            symbol: symbol.to_string(),
            decimals: 18,
        },
        fee_model,
        fee_floor_wei,
        base_fee_max_change_denominator: 8,
        elasticity_multiplier: 2,
        is_testnet,
    }
}

/// Ethereum Mainnet (chain ID 1).
pub fn ethereum() -> Network {
    define(1, "Ethereum", "ETH", FeeModel::Eip1559, GWEI / 10, false)
}

/// Optimism (chain ID 10).
pub fn optimism() -> Network {
    define(10, "Optimism", "ETH", FeeModel::Eip1559, 1_000_000, false)
}

/// Polygon PoS (chain ID 137). Validators reject tips under 30 gwei.
pub fn polygon() -> Network {
    define(137, "Polygon", "POL", FeeModel::Eip1559, 30 * GWEI, false)
}

/// Arbitrum One (chain ID 42161).
pub fn arbitrum() -> Network {
    define(42161, "Arbitrum One", "ETH", FeeModel::Eip1559, 0, false)
}

/// Base (chain ID 8453).
pub fn base() -> Network {
    define(8453, "Base", "ETH", FeeModel::Eip1559, 1_000_000, false)
}

/// Rootstock (chain ID 30). Legacy gas pricing only.
pub fn rootstock() -> Network {
    define(30, "Rootstock", "RBTC", FeeModel::Legacy, 60_000_000, false)
}

/// Sepolia testnet (chain ID 11155111).
pub fn sepolia() -> Network {
    define(11155111, "Sepolia", "ETH", FeeModel::Eip1559, GWEI / 1000, true)
}

/// Immutable set of supported networks.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<ChainId, Arc<Network>>,
}

impl NetworkRegistry {
    /// Registry containing only the built-in networks.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for network in [
            ethereum(),
            optimism(),
            polygon(),
            arbitrum(),
            base(),
            rootstock(),
            sepolia(),
        ] {
            registry.insert(network);
        }
        registry
    }

    /// Built-in networks extended (and, for matching chain IDs, overridden) by configuration.
    pub fn from_config(configs: &[NetworkConfig]) -> Self {
        let mut registry = Self::builtin();
        for config in configs {
            let chain_id = ChainId(config.chain_id);
            let mut network = registry
                .get(chain_id)
                .map(|n| n.as_ref().clone())
                .unwrap_or_else(|| {
                    define(config.chain_id, "", "ETH", FeeModel::Eip1559, 0, false)
                });

            if let Some(name) = &config.name {
                network.name = name.clone();
            }
            if network.name.is_empty() {
                network.name = format!("Chain {}", config.chain_id);
            }
            if let Some(symbol) = &config.symbol {
                network.native_asset.symbol = symbol.clone();
            }
            if let Some(decimals) = config.decimals {
                network.native_asset.decimals = decimals;
            }
            if let Some(fee_model) = config.fee_model {
                network.fee_model = fee_model;
            }
            if let Some(floor) = config.fee_floor_wei {
                network.fee_floor_wei = floor as u128;
            }
            if let Some(is_testnet) = config.is_testnet {
                network.is_testnet = is_testnet;
            }

            tracing::debug!(chain_id = %chain_id, name = %network.name, "Network registered");
            registry.insert(network);
        }
        registry
    }

    /// Add a network, replacing any previous definition for the same chain.
    pub fn insert(&mut self, network: Network) {
        self.networks.insert(network.chain_id, Arc::new(network));
    }

    pub fn get(&self, chain_id: ChainId) -> Option<Arc<Network>> {
        self.networks.get(&chain_id).cloned()
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.networks.contains_key(&chain_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<Network>> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}
