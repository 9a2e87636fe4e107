//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the orchestrator.
//! All types derive Serde traits for deserialization from config files.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::networks::FeeModel;
use crate::signing::SignerKind;

/// Root configuration for the orchestrator service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Persisted nonce/balance snapshot.
    pub store: StoreConfig,

    /// Fee estimation settings.
    pub fees: FeeConfig,

    /// Broadcast retry configuration.
    pub retries: RetryConfig,

    /// Confirmation tracking and balance refresh.
    pub tracker: TrackerConfig,

    /// User defaults, hot reloadable.
    pub preferences: PreferencesConfig,

    /// Networks with a gateway. Built-in networks without an entry are known but not connected.
    pub networks: Vec<NetworkConfig>,

    /// Keys imported at startup.
    pub signers: Vec<SignerConfig>,

    /// Static name service entries.
    pub names: Vec<NameConfig>,

    /// Accounts whose balances are refreshed periodically.
    pub accounts: Vec<AccountConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// State store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot file. `None` keeps state in memory only.
    pub path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some("orchestrator-state.json".to_string()),
        }
    }
}

/// A named confidence tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierConfig {
    pub name: String,
    /// Percentile of observed priority fees (0-100).
    pub percentile: u8,
    /// Reported confidence (0-100).
    pub confidence: u8,
}

impl TierConfig {
    pub fn new(name: &str, percentile: u8, confidence: u8) -> Self {
        Self {
            name: name.to_string(),
            percentile,
            confidence,
        }
    }
}

/// Fee estimation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Number of recent blocks in the estimation window.
    pub window_blocks: u64,

    /// Projected base fee multiplier for max fee, in percent.
    pub headroom_percent: u32,

    /// Tiers, lowest confidence first.
    pub tiers: Vec<TierConfig>,

    /// Minimum fee increase for replace-by-fee, in percent.
    pub replacement_bump_percent: u32,

    /// Maximum fee per gas in gwei (protection against spikes).
    pub max_fee_per_gas_gwei: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            window_blocks: 20,
            headroom_percent: 200,
            tiers: vec![
                TierConfig::new("low", 10, 70),
                TierConfig::new("medium", 50, 95),
                TierConfig::new("high", 90, 99),
            ],
            replacement_bump_percent: 10,
            max_fee_per_gas_gwei: 500,
        }
    }
}

/// Retry configuration for transient network failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 4000,
        }
    }
}

/// Confirmation tracker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Block polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Blocks scanned per poll when catching up.
    pub max_catch_up_blocks: u64,

    /// Watched account refresh interval in seconds.
    pub balance_refresh_secs: u64,

    /// Observations kept per balance key.
    pub balance_history_limit: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 4000,
            max_catch_up_blocks: 64,
            balance_refresh_secs: 30,
            balance_history_limit: 32,
        }
    }
}

/// User preferences.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Fee tier used when a submission does not name one.
    pub default_tier: String,

    /// Network used when a caller does not name one.
    pub default_chain_id: u64,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            default_tier: "medium".to_string(),
            default_chain_id: 1,
        }
    }
}

/// Gateway implementation for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// JSON-RPC over HTTP.
    #[default]
    Rpc,
    /// In-process development chain.
    Memory,
}

/// Per-network configuration. Optional fields fall back to the built-in definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub fee_model: Option<FeeModel>,
    pub fee_floor_wei: Option<u64>,
    pub is_testnet: Option<bool>,

    pub gateway: GatewayKind,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            name: None,
            symbol: None,
            decimals: None,
            fee_model: None,
            fee_floor_wei: None,
            is_testnet: None,
            gateway: GatewayKind::Rpc,
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            rpc_timeout_secs: 10,
        }
    }
}

/// A key to import at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignerConfig {
    /// Backend that owns the key.
    pub backend: SignerKind,

    /// Environment variable holding the hex private key.
    pub env_var: String,

    /// Device label for hardware backends.
    #[serde(default)]
    pub label: Option<String>,
}

/// A static name service entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NameConfig {
    pub name: String,
    pub address: Address,
    /// Restrict the entry to one network; `None` resolves on every network.
    #[serde(default)]
    pub chain_id: Option<u64>,
}

/// An account whose balances are refreshed periodically.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub address: Address,
    pub chain_id: u64,
    /// ERC-20 contracts to track in addition to the native asset.
    #[serde(default)]
    pub tokens: Vec<Address>,
}
