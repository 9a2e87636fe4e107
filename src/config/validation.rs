//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (preferences and accounts reference known tiers/networks)
//! - Validate value ranges (timeouts > 0, percentiles <= 100, URLs parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: OrchestratorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{GatewayKind, OrchestratorConfig};
use crate::networks::{ChainId, NetworkRegistry};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &OrchestratorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Fees
    let fees = &config.fees;
    if fees.window_blocks == 0 {
        errors.push(ValidationError::new("fees.window_blocks", "must be at least 1"));
    }
    if fees.tiers.is_empty() {
        errors.push(ValidationError::new("fees.tiers", "at least one tier is required"));
    }
    let mut tier_names = HashSet::new();
    for (i, tier) in fees.tiers.iter().enumerate() {
        let field = format!("fees.tiers[{}]", i);
        if !tier_names.insert(tier.name.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate tier name '{}'", tier.name)));
        }
        if tier.percentile > 100 {
            errors.push(ValidationError::new(&field, "percentile must be <= 100"));
        }
        if tier.confidence > 100 {
            errors.push(ValidationError::new(&field, "confidence must be <= 100"));
        }
        if i > 0 {
            let prev = &fees.tiers[i - 1];
            if tier.confidence <= prev.confidence || tier.percentile < prev.percentile {
                errors.push(ValidationError::new(
                    &field,
                    "tiers must be ordered by increasing confidence and percentile",
                ));
            }
        }
    }
    if !fees.tiers.is_empty() && !tier_names.contains(config.preferences.default_tier.as_str()) {
        errors.push(ValidationError::new(
            "preferences.default_tier",
            format!("unknown tier '{}'", config.preferences.default_tier),
        ));
    }

    // Retries
    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    // Tracker
    if config.tracker.poll_interval_ms == 0 {
        errors.push(ValidationError::new("tracker.poll_interval_ms", "must be > 0"));
    }
    if config.tracker.balance_refresh_secs == 0 {
        errors.push(ValidationError::new("tracker.balance_refresh_secs", "must be > 0"));
    }

    // Networks
    let mut connected = HashSet::new();
    for (i, network) in config.networks.iter().enumerate() {
        let field = format!("networks[{}]", i);
        if !connected.insert(network.chain_id) {
            errors.push(ValidationError::new(
                &field,
                format!("duplicate chain_id {}", network.chain_id),
            ));
        }
        if network.gateway == GatewayKind::Rpc {
            if network.rpc_url.parse::<url::Url>().is_err() {
                errors.push(ValidationError::new(
                    format!("{}.rpc_url", field),
                    format!("invalid URL '{}'", network.rpc_url),
                ));
            }
            for url in &network.failover_urls {
                if url.parse::<url::Url>().is_err() {
                    errors.push(ValidationError::new(
                        format!("{}.failover_urls", field),
                        format!("invalid URL '{}'", url),
                    ));
                }
            }
            if network.rpc_timeout_secs == 0 {
                errors.push(ValidationError::new(
                    format!("{}.rpc_timeout_secs", field),
                    "must be > 0",
                ));
            }
        }
    }

    let registry = NetworkRegistry::from_config(&config.networks);
    if !registry.contains(ChainId(config.preferences.default_chain_id)) {
        errors.push(ValidationError::new(
            "preferences.default_chain_id",
            format!("unknown network {}", config.preferences.default_chain_id),
        ));
    }

    for (i, account) in config.accounts.iter().enumerate() {
        if !connected.contains(&account.chain_id) {
            errors.push(ValidationError::new(
                format!("accounts[{}].chain_id", i),
                format!("network {} has no gateway configured", account.chain_id),
            ));
        }
    }

    for (i, signer) in config.signers.iter().enumerate() {
        if signer.env_var.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("signers[{}].env_var", i),
                "must not be empty",
            ));
        }
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AccountConfig, NetworkConfig, TierConfig};
    use alloy::primitives::Address;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&OrchestratorConfig::default()).is_ok());
    }

    #[test]
    fn test_tier_ordering_enforced() {
        let mut config = OrchestratorConfig::default();
        config.fees.tiers = vec![
            TierConfig::new("medium", 50, 95),
            TierConfig::new("low", 10, 70),
        ];
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("ordered")));
    }

    #[test]
    fn test_unknown_default_tier() {
        let mut config = OrchestratorConfig::default();
        config.preferences.default_tier = "turbo".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "preferences.default_tier");
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = OrchestratorConfig::default();
        config.retries.max_attempts = 0;
        config.networks.push(NetworkConfig {
            chain_id: 1,
            rpc_url: "not a url".into(),
            ..NetworkConfig::default()
        });
        config.networks.push(NetworkConfig {
            chain_id: 1,
            ..NetworkConfig::default()
        });
        config.accounts.push(AccountConfig {
            address: Address::ZERO,
            chain_id: 10,
            tokens: vec![],
        });
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 4, "got {:?}", errors);
    }
}
