//! Software key storage and signing.
//!
//! # Security
//! - Keys are imported from hex strings or environment variables
//! - Keys are never logged or serialized
//! - Only the derived address leaves this module

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, Signer};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Errors from the software keyring.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyringError {
    #[error("Invalid private key format: {0}")]
    InvalidKey(String),

    #[error("Environment variable {0} not set")]
    MissingEnv(String),

    #[error("No key for {0}")]
    UnknownAccount(Address),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Result type for keyring operations.
pub type KeyringResult<T> = Result<T, KeyringError>;

/// Holds software private keys, indexed by account.
#[derive(Debug, Default)]
pub struct KeyringStore {
    signers: RwLock<HashMap<Address, PrivateKeySigner>>,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a hex-encoded private key (with or without 0x prefix).
    ///
    /// Returns the account controlled by the key. Importing an existing key
    /// again is harmless.
    pub fn import_hex(&self, private_key_hex: &str) -> KeyringResult<Address> {
        let key_hex = private_key_hex
            .trim()
            .strip_prefix("0x")
            .unwrap_or(private_key_hex.trim());

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| KeyringError::InvalidKey(format!("{}", e)))?;

        Ok(self.insert(signer))
    }

    /// Import a key from the named environment variable.
    pub fn import_env(&self, var: &str) -> KeyringResult<Address> {
        let private_key =
            std::env::var(var).map_err(|_| KeyringError::MissingEnv(var.to_string()))?;
        self.import_hex(&private_key)
    }

    /// Generate and store a fresh random key.
    pub fn generate(&self) -> Address {
        self.insert(PrivateKeySigner::random())
    }

    fn insert(&self, signer: PrivateKeySigner) -> Address {
        let address = signer.address();
        let mut signers = self.signers.write().unwrap_or_else(|e| e.into_inner());
        signers.insert(address, signer);
        tracing::info!(%address, "Software key imported");
        address
    }

    /// Drop the key for `address`.
    pub fn remove(&self, address: &Address) -> bool {
        let mut signers = self.signers.write().unwrap_or_else(|e| e.into_inner());
        signers.remove(address).is_some()
    }

    pub fn contains(&self, address: &Address) -> bool {
        let signers = self.signers.read().unwrap_or_else(|e| e.into_inner());
        signers.contains_key(address)
    }

    pub fn accounts(&self) -> Vec<Address> {
        let signers = self.signers.read().unwrap_or_else(|e| e.into_inner());
        let mut accounts: Vec<_> = signers.keys().copied().collect();
        accounts.sort();
        accounts
    }

    fn signer(&self, address: &Address) -> KeyringResult<PrivateKeySigner> {
        let signers = self.signers.read().unwrap_or_else(|e| e.into_inner());
        signers
            .get(address)
            .cloned()
            .ok_or(KeyringError::UnknownAccount(*address))
    }

    /// Sign a 32-byte prehash with the key for `address`.
    pub async fn sign_hash(&self, address: &Address, hash: B256) -> KeyringResult<Signature> {
        let signer = self.signer(address)?;
        signer
            .sign_hash(&hash)
            .await
            .map_err(|e| KeyringError::Signing(e.to_string()))
    }

    /// Sign arbitrary message bytes (with Ethereum prefix).
    pub async fn sign_message(&self, address: &Address, message: &[u8]) -> KeyringResult<Signature> {
        let signer = self.signer(address)?;
        signer
            .sign_message(message)
            .await
            .map_err(|e| KeyringError::Signing(e.to_string()))
    }
}
