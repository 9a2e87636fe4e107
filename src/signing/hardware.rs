//! Hardware signer adapter.
//!
//! # Responsibilities
//! - Track attached devices and the accounts they expose
//! - Forward signing payloads to the owning device
//! - Abort a pending device interaction when the caller cancels
//!
//! # Design Decisions
//! - No internal timeout: the caller's cancellation token bounds the wait
//! - Devices receive the unsigned envelope bytes, not a prehash, so they can
//!   display the transaction before the user approves it

use alloy::primitives::Address;
use alloy::signers::Signature;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by hardware devices.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("hardware device `{0}` disconnected")]
    Disconnected(String),

    #[error("hardware device rejected request: {reason}")]
    Rejected { reason: String },

    #[error("hardware communication error: {0}")]
    Communication(String),

    #[error("hardware operation unsupported: {0}")]
    Unsupported(String),

    #[error("hardware request cancelled")]
    Cancelled,
}

impl HardwareError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.is_empty() {
            "rejected by user".to_string()
        } else {
            reason
        };
        Self::Rejected { reason }
    }
}

/// A session with one external signing device.
#[async_trait]
pub trait HardwareDevice: Send + Sync {
    /// Human readable device label.
    fn label(&self) -> &str;

    /// Accounts the device can sign for.
    async fn accounts(&self) -> Result<Vec<Address>, HardwareError>;

    /// Sign an unsigned transaction envelope (EIP-2718 signing payload).
    async fn sign_transaction(
        &self,
        account: Address,
        payload: &[u8],
    ) -> Result<Signature, HardwareError>;

    /// Sign a message with the EIP-191 personal message prefix.
    async fn sign_personal_message(
        &self,
        account: Address,
        message: &[u8],
    ) -> Result<Signature, HardwareError>;
}

/// Routes signing requests to the device that owns each account.
#[derive(Default)]
pub struct HardwareSignerAdapter {
    devices: DashMap<Address, Arc<dyn HardwareDevice>>,
}

impl HardwareSignerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device and index every account it exposes.
    pub async fn attach(&self, device: Arc<dyn HardwareDevice>) -> Result<Vec<Address>, HardwareError> {
        let accounts = device.accounts().await?;
        for account in &accounts {
            self.devices.insert(*account, device.clone());
        }
        tracing::info!(
            device = device.label(),
            accounts = accounts.len(),
            "Hardware device attached"
        );
        Ok(accounts)
    }

    /// Forget every account served by the device with `label`.
    pub fn detach(&self, label: &str) -> usize {
        let before = self.devices.len();
        self.devices.retain(|_, device| device.label() != label);
        let removed = before - self.devices.len();
        if removed > 0 {
            tracing::info!(device = label, accounts = removed, "Hardware device detached");
        }
        removed
    }

    pub fn has_account(&self, account: &Address) -> bool {
        self.devices.contains_key(account)
    }

    fn device_for(&self, account: &Address) -> Result<Arc<dyn HardwareDevice>, HardwareError> {
        self.devices
            .get(account)
            .map(|r| r.value().clone())
            .ok_or_else(|| HardwareError::Disconnected(format!("no device for {}", account)))
    }

    /// Sign a transaction payload, returning early if `cancel` fires.
    pub async fn sign_transaction(
        &self,
        account: Address,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Signature, HardwareError> {
        let device = self.device_for(&account)?;
        tracing::debug!(device = device.label(), %account, "Awaiting hardware signature");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HardwareError::Cancelled),
            result = device.sign_transaction(account, payload) => result,
        }
    }

    /// Sign a personal message, returning early if `cancel` fires.
    pub async fn sign_message(
        &self,
        account: Address,
        message: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Signature, HardwareError> {
        let device = self.device_for(&account)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HardwareError::Cancelled),
            result = device.sign_personal_message(account, message) => result,
        }
    }
}
