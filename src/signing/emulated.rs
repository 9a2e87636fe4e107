//! Emulated hardware device for development networks and tests.

use alloy::primitives::{keccak256, Address};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, Signer};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::signing::hardware::{HardwareDevice, HardwareError};

/// What the emulated user does with the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceResponse {
    Approve,
    Reject(String),
    Disconnect,
    /// Never answer.
    Hang,
}

/// A [`HardwareDevice`] backed by local keys with scripted user responses.
///
/// With an empty script every request is approved.
pub struct EmulatedDevice {
    label: String,
    signers: Vec<PrivateKeySigner>,
    script: Mutex<VecDeque<DeviceResponse>>,
    requests: AtomicUsize,
}

impl EmulatedDevice {
    pub fn new(label: impl Into<String>, signers: Vec<PrivateKeySigner>) -> Self {
        Self {
            label: label.into(),
            signers,
            script: Mutex::new(VecDeque::new()),
            requests: AtomicUsize::new(0),
        }
    }

    /// Device holding a single hex-encoded key.
    pub fn with_key(label: impl Into<String>, private_key_hex: &str) -> Result<Self, HardwareError> {
        let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| HardwareError::Communication(format!("invalid device key: {}", e)))?;
        Ok(Self::new(label, vec![signer]))
    }

    /// Device holding a fresh random key.
    pub fn random(label: impl Into<String>) -> Self {
        Self::new(label, vec![PrivateKeySigner::random()])
    }

    /// Queue the response for an upcoming request.
    pub fn push_response(&self, response: DeviceResponse) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    /// Number of signing requests the device has received.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> DeviceResponse {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(DeviceResponse::Approve)
    }

    fn signer(&self, account: &Address) -> Result<&PrivateKeySigner, HardwareError> {
        self.signers
            .iter()
            .find(|s| s.address() == *account)
            .ok_or_else(|| HardwareError::Unsupported(format!("account {} not on device", account)))
    }

    async fn gate(&self) -> Result<(), HardwareError> {
        match self.next_response() {
            DeviceResponse::Approve => Ok(()),
            DeviceResponse::Reject(reason) => Err(HardwareError::rejected(reason)),
            DeviceResponse::Disconnect => Err(HardwareError::Disconnected(self.label.clone())),
            DeviceResponse::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl HardwareDevice for EmulatedDevice {
    fn label(&self) -> &str {
        &self.label
    }

    async fn accounts(&self) -> Result<Vec<Address>, HardwareError> {
        Ok(self.signers.iter().map(|s| s.address()).collect())
    }

    async fn sign_transaction(
        &self,
        account: Address,
        payload: &[u8],
    ) -> Result<Signature, HardwareError> {
        let signer = self.signer(&account)?;
        self.gate().await?;
        signer
            .sign_hash(&keccak256(payload))
            .await
            .map_err(|e| HardwareError::Communication(e.to_string()))
    }

    async fn sign_personal_message(
        &self,
        account: Address,
        message: &[u8],
    ) -> Result<Signature, HardwareError> {
        let signer = self.signer(&account)?;
        self.gate().await?;
        signer
            .sign_message(message)
            .await
            .map_err(|e| HardwareError::Communication(e.to_string()))
    }
}
