//! Signer dispatch.
//!
//! # Responsibilities
//! - Resolve the backend that owns a sender via [`SignerRegistry`]
//! - Build the unsigned envelope and hand it to that backend
//! - Check the returned signature recovers to the sender
//! - Import keys and attach devices, keeping the registry in step
//!
//! # Design Decisions
//! - Backends are a tagged enum, not trait objects: there are exactly two
//! - No retries; every failure is terminal for the attempt
//! - No nonce handling and no broadcast

use alloy::primitives::Address;
use alloy::signers::Signature;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::networks::{NetworkAddress, NetworkRegistry, SignedTransaction, TransactionRequest};
use crate::observability::metrics;
use crate::signing::envelope::UnsignedEnvelope;
use crate::signing::hardware::{HardwareDevice, HardwareError, HardwareSignerAdapter};
use crate::signing::keyring::{KeyringError, KeyringStore};
use crate::signing::registry::SignerRegistry;
use crate::signing::{SignerKind, SigningError, SigningResult};

impl From<KeyringError> for SigningError {
    fn from(err: KeyringError) -> Self {
        match err {
            KeyringError::UnknownAccount(address) => {
                SigningError::SignerRejected(format!("no software key for {}", address))
            }
            KeyringError::InvalidKey(msg) | KeyringError::MissingEnv(msg) => {
                SigningError::InvalidRequest(msg)
            }
            KeyringError::Signing(msg) => SigningError::SignerRejected(msg),
        }
    }
}

impl From<HardwareError> for SigningError {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Disconnected(_) | HardwareError::Communication(_) => {
                SigningError::SignerUnavailable(err.to_string())
            }
            HardwareError::Rejected { reason } => SigningError::SignerRejected(reason),
            HardwareError::Unsupported(msg) => SigningError::InvalidRequest(msg),
            HardwareError::Cancelled => SigningError::SigningCancelled,
        }
    }
}

/// The backend selected for one signature.
#[derive(Clone, Copy)]
pub enum SignerBackend<'a> {
    Keyring(&'a KeyringStore),
    Hardware(&'a HardwareSignerAdapter),
}

impl SignerBackend<'_> {
    pub fn kind(&self) -> SignerKind {
        match self {
            SignerBackend::Keyring(_) => SignerKind::Software,
            SignerBackend::Hardware(_) => SignerKind::Hardware,
        }
    }

    async fn sign_transaction(
        &self,
        account: Address,
        envelope: &UnsignedEnvelope,
        cancel: &CancellationToken,
    ) -> SigningResult<Signature> {
        match self {
            SignerBackend::Keyring(keyring) => Ok(keyring
                .sign_hash(&account, envelope.signature_hash())
                .await?),
            SignerBackend::Hardware(adapter) => Ok(adapter
                .sign_transaction(account, &envelope.signing_payload(), cancel)
                .await?),
        }
    }

    async fn sign_message(
        &self,
        account: Address,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> SigningResult<Signature> {
        match self {
            SignerBackend::Keyring(keyring) => Ok(keyring.sign_message(&account, payload).await?),
            SignerBackend::Hardware(adapter) => {
                Ok(adapter.sign_message(account, payload, cancel).await?)
            }
        }
    }
}

/// Uniform signing entry point over software and hardware backends.
pub struct SigningCoordinator {
    networks: Arc<NetworkRegistry>,
    registry: Arc<SignerRegistry>,
    keyring: Arc<KeyringStore>,
    hardware: Arc<HardwareSignerAdapter>,
}

impl SigningCoordinator {
    pub fn new(
        networks: Arc<NetworkRegistry>,
        registry: Arc<SignerRegistry>,
        keyring: Arc<KeyringStore>,
        hardware: Arc<HardwareSignerAdapter>,
    ) -> Self {
        Self {
            networks,
            registry,
            keyring,
            hardware,
        }
    }

    pub fn registry(&self) -> &Arc<SignerRegistry> {
        &self.registry
    }

    /// Backend assigned to `address`.
    pub fn backend(&self, address: &Address) -> SigningResult<SignerBackend<'_>> {
        match self.registry.get(address) {
            Some(SignerKind::Software) => Ok(SignerBackend::Keyring(&self.keyring)),
            Some(SignerKind::Hardware) => Ok(SignerBackend::Hardware(&self.hardware)),
            None => Err(SigningError::UnknownSigner(*address)),
        }
    }

    /// Import a software key and assign its account to the keyring.
    pub fn import_key(&self, private_key_hex: &str) -> SigningResult<Address> {
        let address = self.keyring.import_hex(private_key_hex)?;
        if let Err(e) = self.registry.assign(address, SignerKind::Software) {
            self.keyring.remove(&address);
            return Err(e);
        }
        Ok(address)
    }

    /// Import a software key from an environment variable.
    pub fn import_key_env(&self, var: &str) -> SigningResult<Address> {
        let address = self.keyring.import_env(var)?;
        if let Err(e) = self.registry.assign(address, SignerKind::Software) {
            self.keyring.remove(&address);
            return Err(e);
        }
        Ok(address)
    }

    /// Import a software key, taking the account over from any device.
    pub fn reimport_key(&self, private_key_hex: &str) -> SigningResult<Address> {
        let address = self.keyring.import_hex(private_key_hex)?;
        self.registry.reimport(address, SignerKind::Software);
        Ok(address)
    }

    /// Attach a device and assign its accounts to the hardware backend.
    ///
    /// Accounts already owned by the keyring are skipped with a warning.
    pub async fn attach_device(&self, device: Arc<dyn HardwareDevice>) -> SigningResult<Vec<Address>> {
        let accounts = self.hardware.attach(device).await?;
        let mut assigned = Vec::with_capacity(accounts.len());
        for account in accounts {
            match self.registry.assign(account, SignerKind::Hardware) {
                Ok(()) => assigned.push(account),
                Err(e) => tracing::warn!(%account, error = %e, "Skipping device account"),
            }
        }
        Ok(assigned)
    }

    /// Attach a device, taking over its accounts from the keyring.
    pub async fn reattach_device(&self, device: Arc<dyn HardwareDevice>) -> SigningResult<Vec<Address>> {
        let accounts = self.hardware.attach(device).await?;
        for account in &accounts {
            if self.registry.reimport(*account, SignerKind::Hardware) == Some(SignerKind::Software) {
                self.keyring.remove(account);
            }
        }
        Ok(accounts)
    }

    /// Sign an enriched request.
    ///
    /// The returned transaction's signature is verified to recover to the sender.
    pub async fn sign(
        &self,
        request: &TransactionRequest,
        cancel: &CancellationToken,
    ) -> SigningResult<SignedTransaction> {
        let sender = request.from.address;
        let backend = self.backend(&sender)?;
        let network = self.networks.get(request.network()).ok_or_else(|| {
            SigningError::InvalidRequest(format!("unknown network {}", request.network()))
        })?;
        let envelope = UnsignedEnvelope::build(request, &network)?;
        if cancel.is_cancelled() {
            return Err(SigningError::SigningCancelled);
        }

        let started = Instant::now();
        let result = backend.sign_transaction(sender, &envelope, cancel).await;
        metrics::record_signing_duration(backend.kind().as_str(), started.elapsed());
        let signature = result?;

        let recovered = signature
            .recover_address_from_prehash(&envelope.signature_hash())
            .map_err(|e| SigningError::SignerRejected(format!("unrecoverable signature: {}", e)))?;
        if recovered != sender {
            return Err(SigningError::SignerRejected(format!(
                "signature recovers to {}, expected {}",
                recovered, sender
            )));
        }

        let signed = envelope.into_signed(signature);
        tracing::debug!(
            chain_id = %signed.network(),
            from = %sender,
            nonce = signed.nonce(),
            tx_hash = %signed.hash(),
            backend = %backend.kind(),
            "Transaction signed"
        );
        Ok(signed)
    }

    /// Sign `payload` as an EIP-191 personal message.
    pub async fn sign_message(
        &self,
        address: &NetworkAddress,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> SigningResult<Signature> {
        let backend = self.backend(&address.address)?;
        let started = Instant::now();
        let result = backend.sign_message(address.address, payload, cancel).await;
        metrics::record_signing_duration(backend.kind().as_str(), started.elapsed());
        let signature = result?;

        match signature.recover_address_from_msg(payload) {
            Ok(recovered) if recovered == address.address => Ok(signature),
            Ok(recovered) => Err(SigningError::SignerRejected(format!(
                "signature recovers to {}, expected {}",
                recovered, address.address
            ))),
            Err(e) => Err(SigningError::SignerRejected(format!(
                "unrecoverable signature: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::FeeFields;
    use crate::signing::emulated::{DeviceResponse, EmulatedDevice};
    use alloy::primitives::U256;

    const TEST_PRIVATE_KEY: &str =
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn coordinator() -> SigningCoordinator {
        SigningCoordinator::new(
            Arc::new(NetworkRegistry::builtin()),
            Arc::new(SignerRegistry::new()),
            Arc::new(KeyringStore::new()),
            Arc::new(HardwareSignerAdapter::new()),
        )
    }

    fn request(from: Address, chain_id: u64, fees: FeeFields) -> TransactionRequest {
        TransactionRequest::new(NetworkAddress::new(from, chain_id))
            .with_to(Address::repeat_byte(0xbb))
            .with_value(U256::from(1u64))
            .with_nonce(0)
            .with_gas_limit(21_000)
            .with_fees(fees)
    }

    const EIP1559: FeeFields = FeeFields::Eip1559 {
        max_fee_per_gas: 20_000_000_000,
        max_priority_fee_per_gas: 1_000_000_000,
    };

    #[tokio::test]
    async fn test_unknown_signer() {
        let coordinator = coordinator();
        let err = coordinator
            .sign(&request(Address::ZERO, 1, EIP1559), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SigningError::UnknownSigner(Address::ZERO));
    }

    #[tokio::test]
    async fn test_keyring_signature_recovers() {
        let coordinator = coordinator();
        let sender = coordinator.import_key(TEST_PRIVATE_KEY).unwrap();
        let signed = coordinator
            .sign(&request(sender, 1, EIP1559), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(signed.from().address, sender);
        assert_eq!(signed.nonce(), 0);
        assert_eq!(signed.raw()[0], 0x02);
    }

    #[tokio::test]
    async fn test_legacy_network() {
        let coordinator = coordinator();
        let sender = coordinator.import_key(TEST_PRIVATE_KEY).unwrap();
        let signed = coordinator
            .sign(
                &request(sender, 30, FeeFields::Legacy { gas_price: 60_000_000 }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(signed.raw()[0] >= 0xc0);
    }

    #[tokio::test]
    async fn test_hardware_rejection_maps() {
        let coordinator = coordinator();
        let device = Arc::new(EmulatedDevice::with_key("ledger", TEST_PRIVATE_KEY).unwrap());
        device.push_response(DeviceResponse::Reject("user declined".into()));
        let accounts = coordinator.attach_device(device.clone()).await.unwrap();

        let err = coordinator
            .sign(&request(accounts[0], 1, EIP1559), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SigningError::SignerRejected("user declined".into()));

        device.push_response(DeviceResponse::Disconnect);
        let err = coordinator
            .sign(&request(accounts[0], 1, EIP1559), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::SignerUnavailable(_)));

        let signed = coordinator
            .sign(&request(accounts[0], 1, EIP1559), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(signed.from().address, accounts[0]);
    }

    #[tokio::test]
    async fn test_device_cannot_claim_keyring_account() {
        let coordinator = coordinator();
        coordinator.import_key(TEST_PRIVATE_KEY).unwrap();
        let device = Arc::new(EmulatedDevice::with_key("ledger", TEST_PRIVATE_KEY).unwrap());
        assert!(coordinator.attach_device(device.clone()).await.unwrap().is_empty());

        let taken = coordinator.reattach_device(device).await.unwrap();
        assert_eq!(
            coordinator.registry().get(&taken[0]),
            Some(SignerKind::Hardware)
        );
    }

    #[tokio::test]
    async fn test_assigned_account_without_key_is_rejected() {
        let coordinator = coordinator();
        let orphan = Address::repeat_byte(0x0f);
        coordinator
            .registry()
            .assign(orphan, SignerKind::Software)
            .unwrap();
        let err = coordinator
            .sign(&request(orphan, 1, EIP1559), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::SignerRejected(msg) if msg.contains("no software key")));
    }

    #[tokio::test]
    async fn test_cancelled_before_signing() {
        let coordinator = coordinator();
        let sender = coordinator.import_key(TEST_PRIVATE_KEY).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = coordinator
            .sign(&request(sender, 1, EIP1559), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SigningError::SigningCancelled);
    }

    #[tokio::test]
    async fn test_sign_message() {
        let coordinator = coordinator();
        let sender = coordinator.import_key(TEST_PRIVATE_KEY).unwrap();
        let signature = coordinator
            .sign_message(&NetworkAddress::new(sender, 10), b"login", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(signature.recover_address_from_msg(b"login").unwrap(), sender);
    }
}
