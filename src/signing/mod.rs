//! Signing subsystem.
//!
//! # Data Flow
//! ```text
//! TransactionRequest (enriched)
//!     → coordinator.rs (look up SignerAssignment, build envelope)
//!     → envelope.rs (EIP-1559 / EIP-155 unsigned payload + signing hash)
//!     → keyring.rs (software keys)  |  hardware.rs (device session)
//!     → coordinator.rs (recover signer, assemble SignedTransaction)
//! ```
//!
//! # Security Constraints
//! - Private keys never leave keyring.rs and are never logged
//! - The coordinator never touches nonces and never broadcasts
//! - Hardware calls may block indefinitely; callers bound them with a cancellation token

pub mod coordinator;
pub mod emulated;
pub mod envelope;
pub mod hardware;
pub mod keyring;
pub mod registry;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use coordinator::{SignerBackend, SigningCoordinator};
pub use emulated::{DeviceResponse, EmulatedDevice};
pub use hardware::{HardwareDevice, HardwareError, HardwareSignerAdapter};
pub use keyring::{KeyringError, KeyringStore};
pub use registry::SignerRegistry;

/// Backend that owns an account's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    Software,
    Hardware,
}

impl SignerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerKind::Software => "software",
            SignerKind::Hardware => "hardware",
        }
    }
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the signing coordinator.
///
/// None of these are retried; each one ends the signing attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// No signer assignment exists for the sender.
    #[error("no signer registered for {0}")]
    UnknownSigner(Address),

    /// The backend could not be reached (device disconnected, key missing).
    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    /// The backend refused to sign, or produced a signature for another account.
    #[error("signer rejected request: {0}")]
    SignerRejected(String),

    /// The request cannot be signed as-is.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The caller cancelled while the backend was working.
    #[error("signing cancelled")]
    SigningCancelled,

    /// The account is already owned by another backend; re-import to change it.
    #[error("{address} is already assigned to the {existing} signer")]
    AssignmentConflict { address: Address, existing: SignerKind },
}

/// Result type for signing operations.
pub type SigningResult<T> = Result<T, SigningError>;
