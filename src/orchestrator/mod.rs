//! Transaction orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! submit(TransactionRequest)
//!     → nonce.rs (per-sender FIFO reservation)
//!     → FeeEstimator quote + NetworkGateway::estimate_gas      [Enriched]
//!     → SigningCoordinator::sign                                [Signed]
//!     → NetworkGateway::broadcast (retried while unreachable)   [Broadcast]
//!     → tracker.rs scans blocks → engine.rs process_block       [Confirmed | Replaced]
//! ```

pub mod engine;
pub mod nonce;
pub mod state;
pub mod tracker;

use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayError;
use crate::networks::ChainId;
use crate::signing::SigningError;
use crate::store::StoreError;

pub use engine::{ChainOrchestrator, TxSummary};
pub use nonce::{NonceManager, NonceReservation, NonceView};
pub use state::{ReasonCode, TxHandle, TxState};
pub use tracker::ConfirmationTracker;

/// Errors returned synchronously by the orchestrator.
///
/// Failures after a submission is accepted are reported through its
/// [`TxState`] instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown network {0}")]
    UnknownNetwork(ChainId),

    #[error("network {0} has no gateway configured")]
    NotConnected(ChainId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown transaction {0}")]
    UnknownTransaction(Uuid),

    #[error("replacement fees must exceed the original by at least {bump_percent}%")]
    ReplacementUnderpriced { bump_percent: u32 },

    #[error("max fee per gas {fee} wei exceeds cap {cap} wei")]
    FeeCapExceeded { fee: u128, cap: u128 },
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
