//! Transaction lifecycle states and the caller-facing handle.

use alloy::primitives::TxHash;
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::networks::FeeFields;
use crate::signing::SigningError;

/// Why a transaction was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Cancelled before the request reached a signer.
    Cancelled,
    UnknownSigner,
    SignerRejected,
    SignerUnavailable,
    /// Cancelled while a signer held the request.
    SigningCancelled,
    InvalidRequest,
    NetworkUnreachable,
    FeeCapExceeded,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Cancelled => "cancelled",
            ReasonCode::UnknownSigner => "unknown_signer",
            ReasonCode::SignerRejected => "signer_rejected",
            ReasonCode::SignerUnavailable => "signer_unavailable",
            ReasonCode::SigningCancelled => "signing_cancelled",
            ReasonCode::InvalidRequest => "invalid_request",
            ReasonCode::NetworkUnreachable => "network_unreachable",
            ReasonCode::FeeCapExceeded => "fee_cap_exceeded",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SigningError> for ReasonCode {
    fn from(error: &SigningError) -> Self {
        match error {
            SigningError::UnknownSigner(_) => ReasonCode::UnknownSigner,
            SigningError::SignerUnavailable(_) => ReasonCode::SignerUnavailable,
            SigningError::SignerRejected(_) => ReasonCode::SignerRejected,
            SigningError::SigningCancelled => ReasonCode::SigningCancelled,
            SigningError::InvalidRequest(_) | SigningError::AssignmentConflict { .. } => {
                ReasonCode::InvalidRequest
            }
        }
    }
}

/// Where a submission is in its lifecycle.
///
/// ```text
/// Draft → Enriched → Signed → Broadcast → Confirmed | Replaced
///   └────────┴─────────┴─→ Dropped        └→ BroadcastRejected (from Signed)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TxState {
    Draft,
    Enriched {
        nonce: u64,
        gas_limit: u64,
        fees: FeeFields,
    },
    Signed {
        hash: TxHash,
        nonce: u64,
    },
    Broadcast {
        hash: TxHash,
        nonce: u64,
        attempts: u32,
    },
    Confirmed {
        hash: TxHash,
        block_height: u64,
    },
    Dropped {
        reason: ReasonCode,
        message: String,
    },
    /// Another transaction with the same sender and nonce was mined.
    Replaced {
        by: Option<TxHash>,
    },
    BroadcastRejected {
        reason: String,
    },
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxState::Confirmed { .. }
                | TxState::Dropped { .. }
                | TxState::Replaced { .. }
                | TxState::BroadcastRejected { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TxState::Draft => "draft",
            TxState::Enriched { .. } => "enriched",
            TxState::Signed { .. } => "signed",
            TxState::Broadcast { .. } => "broadcast",
            TxState::Confirmed { .. } => "confirmed",
            TxState::Dropped { .. } => "dropped",
            TxState::Replaced { .. } => "replaced",
            TxState::BroadcastRejected { .. } => "broadcast_rejected",
        }
    }

    pub(crate) fn dropped(reason: ReasonCode, message: impl Into<String>) -> Self {
        TxState::Dropped {
            reason,
            message: message.into(),
        }
    }

    /// Hash of the signed transaction, once there is one.
    pub fn hash(&self) -> Option<TxHash> {
        match self {
            TxState::Signed { hash, .. }
            | TxState::Broadcast { hash, .. }
            | TxState::Confirmed { hash, .. } => Some(*hash),
            _ => None,
        }
    }
}

/// A pending submission. Cloning shares the same underlying transaction.
#[derive(Debug, Clone)]
pub struct TxHandle {
    id: Uuid,
    state: watch::Receiver<TxState>,
    cancel: CancellationToken,
}

impl TxHandle {
    pub(crate) fn new(id: Uuid, state: watch::Receiver<TxState>, cancel: CancellationToken) -> Self {
        Self { id, state, cancel }
    }

    /// The draft identifier this handle tracks.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<TxState> {
        self.state.clone()
    }

    /// Abort the submission.
    ///
    /// Before signing completes this drops the transaction and releases its
    /// nonce; a pending hardware prompt is abandoned. Once signed it has no effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the transaction reaches a state satisfying `done`.
    pub async fn wait_for(&self, done: impl Fn(&TxState) -> bool) -> TxState {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|s| done(s)).await.map(|state| state.clone());
        match reached {
            Ok(state) => state,
            // Sender dropped: the last value is final.
            Err(_) => rx.borrow().clone(),
        }
    }

    /// Wait for a terminal state.
    pub async fn wait_terminal(&self) -> TxState {
        self.wait_for(TxState::is_terminal).await
    }
}
