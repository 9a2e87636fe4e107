//! Network gateway subsystem.
//!
//! # Data Flow
//! ```text
//! ChainOrchestrator / FeeEstimator / BalanceRefresher
//!     → NetworkGateway (one per connected network)
//!         → rpc.rs (alloy providers, primary + failovers, per-call timeout)
//!         → memory.rs (in-process development chain)
//! ```
//!
//! # Design Decisions
//! - One trait object per network, looked up by chain ID
//! - Errors split into transient (`Unreachable`) and definitive (`Rejected`)
//!   so callers decide what to retry
//! - Balances are returned with the height they were read at

pub mod memory;
pub mod rpc;

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::networks::{
    AssetId, BalanceAt, Block, BlockTag, ChainId, DataSource, FeeHistoryEntry, SignedTransaction,
    TransactionRequest,
};

pub use memory::MemoryGateway;
pub use rpc::RpcGateway;

/// Errors that can occur talking to a network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport failure or timeout on every provider. Worth retrying.
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// The node answered and refused (underpriced, nonce too low, reverted estimate).
    #[error("rejected by network: {reason}")]
    Rejected { reason: String },

    /// The requested block or object does not exist (yet).
    #[error("not found: {0}")]
    NotFound(String),

    /// The node answered with data we cannot interpret.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unreachable(_))
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Live chain access for one network.
#[async_trait]
pub trait NetworkGateway: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Tag attached to balances read through this gateway.
    fn data_source(&self) -> DataSource;

    async fn get_block(&self, tag: BlockTag) -> GatewayResult<Block>;

    /// Fee data for the last `last_n` blocks, oldest first.
    async fn get_fee_history(&self, last_n: u64) -> GatewayResult<Vec<FeeHistoryEntry>>;

    /// Next nonce including pending transactions.
    async fn get_nonce(&self, address: Address) -> GatewayResult<u64>;

    /// Next nonce counting only mined transactions.
    async fn get_confirmed_nonce(&self, address: Address) -> GatewayResult<u64>;

    async fn estimate_gas(&self, request: &TransactionRequest) -> GatewayResult<u64>;

    async fn broadcast(&self, signed: &SignedTransaction) -> GatewayResult<TxHash>;

    async fn get_balance(&self, address: Address, asset: &AssetId) -> GatewayResult<BalanceAt>;

    async fn is_healthy(&self) -> bool {
        self.get_block(BlockTag::Latest).await.is_ok()
    }
}

/// Gateways keyed by network.
#[derive(Clone, Default)]
pub struct GatewaySet {
    gateways: HashMap<ChainId, Arc<dyn NetworkGateway>>,
}

impl GatewaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, gateway: Arc<dyn NetworkGateway>) {
        self.gateways.insert(gateway.chain_id(), gateway);
    }

    pub fn get(&self, chain_id: ChainId) -> Option<Arc<dyn NetworkGateway>> {
        self.gateways.get(&chain_id).cloned()
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.gateways.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChainId, &Arc<dyn NetworkGateway>)> {
        self.gateways.iter()
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

impl std::fmt::Debug for GatewaySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySet")
            .field("chain_ids", &self.chain_ids())
            .finish()
    }
}
