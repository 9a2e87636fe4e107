//! Network data model.
//!
//! # Data Flow
//! ```text
//! config [[networks]] + built-ins
//!     → registry.rs (one Arc<Network> per chain ID)
//!     → every other subsystem stores only the ChainId and looks the network up
//! ```

pub mod registry;
pub mod types;

pub use registry::NetworkRegistry;
pub use types::{
    AccountBalance, AssetId, BalanceAt, BalanceKey, Block, BlockTag, ChainId, DataSource,
    FeeFields, FeeHistoryEntry, FeeModel, FeeQuote, Network, NetworkAddress, SignedTransaction,
    TransactionRequest, unix_millis,
};
