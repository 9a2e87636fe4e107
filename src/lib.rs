//! Multi-network signing and chain orchestration library.

pub mod admin;
pub mod balances;
pub mod config;
pub mod fees;
pub mod gateway;
pub mod lifecycle;
pub mod networks;
pub mod observability;
pub mod orchestrator;
pub mod resilience;
pub mod services;
pub mod signing;
pub mod store;

pub use config::OrchestratorConfig;
pub use lifecycle::{Runtime, Shutdown};
pub use orchestrator::{ChainOrchestrator, TxHandle, TxState};
