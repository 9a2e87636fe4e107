//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → networks → gateways → store → balances → signers → orchestrator
//!     → spawn trackers and refresher
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → main triggers Shutdown
//!
//! Shutdown (shutdown.rs):
//!     broadcast → background loops exit → state store checkpoint
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{Runtime, StartupError};
