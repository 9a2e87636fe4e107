//! Fee estimation.
//!
//! # Data Flow
//! ```text
//! NetworkGateway (latest block + last N blocks of fee history)
//!     → estimator.rs (percentiles per tier, next base fee projection)
//!     → Vec<FeeQuote> (lowest confidence first)
//!     → ChainOrchestrator picks the preferred tier
//! ```
//!
//! # Design Decisions
//! - Estimation is a pure function of (network, block, history)
//! - Short histories widen the percentile spread and lower confidence
//! - Empty windows fall back to the network fee floor

pub mod estimator;

pub use estimator::{next_base_fee, percentile, FeeEstimator};
