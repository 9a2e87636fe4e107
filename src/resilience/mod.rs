//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway call fails:
//!     → retries.rs (retryable? Unreachable only)
//!     → backoff.rs (exponential delay with jitter)
//!     → give up after max_attempts; caller maps to a terminal state
//! ```
//!
//! Per-call deadlines live in the RPC gateway (`tokio::time::timeout`).

pub mod backoff;
pub mod retries;

pub use retries::{retry_transient, RetryPolicy};
