//! Balance tracking.
//!
//! # Data Flow
//! ```text
//! BalanceRefresher (periodic, or after a confirmation)
//!     → NetworkGateway::get_balance (amount @ height)
//!     → BalanceTracker::observe (height-ordered last write wins)
//!     → StateStore checkpoint + change notification
//! ```

pub mod refresh;
pub mod tracker;

pub use refresh::BalanceRefresher;
pub use tracker::{BalanceChange, BalanceTracker, Observation};
