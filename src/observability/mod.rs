//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Events carry chain_id / address / tx_hash as fields, never key material
//! - Metrics are cheap (atomic increments) and safe without an exporter installed

pub mod logging;
pub mod metrics;
