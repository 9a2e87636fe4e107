//! Metrics collection and exposition.
//!
//! # Metrics
//! - `orchestrator_submissions_total` (counter): accepted submissions by chain
//! - `orchestrator_terminal_total` (counter): transactions reaching a terminal state, by state
//! - `orchestrator_broadcast_retries_total` (counter): retried broadcasts by chain
//! - `gateway_rpc_errors_total` (counter): failed gateway calls by chain
//! - `balance_updates_total` (counter): observations that moved the current balance
//! - `balance_stale_observations_total` (counter): observations older than the current one
//! - `signing_duration_seconds` (histogram): time spent in a signer backend, by backend
//! - `nonce_reservations_active` (gauge): reservations not yet committed or released

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::networks::ChainId;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_submission(chain_id: ChainId) {
    metrics::counter!("orchestrator_submissions_total", "chain_id" => chain_id.to_string())
        .increment(1);
}

pub fn record_terminal(state: &'static str) {
    metrics::counter!("orchestrator_terminal_total", "state" => state).increment(1);
}

pub fn record_broadcast_retry(chain_id: ChainId) {
    metrics::counter!("orchestrator_broadcast_retries_total", "chain_id" => chain_id.to_string())
        .increment(1);
}

pub fn record_rpc_error(chain_id: ChainId) {
    metrics::counter!("gateway_rpc_errors_total", "chain_id" => chain_id.to_string())
        .increment(1);
}

pub fn record_balance_update() {
    metrics::counter!("balance_updates_total").increment(1);
}

pub fn record_stale_balance() {
    metrics::counter!("balance_stale_observations_total").increment(1);
}

pub fn record_signing_duration(backend: &'static str, elapsed: Duration) {
    metrics::histogram!("signing_duration_seconds", "backend" => backend)
        .record(elapsed.as_secs_f64());
}

pub fn record_active_reservations(count: usize) {
    metrics::gauge!("nonce_reservations_active").set(count as f64);
}
