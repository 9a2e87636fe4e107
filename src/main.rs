//! Chain orchestrator service.
//!
//! # Architecture Overview
//!
//! ```text
//!   TransactionRequest
//!   ───────────────────▶ ┌──────────────────────────────────────────────────────┐
//!                        │                 ChainOrchestrator                    │
//!                        │  NonceManager ─▶ FeeEstimator ─▶ SigningCoordinator  │
//!                        │                                  │         │         │
//!                        │                            KeyringStore  Hardware    │
//!                        │                                          Adapter     │
//!                        └───────────────┬──────────────────────────────────────┘
//!                                        │ broadcast / estimate / nonce
//!                                        ▼
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │   NetworkGateway per chain (RPC failover | memory)   │
//!                        └───────────────┬──────────────────────────────────────┘
//!                                        │ blocks, balances
//!                                        ▼
//!              ConfirmationTracker ─▶ process_block ─▶ BalanceRefresher ─▶ BalanceTracker
//!                                                                              │
//!                                                                          StateStore
//! ```
//!
//! Configuration is read from the file named by `ORCHESTRATOR_CONFIG`
//! (defaults apply when unset) and hot reloaded for preferences.

use std::path::PathBuf;
use std::sync::Arc;

use chain_orchestrator::admin::{self, AdminState};
use chain_orchestrator::config::{load_config, watcher::ConfigWatcher, OrchestratorConfig};
use chain_orchestrator::lifecycle::{wait_for_signal, Runtime, Shutdown};
use chain_orchestrator::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("ORCHESTRATOR_CONFIG").ok().map(PathBuf::from);
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => OrchestratorConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        "chain-orchestrator starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let runtime = Runtime::build(config).await?;
    let shutdown = Shutdown::new();
    let mut tasks = runtime.spawn_background(&shutdown);

    // Keep the watcher alive for the life of the process.
    let watcher = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, &runtime.config);
            let preferences = runtime.preferences.clone();
            tasks.push(tokio::spawn(async move {
                preferences.run_updates(updates).await
            }));
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    if runtime.config.admin.enabled {
        let listener = tokio::net::TcpListener::bind(&runtime.config.admin.bind_address).await?;
        let state = AdminState {
            orchestrator: runtime.orchestrator.clone(),
            balances: runtime.balances.clone(),
            api_key: Arc::from(runtime.config.admin.api_key.as_str()),
        };
        let shutdown_rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, shutdown_rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
    }

    tracing::info!(
        networks = ?runtime.gateways.chain_ids(),
        signers = runtime.signer.registry().len(),
        "Orchestrator ready"
    );

    wait_for_signal().await;
    shutdown.trigger();

    // The preference task ends only when the watcher is dropped.
    drop(watcher);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    if let Err(e) = runtime.store.checkpoint() {
        tracing::error!(error = %e, "Final state checkpoint failed");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
