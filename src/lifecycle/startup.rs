//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build subsystems in dependency order: networks, gateways, store,
//!   balances, signers, orchestrator
//! - Import configured keys and attach configured devices
//! - Spawn background tasks (confirmation trackers, balance refresh)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - A gateway that cannot verify its chain still starts; calls fail later

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::balances::{BalanceRefresher, BalanceTracker};
use crate::config::validation::validate_config;
use crate::config::{ConfigError, GatewayKind, OrchestratorConfig, SignerConfig};
use crate::gateway::{GatewayError, GatewaySet, MemoryGateway, NetworkGateway, RpcGateway};
use crate::lifecycle::Shutdown;
use crate::networks::{AssetId, ChainId, NetworkAddress, NetworkRegistry};
use crate::orchestrator::{ChainOrchestrator, ConfirmationTracker, NonceManager};
use crate::services::{PreferenceService, StaticNameService};
use crate::signing::{
    EmulatedDevice, HardwareSignerAdapter, KeyringStore, SignerKind, SignerRegistry,
    SigningCoordinator, SigningError,
};
use crate::store::{StateStore, StoreError};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("state store: {0}")]
    Store(#[from] StoreError),

    #[error("gateway for chain {chain_id}: {source}")]
    Gateway {
        chain_id: ChainId,
        #[source]
        source: GatewayError,
    },

    #[error("signer {env_var}: {source}")]
    Signer {
        env_var: String,
        #[source]
        source: SigningError,
    },
}

/// Every long-lived component, wired together.
pub struct Runtime {
    pub config: OrchestratorConfig,
    pub networks: Arc<NetworkRegistry>,
    pub gateways: GatewaySet,
    pub store: Arc<StateStore>,
    pub balances: Arc<BalanceTracker>,
    pub refresher: Arc<BalanceRefresher>,
    pub signer: Arc<SigningCoordinator>,
    pub nonces: Arc<NonceManager>,
    pub preferences: Arc<PreferenceService>,
    pub names: Arc<StaticNameService>,
    pub orchestrator: Arc<ChainOrchestrator>,
}

impl Runtime {
    /// Build the runtime described by `config`.
    pub async fn build(config: OrchestratorConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let networks = Arc::new(NetworkRegistry::from_config(&config.networks));
        let mut gateways = GatewaySet::new();
        for network in &config.networks {
            let gateway: Arc<dyn NetworkGateway> = match network.gateway {
                GatewayKind::Memory => Arc::new(MemoryGateway::new(network.chain_id)),
                GatewayKind::Rpc => Arc::new(RpcGateway::connect(network).await.map_err(
                    |source| StartupError::Gateway {
                        chain_id: ChainId(network.chain_id),
                        source,
                    },
                )?),
            };
            gateways.insert(gateway);
        }
        tracing::info!(
            known_networks = networks.len(),
            connected = gateways.len(),
            "Networks initialized"
        );

        let store = Arc::new(StateStore::from_path(config.store.path.as_deref())?);
        let balances = Arc::new(BalanceTracker::new(
            store.clone(),
            config.tracker.balance_history_limit,
        ));
        let refresher = Arc::new(BalanceRefresher::new(
            balances.clone(),
            gateways.clone(),
            Duration::from_secs(config.tracker.balance_refresh_secs.max(1)),
        ));
        for account in &config.accounts {
            let address = NetworkAddress::new(account.address, account.chain_id);
            refresher.watch(address, AssetId::Native);
            for token in &account.tokens {
                refresher.watch(address, AssetId::Erc20(*token));
            }
        }

        let signer = Arc::new(SigningCoordinator::new(
            networks.clone(),
            Arc::new(SignerRegistry::new()),
            Arc::new(KeyringStore::new()),
            Arc::new(HardwareSignerAdapter::new()),
        ));
        for entry in &config.signers {
            import_signer(&signer, entry)
                .await
                .map_err(|source| StartupError::Signer {
                    env_var: entry.env_var.clone(),
                    source,
                })?;
        }

        let nonces = Arc::new(NonceManager::new(store.clone()));
        let preferences = Arc::new(PreferenceService::new(config.preferences.clone()));
        let names = Arc::new(StaticNameService::new(&config.names));
        let orchestrator = Arc::new(
            ChainOrchestrator::new(
                networks.clone(),
                gateways.clone(),
                signer.clone(),
                nonces.clone(),
                preferences.clone(),
                &config,
            )
            .with_refresher(refresher.clone()),
        );

        Ok(Self {
            config,
            networks,
            gateways,
            store,
            balances,
            refresher,
            signer,
            nonces,
            preferences,
            names,
            orchestrator,
        })
    }

    /// Spawn one confirmation tracker per connected network plus the balance refresher.
    pub fn spawn_background(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        for (_, gateway) in self.gateways.iter() {
            let tracker = ConfirmationTracker::new(
                self.orchestrator.clone(),
                gateway.clone(),
                &self.config.tracker,
            );
            tasks.push(tokio::spawn(tracker.run(shutdown.subscribe())));
        }
        tasks.push(tokio::spawn(
            self.refresher.clone().run(shutdown.subscribe()),
        ));
        tasks
    }
}

async fn import_signer(signer: &SigningCoordinator, entry: &SignerConfig) -> Result<(), SigningError> {
    match entry.backend {
        SignerKind::Software => {
            let address = signer.import_key_env(&entry.env_var)?;
            tracing::info!(%address, backend = %entry.backend, "Signer imported");
        }
        SignerKind::Hardware => {
            let key = std::env::var(&entry.env_var).map_err(|_| {
                SigningError::SignerUnavailable(format!("{} is not set", entry.env_var))
            })?;
            let label = entry.label.clone().unwrap_or_else(|| entry.env_var.clone());
            let device = EmulatedDevice::with_key(label.clone(), &key)?;
            for address in signer.attach_device(Arc::new(device)).await? {
                tracing::info!(%address, device = %label, backend = %entry.backend, "Signer imported");
            }
        }
    }
    Ok(())
}
