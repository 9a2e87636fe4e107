//! Shared harness for integration tests: one in-memory network, one software
//! key and one emulated hardware device.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chain_orchestrator::balances::{BalanceRefresher, BalanceTracker};
use chain_orchestrator::config::{GatewayKind, NetworkConfig, OrchestratorConfig, StoreConfig};
use chain_orchestrator::gateway::{GatewaySet, MemoryGateway};
use chain_orchestrator::networks::{AssetId, NetworkAddress, NetworkRegistry, TransactionRequest};
use chain_orchestrator::orchestrator::{ChainOrchestrator, NonceManager, TxHandle, TxState};
use chain_orchestrator::services::PreferenceService;
use chain_orchestrator::signing::{
    EmulatedDevice, HardwareSignerAdapter, KeyringStore, SignerRegistry, SigningCoordinator,
};
use chain_orchestrator::store::StateStore;

pub const DEV_CHAIN: u64 = 31337;

/// Well-known development key #0 (0xf39F...2266).
pub const SOFTWARE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Well-known development key #1 (0x7099...79C8).
pub const HARDWARE_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub const ONE_ETH: u128 = 1_000_000_000_000_000_000;

/// Config for a single memory network with near-instant retries.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig {
        store: StoreConfig { path: None },
        networks: vec![NetworkConfig {
            chain_id: DEV_CHAIN,
            gateway: GatewayKind::Memory,
            ..NetworkConfig::default()
        }],
        ..OrchestratorConfig::default()
    };
    config.preferences.default_chain_id = DEV_CHAIN;
    config.retries.base_delay_ms = 1;
    config.retries.max_delay_ms = 4;
    config.tracker.poll_interval_ms = 10;
    config
}

pub struct Harness {
    pub config: OrchestratorConfig,
    pub gateway: Arc<MemoryGateway>,
    pub device: Arc<EmulatedDevice>,
    pub signer: Arc<SigningCoordinator>,
    pub store: Arc<StateStore>,
    pub balances: Arc<BalanceTracker>,
    pub orchestrator: Arc<ChainOrchestrator>,
    pub software: NetworkAddress,
    pub hardware: NetworkAddress,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: OrchestratorConfig) -> Self {
        let networks = Arc::new(NetworkRegistry::from_config(&config.networks));
        let gateway = Arc::new(MemoryGateway::new(DEV_CHAIN));
        let mut gateways = GatewaySet::new();
        gateways.insert(gateway.clone());

        let store = Arc::new(StateStore::in_memory());
        let balances = Arc::new(BalanceTracker::new(store.clone(), 16));
        let refresher = Arc::new(BalanceRefresher::new(
            balances.clone(),
            gateways.clone(),
            Duration::from_secs(60),
        ));

        let signer = Arc::new(SigningCoordinator::new(
            networks.clone(),
            Arc::new(SignerRegistry::new()),
            Arc::new(KeyringStore::new()),
            Arc::new(HardwareSignerAdapter::new()),
        ));
        let software = signer.import_key(SOFTWARE_KEY).unwrap();
        let device = Arc::new(EmulatedDevice::with_key("test-device", HARDWARE_KEY).unwrap());
        let hardware = signer.attach_device(device.clone()).await.unwrap()[0];

        let orchestrator = Arc::new(
            ChainOrchestrator::new(
                networks,
                gateways,
                signer.clone(),
                Arc::new(NonceManager::new(store.clone())),
                Arc::new(PreferenceService::new(config.preferences.clone())),
                &config,
            )
            .with_refresher(refresher),
        );

        gateway.set_balance(software, AssetId::Native, U256::from(10 * ONE_ETH));
        gateway.set_balance(hardware, AssetId::Native, U256::from(10 * ONE_ETH));

        Self {
            config,
            gateway,
            device,
            signer,
            store,
            balances,
            orchestrator,
            software: NetworkAddress::new(software, DEV_CHAIN),
            hardware: NetworkAddress::new(hardware, DEV_CHAIN),
        }
    }

    /// A 1 ETH transfer to a fixed recipient.
    pub fn transfer(&self, from: NetworkAddress) -> TransactionRequest {
        TransactionRequest::new(from)
            .with_to(recipient())
            .with_value(U256::from(ONE_ETH))
    }

    pub fn recipient(&self) -> NetworkAddress {
        NetworkAddress::new(recipient(), DEV_CHAIN)
    }
}

pub fn recipient() -> Address {
    Address::repeat_byte(0xbb)
}

/// Wait until the transaction is broadcast or finished.
pub async fn settled(handle: &TxHandle) -> TxState {
    tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| matches!(s, TxState::Broadcast { .. }) || s.is_terminal()),
    )
    .await
    .expect("transaction did not settle")
}

/// Wait for a terminal state.
pub async fn terminal(handle: &TxHandle) -> TxState {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_terminal())
        .await
        .expect("transaction did not finish")
}

/// Poll `check` until it holds.
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}
