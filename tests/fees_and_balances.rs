mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chain_orchestrator::balances::{BalanceRefresher, BalanceTracker, Observation};
use chain_orchestrator::config::FeeConfig;
use chain_orchestrator::fees::FeeEstimator;
use chain_orchestrator::gateway::{GatewaySet, MemoryGateway, NetworkGateway};
use chain_orchestrator::networks::{
    registry, AccountBalance, AssetId, DataSource, FeeModel, NetworkAddress,
};
use chain_orchestrator::store::StateStore;
use common::DEV_CHAIN;

const GWEI: u128 = 1_000_000_000;

fn dev_network(fee_model: FeeModel) -> chain_orchestrator::networks::Network {
    let mut network = registry::sepolia();
    network.chain_id = DEV_CHAIN.into();
    network.fee_model = fee_model;
    network.fee_floor_wei = GWEI / 10;
    network
}

#[tokio::test]
async fn tiers_are_monotonic_over_real_history() {
    let gateway = MemoryGateway::new(DEV_CHAIN);
    for i in 1..=20u128 {
        gateway.push_fee_block(vec![i * GWEI / 4, i * GWEI, 3 * i * GWEI], 20_000_000);
    }
    let estimator = FeeEstimator::new(&FeeConfig::default());

    for fee_model in [FeeModel::Eip1559, FeeModel::Legacy] {
        let quotes = estimator
            .quote(&gateway, &dev_network(fee_model))
            .await
            .unwrap();
        let names: Vec<_> = quotes.iter().map(|q| q.tier.as_str()).collect();
        assert_eq!(names, ["low", "medium", "high"]);
        for pair in quotes.windows(2) {
            assert!(pair[0].fees.priority_fee_per_gas() <= pair[1].fees.priority_fee_per_gas());
            assert!(pair[0].fees.max_fee_per_gas() <= pair[1].fees.max_fee_per_gas());
            assert!(pair[0].confidence <= pair[1].confidence);
        }
        assert!(quotes.iter().all(|q| q.fees.fee_model() == fee_model));
        assert_eq!(quotes[0].block_height, 20);
    }
}

#[tokio::test]
async fn empty_history_quotes_floor_at_lowest_confidence() {
    let gateway = MemoryGateway::new(DEV_CHAIN);
    let network = dev_network(FeeModel::Eip1559);
    let estimator = FeeEstimator::new(&FeeConfig::default());

    let quotes = estimator.quote(&gateway, &network).await.unwrap();
    assert_eq!(quotes.len(), 3);
    for quote in &quotes {
        assert_eq!(quote.fees.priority_fee_per_gas(), network.fee_floor_wei);
        assert_eq!(quote.confidence, 70);
    }
}

fn observation(address: NetworkAddress, amount: u64, height: u64) -> AccountBalance {
    AccountBalance {
        address,
        asset: AssetId::Native,
        amount: U256::from(amount),
        block_height: height,
        retrieved_at: 1_000 + height,
        data_source: DataSource::Manual,
    }
}

#[test]
fn older_observation_never_moves_current() {
    let tracker = BalanceTracker::new(Arc::new(StateStore::in_memory()), 8);
    let account = NetworkAddress::new(Address::repeat_byte(3), DEV_CHAIN);

    assert_eq!(tracker.observe(observation(account, 50, 10)), Observation::Changed);
    assert_eq!(tracker.observe(observation(account, 70, 9)), Observation::Stale);

    let current = tracker.current(&account, &AssetId::Native).unwrap();
    assert_eq!(current.block_height, 10);
    assert_eq!(current.amount, U256::from(50));
    assert!(tracker
        .history(&account, &AssetId::Native)
        .iter()
        .any(|b| b.block_height == 9));
}

#[test]
fn balances_survive_restart() {
    let path = std::env::temp_dir().join(format!("orchestrator-{}.json", uuid::Uuid::new_v4()));
    let account = NetworkAddress::new(Address::repeat_byte(4), DEV_CHAIN);
    {
        let store = Arc::new(StateStore::open(&path).unwrap());
        let tracker = BalanceTracker::new(store, 8);
        tracker.observe(observation(account, 123, 42));
    }

    let reopened = Arc::new(StateStore::open(&path).unwrap());
    let tracker = BalanceTracker::new(reopened, 8);
    let current = tracker.current(&account, &AssetId::Native).unwrap();
    assert_eq!(current.amount, U256::from(123));
    assert_eq!(current.block_height, 42);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn refresher_reads_watched_tokens() {
    let gateway = Arc::new(MemoryGateway::new(DEV_CHAIN));
    let token = Address::repeat_byte(0x77);
    let holder = Address::repeat_byte(5);
    gateway.set_balance(holder, AssetId::Native, U256::from(1));
    gateway.set_balance(holder, AssetId::Erc20(token), U256::from(500));
    gateway.push_fee_block(Vec::new(), 0);

    let mut gateways = GatewaySet::new();
    gateways.insert(gateway.clone());
    let tracker = Arc::new(BalanceTracker::new(Arc::new(StateStore::in_memory()), 8));
    let refresher = BalanceRefresher::new(tracker.clone(), gateways, Duration::from_secs(60));
    let account = NetworkAddress::new(holder, DEV_CHAIN);
    refresher.watch(account, AssetId::Native);
    refresher.watch(account, AssetId::Erc20(token));

    assert_eq!(refresher.refresh_all().await, 0);
    let erc20 = tracker.current(&account, &AssetId::Erc20(token)).unwrap();
    assert_eq!(erc20.amount, U256::from(500));
    assert_eq!(erc20.block_height, 1);
    assert_eq!(erc20.data_source, gateway.data_source());

    gateway.set_unreachable(true);
    assert_eq!(refresher.refresh_all().await, 2);
}
