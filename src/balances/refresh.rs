//! Periodic and on-demand balance refresh.
//!
//! # Responsibilities
//! - Keep a set of watched (address, asset) pairs
//! - Read balances through the owning network's gateway
//! - Feed observations into the [`BalanceTracker`]

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::balances::tracker::{BalanceTracker, Observation};
use crate::gateway::{GatewayError, GatewayResult, GatewaySet};
use crate::networks::{unix_millis, AccountBalance, AssetId, BalanceKey, NetworkAddress};

pub struct BalanceRefresher {
    tracker: Arc<BalanceTracker>,
    gateways: GatewaySet,
    watched: Mutex<HashSet<BalanceKey>>,
    period: Duration,
}

impl BalanceRefresher {
    pub fn new(tracker: Arc<BalanceTracker>, gateways: GatewaySet, period: Duration) -> Self {
        Self {
            tracker,
            gateways,
            watched: Mutex::new(HashSet::new()),
            period,
        }
    }

    fn watched_set(&self) -> MutexGuard<'_, HashSet<BalanceKey>> {
        self.watched.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refresh `asset` of `address` on every periodic pass.
    pub fn watch(&self, address: NetworkAddress, asset: AssetId) {
        self.watched_set().insert(BalanceKey { address, asset });
    }

    pub fn watched(&self) -> Vec<BalanceKey> {
        self.watched_set().iter().copied().collect()
    }

    /// Read one balance and hand it to the tracker.
    pub async fn refresh(&self, address: NetworkAddress, asset: AssetId) -> GatewayResult<Observation> {
        let gateway = self.gateways.get(address.chain_id).ok_or_else(|| {
            GatewayError::NotFound(format!("no gateway for chain {}", address.chain_id))
        })?;
        let reading = gateway.get_balance(address.address, &asset).await?;
        Ok(self.tracker.observe(AccountBalance {
            address,
            asset,
            amount: reading.amount,
            block_height: reading.block_height,
            retrieved_at: unix_millis(),
            data_source: gateway.data_source(),
        }))
    }

    /// Refresh the native balance of `address` plus any watched tokens it holds.
    pub async fn refresh_account(&self, address: NetworkAddress) {
        let mut assets = vec![AssetId::Native];
        assets.extend(
            self.watched()
                .into_iter()
                .filter(|key| key.address == address && key.asset != AssetId::Native)
                .map(|key| key.asset),
        );
        let results = join_all(assets.iter().map(|asset| self.refresh(address, *asset))).await;
        for (asset, result) in assets.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(%address, %asset, error = %e, "Balance refresh failed");
            }
        }
    }

    /// Refresh every watched pair concurrently.
    pub async fn refresh_all(&self) -> usize {
        let keys = self.watched();
        let results = join_all(keys.iter().map(|key| self.refresh(key.address, key.asset))).await;
        let mut failures = 0;
        for (key, result) in keys.iter().zip(results) {
            if let Err(e) = result {
                failures += 1;
                tracing::warn!(address = %key.address, asset = %key.asset, error = %e, "Balance refresh failed");
            }
        }
        failures
    }

    /// Refresh watched balances every period until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            period_secs = self.period.as_secs(),
            watched = self.watched().len(),
            "Balance refresher started"
        );
        let mut ticker = interval(self.period);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Balance refresher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh_all().await;
                }
            }
        }
    }
}
