//! Last-known balances per (address, network, asset).

use alloy::primitives::U256;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::networks::{AccountBalance, AssetId, BalanceKey, NetworkAddress};
use crate::observability::metrics;
use crate::store::StateStore;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// What happened to an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Became current and the amount changed.
    Changed,
    /// Became current with the same amount.
    Refreshed,
    /// Older than the current value; kept in history only.
    Stale,
}

/// Published when the current amount of a key changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub previous: Option<U256>,
    pub current: AccountBalance,
}

#[derive(Debug, Default)]
struct TrackerState {
    current: HashMap<BalanceKey, AccountBalance>,
    history: HashMap<BalanceKey, VecDeque<AccountBalance>>,
}

impl TrackerState {
    fn remember(&mut self, balance: AccountBalance, limit: usize) {
        let history = self.history.entry(balance.key()).or_default();
        history.push_back(balance);
        while history.len() > limit {
            history.pop_front();
        }
    }
}

/// Balance map with height-ordered last-write-wins semantics.
pub struct BalanceTracker {
    state: Mutex<TrackerState>,
    history_limit: usize,
    changes: broadcast::Sender<BalanceChange>,
    store: Arc<StateStore>,
}

impl BalanceTracker {
    /// Create a tracker seeded from the balances held by `store`.
    pub fn new(store: Arc<StateStore>, history_limit: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let mut state = TrackerState::default();
        for balance in store.balances() {
            state.current.insert(balance.key(), balance);
        }
        Self {
            state: Mutex::new(state),
            history_limit: history_limit.max(1),
            changes,
            store,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply an observation.
    ///
    /// A higher block height supersedes; at equal height the later retrieval
    /// wins. Anything older is recorded in history without touching the
    /// current value.
    pub fn observe(&self, balance: AccountBalance) -> Observation {
        let key = balance.key();
        let (outcome, previous) = {
            let mut state = self.state();
            let previous = state.current.get(&key).cloned();
            let stale = previous.as_ref().is_some_and(|current| {
                balance.block_height < current.block_height
                    || (balance.block_height == current.block_height
                        && balance.retrieved_at < current.retrieved_at)
            });
            if stale {
                state.remember(balance.clone(), self.history_limit);
                (Observation::Stale, previous)
            } else {
                if let Some(old) = previous.clone() {
                    state.remember(old, self.history_limit);
                }
                state.current.insert(key, balance.clone());
                // Persist under the tracker lock so store writes follow height order.
                self.store.put_balance(&balance);
                let changed = previous.as_ref().map(|p| p.amount) != Some(balance.amount);
                if changed {
                    (Observation::Changed, previous)
                } else {
                    (Observation::Refreshed, previous)
                }
            }
        };

        match outcome {
            Observation::Stale => {
                metrics::record_stale_balance();
                tracing::debug!(
                    address = %balance.address,
                    asset = %balance.asset,
                    observed_height = balance.block_height,
                    current_height = previous.as_ref().map(|p| p.block_height).unwrap_or_default(),
                    "Stale balance observation ignored"
                );
            }
            Observation::Changed => {
                metrics::record_balance_update();
                tracing::info!(
                    address = %balance.address,
                    asset = %balance.asset,
                    amount = %balance.amount,
                    block = balance.block_height,
                    "Balance changed"
                );
                self.store.checkpoint_soon();
                let _ = self.changes.send(BalanceChange {
                    previous: previous.map(|p| p.amount),
                    current: balance,
                });
            }
            // Height-only updates ride along with the next checkpoint.
            Observation::Refreshed => {}
        }
        outcome
    }

    pub fn current(&self, address: &NetworkAddress, asset: &AssetId) -> Option<AccountBalance> {
        let key = BalanceKey {
            address: *address,
            asset: *asset,
        };
        self.state().current.get(&key).cloned()
    }

    /// Superseded and stale observations for a key, oldest first.
    pub fn history(&self, address: &NetworkAddress, asset: &AssetId) -> Vec<AccountBalance> {
        let key = BalanceKey {
            address: *address,
            asset: *asset,
        };
        self.state()
            .history
            .get(&key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every current balance, ordered by network then address.
    pub fn all(&self) -> Vec<AccountBalance> {
        let mut all: Vec<_> = self.state().current.values().cloned().collect();
        all.sort_by_key(|b| (b.address.chain_id, b.address.address, b.asset.to_string()));
        all
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalanceChange> {
        self.changes.subscribe()
    }
}
