//! Per-sender nonce reservation.
//!
//! # Responsibilities
//! - Serialize nonce assignment per (sender, network), FIFO
//! - Hand out the lowest free nonce that is not behind the chain
//! - Reuse nonces released by failed submissions
//! - Persist the last nonce accepted by the network
//!
//! # Design Decisions
//! - The queue lock covers only assignment (chain nonce read + bookkeeping),
//!   never signing or broadcast
//! - Reservations are RAII: dropping an uncommitted reservation releases it
//! - Bookkeeping sits behind a short std mutex with no I/O inside

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::gateway::GatewayResult;
use crate::networks::NetworkAddress;
use crate::observability::metrics;
use crate::store::StateStore;

#[derive(Debug, Default)]
struct NonceState {
    /// Next never-issued nonce.
    next: u64,
    in_flight: BTreeSet<u64>,
    released: BTreeSet<u64>,
}

#[derive(Debug, Default)]
struct SenderSlot {
    queue: tokio::sync::Mutex<()>,
    state: Mutex<NonceState>,
}

impl SenderSlot {
    fn state(&self) -> MutexGuard<'_, NonceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Nonce bookkeeping for one sender, as exposed to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonceView {
    pub address: NetworkAddress,
    pub next: u64,
    pub in_flight: Vec<u64>,
    pub released: Vec<u64>,
    pub last_used: Option<u64>,
}

/// Assigns nonces so that no two live submissions of a sender share one.
pub struct NonceManager {
    slots: DashMap<NetworkAddress, Arc<SenderSlot>>,
    store: Arc<StateStore>,
    active: Arc<AtomicUsize>,
}

impl NonceManager {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            slots: DashMap::new(),
            store,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn slot(&self, sender: NetworkAddress) -> Arc<SenderSlot> {
        self.slots.entry(sender).or_default().clone()
    }

    /// Reserve the next nonce for `sender`.
    ///
    /// Waits behind earlier reservations of the same sender. `chain_nonce`
    /// reads the pending nonce from the network while the queue is held.
    pub async fn reserve<F, Fut>(
        &self,
        sender: NetworkAddress,
        chain_nonce: F,
    ) -> GatewayResult<NonceReservation>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<u64>>,
    {
        let slot = self.slot(sender);
        let _turn = slot.queue.lock().await;
        let chain = chain_nonce().await?;
        let persisted = self.store.last_nonce(&sender).map(|n| n + 1).unwrap_or(0);

        let nonce = {
            let mut state = slot.state();
            // Released nonces the chain has moved past were used elsewhere.
            state.released.retain(|n| *n >= chain);
            let high = chain.max(state.next).max(persisted);
            let reused = state.released.iter().next().copied().filter(|n| *n < high);
            let nonce = match reused {
                Some(n) => {
                    state.released.remove(&n);
                    n
                }
                None => {
                    state.next = high + 1;
                    high
                }
            };
            state.in_flight.insert(nonce);
            nonce
        };

        tracing::debug!(%sender, nonce, chain_nonce = chain, "Nonce reserved");
        Ok(self.issue(slot.clone(), sender, nonce))
    }

    /// Reserve a caller-chosen nonce, unless a live submission already holds it.
    pub async fn claim(&self, sender: NetworkAddress, nonce: u64) -> Option<NonceReservation> {
        let slot = self.slot(sender);
        let _turn = slot.queue.lock().await;
        {
            let mut state = slot.state();
            if !state.in_flight.insert(nonce) {
                return None;
            }
            state.released.remove(&nonce);
            if nonce >= state.next {
                state.next = nonce + 1;
            }
        }
        Some(self.issue(slot.clone(), sender, nonce))
    }

    fn issue(&self, slot: Arc<SenderSlot>, sender: NetworkAddress, nonce: u64) -> NonceReservation {
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_active_reservations(active);
        NonceReservation {
            slot,
            sender,
            nonce,
            store: self.store.clone(),
            active: self.active.clone(),
            settled: false,
        }
    }

    /// Reservations neither committed nor released.
    pub fn active_reservations(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<NonceView> {
        let mut views: Vec<_> = self
            .slots
            .iter()
            .map(|entry| {
                let state = entry.value().state();
                NonceView {
                    address: *entry.key(),
                    next: state.next,
                    in_flight: state.in_flight.iter().copied().collect(),
                    released: state.released.iter().copied().collect(),
                    last_used: self.store.last_nonce(entry.key()),
                }
            })
            .collect();
        views.sort_by_key(|v| (v.address.chain_id, v.address.address));
        views
    }
}

/// A nonce held by one submission.
///
/// [`commit`](Self::commit) once the network accepts the transaction;
/// dropping it otherwise returns the nonce to the pool.
#[derive(Debug)]
pub struct NonceReservation {
    slot: Arc<SenderSlot>,
    sender: NetworkAddress,
    nonce: u64,
    store: Arc<StateStore>,
    active: Arc<AtomicUsize>,
    settled: bool,
}

impl NonceReservation {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn sender(&self) -> NetworkAddress {
        self.sender
    }

    /// Mark the nonce as used and persist it.
    pub fn commit(mut self) {
        self.slot.state().in_flight.remove(&self.nonce);
        self.store.put_nonce(self.sender, self.nonce);
        self.store.checkpoint_soon();
        self.settle();
        tracing::debug!(sender = %self.sender, nonce = self.nonce, "Nonce committed");
    }

    /// Return the nonce to the pool.
    pub fn release(self) {
        drop(self);
    }

    fn settle(&mut self) {
        self.settled = true;
        let active = self.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::record_active_reservations(active);
    }
}

impl Drop for NonceReservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        {
            let mut state = self.slot.state();
            state.in_flight.remove(&self.nonce);
            state.released.insert(self.nonce);
        }
        self.settle();
        tracing::debug!(sender = %self.sender, nonce = self.nonce, "Nonce released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use std::time::Duration;

    fn manager() -> NonceManager {
        NonceManager::new(Arc::new(StateStore::in_memory()))
    }

    fn sender() -> NetworkAddress {
        NetworkAddress::new(Address::repeat_byte(1), 1)
    }

    #[tokio::test]
    async fn test_sequential_reservations() {
        let nonces = manager();
        let a = nonces.reserve(sender(), || async { Ok(5) }).await.unwrap();
        let b = nonces.reserve(sender(), || async { Ok(5) }).await.unwrap();
        assert_eq!((a.nonce(), b.nonce()), (5, 6));
        assert_eq!(nonces.active_reservations(), 2);
    }

    #[tokio::test]
    async fn test_release_is_reused() {
        let nonces = manager();
        let a = nonces.reserve(sender(), || async { Ok(5) }).await.unwrap();
        a.release();
        let b = nonces.reserve(sender(), || async { Ok(5) }).await.unwrap();
        assert_eq!(b.nonce(), 5);
        assert_eq!(nonces.active_reservations(), 1);
    }

    #[tokio::test]
    async fn test_commit_persists_and_advances() {
        let store = Arc::new(StateStore::in_memory());
        let nonces = NonceManager::new(store.clone());
        let a = nonces.reserve(sender(), || async { Ok(0) }).await.unwrap();
        a.commit();
        assert_eq!(store.last_nonce(&sender()), Some(0));

        // Chain has not seen it yet; still must not hand out 0 again.
        let b = nonces.reserve(sender(), || async { Ok(0) }).await.unwrap();
        assert_eq!(b.nonce(), 1);
        assert_eq!(nonces.snapshot()[0].last_used, Some(0));
    }

    #[tokio::test]
    async fn test_persisted_nonce_survives_restart() {
        let store = Arc::new(StateStore::in_memory());
        store.put_nonce(sender(), 9);
        let nonces = NonceManager::new(store);
        let r = nonces.reserve(sender(), || async { Ok(3) }).await.unwrap();
        assert_eq!(r.nonce(), 10);
    }

    #[tokio::test]
    async fn test_chain_ahead_discards_released() {
        let nonces = manager();
        let a = nonces.reserve(sender(), || async { Ok(2) }).await.unwrap();
        drop(a);
        let b = nonces.reserve(sender(), || async { Ok(4) }).await.unwrap();
        assert_eq!(b.nonce(), 4);
        assert!(nonces.snapshot()[0].released.is_empty());
    }

    #[tokio::test]
    async fn test_senders_are_independent() {
        let nonces = manager();
        let other = NetworkAddress::new(Address::repeat_byte(1), 10);
        let a = nonces.reserve(sender(), || async { Ok(1) }).await.unwrap();
        let b = nonces.reserve(other, || async { Ok(1) }).await.unwrap();
        assert_eq!((a.nonce(), b.nonce()), (1, 1));
    }

    #[tokio::test]
    async fn test_queue_is_fifo_and_concurrent_safe() {
        let nonces = Arc::new(manager());
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let nonces = nonces.clone();
            tasks.push(tokio::spawn(async move {
                nonces
                    .reserve(sender(), || async {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        Ok(0)
                    })
                    .await
                    .unwrap()
            }));
        }
        let mut held = Vec::new();
        for task in tasks {
            held.push(task.await.unwrap());
        }
        let mut issued: Vec<_> = held.iter().map(|r| r.nonce()).collect();
        issued.sort_unstable();
        assert_eq!(issued, (0..10).collect::<Vec<_>>());
        assert_eq!(nonces.active_reservations(), 10);
    }

    #[tokio::test]
    async fn test_claim_rejects_duplicate() {
        let nonces = manager();
        let a = nonces.claim(sender(), 3).await.unwrap();
        assert!(nonces.claim(sender(), 3).await.is_none());
        drop(a);
        assert!(nonces.claim(sender(), 3).await.is_some());
    }
}
