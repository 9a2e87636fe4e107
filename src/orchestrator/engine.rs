//! Transaction lifecycle driver.
//!
//! # Responsibilities
//! - Accept transaction intents and drive them Draft → Enriched → Signed → Broadcast
//! - Reserve nonces, quote fees and estimate gas during enrichment
//! - Retry transient broadcast failures, report definitive rejections
//! - Resolve Broadcast into Confirmed or Replaced from observed blocks
//! - Replace-by-fee for broadcast transactions
//!
//! # Design Decisions
//! - One spawned task per submission; state is published over a `watch` channel
//! - Terminal states are never overwritten
//! - Nonce reservations are dropped (released) on every failure path and
//!   committed only when the network accepts the transaction

use alloy::primitives::{TxHash, U256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::balances::BalanceRefresher;
use crate::config::OrchestratorConfig;
use crate::fees::FeeEstimator;
use crate::gateway::{GatewayError, GatewaySet, NetworkGateway};
use crate::networks::{
    unix_millis, Block, ChainId, FeeFields, FeeQuote, Network, NetworkAddress, NetworkRegistry,
    SignedTransaction, TransactionRequest,
};
use crate::observability::metrics;
use crate::orchestrator::nonce::{NonceManager, NonceReservation};
use crate::orchestrator::state::{ReasonCode, TxHandle, TxState};
use crate::orchestrator::{OrchestratorError, OrchestratorResult};
use crate::resilience::{retry_transient, RetryPolicy};
use crate::services::PreferenceService;
use crate::signing::SigningCoordinator;

const WEI_PER_GWEI: u128 = 1_000_000_000;

/// One tracked submission.
#[derive(Debug)]
struct TxRecord {
    id: Uuid,
    request: TransactionRequest,
    /// Draft this record replaces by fee, if any.
    replaces: Option<Uuid>,
    created_at: u64,
    state: watch::Sender<TxState>,
    cancel: CancellationToken,
    signed: Mutex<Option<SignedTransaction>>,
}

impl TxRecord {
    fn new(request: TransactionRequest, replaces: Option<Uuid>) -> Self {
        let (state, _) = watch::channel(TxState::Draft);
        Self {
            id: request.draft_id,
            request,
            replaces,
            created_at: unix_millis(),
            state,
            cancel: CancellationToken::new(),
            signed: Mutex::new(None),
        }
    }

    fn handle(&self) -> TxHandle {
        TxHandle::new(self.id, self.state.subscribe(), self.cancel.clone())
    }

    fn state(&self) -> TxState {
        self.state.borrow().clone()
    }

    fn signed_slot(&self) -> MutexGuard<'_, Option<SignedTransaction>> {
        self.signed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn signed(&self) -> Option<SignedTransaction> {
        self.signed_slot().clone()
    }

    /// Move to `next` unless already terminal. Returns whether the state changed.
    fn transition(&self, next: TxState) -> bool {
        let name = next.name();
        let terminal = next.is_terminal();
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = next;
            true
        });
        if changed && terminal {
            metrics::record_terminal(name);
        }
        changed
    }

    fn drop_with(&self, reason: ReasonCode, message: impl Into<String>) {
        let message = message.into();
        if self.transition(TxState::dropped(reason, message.clone())) {
            tracing::warn!(
                draft_id = %self.id,
                from = %self.request.from,
                %reason,
                message = %message,
                "Transaction dropped"
            );
        }
    }
}

/// A tracked transaction as reported by [`ChainOrchestrator::activity`].
#[derive(Debug, Clone, Serialize)]
pub struct TxSummary {
    pub id: Uuid,
    pub chain_id: ChainId,
    pub from: NetworkAddress,
    pub to: Option<alloy::primitives::Address>,
    pub value: U256,
    pub nonce: Option<u64>,
    pub hash: Option<TxHash>,
    pub replaces: Option<Uuid>,
    pub created_at: u64,
    pub state: TxState,
}

fn gateway_reason(error: &GatewayError) -> ReasonCode {
    match error {
        GatewayError::Rejected { .. } => ReasonCode::InvalidRequest,
        _ => ReasonCode::NetworkUnreachable,
    }
}

/// Top-level coordinator of the transaction lifecycle.
pub struct ChainOrchestrator {
    networks: Arc<NetworkRegistry>,
    gateways: GatewaySet,
    signer: Arc<SigningCoordinator>,
    estimator: FeeEstimator,
    nonces: Arc<NonceManager>,
    preferences: Arc<PreferenceService>,
    refresher: Option<Arc<BalanceRefresher>>,
    retry: RetryPolicy,
    fee_cap_wei: u128,
    bump_percent: u32,
    records: DashMap<Uuid, Arc<TxRecord>>,
    by_hash: DashMap<TxHash, Uuid>,
    by_nonce: DashMap<(NetworkAddress, u64), Vec<Uuid>>,
}

impl ChainOrchestrator {
    pub fn new(
        networks: Arc<NetworkRegistry>,
        gateways: GatewaySet,
        signer: Arc<SigningCoordinator>,
        nonces: Arc<NonceManager>,
        preferences: Arc<PreferenceService>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            networks,
            gateways,
            signer,
            estimator: FeeEstimator::new(&config.fees),
            nonces,
            preferences,
            refresher: None,
            retry: RetryPolicy::from(&config.retries),
            fee_cap_wei: (config.fees.max_fee_per_gas_gwei as u128).saturating_mul(WEI_PER_GWEI),
            bump_percent: config.fees.replacement_bump_percent,
            records: DashMap::new(),
            by_hash: DashMap::new(),
            by_nonce: DashMap::new(),
        }
    }

    /// Refresh sender and recipient balances whenever a transaction confirms.
    pub fn with_refresher(mut self, refresher: Arc<BalanceRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn networks(&self) -> &Arc<NetworkRegistry> {
        &self.networks
    }

    pub fn gateways(&self) -> &GatewaySet {
        &self.gateways
    }

    pub fn nonces(&self) -> &Arc<NonceManager> {
        &self.nonces
    }

    pub fn estimator(&self) -> &FeeEstimator {
        &self.estimator
    }

    fn connected(&self, chain_id: ChainId) -> OrchestratorResult<(Arc<Network>, Arc<dyn NetworkGateway>)> {
        let network = self
            .networks
            .get(chain_id)
            .ok_or(OrchestratorError::UnknownNetwork(chain_id))?;
        let gateway = self
            .gateways
            .get(chain_id)
            .ok_or(OrchestratorError::NotConnected(chain_id))?;
        Ok((network, gateway))
    }

    fn record(&self, id: Uuid) -> Option<Arc<TxRecord>> {
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    /// Submit a transaction intent using the preferred fee tier.
    pub fn submit(self: &Arc<Self>, request: TransactionRequest) -> OrchestratorResult<TxHandle> {
        let tier = self.preferences.default_tier();
        self.submit_with_tier(request, &tier)
    }

    /// Submit a transaction intent, quoting fees from `tier` when the request has none.
    ///
    /// Resubmitting a draft that is already tracked returns the existing handle.
    pub fn submit_with_tier(
        self: &Arc<Self>,
        request: TransactionRequest,
        tier: &str,
    ) -> OrchestratorResult<TxHandle> {
        let (network, gateway) = self.connected(request.network())?;
        self.signer.backend(&request.from.address)?;
        if let Some(fees) = &request.fees {
            if fees.fee_model() != network.fee_model {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "{:?} fees on a {:?} network",
                    fees.fee_model(),
                    network.fee_model
                )));
            }
        }

        let record = match self.records.entry(request.draft_id) {
            Entry::Occupied(existing) => {
                tracing::debug!(draft_id = %request.draft_id, "Draft already submitted");
                return Ok(existing.get().handle());
            }
            Entry::Vacant(slot) => slot.insert(Arc::new(TxRecord::new(request, None))).clone(),
        };

        metrics::record_submission(network.chain_id);
        tracing::info!(
            draft_id = %record.id,
            from = %record.request.from,
            tier,
            "Transaction submitted"
        );

        let handle = record.handle();
        let this = self.clone();
        let tier = tier.to_string();
        tokio::spawn(async move { this.drive(record, network, gateway, tier).await });
        Ok(handle)
    }

    async fn drive(
        self: Arc<Self>,
        record: Arc<TxRecord>,
        network: Arc<Network>,
        gateway: Arc<dyn NetworkGateway>,
        tier: String,
    ) {
        let cancel = record.cancel.clone();
        let reserved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                record.drop_with(ReasonCode::Cancelled, "cancelled before nonce assignment");
                return;
            }
            reserved = self.reserve(&record.request, gateway.as_ref()) => reserved,
        };
        let reservation = match reserved {
            Ok(reservation) => reservation,
            Err((reason, message)) => return record.drop_with(reason, message),
        };

        let enriched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err((
                ReasonCode::Cancelled,
                "cancelled during enrichment".to_string(),
            )),
            enriched = self.enrich(&record.request, &reservation, &network, gateway.as_ref(), &tier) => enriched,
        };
        let enriched = match enriched {
            Ok(enriched) => enriched,
            Err((reason, message)) => {
                drop(reservation);
                return record.drop_with(reason, message);
            }
        };

        self.sign_and_broadcast(record, enriched, gateway.as_ref(), Some(reservation))
            .await;
    }

    async fn reserve(
        &self,
        request: &TransactionRequest,
        gateway: &dyn NetworkGateway,
    ) -> Result<NonceReservation, (ReasonCode, String)> {
        if let Some(nonce) = request.nonce {
            return self.nonces.claim(request.from, nonce).await.ok_or_else(|| {
                (
                    ReasonCode::InvalidRequest,
                    format!("nonce {} is held by another submission", nonce),
                )
            });
        }
        let policy = &self.retry;
        let address = request.from.address;
        self.nonces
            .reserve(request.from, move || {
                retry_transient(policy, "get_nonce", move || gateway.get_nonce(address))
            })
            .await
            .map_err(|e| (gateway_reason(&e), e.to_string()))
    }

    /// Fill in nonce, fees and gas limit. Caller-supplied values are kept.
    async fn enrich(
        &self,
        request: &TransactionRequest,
        reservation: &NonceReservation,
        network: &Network,
        gateway: &dyn NetworkGateway,
        tier: &str,
    ) -> Result<TransactionRequest, (ReasonCode, String)> {
        let fees = match request.fees {
            Some(fees) => fees,
            None => self.quote_fees(network, gateway, tier).await?,
        };

        let mut enriched = request
            .clone()
            .with_nonce(reservation.nonce())
            .with_fees(fees);
        let gas_limit = match request.gas_limit {
            Some(gas_limit) => gas_limit,
            None => {
                let candidate = &enriched;
                retry_transient(&self.retry, "estimate_gas", move || {
                    gateway.estimate_gas(candidate)
                })
                .await
                .map_err(|e| (gateway_reason(&e), e.to_string()))?
            }
        };
        enriched.gas_limit = Some(gas_limit);
        Ok(enriched)
    }

    async fn quote_fees(
        &self,
        network: &Network,
        gateway: &dyn NetworkGateway,
        tier: &str,
    ) -> Result<FeeFields, (ReasonCode, String)> {
        let estimator = &self.estimator;
        let quotes = retry_transient(&self.retry, "fee_quote", move || {
            estimator.quote(gateway, network)
        })
        .await
        .map_err(|e| (ReasonCode::NetworkUnreachable, e.to_string()))?;
        let quote = FeeEstimator::select(&quotes, tier).ok_or_else(|| {
            (
                ReasonCode::InvalidRequest,
                "no fee tiers configured".to_string(),
            )
        })?;

        let max_fee = quote.fees.max_fee_per_gas();
        if max_fee > self.fee_cap_wei {
            return Err((
                ReasonCode::FeeCapExceeded,
                OrchestratorError::FeeCapExceeded {
                    fee: max_fee,
                    cap: self.fee_cap_wei,
                }
                .to_string(),
            ));
        }
        tracing::debug!(
            chain_id = %network.chain_id,
            tier = %quote.tier,
            confidence = quote.confidence,
            max_fee_per_gas = max_fee,
            "Fee quoted"
        );
        Ok(quote.fees)
    }

    async fn sign_and_broadcast(
        &self,
        record: Arc<TxRecord>,
        enriched: TransactionRequest,
        gateway: &dyn NetworkGateway,
        reservation: Option<NonceReservation>,
    ) {
        if let (Some(nonce), Some(gas_limit), Some(fees)) =
            (enriched.nonce, enriched.gas_limit, enriched.fees)
        {
            record.transition(TxState::Enriched {
                nonce,
                gas_limit,
                fees,
            });
        }

        if record.cancel.is_cancelled() {
            drop(reservation);
            return record.drop_with(ReasonCode::Cancelled, "cancelled before signing");
        }

        let signed = match self.signer.sign(&enriched, &record.cancel).await {
            Ok(signed) => signed,
            Err(e) => {
                drop(reservation);
                return record.drop_with(ReasonCode::from(&e), e.to_string());
            }
        };
        let hash = signed.hash();
        let nonce = signed.nonce();
        *record.signed_slot() = Some(signed.clone());
        self.by_hash.insert(hash, record.id);
        self.by_nonce
            .entry((signed.from(), nonce))
            .or_default()
            .push(record.id);
        if !record.transition(TxState::Signed { hash, nonce }) {
            // Already resolved from a block: the nonce is spent.
            if let Some(reservation) = reservation {
                reservation.commit();
            }
            return;
        }

        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let tx = &signed;
        let chain_id = signed.network();
        let result = retry_transient(&self.retry, "broadcast", move || {
            if counter.fetch_add(1, Ordering::Relaxed) > 0 {
                metrics::record_broadcast_retry(chain_id);
            }
            gateway.broadcast(tx)
        })
        .await;
        let attempts = attempts.load(Ordering::Relaxed);

        match result {
            Ok(accepted) => {
                if let Some(reservation) = reservation {
                    reservation.commit();
                }
                if accepted != hash {
                    tracing::warn!(expected = %hash, returned = %accepted, "Gateway returned a different hash");
                }
                tracing::info!(
                    draft_id = %record.id,
                    %chain_id,
                    tx_hash = %hash,
                    nonce,
                    attempts,
                    "Transaction broadcast"
                );
                record.transition(TxState::Broadcast {
                    hash,
                    nonce,
                    attempts,
                });
            }
            Err(GatewayError::Rejected { reason }) => {
                drop(reservation);
                tracing::warn!(draft_id = %record.id, tx_hash = %hash, reason = %reason, "Broadcast rejected");
                record.transition(TxState::BroadcastRejected { reason });
            }
            Err(e) => {
                drop(reservation);
                record.drop_with(
                    ReasonCode::NetworkUnreachable,
                    format!("broadcast failed after {} attempts: {}", attempts, e),
                );
            }
        }
    }

    /// Replace a broadcast transaction with the same nonce and higher fees.
    ///
    /// Every fee component must rise by at least the configured bump. Whichever
    /// of the pair is mined first wins; the other ends `Replaced`.
    pub async fn replace(
        self: &Arc<Self>,
        id: Uuid,
        fees: FeeFields,
    ) -> OrchestratorResult<TxHandle> {
        let original = self
            .record(id)
            .ok_or(OrchestratorError::UnknownTransaction(id))?;
        let signed = match (original.state(), original.signed()) {
            (TxState::Broadcast { .. }, Some(signed)) => signed,
            (state, _) => {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "cannot replace a {} transaction",
                    state.name()
                )))
            }
        };
        if !fees.outbids(&signed.fees(), self.bump_percent) {
            return Err(OrchestratorError::ReplacementUnderpriced {
                bump_percent: self.bump_percent,
            });
        }
        let (_, gateway) = self.connected(signed.network())?;

        let request = TransactionRequest {
            draft_id: Uuid::new_v4(),
            nonce: Some(signed.nonce()),
            gas_limit: Some(signed.gas_limit()),
            fees: Some(fees),
            ..signed.request().clone()
        };
        let record = Arc::new(TxRecord::new(request.clone(), Some(id)));
        self.records.insert(record.id, record.clone());
        metrics::record_submission(signed.network());
        tracing::info!(
            draft_id = %record.id,
            replaces = %id,
            nonce = signed.nonce(),
            "Replacement submitted"
        );

        let handle = record.handle();
        let this = self.clone();
        tokio::spawn(async move {
            this.sign_and_broadcast(record, request, gateway.as_ref(), None)
                .await
        });
        Ok(handle)
    }

    /// Cancel a tracked submission. Has no effect once it is signed.
    pub fn cancel(&self, id: Uuid) -> OrchestratorResult<()> {
        let record = self
            .record(id)
            .ok_or(OrchestratorError::UnknownTransaction(id))?;
        record.cancel.cancel();
        Ok(())
    }

    pub fn handle(&self, id: Uuid) -> Option<TxHandle> {
        self.record(id).map(|record| record.handle())
    }

    /// Resolve broadcast transactions included in `block`.
    ///
    /// Included transactions become `Confirmed`; other transactions sharing
    /// their sender and nonce become `Replaced`. Balances of every touched
    /// account are refreshed before returning. Returns the number confirmed.
    pub async fn process_block(&self, block: &Block) -> usize {
        let mut touched = HashSet::new();
        let mut confirmed = 0;
        for hash in &block.transactions {
            let Some(id) = self.by_hash.get(hash).map(|entry| *entry.value()) else {
                continue;
            };
            let Some(record) = self.record(id) else {
                continue;
            };
            let Some(signed) = record.signed() else {
                continue;
            };
            if signed.network() != block.chain_id {
                continue;
            }

            if record.transition(TxState::Confirmed {
                hash: *hash,
                block_height: block.height,
            }) {
                confirmed += 1;
                tracing::info!(
                    draft_id = %id,
                    chain_id = %block.chain_id,
                    tx_hash = %hash,
                    block = block.height,
                    "Transaction confirmed"
                );
                touched.insert(signed.from());
                if let Some(to) = signed.to() {
                    touched.insert(NetworkAddress::new(to, block.chain_id));
                }
            }

            let siblings = self
                .by_nonce
                .get(&(signed.from(), signed.nonce()))
                .map(|entry| entry.value().clone())
                .unwrap_or_default();
            for other in siblings.into_iter().filter(|other| *other != id) {
                if let Some(sibling) = self.record(other) {
                    if sibling.transition(TxState::Replaced { by: Some(*hash) }) {
                        tracing::info!(draft_id = %other, by = %hash, "Transaction replaced");
                    }
                }
            }
        }

        if let Some(refresher) = &self.refresher {
            join_all(touched.iter().map(|address| refresher.refresh_account(*address))).await;
        }
        confirmed
    }

    /// Mark broadcast transactions whose nonce was consumed without being
    /// observed as `Replaced`.
    ///
    /// Skipped when the network has produced blocks past `processed_height`,
    /// so that inclusions are always seen by [`process_block`](Self::process_block) first.
    pub async fn reconcile(&self, chain_id: ChainId, processed_height: u64) -> OrchestratorResult<usize> {
        let (_, gateway) = self.connected(chain_id)?;
        let pending: Vec<(Arc<TxRecord>, SignedTransaction)> = self
            .records
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                if !matches!(record.state(), TxState::Broadcast { .. }) {
                    return None;
                }
                let signed = record.signed()?;
                (signed.network() == chain_id).then(|| (record.clone(), signed))
            })
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut confirmed_nonces = HashMap::new();
        for (_, signed) in &pending {
            let sender = signed.from().address;
            if !confirmed_nonces.contains_key(&sender) {
                let nonce = gateway.get_confirmed_nonce(sender).await?;
                confirmed_nonces.insert(sender, nonce);
            }
        }
        let latest = gateway.get_block(crate::networks::BlockTag::Latest).await?;
        if latest.height > processed_height {
            return Ok(0);
        }

        let mut replaced = 0;
        for (record, signed) in pending {
            let confirmed = confirmed_nonces
                .get(&signed.from().address)
                .copied()
                .unwrap_or_default();
            if confirmed > signed.nonce() && record.transition(TxState::Replaced { by: None }) {
                replaced += 1;
                tracing::warn!(
                    draft_id = %record.id,
                    tx_hash = %signed.hash(),
                    nonce = signed.nonce(),
                    "Nonce consumed by an untracked transaction"
                );
            }
        }
        Ok(replaced)
    }

    /// Fee quotes for every tier on `chain_id`.
    pub async fn fee_quotes(&self, chain_id: ChainId) -> OrchestratorResult<Vec<FeeQuote>> {
        let (network, gateway) = self.connected(chain_id)?;
        Ok(self.estimator.quote(gateway.as_ref(), &network).await?)
    }

    /// All tracked transactions, oldest first.
    pub fn activity(&self) -> Vec<TxSummary> {
        let mut summaries: Vec<_> = self
            .records
            .iter()
            .map(|entry| {
                let record = entry.value();
                let signed = record.signed();
                TxSummary {
                    id: record.id,
                    chain_id: record.request.network(),
                    from: record.request.from,
                    to: record.request.to,
                    value: record.request.value,
                    nonce: signed.as_ref().map(|s| s.nonce()).or(record.request.nonce),
                    hash: signed.as_ref().map(|s| s.hash()),
                    replaces: record.replaces,
                    created_at: record.created_at,
                    state: record.state(),
                }
            })
            .collect();
        summaries.sort_by_key(|s| (s.created_at, s.id));
        summaries
    }
}
