//! In-process development chain.
//!
//! Keeps blocks, a mempool, nonces and balances in memory. Blocks are only
//! produced when [`MemoryGateway::mine_block`] or
//! [`MemoryGateway::push_fee_block`] is called, so tests control exactly what
//! the orchestrator observes. Failures can be scripted per call.

use alloy::primitives::{keccak256, Address, TxHash, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::gateway::{GatewayError, GatewayResult, NetworkGateway};
use crate::networks::{
    AssetId, BalanceAt, Block, BlockTag, ChainId, DataSource, FeeHistoryEntry, SignedTransaction,
    TransactionRequest,
};

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME_SECS: u64 = 12;
const DEFAULT_GAS_LIMIT: u64 = 30_000_000;
const DEFAULT_BASE_FEE: u128 = 1_000_000_000;
const REPLACEMENT_BUMP_PERCENT: u32 = 10;

#[derive(Debug)]
struct ChainState {
    blocks: Vec<Block>,
    priority_fees: Vec<Vec<u128>>,
    next_base_fee: u128,
    pending: Vec<SignedTransaction>,
    confirmed_nonces: HashMap<Address, u64>,
    balances: HashMap<(Address, AssetId), U256>,
    broadcast_script: VecDeque<GatewayError>,
    unreachable: bool,
    gas_estimate: u64,
    broadcasts: usize,
}

impl ChainState {
    fn latest(&self) -> &Block {
        // Genesis is created in `MemoryGateway::new` and blocks are never removed.
        &self.blocks[self.blocks.len() - 1]
    }

    fn check_reachable(&self) -> GatewayResult<()> {
        if self.unreachable {
            Err(GatewayError::Unreachable("memory gateway offline".into()))
        } else {
            Ok(())
        }
    }

    fn confirmed_nonce(&self, address: &Address) -> u64 {
        self.confirmed_nonces.get(address).copied().unwrap_or(0)
    }

    fn pending_nonce(&self, address: &Address) -> u64 {
        let mut next = self.confirmed_nonce(address);
        let mut nonces: Vec<u64> = self
            .pending
            .iter()
            .filter(|tx| tx.from().address == *address)
            .map(|tx| tx.nonce())
            .collect();
        nonces.sort_unstable();
        for nonce in nonces {
            if nonce == next {
                next += 1;
            }
        }
        next
    }

    fn append_block(&mut self, transactions: Vec<TxHash>, gas_used: u64, priority_fees: Vec<u128>) -> Block {
        let parent = self.latest().clone();
        let height = parent.height + 1;
        let mut preimage = Vec::with_capacity(48);
        preimage.extend_from_slice(&parent.chain_id.0.to_be_bytes());
        preimage.extend_from_slice(&height.to_be_bytes());
        preimage.extend_from_slice(parent.hash.as_slice());
        let block = Block {
            hash: keccak256(&preimage),
            parent_hash: parent.hash,
            height,
            timestamp: parent.timestamp + BLOCK_TIME_SECS,
            difficulty: U256::ZERO,
            base_fee_per_gas: Some(self.next_base_fee),
            gas_used,
            gas_limit: DEFAULT_GAS_LIMIT,
            transactions,
            chain_id: parent.chain_id,
        };
        self.blocks.push(block.clone());
        self.priority_fees.push(priority_fees);
        block
    }

    fn credit(&mut self, address: Address, asset: AssetId, amount: U256) {
        let entry = self.balances.entry((address, asset)).or_insert(U256::ZERO);
        *entry = entry.saturating_add(amount);
    }

    fn debit(&mut self, address: Address, asset: AssetId, amount: U256) {
        let entry = self.balances.entry((address, asset)).or_insert(U256::ZERO);
        *entry = entry.saturating_sub(amount);
    }
}

/// A [`NetworkGateway`] backed by an in-memory chain.
#[derive(Debug)]
pub struct MemoryGateway {
    chain_id: ChainId,
    state: Mutex<ChainState>,
    /// While true, `estimate_gas` waits instead of answering.
    estimates_held: watch::Sender<bool>,
}

impl MemoryGateway {
    /// New chain holding only a genesis block at height 0.
    pub fn new(chain_id: impl Into<ChainId>) -> Self {
        let chain_id = chain_id.into();
        let genesis = Block {
            hash: keccak256(chain_id.0.to_be_bytes()),
            parent_hash: B256::ZERO,
            height: 0,
            timestamp: GENESIS_TIMESTAMP,
            difficulty: U256::ZERO,
            base_fee_per_gas: Some(DEFAULT_BASE_FEE),
            gas_used: 0,
            gas_limit: DEFAULT_GAS_LIMIT,
            transactions: Vec::new(),
            chain_id,
        };
        Self {
            chain_id,
            state: Mutex::new(ChainState {
                blocks: vec![genesis],
                priority_fees: vec![Vec::new()],
                next_base_fee: DEFAULT_BASE_FEE,
                pending: Vec::new(),
                confirmed_nonces: HashMap::new(),
                balances: HashMap::new(),
                broadcast_script: VecDeque::new(),
                unreachable: false,
                gas_estimate: 21_000,
                broadcasts: 0,
            }),
            estimates_held: watch::Sender::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Base fee of blocks produced from now on.
    pub fn set_base_fee(&self, base_fee: u128) {
        self.state().next_base_fee = base_fee;
    }

    /// Set the mined nonce of `address`.
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state().confirmed_nonces.insert(address, nonce);
    }

    pub fn set_balance(&self, address: Address, asset: AssetId, amount: U256) {
        self.state().balances.insert((address, asset), amount);
    }

    /// Gas returned by `estimate_gas` for a call without input.
    pub fn set_gas_estimate(&self, gas: u64) {
        self.state().gas_estimate = gas;
    }

    /// Stall `estimate_gas` calls until released with `false`.
    pub fn hold_gas_estimates(&self, hold: bool) {
        self.estimates_held.send_replace(hold);
    }

    /// Make every call fail with `Unreachable` until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Fail the next broadcast with `error`.
    pub fn push_broadcast_error(&self, error: GatewayError) {
        self.state().broadcast_script.push_back(error);
    }

    /// Number of broadcast calls received, successful or not.
    pub fn broadcast_count(&self) -> usize {
        self.state().broadcasts
    }

    pub fn pending_hashes(&self) -> Vec<TxHash> {
        self.state().pending.iter().map(|tx| tx.hash()).collect()
    }

    pub fn latest_height(&self) -> u64 {
        self.state().latest().height
    }

    /// Append a block carrying only third-party fee data.
    pub fn push_fee_block(&self, priority_fees: Vec<u128>, gas_used: u64) -> Block {
        self.state().append_block(Vec::new(), gas_used, priority_fees)
    }

    /// Mine the mempool into a new block.
    ///
    /// For each sender, pending transactions are included in nonce order
    /// starting at the mined nonce. Other transactions with an included
    /// (sender, nonce) pair leave the pool.
    pub fn mine_block(&self) -> Block {
        let mut state = self.state();
        let mut pending = std::mem::take(&mut state.pending);
        pending.sort_by_key(|tx| (tx.from().address, tx.nonce()));

        let base_fee = state.next_base_fee;
        let mut included = Vec::new();
        let mut remaining = Vec::new();
        let mut gas_used = 0u64;
        let mut priority_fees = Vec::new();
        for tx in pending {
            let sender = tx.from().address;
            let expected = state.confirmed_nonce(&sender);
            if tx.nonce() == expected {
                let fees = tx.fees();
                let tip = fees
                    .priority_fee_per_gas()
                    .min(fees.max_fee_per_gas().saturating_sub(base_fee));
                state.confirmed_nonces.insert(sender, expected + 1);
                state.debit(sender, AssetId::Native, tx.value());
                if let Some(to) = tx.to() {
                    state.credit(to, AssetId::Native, tx.value());
                }
                gas_used = gas_used.saturating_add(tx.gas_limit());
                priority_fees.push(tip);
                included.push(tx.hash());
            } else if tx.nonce() > expected {
                remaining.push(tx);
            }
        }
        state.pending = remaining;
        state.append_block(included, gas_used, priority_fees)
    }
}

#[async_trait]
impl NetworkGateway for MemoryGateway {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn data_source(&self) -> DataSource {
        DataSource::Memory
    }

    async fn get_block(&self, tag: BlockTag) -> GatewayResult<Block> {
        let state = self.state();
        state.check_reachable()?;
        match tag {
            BlockTag::Latest => Ok(state.latest().clone()),
            BlockTag::Number(height) => state
                .blocks
                .get(height as usize)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(format!("block {}", height))),
        }
    }

    async fn get_fee_history(&self, last_n: u64) -> GatewayResult<Vec<FeeHistoryEntry>> {
        let state = self.state();
        state.check_reachable()?;
        let len = state.blocks.len();
        let start = len.saturating_sub(last_n as usize);
        Ok(state.blocks[start..]
            .iter()
            .zip(&state.priority_fees[start..])
            .map(|(block, fees)| FeeHistoryEntry {
                height: block.height,
                base_fee_per_gas: block.base_fee_per_gas.unwrap_or_default(),
                gas_used_ratio: if block.gas_limit == 0 {
                    0.0
                } else {
                    block.gas_used as f64 / block.gas_limit as f64
                },
                priority_fees: fees.clone(),
            })
            .collect())
    }

    async fn get_nonce(&self, address: Address) -> GatewayResult<u64> {
        let state = self.state();
        state.check_reachable()?;
        Ok(state.pending_nonce(&address))
    }

    async fn get_confirmed_nonce(&self, address: Address) -> GatewayResult<u64> {
        let state = self.state();
        state.check_reachable()?;
        Ok(state.confirmed_nonce(&address))
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> GatewayResult<u64> {
        let mut held = self.estimates_held.subscribe();
        let _ = held.wait_for(|held| !*held).await;
        let state = self.state();
        state.check_reachable()?;
        Ok(state.gas_estimate + 16 * request.input.len() as u64)
    }

    async fn broadcast(&self, signed: &SignedTransaction) -> GatewayResult<TxHash> {
        let mut state = self.state();
        state.broadcasts += 1;
        state.check_reachable()?;
        if let Some(err) = state.broadcast_script.pop_front() {
            return Err(err);
        }
        if signed.network() != self.chain_id {
            return Err(GatewayError::rejected("invalid chain id"));
        }
        let sender = signed.from().address;
        if signed.nonce() < state.confirmed_nonce(&sender) {
            return Err(GatewayError::rejected("nonce too low"));
        }
        if state.pending.iter().any(|tx| tx.hash() == signed.hash()) {
            return Ok(signed.hash());
        }
        if let Some(idx) = state
            .pending
            .iter()
            .position(|tx| tx.from().address == sender && tx.nonce() == signed.nonce())
        {
            if !signed
                .fees()
                .outbids(&state.pending[idx].fees(), REPLACEMENT_BUMP_PERCENT)
            {
                return Err(GatewayError::rejected("replacement transaction underpriced"));
            }
            state.pending.remove(idx);
        }
        state.pending.push(signed.clone());
        tracing::debug!(chain_id = %self.chain_id, tx_hash = %signed.hash(), "Accepted into memory pool");
        Ok(signed.hash())
    }

    async fn get_balance(&self, address: Address, asset: &AssetId) -> GatewayResult<BalanceAt> {
        let state = self.state();
        state.check_reachable()?;
        Ok(BalanceAt {
            amount: state
                .balances
                .get(&(address, *asset))
                .copied()
                .unwrap_or(U256::ZERO),
            block_height: state.latest().height,
        })
    }
}
