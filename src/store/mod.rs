//! Persisted orchestrator state.
//!
//! # Responsibilities
//! - Hold the last-known balance map and per-sender last-used nonce
//! - Load the snapshot at startup, checkpoint it on mutation and at shutdown
//!
//! # Design Decisions
//! - A single JSON snapshot file, written to a temp file and renamed
//! - Passed around as `Arc<StateStore>`; no global instance
//! - Without a path the store is memory-only (tests, ephemeral runs)

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::networks::{AccountBalance, BalanceKey, NetworkAddress};

const SNAPSHOT_VERSION: u32 = 1;

/// Errors from reading or writing the snapshot.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {0}")]
    Version(u32),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Highest nonce a sender has had accepted by its network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub address: NetworkAddress,
    pub last_used: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    balances: Vec<AccountBalance>,
    nonces: Vec<NonceRecord>,
}

/// Durable state shared by the balance tracker and the nonce manager.
#[derive(Debug, Default)]
pub struct StateStore {
    path: Option<PathBuf>,
    balances: Mutex<HashMap<BalanceKey, AccountBalance>>,
    nonces: Mutex<HashMap<NetworkAddress, u64>>,
    writer: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl StateStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the snapshot at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            path: Some(path.clone()),
            ..Self::default()
        };
        if !path.exists() {
            tracing::info!(path = ?path, "No state snapshot found, starting empty");
            return Ok(store);
        }

        let reader = BufReader::new(File::open(&path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Version(snapshot.version));
        }
        {
            let mut balances = lock(&store.balances);
            for balance in snapshot.balances {
                balances.insert(balance.key(), balance);
            }
            let mut nonces = lock(&store.nonces);
            for record in snapshot.nonces {
                nonces.insert(record.address, record.last_used);
            }
            tracing::info!(
                path = ?path,
                balances = balances.len(),
                nonces = nonces.len(),
                "Loaded state snapshot"
            );
        }
        Ok(store)
    }

    /// Open `path` when given, otherwise a memory-only store.
    pub fn from_path(path: Option<&str>) -> StoreResult<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record `balance` unless a newer observation of the same key is held.
    ///
    /// Ordering matches the tracker: higher block height wins, then the later
    /// retrieval. Returns whether the stored value changed.
    pub fn put_balance(&self, balance: &AccountBalance) -> bool {
        let mut balances = lock(&self.balances);
        if let Some(held) = balances.get(&balance.key()) {
            let older = balance.block_height < held.block_height
                || (balance.block_height == held.block_height
                    && balance.retrieved_at < held.retrieved_at);
            if older || held == balance {
                return false;
            }
        }
        balances.insert(balance.key(), balance.clone());
        true
    }

    pub fn balances(&self) -> Vec<AccountBalance> {
        lock(&self.balances).values().cloned().collect()
    }

    /// Record `nonce` as used by `address`. Never moves backwards.
    pub fn put_nonce(&self, address: NetworkAddress, nonce: u64) {
        let mut nonces = lock(&self.nonces);
        let entry = nonces.entry(address).or_insert(nonce);
        if nonce > *entry {
            *entry = nonce;
        }
    }

    pub fn last_nonce(&self, address: &NetworkAddress) -> Option<u64> {
        lock(&self.nonces).get(address).copied()
    }

    pub fn nonces(&self) -> Vec<NonceRecord> {
        let mut records: Vec<_> = lock(&self.nonces)
            .iter()
            .map(|(address, last_used)| NonceRecord {
                address: *address,
                last_used: *last_used,
            })
            .collect();
        records.sort_by_key(|r| (r.address.chain_id, r.address.address));
        records
    }

    /// Write the current state to disk. No-op for memory-only stores.
    pub fn checkpoint(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        // Snapshot under the writer lock so a later write never carries older state.
        let _writer = lock(&self.writer);
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            balances: self.balances(),
            nonces: self.nonces(),
        };

        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &snapshot)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        tracing::debug!(
            path = ?path,
            balances = snapshot.balances.len(),
            nonces = snapshot.nonces.len(),
            "State checkpointed"
        );
        Ok(())
    }

    /// Checkpoint, logging instead of returning failures.
    pub fn checkpoint_or_log(&self) {
        if let Err(e) = self.checkpoint() {
            tracing::error!(error = %e, "Failed to checkpoint state");
        }
    }

    /// Checkpoint on the blocking pool when called inside a runtime,
    /// inline otherwise.
    pub fn checkpoint_soon(self: &Arc<Self>) {
        if self.path.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.clone();
                runtime.spawn_blocking(move || store.checkpoint_or_log());
            }
            Err(_) => self.checkpoint_or_log(),
        }
    }
}
