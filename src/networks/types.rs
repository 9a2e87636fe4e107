//! Chain data model shared by every subsystem.

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use alloy::signers::Signature;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a network prices gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeModel {
    /// Type-2 transactions with base fee + priority fee.
    #[default]
    Eip1559,
    /// Single gas price (EIP-155 replay protected).
    Legacy,
}

/// Native asset metadata for a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeAsset {
    pub symbol: String,
    pub decimals: u8,
}

/// A supported chain. One canonical instance per chain ID lives in the
/// [`NetworkRegistry`](crate::networks::NetworkRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub chain_id: ChainId,
    pub name: String,
    pub native_asset: NativeAsset,
    pub fee_model: FeeModel,
    /// Minimum priority fee (or gas price on legacy chains) the network accepts, in wei.
    pub fee_floor_wei: u128,
    /// Bounds the per-block base fee change to `1 / denominator`.
    pub base_fee_max_change_denominator: u64,
    /// `gas_limit / elasticity` is the per-block gas target.
    pub elasticity_multiplier: u64,
    pub is_testnet: bool,
}

/// An account identifier scoped to the network that owns it.
///
/// Two addresses are equal only when both the account and the chain match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub address: Address,
    pub chain_id: ChainId,
}

impl NetworkAddress {
    pub fn new(address: Address, chain_id: impl Into<ChainId>) -> Self {
        Self {
            address,
            chain_id: chain_id.into(),
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.chain_id)
    }
}

/// Asset identity within a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "contract", rename_all = "lowercase")]
pub enum AssetId {
    Native,
    Erc20(Address),
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Native => f.write_str("native"),
            AssetId::Erc20(contract) => write!(f, "erc20:{}", contract),
        }
    }
}

/// Fee fields of a transaction, either caller supplied or quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeFields {
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    Legacy {
        gas_price: u128,
    },
}

impl FeeFields {
    /// Upper bound paid per unit of gas.
    pub fn max_fee_per_gas(&self) -> u128 {
        match self {
            FeeFields::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
            FeeFields::Legacy { gas_price } => *gas_price,
        }
    }

    /// Tip offered to the block producer.
    pub fn priority_fee_per_gas(&self) -> u128 {
        match self {
            FeeFields::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => *max_priority_fee_per_gas,
            FeeFields::Legacy { gas_price } => *gas_price,
        }
    }

    pub fn fee_model(&self) -> FeeModel {
        match self {
            FeeFields::Eip1559 { .. } => FeeModel::Eip1559,
            FeeFields::Legacy { .. } => FeeModel::Legacy,
        }
    }

    /// True if every component of `self` is strictly above `other` and at
    /// least `bump_percent` higher. Used for replace-by-fee.
    pub fn outbids(&self, other: &FeeFields, bump_percent: u32) -> bool {
        let clears = |new: u128, old: u128| {
            let required = old.saturating_mul(100 + bump_percent as u128) / 100;
            new > old && new >= required
        };
        match (self, other) {
            (
                FeeFields::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
                FeeFields::Eip1559 {
                    max_fee_per_gas: old_max,
                    max_priority_fee_per_gas: old_tip,
                },
            ) => clears(*max_fee_per_gas, *old_max) && clears(*max_priority_fee_per_gas, *old_tip),
            (FeeFields::Legacy { gas_price }, FeeFields::Legacy { gas_price: old }) => {
                clears(*gas_price, *old)
            }
            _ => false,
        }
    }
}

/// An abstract transaction intent. Mutable until it is handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Identifies the logical transaction; resubmitting the same draft is idempotent.
    pub draft_id: Uuid,
    pub from: NetworkAddress,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub fees: Option<FeeFields>,
}

impl TransactionRequest {
    pub fn new(from: NetworkAddress) -> Self {
        Self {
            draft_id: Uuid::new_v4(),
            from,
            to: None,
            value: U256::ZERO,
            input: Bytes::new(),
            nonce: None,
            gas_limit: None,
            fees: None,
        }
    }

    pub fn with_to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_fees(mut self, fees: FeeFields) -> Self {
        self.fees = Some(fees);
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn network(&self) -> ChainId {
        self.from.chain_id
    }

    /// Nonce, gas limit and fees are all present.
    pub fn is_enriched(&self) -> bool {
        self.nonce.is_some() && self.gas_limit.is_some() && self.fees.is_some()
    }
}

/// A signed, broadcastable transaction. Immutable; identity is its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    request: TransactionRequest,
    nonce: u64,
    gas_limit: u64,
    fees: FeeFields,
    signature: Signature,
    hash: TxHash,
    raw: Bytes,
}

impl SignedTransaction {
    pub(crate) fn new(
        request: TransactionRequest,
        nonce: u64,
        gas_limit: u64,
        fees: FeeFields,
        signature: Signature,
        hash: TxHash,
        raw: Bytes,
    ) -> Self {
        Self {
            request,
            nonce,
            gas_limit,
            fees,
            signature,
            hash,
            raw,
        }
    }

    pub fn request(&self) -> &TransactionRequest {
        &self.request
    }

    pub fn from(&self) -> NetworkAddress {
        self.request.from
    }

    pub fn to(&self) -> Option<Address> {
        self.request.to
    }

    pub fn value(&self) -> U256 {
        self.request.value
    }

    pub fn network(&self) -> ChainId {
        self.request.network()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn fees(&self) -> FeeFields {
        self.fees
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn hash(&self) -> TxHash {
        self.hash
    }

    /// EIP-2718 encoded bytes, ready for `eth_sendRawTransaction`.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }
}

/// Which block to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

/// A block as observed through a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: B256,
    pub parent_hash: B256,
    pub height: u64,
    pub timestamp: u64,
    pub difficulty: U256,
    pub base_fee_per_gas: Option<u128>,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub transactions: Vec<TxHash>,
    pub chain_id: ChainId,
}

impl Block {
    pub fn includes(&self, hash: &TxHash) -> bool {
        self.transactions.contains(hash)
    }
}

/// One block's worth of fee data.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeHistoryEntry {
    pub height: u64,
    pub base_fee_per_gas: u128,
    pub gas_used_ratio: f64,
    /// Priority fees paid by transactions in the block (empty for empty blocks).
    pub priority_fees: Vec<u128>,
}

/// A confidence-tier fee estimate relative to one observed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub tier: String,
    /// Likelihood of inclusion in the next few blocks, in percent.
    pub confidence: u8,
    pub fees: FeeFields,
    /// Projected base fee for the next block.
    pub base_fee_per_gas: u128,
    pub block_height: u64,
    pub chain_id: ChainId,
}

/// Where a balance observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Rpc,
    Memory,
    Manual,
}

/// A balance read from a gateway together with the height it was read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceAt {
    pub amount: U256,
    pub block_height: u64,
}

/// Key of the balance map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub address: NetworkAddress,
    pub asset: AssetId,
}

/// A balance observation for one (address, network, asset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub address: NetworkAddress,
    pub asset: AssetId,
    pub amount: U256,
    pub block_height: u64,
    /// Milliseconds since the unix epoch.
    pub retrieved_at: u64,
    pub data_source: DataSource,
}

impl AccountBalance {
    pub fn key(&self) -> BalanceKey {
        BalanceKey {
            address: self.address,
            asset: self.asset,
        }
    }
}

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_conversion() {
        let chain_id = ChainId::from(1u64);
        assert_eq!(chain_id.0, 1);
        assert_eq!(u64::from(chain_id), 1);
    }

    #[test]
    fn test_address_equality_is_network_scoped() {
        let raw = Address::repeat_byte(0x11);
        assert_eq!(NetworkAddress::new(raw, 1), NetworkAddress::new(raw, 1));
        assert_ne!(NetworkAddress::new(raw, 1), NetworkAddress::new(raw, 10));
    }

    #[test]
    fn test_outbids_requires_bump() {
        let old = FeeFields::Eip1559 {
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 10,
        };
        let small = FeeFields::Eip1559 {
            max_fee_per_gas: 105,
            max_priority_fee_per_gas: 11,
        };
        let enough = FeeFields::Eip1559 {
            max_fee_per_gas: 110,
            max_priority_fee_per_gas: 11,
        };
        assert!(!small.outbids(&old, 10));
        assert!(enough.outbids(&old, 10));
        assert!(!old.outbids(&old, 0));
        assert!(!FeeFields::Legacy { gas_price: 1_000 }.outbids(&old, 10));
    }

    #[test]
    fn test_request_builder() {
        let from = NetworkAddress::new(Address::repeat_byte(1), 1);
        let request = TransactionRequest::new(from)
            .with_to(Address::repeat_byte(2))
            .with_value(U256::from(5))
            .with_gas_limit(21_000);
        assert_eq!(request.network(), ChainId(1));
        assert!(!request.is_enriched());
        let request = request
            .with_nonce(0)
            .with_fees(FeeFields::Legacy { gas_price: 1 });
        assert!(request.is_enriched());
    }
}
