//! JSON-RPC gateway with timeout and failover.
//!
//! # Responsibilities
//! - Connect to the primary and failover JSON-RPC endpoints of one network
//! - Translate chain data into the crate's model (blocks, fee history, balances)
//! - Separate node rejections from transport failures
//! - Provide health check for network connectivity

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest as RpcTransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::NetworkConfig;
use crate::gateway::{GatewayError, GatewayResult, NetworkGateway};
use crate::networks::{
    AssetId, BalanceAt, Block, BlockTag, ChainId, DataSource, FeeHistoryEntry, SignedTransaction,
    TransactionRequest,
};
use crate::observability::metrics;

sol! {
    function balanceOf(address account) external view returns (uint256);
}

/// Reward percentiles requested from `eth_feeHistory`.
///
/// Each block contributes one sample per decile midpoint so the estimator can
/// take its own percentiles over the window.
const REWARD_PERCENTILES: [f64; 10] = [5.0, 15.0, 25.0, 35.0, 45.0, 55.0, 65.0, 75.0, 85.0, 95.0];

/// Rejection messages meaning the node already holds the transaction
/// (geth, erigon, nethermind, besu, reth).
const ALREADY_KNOWN: [&str; 5] = [
    "already known",
    "alreadyknown",
    "known transaction",
    "already imported",
    "already exists",
];

fn already_known(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    ALREADY_KNOWN.iter().any(|marker| reason.contains(marker))
}

type DynProvider = Arc<dyn Provider + Send + Sync>;

/// Gateway backed by alloy HTTP providers.
#[derive(Clone)]
pub struct RpcGateway {
    chain_id: ChainId,
    /// List of providers (primary + failovers).
    providers: Vec<DynProvider>,
    rpc_url: String,
    timeout_duration: Duration,
}

impl RpcGateway {
    /// Create a gateway for `config`.
    ///
    /// Fails only on an invalid primary URL; an unreachable node is logged and
    /// tolerated.
    pub async fn connect(config: &NetworkConfig) -> GatewayResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            GatewayError::Malformed(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as DynProvider);

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as DynProvider);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let gateway = Self {
            chain_id: ChainId(config.chain_id),
            providers,
            rpc_url: config.rpc_url.clone(),
            timeout_duration,
        };

        match gateway.verify_chain_id().await {
            Ok(()) => tracing::info!(
                rpc_url = %config.rpc_url,
                chain_id = config.chain_id,
                "Network gateway initialized"
            ),
            Err(e) => tracing::warn!(
                chain_id = config.chain_id,
                error = %e,
                "Network gateway initialized but chain verification failed"
            ),
        }

        Ok(gateway)
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> GatewayResult<()> {
        let actual = self
            .with_failover("eth_chainId", |p| async move { p.get_chain_id().await })
            .await?;
        if actual != self.chain_id.0 {
            return Err(GatewayError::Malformed(format!(
                "chain ID mismatch: expected {}, got {}",
                self.chain_id, actual
            )));
        }
        Ok(())
    }

    /// Run `call` against each provider in turn until one answers.
    ///
    /// A JSON-RPC error response is the node's verdict and is returned as
    /// `Rejected` without trying further providers.
    async fn with_failover<T, F, Fut>(&self, method: &'static str, call: F) -> GatewayResult<T>
    where
        F: Fn(DynProvider) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>> + Send,
        T: Send,
    {
        let mut last_error = String::from("no providers");
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, call(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    if let Some(payload) = e.as_error_resp() {
                        tracing::debug!(
                            chain_id = %self.chain_id,
                            method,
                            code = payload.code,
                            message = %payload.message,
                            "RPC request rejected"
                        );
                        return Err(GatewayError::rejected(payload.message.to_string()));
                    }
                    tracing::warn!(provider_idx = i, method, error = %e, "RPC error, trying next provider");
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, method, "RPC timeout, trying next provider");
                    last_error = format!("timeout after {:?}", self.timeout_duration);
                }
            }
        }
        metrics::record_rpc_error(self.chain_id);
        Err(GatewayError::Unreachable(format!(
            "all providers failed for {}: {}",
            method, last_error
        )))
    }

    fn to_rpc_request(request: &TransactionRequest) -> RpcTransactionRequest {
        let mut tx = RpcTransactionRequest::default()
            .with_from(request.from.address)
            .with_value(request.value)
            .with_input(request.input.clone())
            .with_chain_id(request.network().0);
        if let Some(to) = request.to {
            tx = tx.with_to(to);
        }
        if let Some(nonce) = request.nonce {
            tx = tx.with_nonce(nonce);
        }
        tx
    }

    /// Whether any provider returns `hash` from `eth_getTransactionByHash`,
    /// pending or mined.
    async fn node_has_transaction(&self, hash: TxHash) -> bool {
        let params = match serde_json::value::to_raw_value(&(hash,)) {
            Ok(params) => params,
            Err(_) => return false,
        };
        let params = &params;
        match self
            .with_failover("eth_getTransactionByHash", |p| async move {
                p.raw_request_dyn("eth_getTransactionByHash".into(), params)
                    .await
            })
            .await
        {
            Ok(found) => found.get().trim() != "null",
            Err(e) => {
                tracing::debug!(chain_id = %self.chain_id, tx_hash = %hash, error = %e, "Transaction lookup failed");
                false
            }
        }
    }

    async fn latest_height(&self) -> GatewayResult<u64> {
        self.with_failover("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
    }
}

#[async_trait]
impl NetworkGateway for RpcGateway {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn data_source(&self) -> DataSource {
        DataSource::Rpc
    }

    async fn get_block(&self, tag: BlockTag) -> GatewayResult<Block> {
        let number = match tag {
            BlockTag::Latest => BlockNumberOrTag::Latest,
            BlockTag::Number(height) => BlockNumberOrTag::Number(height),
        };
        let block = self
            .with_failover("eth_getBlockByNumber", |p| async move {
                p.get_block_by_number(number).await
            })
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("block {}", number)))?;

        let header = &block.header.inner;
        Ok(Block {
            hash: block.header.hash,
            parent_hash: header.parent_hash,
            height: header.number,
            timestamp: header.timestamp,
            difficulty: header.difficulty,
            base_fee_per_gas: header.base_fee_per_gas.map(u128::from),
            gas_used: header.gas_used,
            gas_limit: header.gas_limit,
            transactions: block.transactions.hashes().collect(),
            chain_id: self.chain_id,
        })
    }

    async fn get_fee_history(&self, last_n: u64) -> GatewayResult<Vec<FeeHistoryEntry>> {
        let history = self
            .with_failover("eth_feeHistory", |p| async move {
                p.get_fee_history(last_n, BlockNumberOrTag::Latest, &REWARD_PERCENTILES)
                    .await
            })
            .await?;

        let rewards = history.reward.unwrap_or_default();
        let mut entries = Vec::with_capacity(history.gas_used_ratio.len());
        for (i, ratio) in history.gas_used_ratio.iter().enumerate() {
            let base_fee = history.base_fee_per_gas.get(i).copied().ok_or_else(|| {
                GatewayError::Malformed("fee history shorter than gas used ratios".into())
            })?;
            // Nodes report zero rewards for empty blocks; those are not observations.
            let priority_fees = if *ratio == 0.0 {
                Vec::new()
            } else {
                rewards.get(i).cloned().unwrap_or_default()
            };
            entries.push(FeeHistoryEntry {
                height: history.oldest_block + i as u64,
                base_fee_per_gas: base_fee,
                gas_used_ratio: *ratio,
                priority_fees,
            });
        }
        Ok(entries)
    }

    async fn get_nonce(&self, address: Address) -> GatewayResult<u64> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address)
                .block_id(BlockId::pending())
                .await
        })
        .await
    }

    async fn get_confirmed_nonce(&self, address: Address) -> GatewayResult<u64> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address)
                .block_id(BlockId::latest())
                .await
        })
        .await
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> GatewayResult<u64> {
        let tx = Self::to_rpc_request(request);
        self.with_failover("eth_estimateGas", |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(tx).await }
        })
        .await
    }

    async fn broadcast(&self, signed: &SignedTransaction) -> GatewayResult<TxHash> {
        let raw = signed.raw().clone();
        let sent = self
            .with_failover("eth_sendRawTransaction", |p| {
                let raw = raw.clone();
                async move {
                    p.send_raw_transaction(&raw)
                        .await
                        .map(|pending| *pending.tx_hash())
                }
            })
            .await;
        // A retry after a lost response finds the first send already pooled or mined.
        let hash = match sent {
            Ok(hash) => hash,
            Err(GatewayError::Rejected { reason }) => {
                if already_known(&reason) || self.node_has_transaction(signed.hash()).await {
                    tracing::info!(
                        chain_id = %self.chain_id,
                        tx_hash = %signed.hash(),
                        reason = %reason,
                        "Node already holds the transaction"
                    );
                    return Ok(signed.hash());
                }
                return Err(GatewayError::Rejected { reason });
            }
            Err(e) => return Err(e),
        };
        if hash != signed.hash() {
            tracing::warn!(
                chain_id = %self.chain_id,
                expected = %signed.hash(),
                reported = %hash,
                "Node reported a different transaction hash"
            );
        }
        Ok(signed.hash())
    }

    async fn get_balance(&self, address: Address, asset: &AssetId) -> GatewayResult<BalanceAt> {
        let height = self.latest_height().await?;
        let block = BlockId::number(height);
        let amount = match asset {
            AssetId::Native => {
                self.with_failover("eth_getBalance", |p| async move {
                    p.get_balance(address).block_id(block).await
                })
                .await?
            }
            AssetId::Erc20(contract) => {
                let tx = RpcTransactionRequest::default()
                    .with_to(*contract)
                    .with_input(balanceOfCall { account: address }.abi_encode());
                let output = self
                    .with_failover("eth_call", |p| {
                        let tx = tx.clone();
                        async move { p.call(tx).block(block).await }
                    })
                    .await?;
                if output.len() < 32 {
                    return Err(GatewayError::Malformed(format!(
                        "balanceOf returned {} bytes",
                        output.len()
                    )));
                }
                U256::from_be_slice(&output[..32])
            }
        };
        Ok(BalanceAt {
            amount,
            block_height: height,
        })
    }

    async fn is_healthy(&self) -> bool {
        self.latest_height().await.is_ok()
    }
}

impl std::fmt::Debug for RpcGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcGateway")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("providers", &self.providers.len())
            .field("timeout", &self.timeout_duration)
            .finish()
    }
}
