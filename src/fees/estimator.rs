//! Fee schedule derivation from recent fee history.

use crate::config::{FeeConfig, TierConfig};
use crate::gateway::{GatewayResult, NetworkGateway};
use crate::networks::{Block, BlockTag, FeeFields, FeeHistoryEntry, FeeModel, FeeQuote, Network};

/// Derives confidence-tier fee quotes for a network.
#[derive(Debug, Clone)]
pub struct FeeEstimator {
    tiers: Vec<TierConfig>,
    window_blocks: u64,
    headroom_percent: u32,
}

impl FeeEstimator {
    pub fn new(config: &FeeConfig) -> Self {
        Self {
            tiers: config.tiers.clone(),
            window_blocks: config.window_blocks.max(1),
            headroom_percent: config.headroom_percent,
        }
    }

    pub fn window_blocks(&self) -> u64 {
        self.window_blocks
    }

    pub fn tiers(&self) -> &[TierConfig] {
        &self.tiers
    }

    /// One quote per configured tier, lowest confidence first.
    ///
    /// Only the last `window_blocks` entries of `history` are used. Quotes
    /// are non-decreasing in both priority fee and max fee.
    pub fn estimate(
        &self,
        network: &Network,
        block: &Block,
        history: &[FeeHistoryEntry],
    ) -> Vec<FeeQuote> {
        let window = &history[history.len().saturating_sub(self.window_blocks as usize)..];
        let observed = window.len() as u64;
        let mut samples: Vec<u128> = window
            .iter()
            .flat_map(|entry| entry.priority_fees.iter().copied())
            .collect();
        samples.sort_unstable();

        let lowest_confidence = self.tiers.first().map(|t| t.confidence).unwrap_or_default();
        let base_fee = next_base_fee(block, network);
        let missing_share = (self.window_blocks - observed) as f64 / self.window_blocks as f64;

        let mut quotes = Vec::with_capacity(self.tiers.len());
        let mut floor_priority = 0u128;
        let mut floor_max_fee = 0u128;
        for tier in &self.tiers {
            let (priority, confidence) = if samples.is_empty() {
                (network.fee_floor_wei, lowest_confidence)
            } else {
                let widened = 50.0 + (tier.percentile as f64 - 50.0) * (1.0 + missing_share);
                let priority = percentile(&samples, widened.clamp(0.0, 100.0));
                let spread = tier.confidence.saturating_sub(lowest_confidence) as u64;
                let confidence =
                    lowest_confidence + (spread * observed / self.window_blocks) as u8;
                (priority.max(network.fee_floor_wei), confidence)
            };

            let priority = priority.max(floor_priority);
            let fees = match network.fee_model {
                FeeModel::Eip1559 => {
                    let max_fee = (base_fee.saturating_mul(self.headroom_percent as u128) / 100)
                        .saturating_add(priority)
                        .max(floor_max_fee);
                    FeeFields::Eip1559 {
                        max_fee_per_gas: max_fee,
                        max_priority_fee_per_gas: priority,
                    }
                }
                FeeModel::Legacy => FeeFields::Legacy {
                    gas_price: base_fee.saturating_add(priority).max(floor_max_fee),
                },
            };
            floor_priority = priority;
            floor_max_fee = fees.max_fee_per_gas();

            quotes.push(FeeQuote {
                tier: tier.name.clone(),
                confidence,
                fees,
                base_fee_per_gas: base_fee,
                block_height: block.height,
                chain_id: network.chain_id,
            });
        }

        tracing::trace!(
            chain_id = %network.chain_id,
            block = block.height,
            observed_blocks = observed,
            samples = samples.len(),
            base_fee,
            "Fee quotes derived"
        );
        quotes
    }

    /// Fetch the latest block and fee history from `gateway` and estimate.
    pub async fn quote(
        &self,
        gateway: &dyn NetworkGateway,
        network: &Network,
    ) -> GatewayResult<Vec<FeeQuote>> {
        let block = gateway.get_block(BlockTag::Latest).await?;
        let history = gateway.get_fee_history(self.window_blocks).await?;
        Ok(self.estimate(network, &block, &history))
    }

    /// Quote for `tier`, falling back to the middle tier when it is unknown.
    pub fn select(quotes: &[FeeQuote], tier: &str) -> Option<FeeQuote> {
        quotes
            .iter()
            .find(|q| q.tier == tier)
            .or_else(|| quotes.get(quotes.len() / 2))
            .cloned()
    }
}

/// Base fee of the block after `block`, per the EIP-1559 update rule.
///
/// Zero when the block carries no base fee. A zero gas limit means usage is
/// unknown and the maximum increase is assumed.
pub fn next_base_fee(block: &Block, network: &Network) -> u128 {
    let parent = match block.base_fee_per_gas {
        Some(fee) => fee,
        None => return 0,
    };
    let denominator = network.base_fee_max_change_denominator.max(1) as u128;
    let target = block.gas_limit / network.elasticity_multiplier.max(1);
    if target == 0 {
        return parent + (parent / denominator).max(1);
    }

    let used = block.gas_used as u128;
    let target = target as u128;
    if used == target {
        parent
    } else if used > target {
        let delta = parent * (used - target) / target / denominator;
        parent + delta.max(1)
    } else {
        let delta = parent * (target - used) / target / denominator;
        parent.saturating_sub(delta)
    }
}

/// Nearest-rank percentile of an ascending slice. `p` is in 0..=100.
pub fn percentile(sorted: &[u128], p: f64) -> u128 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::registry::{ethereum, rootstock};
    use alloy::primitives::{B256, U256};

    const GWEI: u128 = 1_000_000_000;

    fn block(height: u64, base_fee: u128, gas_used: u64) -> Block {
        Block {
            hash: B256::repeat_byte(height as u8),
            parent_hash: B256::ZERO,
            height,
            timestamp: 0,
            difficulty: U256::ZERO,
            base_fee_per_gas: Some(base_fee),
            gas_used,
            gas_limit: 30_000_000,
            transactions: Vec::new(),
            chain_id: 1.into(),
        }
    }

    fn entry(height: u64, fees: Vec<u128>) -> FeeHistoryEntry {
        FeeHistoryEntry {
            height,
            base_fee_per_gas: 10 * GWEI,
            gas_used_ratio: if fees.is_empty() { 0.0 } else { 0.5 },
            priority_fees: fees,
        }
    }

    fn full_history() -> Vec<FeeHistoryEntry> {
        (0..20)
            .map(|h| entry(h, (1..=10).map(|i| i * GWEI / 10).collect()))
            .collect()
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(percentile(&data, 10.0), 1);
        assert_eq!(percentile(&data, 50.0), 5);
        assert_eq!(percentile(&data, 90.0), 9);
        assert_eq!(percentile(&data, 100.0), 10);
        assert_eq!(percentile(&data, 0.0), 1);
        assert_eq!(percentile(&[], 50.0), 0);
    }

    #[test]
    fn test_base_fee_projection() {
        let network = ethereum();
        // At target: unchanged.
        assert_eq!(next_base_fee(&block(1, 8 * GWEI, 15_000_000), &network), 8 * GWEI);
        // Full block: +1/8.
        assert_eq!(next_base_fee(&block(1, 8 * GWEI, 30_000_000), &network), 9 * GWEI);
        // Empty block: -1/8.
        assert_eq!(next_base_fee(&block(1, 8 * GWEI, 0), &network), 7 * GWEI);
        // Unknown usage: maximum increase.
        let mut unknown = block(1, 8 * GWEI, 0);
        unknown.gas_limit = 0;
        assert_eq!(next_base_fee(&unknown, &network), 9 * GWEI);
    }

    #[test]
    fn test_full_window_tiers() {
        let estimator = FeeEstimator::new(&FeeConfig::default());
        let quotes = estimator.estimate(&ethereum(), &block(20, 10 * GWEI, 15_000_000), &full_history());

        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[0].tier, "low");
        assert_eq!(quotes[0].confidence, 70);
        assert_eq!(quotes[1].confidence, 95);
        assert_eq!(quotes[2].confidence, 99);
        assert_eq!(quotes[0].fees.priority_fee_per_gas(), GWEI / 10);
        assert_eq!(quotes[1].fees.priority_fee_per_gas(), 5 * GWEI / 10);
        assert_eq!(quotes[2].fees.priority_fee_per_gas(), 9 * GWEI / 10);
        assert_eq!(
            quotes[1].fees.max_fee_per_gas(),
            20 * GWEI + 5 * GWEI / 10
        );
        assert!(quotes.iter().all(|q| q.block_height == 20 && q.base_fee_per_gas == 10 * GWEI));
    }

    #[test]
    fn test_short_window_widens_and_discounts() {
        let estimator = FeeEstimator::new(&FeeConfig::default());
        let history: Vec<_> = full_history().into_iter().take(10).collect();
        let quotes = estimator.estimate(&ethereum(), &block(10, 10 * GWEI, 15_000_000), &history);

        // Half the window missing: p10 widens to p0, p90 to p100.
        assert_eq!(quotes[0].fees.priority_fee_per_gas(), GWEI / 10);
        assert_eq!(quotes[2].fees.priority_fee_per_gas(), GWEI);
        assert_eq!(quotes[0].confidence, 70);
        assert_eq!(quotes[1].confidence, 82);
        assert_eq!(quotes[2].confidence, 84);
    }

    #[test]
    fn test_zero_transactions_use_floor() {
        let estimator = FeeEstimator::new(&FeeConfig::default());
        let network = ethereum();
        let quotes = estimator.estimate(&network, &block(1, 10 * GWEI, 0), &[entry(1, Vec::new())]);

        assert_eq!(quotes.len(), 3);
        for quote in &quotes {
            assert_eq!(quote.fees.priority_fee_per_gas(), network.fee_floor_wei);
            assert_eq!(quote.confidence, 70);
        }
    }

    #[test]
    fn test_tiers_non_decreasing() {
        let estimator = FeeEstimator::new(&FeeConfig::default());
        let history = vec![entry(1, vec![5 * GWEI]), entry(2, vec![GWEI, 3 * GWEI])];
        let quotes = estimator.estimate(&ethereum(), &block(2, GWEI, 29_000_000), &history);
        for pair in quotes.windows(2) {
            assert!(pair[0].fees.priority_fee_per_gas() <= pair[1].fees.priority_fee_per_gas());
            assert!(pair[0].fees.max_fee_per_gas() <= pair[1].fees.max_fee_per_gas());
            assert!(pair[0].confidence <= pair[1].confidence);
        }
    }

    #[test]
    fn test_legacy_network_gas_price() {
        let estimator = FeeEstimator::new(&FeeConfig::default());
        let network = rootstock();
        let mut tip = block(1, 0, 0);
        tip.base_fee_per_gas = None;
        let quotes = estimator.estimate(&network, &tip, &[entry(1, vec![100_000_000])]);
        for quote in &quotes {
            assert_eq!(quote.fees.fee_model(), FeeModel::Legacy);
            assert_eq!(quote.fees.max_fee_per_gas(), 100_000_000);
        }
    }

    #[test]
    fn test_select_falls_back_to_middle() {
        let estimator = FeeEstimator::new(&FeeConfig::default());
        let quotes = estimator.estimate(&ethereum(), &block(20, GWEI, 0), &full_history());
        assert_eq!(FeeEstimator::select(&quotes, "high").unwrap().tier, "high");
        assert_eq!(FeeEstimator::select(&quotes, "turbo").unwrap().tier, "medium");
    }

    #[tokio::test]
    async fn test_quote_from_gateway() {
        use crate::gateway::MemoryGateway;
        let gateway = MemoryGateway::new(1);
        gateway.push_fee_block(vec![2 * GWEI], 15_000_000);
        let estimator = FeeEstimator::new(&FeeConfig::default());
        let quotes = estimator.quote(&gateway, &ethereum()).await.unwrap();
        assert_eq!(quotes[0].block_height, 1);
        assert_eq!(quotes[0].fees.priority_fee_per_gas(), 2 * GWEI);
    }
}
