//! Block scanning for one network.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::config::TrackerConfig;
use crate::gateway::{GatewayResult, NetworkGateway};
use crate::networks::BlockTag;
use crate::orchestrator::ChainOrchestrator;

/// Feeds new blocks of one network to [`ChainOrchestrator::process_block`].
pub struct ConfirmationTracker {
    orchestrator: Arc<ChainOrchestrator>,
    gateway: Arc<dyn NetworkGateway>,
    poll_interval: Duration,
    max_catch_up: u64,
    last_scanned: Option<u64>,
}

impl ConfirmationTracker {
    pub fn new(
        orchestrator: Arc<ChainOrchestrator>,
        gateway: Arc<dyn NetworkGateway>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            orchestrator,
            gateway,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            max_catch_up: config.max_catch_up_blocks.max(1),
            last_scanned: None,
        }
    }

    /// Start scanning after `height` instead of at the current head.
    pub fn starting_after(mut self, height: u64) -> Self {
        self.last_scanned = Some(height);
        self
    }

    pub fn last_scanned(&self) -> Option<u64> {
        self.last_scanned
    }

    /// Scan blocks produced since the last poll. Returns the number of
    /// transactions confirmed.
    ///
    /// The first poll scans only the current head. At most `max_catch_up`
    /// blocks are scanned per call; once caught up, outstanding broadcasts
    /// are reconciled against the confirmed nonce.
    pub async fn poll_once(&mut self) -> GatewayResult<usize> {
        let head = self.gateway.get_block(BlockTag::Latest).await?;
        let from = match self.last_scanned {
            Some(last) if head.height <= last => return Ok(0),
            Some(last) => last + 1,
            None => head.height,
        };
        let to = head.height.min(from + self.max_catch_up - 1);

        let mut confirmed = 0;
        for height in from..=to {
            let block = if height == head.height {
                head.clone()
            } else {
                self.gateway.get_block(BlockTag::Number(height)).await?
            };
            confirmed += self.orchestrator.process_block(&block).await;
            self.last_scanned = Some(height);
        }

        if to == head.height {
            let chain_id = self.gateway.chain_id();
            if let Err(e) = self.orchestrator.reconcile(chain_id, head.height).await {
                tracing::warn!(%chain_id, error = %e, "Reconcile failed");
            }
        } else {
            tracing::debug!(
                chain_id = %self.gateway.chain_id(),
                scanned_to = to,
                head = head.height,
                "Catching up"
            );
        }
        Ok(confirmed)
    }

    /// Poll until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let chain_id = self.gateway.chain_id();
        tracing::info!(
            %chain_id,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Confirmation tracker started"
        );
        let mut ticker = interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(%chain_id, "Confirmation tracker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(%chain_id, error = %e, "Block poll failed");
                    }
                }
            }
        }
    }
}
