//! State commitment tracking
//!
//! A [`CommitmentSource`] publishes state roots in batches. The
//! [`StateCommitmentTracker`] polls it until the batch covering a given
//! block index exists (and, optionally, has left the fraud proof window).

pub mod confirmed;
pub mod scc;

pub use confirmed::ConfirmedBlocks;
pub use scc::StateCommitmentChain;

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::server::Metrics;
use crate::types::StateRootBatchHeader;

/// Something that commits batches of state roots
#[async_trait]
pub trait CommitmentSource: Send + Sync {
    /// Number of state roots committed so far
    async fn total_elements(&self) -> Result<u64, RelayError>;

    async fn total_batches(&self) -> Result<u64, RelayError>;

    /// Header of batch `batch_index`, `None` if it was never appended
    async fn batch_header(&self, batch_index: u64)
        -> Result<Option<StateRootBatchHeader>, RelayError>;

    /// All state roots of a committed batch, in order
    async fn state_roots(&self, header: &StateRootBatchHeader) -> Result<Vec<B256>, RelayError>;

    async fn inside_fraud_proof_window(
        &self,
        header: &StateRootBatchHeader,
    ) -> Result<bool, RelayError>;

    /// Locate the batch covering `index` by binary search over batch indices
    async fn find_batch(&self, index: u64) -> Result<StateRootBatchHeader, RelayError> {
        let mut low = 0u64;
        let mut high = self.total_batches().await?;
        let target = U256::from(index);

        while low < high {
            let mid = low + (high - low) / 2;
            let header = self
                .batch_header(mid)
                .await?
                .ok_or(RelayError::BatchNotFound { index })?;

            if target < header.prev_total_elements {
                high = mid;
            } else if target >= header.prev_total_elements + header.batch_size {
                low = mid + 1;
            } else {
                return Ok(header);
            }
        }

        Err(RelayError::BatchNotFound { index })
    }
}

/// Polling budget for commitment waits
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub poll_interval: Duration,
    pub max_rounds: u32,
    /// Keep waiting until the batch is outside the fraud proof window
    pub wait_for_fraud_proof_window: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_rounds: 60,
            wait_for_fraud_proof_window: false,
        }
    }
}

/// Waits for the commitment of a block index
pub struct StateCommitmentTracker {
    source: Arc<dyn CommitmentSource>,
    config: PollConfig,
    metrics: Option<Arc<Metrics>>,
}

impl StateCommitmentTracker {
    pub fn new(source: Arc<dyn CommitmentSource>, config: PollConfig) -> Self {
        Self {
            source,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn source(&self) -> &Arc<dyn CommitmentSource> {
        &self.source
    }

    /// Poll until a committed batch covers `block_index`
    ///
    /// Fails with `BatchTimeout` after `max_rounds` rounds and with
    /// `Cancelled` if `cancel` fires between rounds. A transient RPC failure
    /// only costs the current round.
    pub async fn wait_for_batch_containing(
        &self,
        block_index: u64,
        cancel: &CancellationToken,
    ) -> Result<StateRootBatchHeader, RelayError> {
        let max_rounds = self.config.max_rounds;

        for round in 1..=max_rounds {
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }
            if let Some(metrics) = &self.metrics {
                metrics.batch_wait_rounds.inc();
            }

            match self.poll_once(block_index).await {
                Ok(Some(header)) => {
                    info!(
                        block_index,
                        batch_index = %header.batch_index,
                        round,
                        "State batch committed"
                    );
                    return Ok(header);
                }
                Ok(None) => {}
                Err(RelayError::RpcUnavailable(err)) => {
                    warn!(block_index, round, error = %err, "Commitment poll failed");
                }
                Err(e) => return Err(e),
            }

            if round < max_rounds {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        Err(RelayError::BatchTimeout {
            index: block_index,
            rounds: max_rounds,
        })
    }

    async fn poll_once(&self, block_index: u64) -> Result<Option<StateRootBatchHeader>, RelayError> {
        let total_elements = self.source.total_elements().await?;
        if total_elements <= block_index {
            debug!(block_index, total_elements, "State root not yet committed");
            return Ok(None);
        }

        let header = self.source.find_batch(block_index).await?;

        if self.config.wait_for_fraud_proof_window
            && self.source.inside_fraud_proof_window(&header).await?
        {
            debug!(
                block_index,
                batch_index = %header.batch_index,
                "Batch still inside fraud proof window"
            );
            return Ok(None);
        }

        Ok(Some(header))
    }
}
