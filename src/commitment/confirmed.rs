//! Confirmed source blocks as commitments
//!
//! The L1→L2 path has no batch contract: once an L1 block has enough
//! confirmations its state root is treated as committed. Every block is a
//! batch of one, so batch index, element index and block number coincide.

use alloy::primitives::{Bytes, B256, U256};
use async_trait::async_trait;
use std::sync::Arc;

use super::CommitmentSource;
use crate::chain::{BlockTag, ChainClient};
use crate::error::RelayError;
use crate::types::StateRootBatchHeader;

pub struct ConfirmedBlocks {
    client: Arc<dyn ChainClient>,
    confirmations: u64,
}

impl ConfirmedBlocks {
    pub fn new(client: Arc<dyn ChainClient>, confirmations: u64) -> Self {
        Self {
            client,
            confirmations,
        }
    }
}

#[async_trait]
impl CommitmentSource for ConfirmedBlocks {
    async fn total_elements(&self) -> Result<u64, RelayError> {
        let head = self.client.block_number().await?;
        Ok((head + 1).saturating_sub(self.confirmations))
    }

    async fn total_batches(&self) -> Result<u64, RelayError> {
        self.total_elements().await
    }

    async fn batch_header(
        &self,
        batch_index: u64,
    ) -> Result<Option<StateRootBatchHeader>, RelayError> {
        if batch_index >= self.total_elements().await? {
            return Ok(None);
        }
        let block = self.client.get_block(BlockTag::Number(batch_index)).await?;
        Ok(Some(StateRootBatchHeader {
            batch_index: U256::from(batch_index),
            batch_root: block.state_root,
            batch_size: U256::from(1),
            prev_total_elements: U256::from(batch_index),
            extra_data: Bytes::from(block.hash.to_vec()),
        }))
    }

    async fn state_roots(&self, header: &StateRootBatchHeader) -> Result<Vec<B256>, RelayError> {
        let number = u64::try_from(header.batch_index)
            .map_err(|_| RelayError::Decode("block number does not fit in u64".to_string()))?;
        let block = self.client.get_block(BlockTag::Number(number)).await?;
        Ok(vec![block.state_root])
    }

    async fn inside_fraud_proof_window(
        &self,
        _header: &StateRootBatchHeader,
    ) -> Result<bool, RelayError> {
        Ok(false)
    }

    async fn find_batch(&self, index: u64) -> Result<StateRootBatchHeader, RelayError> {
        self.batch_header(index)
            .await?
            .ok_or(RelayError::BatchNotFound { index })
    }
}
