//! State commitment chain on L1

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::CommitmentSource;
use crate::chain::ChainClient;
use crate::contracts::IStateCommitmentChain::{
    appendStateBatchCall, getTotalBatchesCall, getTotalElementsCall, insideFraudProofWindowCall,
    StateBatchAppended,
};
use crate::error::RelayError;
use crate::types::{LogFilter, StateRootBatchHeader};

const DEFAULT_MAX_BLOCK_RANGE: u64 = 10_000;

#[derive(Debug, Clone)]
struct AppendedBatch {
    header: StateRootBatchHeader,
    tx_hash: B256,
    block_number: u64,
}

/// Reads committed L2 state batches from the L1 state commitment chain
///
/// `StateBatchAppended` lookups walk backwards from the head in windows of
/// at most `max_block_range` blocks. Found batches are cached and bound the
/// window for their neighbours, so a binary search mostly scans short spans.
pub struct StateCommitmentChain {
    client: Arc<dyn ChainClient>,
    address: Address,
    start_block: u64,
    max_block_range: u64,
    batches: Mutex<BTreeMap<u64, AppendedBatch>>,
}

impl StateCommitmentChain {
    pub fn new(client: Arc<dyn ChainClient>, address: Address) -> Self {
        Self {
            client,
            address,
            start_block: 0,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            batches: Mutex::new(BTreeMap::new()),
        }
    }

    /// Never scan below `start_block` (the contract's deployment block)
    pub fn with_start_block(mut self, start_block: u64) -> Self {
        self.start_block = start_block;
        self
    }

    pub fn with_max_block_range(mut self, range: u64) -> Self {
        self.max_block_range = range.max(1);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn batches(&self) -> MutexGuard<'_, BTreeMap<u64, AppendedBatch>> {
        self.batches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks that can hold the event of `batch_index`, given cached neighbours
    fn scan_bounds(&self, batch_index: u64, latest: u64) -> (u64, u64) {
        let batches = self.batches();
        let low = batches
            .range(..batch_index)
            .next_back()
            .map_or(self.start_block, |(_, b)| b.block_number.max(self.start_block));
        let high = batches
            .range(batch_index + 1..)
            .next()
            .map_or(latest, |(_, b)| b.block_number.min(latest));
        (low, high)
    }

    async fn appended_event(&self, batch_index: u64) -> Result<Option<AppendedBatch>, RelayError> {
        let cached = self.batches().get(&batch_index).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let latest = self.client.block_number().await?;
        let (low, high) = self.scan_bounds(batch_index, latest);
        let mut to_block = high;
        while to_block >= low {
            let from_block = to_block
                .saturating_sub(self.max_block_range - 1)
                .max(low);
            let filter = LogFilter::new(self.address, from_block, to_block)
                .event_signature(StateBatchAppended::SIGNATURE_HASH)
                .topic1(B256::from(U256::from(batch_index)));
            let logs = self.client.get_logs(&filter).await?;

            if let Some(log) = logs.first() {
                let event =
                    StateBatchAppended::decode_raw_log(log.topics.iter().copied(), &log.data, true)
                        .map_err(|e| RelayError::Decode(format!("StateBatchAppended: {e}")))?;
                let found = AppendedBatch {
                    header: StateRootBatchHeader {
                        batch_index: event._batchIndex,
                        batch_root: event._batchRoot,
                        batch_size: event._batchSize,
                        prev_total_elements: event._prevTotalElements,
                        extra_data: event._extraData,
                    },
                    tx_hash: log.tx_hash,
                    block_number: log.block_number,
                };
                self.batches().insert(batch_index, found.clone());
                return Ok(Some(found));
            }

            if from_block == low {
                break;
            }
            to_block = from_block - 1;
        }
        debug!(batch_index, low, high, "No StateBatchAppended event found");
        Ok(None)
    }

    async fn view_uint(&self, data: Vec<u8>, what: &str) -> Result<U256, RelayError> {
        let raw = self.client.call(self.address, data.into()).await?;
        if raw.len() < 32 {
            return Err(RelayError::Decode(format!("{what}: short return data")));
        }
        Ok(U256::from_be_slice(&raw[..32]))
    }
}

fn to_u64(value: U256, what: &str) -> Result<u64, RelayError> {
    u64::try_from(value).map_err(|_| RelayError::Decode(format!("{what} does not fit in u64")))
}

#[async_trait]
impl CommitmentSource for StateCommitmentChain {
    async fn total_elements(&self) -> Result<u64, RelayError> {
        let value = self
            .view_uint(getTotalElementsCall {}.abi_encode(), "getTotalElements")
            .await?;
        to_u64(value, "total elements")
    }

    async fn total_batches(&self) -> Result<u64, RelayError> {
        let value = self
            .view_uint(getTotalBatchesCall {}.abi_encode(), "getTotalBatches")
            .await?;
        let total = to_u64(value, "total batches")?;
        // Batches removed after a fraud proof get re-appended under the same index
        self.batches().retain(|index, _| *index < total);
        Ok(total)
    }

    async fn batch_header(
        &self,
        batch_index: u64,
    ) -> Result<Option<StateRootBatchHeader>, RelayError> {
        Ok(self.appended_event(batch_index).await?.map(|b| b.header))
    }

    async fn state_roots(&self, header: &StateRootBatchHeader) -> Result<Vec<B256>, RelayError> {
        let batch_index = to_u64(header.batch_index, "batch index")?;
        let tx_hash = self
            .appended_event(batch_index)
            .await?
            .map(|b| b.tx_hash)
            .ok_or(RelayError::BatchNotFound { index: batch_index })?;

        let input = self.client.transaction_input(tx_hash).await?;
        let call = appendStateBatchCall::abi_decode(&input, true).map_err(|e| {
            RelayError::Decode(format!("appendStateBatch calldata of {tx_hash}: {e}"))
        })?;

        if U256::from(call._batch.len()) != header.batch_size {
            return Err(RelayError::Decode(format!(
                "batch {} has {} roots in calldata but size {}",
                batch_index,
                call._batch.len(),
                header.batch_size
            )));
        }
        debug!(batch_index, roots = call._batch.len(), tx_hash = %tx_hash, "Decoded state batch");
        Ok(call._batch)
    }

    async fn inside_fraud_proof_window(
        &self,
        header: &StateRootBatchHeader,
    ) -> Result<bool, RelayError> {
        let data = insideFraudProofWindowCall {
            _batchHeader: header.clone().into(),
        }
        .abi_encode();
        let raw = self.client.call(self.address, data.into()).await?;
        let decoded = insideFraudProofWindowCall::abi_decode_returns(&raw, true)
            .map_err(|e| RelayError::Decode(format!("insideFraudProofWindow: {e}")))?;
        Ok(decoded._inside)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::compute_root;
    use crate::testing::FakeChain;

    const SCC: Address = Address::repeat_byte(0x5c);

    #[tokio::test]
    async fn test_reads_batches_from_events_and_calldata() {
        let chain = Arc::new(FakeChain::new(1));
        let first: Vec<B256> = (1..=3).map(B256::with_last_byte).collect();
        let second: Vec<B256> = (10..=14).map(B256::with_last_byte).collect();
        chain.append_state_batch(SCC, &first);
        chain.append_state_batch(SCC, &second);

        let scc = StateCommitmentChain::new(chain.clone(), SCC);
        assert_eq!(scc.total_elements().await.unwrap(), 8);
        assert_eq!(scc.total_batches().await.unwrap(), 2);

        let header = scc.find_batch(4).await.unwrap();
        assert_eq!(header.batch_index, U256::from(1));
        assert_eq!(header.prev_total_elements, U256::from(3));
        assert_eq!(header.batch_root, compute_root(&second).unwrap());
        assert_eq!(scc.state_roots(&header).await.unwrap(), second);
        assert!(!scc.inside_fraud_proof_window(&header).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_holds_batches_inside_fraud_proof_window() {
        use crate::commitment::{PollConfig, StateCommitmentTracker};
        use std::time::Duration;
        use tokio_util::sync::CancellationToken;

        let chain = Arc::new(FakeChain::new(1));
        chain.append_state_batch(SCC, &[B256::with_last_byte(1), B256::with_last_byte(2)]);
        chain.set_fraud_proof_window_open(true);

        let scc = Arc::new(StateCommitmentChain::new(chain.clone(), SCC));
        let header = scc.find_batch(1).await.unwrap();
        assert!(scc.inside_fraud_proof_window(&header).await.unwrap());

        let tracker = StateCommitmentTracker::new(
            scc,
            PollConfig {
                poll_interval: Duration::from_millis(10),
                max_rounds: 3,
                wait_for_fraud_proof_window: true,
            },
        );
        assert_eq!(
            tracker
                .wait_for_batch_containing(1, &CancellationToken::new())
                .await,
            Err(RelayError::BatchTimeout { index: 1, rounds: 3 })
        );

        chain.set_fraud_proof_window_open(false);
        let found = tracker
            .wait_for_batch_containing(1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found, header);
    }

    #[tokio::test]
    async fn test_lookups_stay_within_block_range() {
        let chain = Arc::new(FakeChain::new(1));
        chain.set_max_log_range(Some(4));
        for i in 0..6u8 {
            chain.mine_blocks(5);
            chain.append_state_batch(SCC, &[B256::with_last_byte(i), B256::with_last_byte(i + 100)]);
        }
        chain.mine_blocks(20);

        let scc = StateCommitmentChain::new(chain.clone(), SCC).with_max_block_range(4);
        let header = scc.find_batch(9).await.unwrap();
        assert_eq!(header.batch_index, U256::from(4));
        assert_eq!(
            scc.state_roots(&header).await.unwrap(),
            vec![B256::with_last_byte(4), B256::with_last_byte(104)]
        );

        // A wide scan is refused by the node
        let unbounded = StateCommitmentChain::new(chain, SCC);
        assert!(matches!(
            unbounded.find_batch(9).await,
            Err(RelayError::RpcUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_found_batches_are_cached() {
        let chain = Arc::new(FakeChain::new(1));
        for i in 0..4u8 {
            chain.append_state_batch(SCC, &[B256::with_last_byte(i)]);
        }
        let scc = StateCommitmentChain::new(chain.clone(), SCC);

        scc.find_batch(2).await.unwrap();
        let queries = chain.log_queries();
        let header = scc.find_batch(2).await.unwrap();
        scc.state_roots(&header).await.unwrap();
        assert_eq!(chain.log_queries(), queries);
    }

    #[tokio::test]
    async fn test_start_block_bounds_the_scan() {
        let chain = Arc::new(FakeChain::new(1));
        chain.append_state_batch(SCC, &[B256::with_last_byte(1)]);
        chain.mine_blocks(3);

        let scc = StateCommitmentChain::new(chain, SCC).with_start_block(2);
        assert_eq!(scc.batch_header(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_batch_is_none() {
        let chain = Arc::new(FakeChain::new(1));
        chain.deploy_state_commitment_chain(SCC);
        let scc = StateCommitmentChain::new(chain, SCC);
        assert_eq!(scc.batch_header(0).await.unwrap(), None);
        assert_eq!(scc.total_elements().await.unwrap(), 0);
    }
}
