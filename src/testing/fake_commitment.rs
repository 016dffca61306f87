//! In-memory commitment source

use alloy::primitives::{Bytes, B256, U256};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

use crate::commitment::CommitmentSource;
use crate::error::RelayError;
use crate::merkle::compute_root;
use crate::types::StateRootBatchHeader;

#[derive(Default)]
struct CommitmentState {
    batches: Vec<(StateRootBatchHeader, Vec<B256>)>,
    inside_fraud_proof_window: bool,
    total_elements_calls: usize,
    failing_polls: u32,
}

/// Batches appended directly by the test
#[derive(Default)]
pub struct FakeCommitmentSource {
    state: Mutex<CommitmentState>,
}

impl FakeCommitmentSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CommitmentState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append_batch(&self, roots: Vec<B256>) -> StateRootBatchHeader {
        let mut state = self.lock();
        let prev_total: usize = state.batches.iter().map(|(_, r)| r.len()).sum();
        let header = StateRootBatchHeader {
            batch_index: U256::from(state.batches.len()),
            batch_root: compute_root(&roots).unwrap_or_default(),
            batch_size: U256::from(roots.len()),
            prev_total_elements: U256::from(prev_total),
            extra_data: Bytes::new(),
        };
        state.batches.push((header.clone(), roots));
        header
    }

    pub fn set_inside_fraud_proof_window(&self, inside: bool) {
        self.lock().inside_fraud_proof_window = inside;
    }

    /// Fail the next `count` `total_elements` reads with `RpcUnavailable`
    pub fn fail_polls(&self, count: u32) {
        self.lock().failing_polls = count;
    }

    pub fn total_elements_calls(&self) -> usize {
        self.lock().total_elements_calls
    }
}

#[async_trait]
impl CommitmentSource for FakeCommitmentSource {
    async fn total_elements(&self) -> Result<u64, RelayError> {
        let mut state = self.lock();
        state.total_elements_calls += 1;
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(RelayError::RpcUnavailable("connection reset".to_string()));
        }
        Ok(state.batches.iter().map(|(_, r)| r.len() as u64).sum())
    }

    async fn total_batches(&self) -> Result<u64, RelayError> {
        Ok(self.lock().batches.len() as u64)
    }

    async fn batch_header(
        &self,
        batch_index: u64,
    ) -> Result<Option<StateRootBatchHeader>, RelayError> {
        Ok(self
            .lock()
            .batches
            .get(batch_index as usize)
            .map(|(header, _)| header.clone()))
    }

    async fn state_roots(&self, header: &StateRootBatchHeader) -> Result<Vec<B256>, RelayError> {
        let state = self.lock();
        state
            .batches
            .iter()
            .find(|(h, _)| h.batch_index == header.batch_index)
            .map(|(_, roots)| roots.clone())
            .ok_or(RelayError::BatchNotFound {
                index: header.prev_total_elements.to::<u64>(),
            })
    }

    async fn inside_fraud_proof_window(
        &self,
        _header: &StateRootBatchHeader,
    ) -> Result<bool, RelayError> {
        Ok(self.lock().inside_fraud_proof_window)
    }
}
