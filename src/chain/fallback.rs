//! Failover across several endpoints of one chain
//!
//! Requests go to the active endpoint. When it answers with
//! [`RelayError::RpcUnavailable`] the next endpoint is tried, and the first
//! one that answers becomes active. Any other error is the chain's answer
//! and is returned as is.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::{BlockTag, ChainClient};
use crate::error::RelayError;
use crate::types::{AccountProof, BlockHeader, ContractCall, LogEntry, LogFilter, Receipt};

pub struct FallbackChainClient {
    clients: Vec<Arc<dyn ChainClient>>,
    active: AtomicUsize,
    chain_id: u64,
}

impl FallbackChainClient {
    /// All clients must serve the same chain
    pub fn new(clients: Vec<Arc<dyn ChainClient>>) -> Result<Self> {
        let chain_id = clients
            .first()
            .map(|c| c.chain_id())
            .ok_or_else(|| eyre!("At least one RPC endpoint is required"))?;
        if let Some(other) = clients.iter().find(|c| c.chain_id() != chain_id) {
            return Err(eyre!(
                "RPC endpoints disagree on chain id: {} vs {}",
                chain_id,
                other.chain_id()
            ));
        }
        Ok(Self {
            clients,
            active: AtomicUsize::new(0),
            chain_id,
        })
    }

    /// Index of the endpoint currently in use
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    async fn failover<T, F, Fut>(&self, method: &'static str, op: F) -> Result<T, RelayError>
    where
        T: Send,
        F: Fn(Arc<dyn ChainClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, RelayError>> + Send,
    {
        let start = self.active_index();
        let count = self.clients.len();
        let mut last_error = None;

        for offset in 0..count {
            let index = (start + offset) % count;
            match op(self.clients[index].clone()).await {
                Err(RelayError::RpcUnavailable(e)) => {
                    warn!(
                        chain_id = self.chain_id,
                        endpoint = index,
                        method,
                        error = %e,
                        "RPC endpoint unavailable, trying next"
                    );
                    last_error = Some(RelayError::RpcUnavailable(e));
                }
                result => {
                    if index != start {
                        warn!(chain_id = self.chain_id, endpoint = index, "Switched RPC endpoint");
                        self.active.store(index, Ordering::Relaxed);
                    }
                    return result;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RelayError::RpcUnavailable(format!("no RPC endpoint for chain {}", self.chain_id))
        }))
    }
}

#[async_trait]
impl ChainClient for FallbackChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn submit_and_wait(&self, call: ContractCall) -> Result<Receipt, RelayError> {
        self.failover("submit_and_wait", |client| {
            let call = call.clone();
            async move { client.submit_and_wait(call).await }
        })
        .await
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RelayError> {
        self.failover("get_receipt", |client| async move {
            client.get_receipt(tx_hash).await
        })
        .await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, RelayError> {
        self.failover("get_logs", |client| {
            let filter = filter.clone();
            async move { client.get_logs(&filter).await }
        })
        .await
    }

    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<B256>,
        block: u64,
    ) -> Result<AccountProof, RelayError> {
        self.failover("get_proof", |client| {
            let slots = slots.clone();
            async move { client.get_proof(address, slots, block).await }
        })
        .await
    }

    async fn get_block(&self, tag: BlockTag) -> Result<BlockHeader, RelayError> {
        self.failover("get_block", |client| async move { client.get_block(tag).await })
            .await
    }

    async fn block_number(&self) -> Result<u64, RelayError> {
        self.failover("block_number", |client| async move {
            client.block_number().await
        })
        .await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RelayError> {
        self.failover("call", |client| {
            let data = data.clone();
            async move { client.call(to, data).await }
        })
        .await
    }

    async fn transaction_input(&self, tx_hash: B256) -> Result<Bytes, RelayError> {
        self.failover("transaction_input", |client| async move {
            client.transaction_input(tx_hash).await
        })
        .await
    }
}
