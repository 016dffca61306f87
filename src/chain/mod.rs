//! Chain access
//!
//! [`ChainClient`] is the only way the pipeline talks to a node. It never
//! retries: transport failures surface as [`RelayError::RpcUnavailable`] and
//! the orchestrator decides what to do with them. [`FallbackChainClient`]
//! is the exception: it moves to the next endpoint of the same chain.

pub mod evm;
pub mod fallback;

pub use evm::EvmChainClient;
pub use fallback::FallbackChainClient;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::RelayError;
use crate::types::{AccountProof, BlockHeader, ContractCall, LogEntry, LogFilter, Receipt};

/// Block selector for header queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

/// JSON-RPC operations used by the relay pipeline
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain id this client is connected to
    fn chain_id(&self) -> u64;

    /// Sign, send and wait for the receipt of a state-changing call
    async fn submit_and_wait(&self, call: ContractCall) -> Result<Receipt, RelayError>;

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RelayError>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, RelayError>;

    /// `eth_getProof` for `address` at `block`
    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<B256>,
        block: u64,
    ) -> Result<AccountProof, RelayError>;

    async fn get_block(&self, tag: BlockTag) -> Result<BlockHeader, RelayError>;

    async fn block_number(&self) -> Result<u64, RelayError>;

    /// Read-only `eth_call`
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RelayError>;

    /// Calldata of a mined transaction
    async fn transaction_input(&self, tx_hash: B256) -> Result<Bytes, RelayError>;

    /// Poll for a receipt until it appears or `timeout` elapses
    ///
    /// Transport failures count as an empty poll.
    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Receipt, RelayError> {
        let start = Instant::now();
        loop {
            match self.get_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(RelayError::RpcUnavailable(e)) => {
                    debug!(tx = %tx_hash, error = %e, "Receipt poll failed");
                }
                Err(e) => return Err(e),
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(RelayError::Timeout {
                    what: format!("receipt of {tx_hash}"),
                    elapsed,
                });
            }
            tokio::time::sleep(poll_interval.min(timeout - elapsed)).await;
        }
    }
}
