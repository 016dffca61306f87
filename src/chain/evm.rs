//! [`ChainClient`] over alloy's HTTP provider

use alloy::consensus::Transaction as _;
use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log, TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BlockTag, ChainClient};
use crate::error::RelayError;
use crate::types::{
    AccountProof, BlockHeader, ContractCall, LogEntry, LogFilter, Receipt, StorageSlotProof,
};

/// JSON-RPC client for one EVM chain
pub struct EvmChainClient {
    provider: RootProvider<Http<Client>>,
    rpc_url: Url,
    chain_id: u64,
    signer: Option<PrivateKeySigner>,
    tx_timeout: Duration,
}

impl EvmChainClient {
    /// Create a read-only client
    pub fn new(rpc_url: &str, chain_id: u64, tx_timeout: Duration) -> Result<Self> {
        let url: Url = rpc_url
            .parse()
            .wrap_err_with(|| format!("Invalid RPC URL: {}", rpc_url))?;
        let provider = ProviderBuilder::new().on_http(url.clone());

        Ok(Self {
            provider,
            rpc_url: url,
            chain_id,
            signer: None,
            tx_timeout,
        })
    }

    /// Attach a signing key so the client can submit transactions
    pub fn with_signer(mut self, private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| eyre!("Invalid private key: {}", e))?;
        info!(
            address = %signer.address(),
            chain_id = self.chain_id,
            "Relayer signer attached"
        );
        self.signer = Some(signer);
        Ok(self)
    }

    /// Address transactions are sent from, if a signer is attached
    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }
}

fn convert_log(log: &Log) -> LogEntry {
    LogEntry {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number.unwrap_or_default(),
        tx_hash: log.transaction_hash.unwrap_or_default(),
        log_index: log.log_index.unwrap_or_default(),
    }
}

fn convert_receipt(receipt: &TransactionReceipt) -> Receipt {
    Receipt {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number.unwrap_or_default(),
        status: receipt.status(),
        logs: receipt.inner.logs().iter().map(convert_log).collect(),
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn submit_and_wait(&self, call: ContractCall) -> Result<Receipt, RelayError> {
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| RelayError::TxRejected {
                tx_hash: None,
                reason: "no signer configured for this chain".to_string(),
            })?;
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(signer))
            .on_http(self.rpc_url.clone());

        let tx = TransactionRequest::default()
            .with_to(call.to)
            .with_input(call.input)
            .with_value(call.value)
            .with_chain_id(self.chain_id);

        // Gas estimation happens here, so reverts surface as TxRejected
        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(RelayError::from_rpc)?;
        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, chain_id = self.chain_id, "Transaction sent, waiting for receipt");

        let receipt = match tokio::time::timeout(self.tx_timeout, pending.get_receipt()).await {
            Ok(result) => result.map_err(RelayError::from_rpc)?,
            Err(_) => {
                warn!(tx_hash = %tx_hash, timeout = ?self.tx_timeout, "Receipt wait timed out");
                return Err(RelayError::Timeout {
                    what: format!("receipt of {tx_hash}"),
                    elapsed: self.tx_timeout,
                });
            }
        };

        if !receipt.status() {
            return Err(RelayError::TxRejected {
                tx_hash: Some(tx_hash),
                reason: "transaction reverted on-chain".to_string(),
            });
        }

        Ok(convert_receipt(&receipt))
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RelayError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(RelayError::from_rpc)?;
        Ok(receipt.as_ref().map(convert_receipt))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, RelayError> {
        let mut query = Filter::new()
            .address(filter.address)
            .from_block(filter.from_block)
            .to_block(filter.to_block);
        if let Some(signature) = filter.event_signature {
            query = query.event_signature(signature);
        }
        if let Some(topic) = filter.topic1 {
            query = query.topic1(topic);
        }

        let logs = self
            .provider
            .get_logs(&query)
            .await
            .map_err(RelayError::from_rpc)?;
        debug!(
            address = %filter.address,
            from_block = filter.from_block,
            to_block = filter.to_block,
            count = logs.len(),
            "Fetched logs"
        );
        Ok(logs.iter().map(convert_log).collect())
    }

    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<B256>,
        block: u64,
    ) -> Result<AccountProof, RelayError> {
        let response = self
            .provider
            .get_proof(address, slots.clone())
            .block_id(BlockId::number(block))
            .await
            .map_err(|e| match RelayError::from_rpc(e) {
                // A node that cannot serve state for a block is not transient
                RelayError::RpcUnavailable(msg) if msg.contains("header not found") => {
                    RelayError::ProofUnavailable(msg)
                }
                other => other,
            })?;

        let storage_proof = response
            .storage_proof
            .into_iter()
            .zip(slots)
            .map(|(proof, key)| StorageSlotProof {
                key,
                value: proof.value,
                proof: proof.proof,
            })
            .collect();

        Ok(AccountProof {
            address: response.address,
            storage_hash: response.storage_hash,
            account_proof: response.account_proof,
            storage_proof,
        })
    }

    async fn get_block(&self, tag: BlockTag) -> Result<BlockHeader, RelayError> {
        let number = match tag {
            BlockTag::Latest => BlockNumberOrTag::Latest,
            BlockTag::Number(n) => BlockNumberOrTag::Number(n),
        };
        let block = self
            .provider
            .get_block_by_number(number, BlockTransactionsKind::Hashes)
            .await
            .map_err(RelayError::from_rpc)?
            .ok_or_else(|| RelayError::RpcUnavailable(format!("block {number} not found")))?;

        Ok(BlockHeader {
            number: block.header.number,
            hash: block.header.hash,
            state_root: block.header.state_root,
            timestamp: block.header.timestamp,
        })
    }

    async fn block_number(&self) -> Result<u64, RelayError> {
        self.provider
            .get_block_number()
            .await
            .map_err(RelayError::from_rpc)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RelayError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.provider.call(&tx).await.map_err(RelayError::from_rpc)
    }

    async fn transaction_input(&self, tx_hash: B256) -> Result<Bytes, RelayError> {
        let tx = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(RelayError::from_rpc)?
            .ok_or_else(|| RelayError::Decode(format!("transaction {tx_hash} not found")))?;
        Ok(tx.input().clone())
    }
}
