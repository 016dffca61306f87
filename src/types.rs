//! Common types for cross-domain relaying
//!
//! Messages, proofs and relay attempts flow between the pipeline stages as
//! these plain structs. Chain-facing data (logs, receipts, headers, account
//! proofs) is kept independent of alloy's RPC types so fakes can build it
//! directly.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contracts::{
    ChainBatchHeader, ChainInclusionProof, IL2CrossDomainMessenger, L2MessageInclusionProof,
};
use crate::error::RelayError;

// ============================================================================
// Messages
// ============================================================================

/// A decoded cross-domain message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossDomainMessage {
    pub target: Address,
    pub sender: Address,
    pub payload: Bytes,
    pub nonce: U256,
}

impl CrossDomainMessage {
    /// Canonical `relayMessage(target, sender, message, nonce)` calldata
    pub fn encode(&self) -> Bytes {
        IL2CrossDomainMessenger::relayMessageCall {
            _target: self.target,
            _sender: self.sender,
            _message: self.payload.clone(),
            _messageNonce: self.nonce,
        }
        .abi_encode()
        .into()
    }

    /// Hash of the canonical calldata, used by `successfulMessages`
    pub fn hash(&self) -> B256 {
        alloy::primitives::keccak256(self.encode())
    }

    /// Decode the canonical calldata carried by a `SentMessage` event
    pub fn decode(encoded: &[u8]) -> Result<Self, RelayError> {
        let call = IL2CrossDomainMessenger::relayMessageCall::abi_decode(encoded, true)
            .map_err(|e| RelayError::Decode(format!("relayMessage calldata: {e}")))?;
        Ok(Self {
            target: call._target,
            sender: call._sender,
            payload: call._message,
            nonce: call._messageNonce,
        })
    }
}

/// One `SentMessage` log, decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessageRecord {
    pub message: CrossDomainMessage,
    pub encoded_message: Bytes,
    pub encoded_message_hash: B256,
    /// Source block number minus the protocol block offset
    pub parent_block_index: u64,
    pub parent_tx_hash: B256,
    pub log_index: u64,
}

// ============================================================================
// Commitments and proofs
// ============================================================================

/// One committed batch of state roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRootBatchHeader {
    pub batch_index: U256,
    pub batch_root: B256,
    pub batch_size: U256,
    pub prev_total_elements: U256,
    pub extra_data: Bytes,
}

impl StateRootBatchHeader {
    /// Whether `index` falls in `[prev_total_elements, prev_total_elements + batch_size)`
    pub fn contains(&self, index: u64) -> bool {
        let index = U256::from(index);
        index >= self.prev_total_elements && index < self.prev_total_elements + self.batch_size
    }
}

impl From<StateRootBatchHeader> for ChainBatchHeader {
    fn from(header: StateRootBatchHeader) -> Self {
        ChainBatchHeader {
            batchIndex: header.batch_index,
            batchRoot: header.batch_root,
            batchSize: header.batch_size,
            prevTotalElements: header.prev_total_elements,
            extraData: header.extra_data,
        }
    }
}

/// Merkle path of one state root inside its batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRootProof {
    pub index: u64,
    pub siblings: Vec<B256>,
}

/// Everything the L1 messenger needs to authenticate a relayed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessageProof {
    pub state_root: B256,
    pub batch_header: StateRootBatchHeader,
    pub state_root_proof: StateRootProof,
    pub state_trie_witness: Bytes,
    pub storage_trie_witness: Bytes,
}

impl From<SentMessageProof> for L2MessageInclusionProof {
    fn from(proof: SentMessageProof) -> Self {
        L2MessageInclusionProof {
            stateRoot: proof.state_root,
            stateRootBatchHeader: proof.batch_header.into(),
            stateRootProof: ChainInclusionProof {
                index: U256::from(proof.state_root_proof.index),
                siblings: proof.state_root_proof.siblings,
            },
            stateTrieWitness: proof.state_trie_witness,
            storageTrieWitness: proof.storage_trie_witness,
        }
    }
}

// ============================================================================
// Relay bookkeeping
// ============================================================================

/// Relay direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// L1 → L2
    Deposit,
    /// L2 → L1
    Withdrawal,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => "deposit",
            Direction::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing status of a relay attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Pending,
    Relayed,
    Failed,
}

impl RelayStatus {
    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::Pending => "pending",
            RelayStatus::Relayed => "relayed",
            RelayStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RelayStatus::Pending),
            "relayed" => Some(RelayStatus::Relayed),
            "failed" => Some(RelayStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Successful end states of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RelayOutcome {
    /// Our transaction executed the message
    Relayed { tx_hash: B256, block_number: u64 },
    /// The destination had already processed this message
    AlreadyRelayed,
}

/// Mutable record of one message's trip through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAttempt {
    pub source_chain_id: u64,
    pub direction: Direction,
    pub message: CrossDomainMessage,
    pub message_hash: B256,
    pub parent_tx_hash: B256,
    pub proof: Option<SentMessageProof>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// [`RelayError::kind`] of the last failure
    pub error_kind: Option<String>,
    pub status: RelayStatus,
    pub outcome: Option<RelayOutcome>,
}

impl RelayAttempt {
    pub fn new(source_chain_id: u64, direction: Direction, record: &SentMessageRecord) -> Self {
        Self {
            source_chain_id,
            direction,
            message: record.message.clone(),
            message_hash: record.encoded_message_hash,
            parent_tx_hash: record.parent_tx_hash,
            proof: None,
            retry_count: 0,
            last_error: None,
            error_kind: None,
            status: RelayStatus::Pending,
            outcome: None,
        }
    }

    /// Record a failed step that will be retried
    pub fn record_failure(&mut self, error: &RelayError) {
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.error_kind = Some(error.kind().to_string());
    }

    pub fn mark_relayed(&mut self, outcome: RelayOutcome) {
        self.status = RelayStatus::Relayed;
        self.outcome = Some(outcome);
    }

    pub fn mark_failed(&mut self, error: &RelayError) {
        self.status = RelayStatus::Failed;
        self.last_error = Some(error.to_string());
        self.error_kind = Some(error.kind().to_string());
    }

    pub fn is_final(&self) -> bool {
        self.status != RelayStatus::Pending
    }

    /// Whether a later run may still relay this message
    ///
    /// Interrupted attempts are left `Pending`. Failures count only when
    /// their cause can clear by itself (a late batch, a flaky node).
    pub fn is_resumable(&self) -> bool {
        match self.status {
            RelayStatus::Pending => true,
            RelayStatus::Relayed => false,
            RelayStatus::Failed => self
                .error_kind
                .as_deref()
                .is_some_and(crate::error::is_resumable_kind),
        }
    }
}

/// Result of relaying every message emitted by one source transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayReport {
    pub direction: Direction,
    pub source_tx: B256,
    pub attempts: Vec<RelayAttempt>,
}

impl RelayReport {
    /// True when every extracted message ended up relayed (or there were none)
    pub fn is_success(&self) -> bool {
        self.attempts
            .iter()
            .all(|a| a.status == RelayStatus::Relayed)
    }
}

// ============================================================================
// Chain data
// ============================================================================

/// A log entry as returned by `eth_getLogs` or inside a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// A mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub status: bool,
    pub logs: Vec<LogEntry>,
}

/// The subset of a block header the pipeline uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub state_root: B256,
    pub timestamp: u64,
}

/// One storage slot proof from `eth_getProof`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSlotProof {
    pub key: B256,
    pub value: U256,
    pub proof: Vec<Bytes>,
}

/// Account and storage proof from `eth_getProof`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProof {
    pub address: Address,
    pub storage_hash: B256,
    pub account_proof: Vec<Bytes>,
    pub storage_proof: Vec<StorageSlotProof>,
}

/// Log query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub event_signature: Option<B256>,
    /// First indexed topic, if filtering on it
    pub topic1: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn new(address: Address, from_block: u64, to_block: u64) -> Self {
        Self {
            address,
            event_signature: None,
            topic1: None,
            from_block,
            to_block,
        }
    }

    pub fn event_signature(mut self, signature: B256) -> Self {
        self.event_signature = Some(signature);
        self
    }

    pub fn topic1(mut self, topic: B256) -> Self {
        self.topic1 = Some(topic);
        self
    }

    /// Whether a log satisfies this filter (used by in-memory chains)
    pub fn matches(&self, log: &LogEntry) -> bool {
        log.address == self.address
            && log.block_number >= self.from_block
            && log.block_number <= self.to_block
            && self
                .event_signature
                .map_or(true, |sig| log.topics.first() == Some(&sig))
            && self.topic1.map_or(true, |t| log.topics.get(1) == Some(&t))
    }
}

/// A state-changing contract call to sign and submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub input: Bytes,
    pub value: U256,
}

impl ContractCall {
    pub fn new(to: Address, input: impl Into<Bytes>) -> Self {
        Self {
            to,
            input: input.into(),
            value: U256::ZERO,
        }
    }
}
