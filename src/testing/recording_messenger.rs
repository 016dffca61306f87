//! Destination messenger that executes relays in memory

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::contracts::IL2CrossDomainMessenger::{FailedRelayedMessage, RelayedMessage, SentMessage};
use crate::error::RelayError;
use crate::merkle::verify;
use crate::messenger::Messenger;
use crate::types::{CrossDomainMessage, LogEntry, Receipt, SentMessageProof};

/// Executes a relayed message's payload; `Err` models a reverting target
pub type RelayHandler = Arc<dyn Fn(&CrossDomainMessage) -> Result<(), String> + Send + Sync>;

/// One executed relay
#[derive(Debug, Clone)]
pub struct RecordedRelay {
    pub message: CrossDomainMessage,
    pub proof: Option<SentMessageProof>,
    pub tx_hash: B256,
    pub succeeded: bool,
}

#[derive(Default)]
struct MessengerState {
    successful: HashSet<B256>,
    relays: Vec<RecordedRelay>,
    failures: VecDeque<RelayError>,
    handler: Option<RelayHandler>,
    skip_precheck: bool,
    require_proof: bool,
    nonce: u64,
    block: u64,
    x_domain_sender: Address,
}

pub struct RecordingMessenger {
    address: Address,
    state: Mutex<MessengerState>,
}

impl RecordingMessenger {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            state: Mutex::new(MessengerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MessengerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&CrossDomainMessage) -> Result<(), String> + Send + Sync + 'static,
    {
        self.lock().handler = Some(Arc::new(handler));
    }

    /// Report every message as not yet relayed from `successfulMessages`
    pub fn skip_precheck(&self, skip: bool) {
        self.lock().skip_precheck = skip;
    }

    /// Reject relays without a Merkle path that checks out against the batch root
    pub fn require_proof(&self, require: bool) {
        self.lock().require_proof = require;
    }

    /// Fail the next relay transaction with `error`
    pub fn fail_next(&self, error: RelayError) {
        self.lock().failures.push_back(error);
    }

    /// Number of relay transactions that were mined
    pub fn relay_count(&self) -> usize {
        self.lock().relays.len()
    }

    pub fn relays(&self) -> Vec<RecordedRelay> {
        self.lock().relays.clone()
    }

    fn receipt(&self, state: &mut MessengerState, tag: &str, logs: Vec<(B256, Bytes)>) -> Receipt {
        state.block += 1;
        let tx_hash = keccak256(format!("{}/{tag}/{}", self.address, state.block));
        Receipt {
            tx_hash,
            block_number: state.block,
            status: true,
            logs: logs
                .into_iter()
                .enumerate()
                .map(|(i, (topic, data))| LogEntry {
                    address: self.address,
                    topics: vec![topic],
                    data,
                    block_number: state.block,
                    tx_hash,
                    log_index: i as u64,
                })
                .collect(),
        }
    }
}

fn proof_checks_out(proof: Option<&SentMessageProof>) -> bool {
    proof.is_some_and(|p| {
        !p.state_trie_witness.is_empty()
            && !p.storage_trie_witness.is_empty()
            && verify(
                p.state_root,
                p.state_root_proof.index,
                &p.state_root_proof.siblings,
                p.batch_header.batch_root,
            )
    })
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn address(&self) -> Address {
        self.address
    }

    async fn relay_message(
        &self,
        message: &CrossDomainMessage,
        proof: Option<&SentMessageProof>,
    ) -> Result<Receipt, RelayError> {
        let mut state = self.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        let hash = message.hash();
        if state.require_proof && !proof_checks_out(proof) {
            return Err(RelayError::TxRejected {
                tx_hash: None,
                reason: "execution reverted: Provided message could not be verified.".to_string(),
            });
        }
        if state.successful.contains(&hash) {
            return Err(RelayError::TxRejected {
                tx_hash: None,
                reason: "execution reverted: Provided message has already been received."
                    .to_string(),
            });
        }

        state.x_domain_sender = message.sender;
        let result = match state.handler.clone() {
            Some(handler) => handler(message),
            None => Ok(()),
        };

        let succeeded = result.is_ok();
        let event = if succeeded {
            state.successful.insert(hash);
            (
                RelayedMessage::SIGNATURE_HASH,
                Bytes::from(RelayedMessage { msgHash: hash }.encode_data()),
            )
        } else {
            (
                FailedRelayedMessage::SIGNATURE_HASH,
                Bytes::from(FailedRelayedMessage { msgHash: hash }.encode_data()),
            )
        };
        let receipt = self.receipt(&mut state, "relay", vec![event]);
        state.relays.push(RecordedRelay {
            message: message.clone(),
            proof: proof.cloned(),
            tx_hash: receipt.tx_hash,
            succeeded,
        });
        Ok(receipt)
    }

    async fn send_message(
        &self,
        target: Address,
        message: Bytes,
        _gas_limit: u32,
    ) -> Result<Receipt, RelayError> {
        let mut state = self.lock();
        let sent = CrossDomainMessage {
            target,
            sender: Address::ZERO,
            payload: message,
            nonce: U256::from(state.nonce),
        };
        state.nonce += 1;
        let data = Bytes::from(
            SentMessage {
                message: sent.encode(),
            }
            .encode_data(),
        );
        Ok(self.receipt(&mut state, "send", vec![(SentMessage::SIGNATURE_HASH, data)]))
    }

    async fn is_relayed(&self, message_hash: B256) -> Result<bool, RelayError> {
        let state = self.lock();
        Ok(!state.skip_precheck && state.successful.contains(&message_hash))
    }

    async fn message_nonce(&self) -> Result<U256, RelayError> {
        Ok(U256::from(self.lock().nonce))
    }

    async fn x_domain_message_sender(&self) -> Result<Address, RelayError> {
        Ok(self.lock().x_domain_sender)
    }
}
