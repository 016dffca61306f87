//! In-memory EVM chain
//!
//! Mines one block per transaction. Emulates just enough contract behaviour
//! for the relay pipeline: messenger `SentMessage` logs, message passer
//! storage, state commitment chain views and events, and canned `eth_call`
//! responses for everything else.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::chain::{BlockTag, ChainClient};
use crate::contracts::IL2CrossDomainMessenger::{sendMessageCall, SentMessage};
use crate::contracts::IStateCommitmentChain::{
    appendStateBatchCall, getTotalBatchesCall, getTotalElementsCall, insideFraudProofWindowCall,
    StateBatchAppended,
};
use crate::error::RelayError;
use crate::hash::message_slot;
use crate::merkle::compute_root;
use crate::types::{
    AccountProof, BlockHeader, ContractCall, CrossDomainMessage, LogEntry, LogFilter, Receipt,
    StateRootBatchHeader, StorageSlotProof,
};

#[derive(Default)]
struct ChainState {
    blocks: Vec<BlockHeader>,
    receipts: HashMap<B256, Receipt>,
    inputs: HashMap<B256, Bytes>,
    logs: Vec<LogEntry>,
    storage: HashMap<(Address, B256), U256>,
    call_responses: HashMap<(Address, Bytes), Bytes>,
    state_batches: HashMap<Address, Vec<StateRootBatchHeader>>,
    fraud_proof_window_open: bool,
    submitted: Vec<ContractCall>,
    submit_failures: VecDeque<RelayError>,
    message_nonces: HashMap<Address, u64>,
    message_passer: Option<Address>,
    unavailable: bool,
    state_pruned: bool,
    max_log_range: Option<u64>,
    log_queries: usize,
    receipt_failures: usize,
    proof_failures: usize,
}

/// A single-node chain held in memory
pub struct FakeChain {
    chain_id: u64,
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new(chain_id: u64) -> Self {
        let genesis = BlockHeader {
            number: 0,
            hash: keccak256(format!("{chain_id}/block/0")),
            state_root: keccak256(format!("{chain_id}/state/0")),
            timestamp: 1_600_000_000,
        };
        Self {
            chain_id,
            state: Mutex::new(ChainState {
                blocks: vec![genesis],
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Chain building
    // ------------------------------------------------------------------

    /// Mine a transaction to `to` emitting `logs` (address, topics, data)
    pub fn mine_tx(
        &self,
        to: Address,
        input: Bytes,
        logs: Vec<(Address, Vec<B256>, Bytes)>,
    ) -> Receipt {
        let mut state = self.lock();
        Self::mine_locked(self.chain_id, &mut state, to, input, logs)
    }

    fn mine_locked(
        chain_id: u64,
        state: &mut ChainState,
        to: Address,
        input: Bytes,
        logs: Vec<(Address, Vec<B256>, Bytes)>,
    ) -> Receipt {
        let number = state.blocks.len() as u64;
        let tx_hash = keccak256(format!("{chain_id}/tx/{number}/{to}"));
        let header = BlockHeader {
            number,
            hash: keccak256(format!("{chain_id}/block/{number}")),
            state_root: keccak256(format!("{chain_id}/state/{number}/{tx_hash}")),
            timestamp: 1_600_000_000 + number * 12,
        };
        state.blocks.push(header);

        let logs: Vec<LogEntry> = logs
            .into_iter()
            .enumerate()
            .map(|(i, (address, topics, data))| LogEntry {
                address,
                topics,
                data,
                block_number: number,
                tx_hash,
                log_index: i as u64,
            })
            .collect();
        state.logs.extend(logs.iter().cloned());

        let receipt = Receipt {
            tx_hash,
            block_number: number,
            status: true,
            logs,
        };
        state.receipts.insert(tx_hash, receipt.clone());
        state.inputs.insert(tx_hash, input);
        receipt
    }

    /// Mine `count` empty blocks
    pub fn mine_blocks(&self, count: u64) {
        for _ in 0..count {
            self.mine_tx(Address::ZERO, Bytes::new(), vec![]);
        }
    }

    /// Record sent messages in the message passer at this address
    pub fn set_message_passer(&self, address: Address) {
        self.lock().message_passer = Some(address);
    }

    /// Send one message through `messenger` in its own transaction
    pub fn send_message(
        &self,
        messenger: Address,
        target: Address,
        sender: Address,
        payload: Bytes,
    ) -> (B256, CrossDomainMessage) {
        let (tx_hash, mut messages) = self.send_messages(messenger, sender, &[(target, payload)]);
        (tx_hash, messages.remove(0))
    }

    /// Send several messages through `messenger` in one transaction
    pub fn send_messages(
        &self,
        messenger: Address,
        sender: Address,
        calls: &[(Address, Bytes)],
    ) -> (B256, Vec<CrossDomainMessage>) {
        let mut state = self.lock();
        let mut messages = Vec::with_capacity(calls.len());
        let mut logs = Vec::with_capacity(calls.len());

        for (target, payload) in calls {
            let nonce = state.message_nonces.entry(messenger).or_insert(0);
            let message = CrossDomainMessage {
                target: *target,
                sender,
                payload: payload.clone(),
                nonce: U256::from(*nonce),
            };
            *nonce += 1;

            let encoded = message.encode();
            if let Some(passer) = state.message_passer {
                state
                    .storage
                    .insert((passer, message_slot(&encoded, messenger)), U256::from(1));
            }
            let event = SentMessage { message: encoded };
            logs.push((
                messenger,
                vec![SentMessage::SIGNATURE_HASH],
                Bytes::from(event.encode_data()),
            ));
            messages.push(message);
        }

        let input = calls
            .first()
            .map(|(target, payload)| {
                Bytes::from(
                    sendMessageCall {
                        _target: *target,
                        _message: payload.clone(),
                        _gasLimit: 1_000_000,
                    }
                    .abi_encode(),
                )
            })
            .unwrap_or_default();
        let receipt = Self::mine_locked(self.chain_id, &mut state, messenger, input, logs);
        (receipt.tx_hash, messages)
    }

    /// Deploy an empty state commitment chain at `scc`
    pub fn deploy_state_commitment_chain(&self, scc: Address) {
        self.lock().state_batches.entry(scc).or_default();
    }

    /// Append a batch to the state commitment chain at `scc`
    pub fn append_state_batch(&self, scc: Address, roots: &[B256]) -> StateRootBatchHeader {
        let mut state = self.lock();
        let batches = state.state_batches.entry(scc).or_default();
        let prev_total: U256 = batches.iter().map(|b| b.batch_size).sum();
        let header = StateRootBatchHeader {
            batch_index: U256::from(batches.len()),
            batch_root: compute_root(roots).unwrap_or_default(),
            batch_size: U256::from(roots.len()),
            prev_total_elements: prev_total,
            extra_data: Bytes::new(),
        };
        batches.push(header.clone());

        let input = appendStateBatchCall {
            _batch: roots.to_vec(),
            _shouldStartAtElement: prev_total,
        }
        .abi_encode();
        let event = StateBatchAppended {
            _batchIndex: header.batch_index,
            _batchRoot: header.batch_root,
            _batchSize: header.batch_size,
            _prevTotalElements: header.prev_total_elements,
            _extraData: Bytes::new(),
        };
        let log = (
            scc,
            vec![
                StateBatchAppended::SIGNATURE_HASH,
                B256::from(header.batch_index),
            ],
            Bytes::from(event.encode_data()),
        );
        Self::mine_locked(self.chain_id, &mut state, scc, input.into(), vec![log]);
        header
    }

    /// Number of state roots committed at `scc`
    pub fn committed_elements(&self, scc: Address) -> u64 {
        self.lock()
            .state_batches
            .get(&scc)
            .map(|batches| batches.iter().map(|b| b.batch_size.to::<u64>()).sum())
            .unwrap_or(0)
    }

    pub fn set_fraud_proof_window_open(&self, open: bool) {
        self.lock().fraud_proof_window_open = open;
    }

    pub fn set_storage(&self, address: Address, slot: B256, value: U256) {
        self.lock().storage.insert((address, slot), value);
    }

    /// Answer `eth_call(to, calldata)` with `response`
    pub fn set_call_response(&self, to: Address, calldata: Vec<u8>, response: Vec<u8>) {
        self.lock()
            .call_responses
            .insert((to, Bytes::from(calldata)), Bytes::from(response));
    }

    /// Fail the next submitted transaction with `error`
    pub fn fail_next_submit(&self, error: RelayError) {
        self.lock().submit_failures.push_back(error);
    }

    /// Make every RPC fail with `RpcUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make `eth_getProof` fail as a pruned node would
    pub fn set_state_pruned(&self, pruned: bool) {
        self.lock().state_pruned = pruned;
    }

    /// Refuse `eth_getLogs` spanning more than `range` blocks, like public nodes do
    pub fn set_max_log_range(&self, range: Option<u64>) {
        self.lock().max_log_range = range;
    }

    /// Fail the next `count` receipt lookups with `RpcUnavailable`
    pub fn fail_next_receipts(&self, count: usize) {
        self.lock().receipt_failures = count;
    }

    /// Fail the next `count` `eth_getProof` calls with `RpcUnavailable`
    pub fn fail_next_proofs(&self, count: usize) {
        self.lock().proof_failures = count;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn head(&self) -> u64 {
        self.lock().blocks.len() as u64 - 1
    }

    pub fn block(&self, number: u64) -> Option<BlockHeader> {
        self.lock().blocks.get(number as usize).copied()
    }

    pub fn submitted_calls(&self) -> Vec<ContractCall> {
        self.lock().submitted.clone()
    }

    /// Number of `eth_getLogs` requests served so far
    pub fn log_queries(&self) -> usize {
        self.lock().log_queries
    }

    fn check_available(&self) -> Result<(), RelayError> {
        if self.lock().unavailable {
            return Err(RelayError::RpcUnavailable(format!(
                "chain {}: connection refused",
                self.chain_id
            )));
        }
        Ok(())
    }

    fn scc_view(&self, to: Address, data: &[u8]) -> Option<Result<Bytes, RelayError>> {
        let state = self.lock();
        let batches = state.state_batches.get(&to)?;
        let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;

        let response = match selector {
            <getTotalElementsCall as SolCall>::SELECTOR => {
                let total: U256 = batches.iter().map(|b| b.batch_size).sum();
                getTotalElementsCall::abi_encode_returns(&(total,))
            }
            <getTotalBatchesCall as SolCall>::SELECTOR => {
                getTotalBatchesCall::abi_encode_returns(&(U256::from(batches.len()),))
            }
            <insideFraudProofWindowCall as SolCall>::SELECTOR => {
                insideFraudProofWindowCall::abi_encode_returns(&(state.fraud_proof_window_open,))
            }
            _ => return Some(Err(execution_reverted())),
        };
        Some(Ok(Bytes::from(response)))
    }
}

fn execution_reverted() -> RelayError {
    RelayError::TxRejected {
        tx_hash: None,
        reason: "execution reverted".to_string(),
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn submit_and_wait(&self, call: ContractCall) -> Result<Receipt, RelayError> {
        self.check_available()?;
        let mut state = self.lock();
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }
        state.submitted.push(call.clone());
        Ok(Self::mine_locked(
            self.chain_id,
            &mut state,
            call.to,
            call.input,
            vec![],
        ))
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RelayError> {
        self.check_available()?;
        let mut state = self.lock();
        if state.receipt_failures > 0 {
            state.receipt_failures -= 1;
            return Err(RelayError::RpcUnavailable("connection reset by peer".to_string()));
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, RelayError> {
        self.check_available()?;
        let mut state = self.lock();
        state.log_queries += 1;
        if let Some(max) = state.max_log_range {
            let span = filter.to_block.saturating_sub(filter.from_block) + 1;
            if span > max {
                return Err(RelayError::RpcUnavailable(format!(
                    "block range too large: {span} > {max}"
                )));
            }
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<B256>,
        block: u64,
    ) -> Result<AccountProof, RelayError> {
        self.check_available()?;
        let mut state = self.lock();
        if state.proof_failures > 0 {
            state.proof_failures -= 1;
            return Err(RelayError::RpcUnavailable("connection reset by peer".to_string()));
        }
        if state.state_pruned {
            return Err(RelayError::ProofUnavailable(format!(
                "missing trie node at block {block}"
            )));
        }
        if block as usize >= state.blocks.len() {
            return Err(RelayError::ProofUnavailable(format!("header not found: {block}")));
        }

        let storage_proof = slots
            .into_iter()
            .map(|slot| StorageSlotProof {
                key: slot,
                value: state.storage.get(&(address, slot)).copied().unwrap_or_default(),
                proof: vec![Bytes::copy_from_slice(keccak256(slot).as_slice())],
            })
            .collect();

        Ok(AccountProof {
            address,
            storage_hash: keccak256(address),
            account_proof: vec![Bytes::copy_from_slice(
                state.blocks[block as usize].state_root.as_slice(),
            )],
            storage_proof,
        })
    }

    async fn get_block(&self, tag: BlockTag) -> Result<BlockHeader, RelayError> {
        self.check_available()?;
        let state = self.lock();
        let block = match tag {
            BlockTag::Latest => state.blocks.last(),
            BlockTag::Number(n) => state.blocks.get(n as usize),
        };
        block
            .copied()
            .ok_or_else(|| RelayError::RpcUnavailable(format!("block {tag:?} not found")))
    }

    async fn block_number(&self) -> Result<u64, RelayError> {
        self.check_available()?;
        Ok(self.head())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RelayError> {
        self.check_available()?;
        if let Some(result) = self.scc_view(to, &data) {
            return result;
        }
        self.lock()
            .call_responses
            .get(&(to, data))
            .cloned()
            .ok_or_else(execution_reverted)
    }

    async fn transaction_input(&self, tx_hash: B256) -> Result<Bytes, RelayError> {
        self.check_available()?;
        self.lock()
            .inputs
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| RelayError::Decode(format!("transaction {tx_hash} not found")))
    }
}
