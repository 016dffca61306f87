//! Inclusion proof construction
//!
//! A relay into L1 must prove two things: the state root at the message's
//! block index is part of a committed batch (Merkle path), and the message
//! passer's storage under that state root records the message (trie
//! witnesses from `eth_getProof`).

use alloy::primitives::{Address, Bytes, U256};
use std::sync::Arc;
use tracing::debug;

use crate::chain::ChainClient;
use crate::commitment::CommitmentSource;
use crate::error::RelayError;
use crate::hash::message_slot;
use crate::merkle::MerkleTree;
use crate::types::{SentMessageProof, SentMessageRecord, StateRootBatchHeader, StateRootProof};

/// Where the source chain records sent messages
#[derive(Debug, Clone, Copy)]
pub struct MessagePasser {
    pub address: Address,
    /// Messenger whose address is mixed into the storage key
    pub messenger: Address,
    /// Added to the parent block index to get the block to prove against
    pub block_offset: u64,
}

/// Builds [`SentMessageProof`]s for one route
pub struct ProofBuilder {
    source: Arc<dyn CommitmentSource>,
    chain: Arc<dyn ChainClient>,
    message_passer: Option<MessagePasser>,
}

impl ProofBuilder {
    /// `message_passer` is `None` on trusted routes, which carry no trie witnesses
    pub fn new(
        source: Arc<dyn CommitmentSource>,
        chain: Arc<dyn ChainClient>,
        message_passer: Option<MessagePasser>,
    ) -> Self {
        Self {
            source,
            chain,
            message_passer,
        }
    }

    pub fn has_witnesses(&self) -> bool {
        self.message_passer.is_some()
    }

    pub async fn build_proof(
        &self,
        record: &SentMessageRecord,
        header: &StateRootBatchHeader,
    ) -> Result<SentMessageProof, RelayError> {
        let block_index = record.parent_block_index;
        if !header.contains(block_index) {
            return Err(RelayError::BatchNotFound { index: block_index });
        }

        let state_roots = self.source.state_roots(header).await?;
        let index = (U256::from(block_index) - header.prev_total_elements).to::<u64>();
        let position = index as usize;
        if position >= state_roots.len() {
            return Err(RelayError::BatchNotFound { index: block_index });
        }

        let tree = MerkleTree::new(&state_roots)
            .ok_or(RelayError::BatchNotFound { index: block_index })?;
        if tree.root() != header.batch_root {
            return Err(RelayError::ProofUnavailable(format!(
                "batch {} root mismatch: computed {}, committed {}",
                header.batch_index,
                tree.root(),
                header.batch_root
            )));
        }
        let siblings = tree
            .proof(position)
            .ok_or(RelayError::BatchNotFound { index: block_index })?;

        let (state_trie_witness, storage_trie_witness) = match &self.message_passer {
            Some(passer) => self.trie_witnesses(record, passer).await?,
            None => (Bytes::new(), Bytes::new()),
        };

        debug!(
            nonce = %record.message.nonce,
            batch_index = %header.batch_index,
            index,
            depth = siblings.len(),
            "Built inclusion proof"
        );

        Ok(SentMessageProof {
            state_root: state_roots[position],
            batch_header: header.clone(),
            state_root_proof: StateRootProof { index, siblings },
            state_trie_witness,
            storage_trie_witness,
        })
    }

    async fn trie_witnesses(
        &self,
        record: &SentMessageRecord,
        passer: &MessagePasser,
    ) -> Result<(Bytes, Bytes), RelayError> {
        let slot = message_slot(&record.encoded_message, passer.messenger);
        let block = record.parent_block_index + passer.block_offset;
        let proof = self.chain.get_proof(passer.address, vec![slot], block).await?;

        let storage = proof.storage_proof.first().ok_or_else(|| {
            RelayError::ProofUnavailable(format!("no storage proof for slot {slot} at block {block}"))
        })?;
        if storage.value.is_zero() {
            return Err(RelayError::ProofUnavailable(format!(
                "message passer has no record of message {} at block {block}",
                record.encoded_message_hash
            )));
        }

        let state_trie_witness = alloy_rlp::encode(&proof.account_proof);
        let storage_trie_witness = alloy_rlp::encode(&storage.proof);
        Ok((state_trie_witness.into(), storage_trie_witness.into()))
    }
}
