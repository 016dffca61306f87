//! SentMessage extraction
//!
//! Turns a source transaction receipt into the list of cross-domain messages
//! it emitted, in log order.

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolEvent;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::contracts::IL2CrossDomainMessenger::SentMessage;
use crate::error::RelayError;
use crate::types::{CrossDomainMessage, Receipt, SentMessageRecord};

/// Decodes `SentMessage(bytes)` logs emitted by one messenger
#[derive(Debug, Clone)]
pub struct MessageExtractor {
    messenger: Address,
    block_offset: u64,
}

impl MessageExtractor {
    /// `block_offset` is subtracted from the log's block number to get the
    /// index of the state root that commits it
    pub fn new(messenger: Address, block_offset: u64) -> Self {
        Self {
            messenger,
            block_offset,
        }
    }

    pub fn messenger(&self) -> Address {
        self.messenger
    }

    pub fn extract_messages(&self, receipt: &Receipt) -> Result<Vec<SentMessageRecord>, RelayError> {
        let mut seen_nonces: HashSet<U256> = HashSet::new();
        let mut records = Vec::new();

        for log in &receipt.logs {
            if log.address != self.messenger
                || log.topics.first() != Some(&SentMessage::SIGNATURE_HASH)
            {
                continue;
            }

            let event = SentMessage::abi_decode_data(&log.data, true).map_err(|e| {
                RelayError::Decode(format!(
                    "SentMessage log {} in {}: {e}",
                    log.log_index, receipt.tx_hash
                ))
            })?;
            let encoded_message = event.0;
            let message = CrossDomainMessage::decode(&encoded_message)?;

            if !seen_nonces.insert(message.nonce) {
                warn!(
                    tx_hash = %receipt.tx_hash,
                    nonce = %message.nonce,
                    "Duplicate message nonce in one transaction, skipping"
                );
                continue;
            }

            let parent_block_index = log
                .block_number
                .checked_sub(self.block_offset)
                .ok_or_else(|| {
                    RelayError::Decode(format!(
                        "log block {} is below the block offset {}",
                        log.block_number, self.block_offset
                    ))
                })?;

            debug!(
                tx_hash = %receipt.tx_hash,
                nonce = %message.nonce,
                target = %message.target,
                parent_block_index,
                "Extracted cross-domain message"
            );

            records.push(SentMessageRecord {
                encoded_message_hash: alloy::primitives::keccak256(&encoded_message),
                encoded_message,
                message,
                parent_block_index,
                parent_tx_hash: receipt.tx_hash,
                log_index: log.log_index,
            });
        }

        Ok(records)
    }
}
