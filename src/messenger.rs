//! Cross-domain messenger access

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;

use crate::chain::ChainClient;
use crate::contracts::{IL1CrossDomainMessenger, IL2CrossDomainMessenger};
use crate::error::RelayError;
use crate::types::{ContractCall, CrossDomainMessage, Receipt, SentMessageProof};

/// Operations on one messenger contract
#[async_trait]
pub trait Messenger: Send + Sync {
    fn address(&self) -> Address;

    /// Execute a message on this messenger. A proof selects the
    /// proof-carrying L1 entry point.
    async fn relay_message(
        &self,
        message: &CrossDomainMessage,
        proof: Option<&SentMessageProof>,
    ) -> Result<Receipt, RelayError>;

    async fn send_message(
        &self,
        target: Address,
        message: Bytes,
        gas_limit: u32,
    ) -> Result<Receipt, RelayError>;

    /// `successfulMessages(hash)`
    async fn is_relayed(&self, message_hash: B256) -> Result<bool, RelayError>;

    async fn message_nonce(&self) -> Result<U256, RelayError>;

    async fn x_domain_message_sender(&self) -> Result<Address, RelayError>;
}

/// Messenger deployed on an EVM chain
pub struct EvmMessenger {
    client: Arc<dyn ChainClient>,
    address: Address,
}

impl EvmMessenger {
    pub fn new(client: Arc<dyn ChainClient>, address: Address) -> Self {
        Self { client, address }
    }

    async fn view<C: SolCall>(&self, call: C) -> Result<C::Return, RelayError> {
        let raw = self.client.call(self.address, call.abi_encode().into()).await?;
        C::abi_decode_returns(&raw, true)
            .map_err(|e| RelayError::Decode(format!("{} return data: {e}", C::SIGNATURE)))
    }
}

/// Calldata for relaying `message`, with or without an inclusion proof
pub fn relay_calldata(message: &CrossDomainMessage, proof: Option<&SentMessageProof>) -> Bytes {
    match proof {
        Some(proof) => IL1CrossDomainMessenger::relayMessageCall {
            _target: message.target,
            _sender: message.sender,
            _message: message.payload.clone(),
            _messageNonce: message.nonce,
            _proof: proof.clone().into(),
        }
        .abi_encode()
        .into(),
        None => message.encode(),
    }
}

#[async_trait]
impl Messenger for EvmMessenger {
    fn address(&self) -> Address {
        self.address
    }

    async fn relay_message(
        &self,
        message: &CrossDomainMessage,
        proof: Option<&SentMessageProof>,
    ) -> Result<Receipt, RelayError> {
        let input = relay_calldata(message, proof);
        self.client
            .submit_and_wait(ContractCall::new(self.address, input))
            .await
    }

    async fn send_message(
        &self,
        target: Address,
        message: Bytes,
        gas_limit: u32,
    ) -> Result<Receipt, RelayError> {
        let input = IL2CrossDomainMessenger::sendMessageCall {
            _target: target,
            _message: message,
            _gasLimit: gas_limit,
        }
        .abi_encode();
        self.client
            .submit_and_wait(ContractCall::new(self.address, input))
            .await
    }

    async fn is_relayed(&self, message_hash: B256) -> Result<bool, RelayError> {
        let ret = self
            .view(IL2CrossDomainMessenger::successfulMessagesCall {
                _xDomainCalldataHash: message_hash,
            })
            .await?;
        Ok(ret._0)
    }

    async fn message_nonce(&self) -> Result<U256, RelayError> {
        Ok(self
            .view(IL2CrossDomainMessenger::messageNonceCall {})
            .await?
            ._0)
    }

    async fn x_domain_message_sender(&self) -> Result<Address, RelayError> {
        Ok(self
            .view(IL2CrossDomainMessenger::xDomainMessageSenderCall {})
            .await?
            ._0)
    }
}
