//! Relay submission and outcome classification
//!
//! A route either submits `relayMessage` itself or, when the destination
//! only accepts relays from the sequencer, watches `successfulMessages`
//! until someone else has executed the message.

use alloy::sol_types::SolEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contracts::IL2CrossDomainMessenger::FailedRelayedMessage;
use crate::error::{classify_error, ErrorClass, RelayError};
use crate::messenger::Messenger;
use crate::retry::backoff_sleep;
use crate::types::{CrossDomainMessage, Receipt, RelayOutcome, SentMessageProof};

/// How messages reach the destination messenger
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryMode {
    /// Send `relayMessage` from the relayer's account
    Submit,
    /// Poll `successfulMessages` until another party relays the message
    Observe {
        poll_interval: Duration,
        max_rounds: u32,
    },
}

/// Submits relays to one destination messenger
pub struct RelaySubmitter {
    messenger: Arc<dyn Messenger>,
    mode: DeliveryMode,
}

impl RelaySubmitter {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self {
            messenger,
            mode: DeliveryMode::Submit,
        }
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }

    pub fn mode(&self) -> &DeliveryMode {
        &self.mode
    }

    /// Get `message` executed on the destination according to the delivery mode
    pub async fn deliver(
        &self,
        message: &CrossDomainMessage,
        proof: Option<&SentMessageProof>,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError> {
        match &self.mode {
            DeliveryMode::Submit => self.relay(message, proof).await,
            DeliveryMode::Observe {
                poll_interval,
                max_rounds,
            } => {
                self.observe(message, *poll_interval, *max_rounds, cancel)
                    .await
            }
        }
    }

    /// Wait for `message` to show up in `successfulMessages`
    ///
    /// Fails with a retryable `Timeout` once `max_rounds` polls came back
    /// negative. Transport failures only cost their round.
    pub async fn observe(
        &self,
        message: &CrossDomainMessage,
        poll_interval: Duration,
        max_rounds: u32,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError> {
        let message_hash = message.hash();
        let start = Instant::now();

        for round in 1..=max_rounds {
            match self.messenger.is_relayed(message_hash).await {
                Ok(true) => {
                    info!(nonce = %message.nonce, hash = %message_hash, round, "Message relayed by the destination");
                    return Ok(RelayOutcome::AlreadyRelayed);
                }
                Ok(false) => {
                    debug!(nonce = %message.nonce, round, "Message not relayed yet");
                }
                Err(RelayError::RpcUnavailable(e)) => {
                    warn!(nonce = %message.nonce, round, error = %e, "Relay status poll failed");
                }
                Err(e) => return Err(e),
            }
            if round < max_rounds {
                backoff_sleep(poll_interval, cancel).await?;
            }
        }

        Err(RelayError::Timeout {
            what: format!("destination relay of message {message_hash}"),
            elapsed: start.elapsed(),
        })
    }

    /// Relay `message`, treating a replay as success
    ///
    /// Transport failures pass through unchanged so the caller can retry.
    pub async fn relay(
        &self,
        message: &CrossDomainMessage,
        proof: Option<&SentMessageProof>,
    ) -> Result<RelayOutcome, RelayError> {
        let message_hash = message.hash();
        if self.messenger.is_relayed(message_hash).await? {
            info!(nonce = %message.nonce, hash = %message_hash, "Message already relayed");
            return Ok(RelayOutcome::AlreadyRelayed);
        }

        match self.messenger.relay_message(message, proof).await {
            Ok(receipt) => {
                if self.failed_relay_logged(&receipt) {
                    warn!(
                        nonce = %message.nonce,
                        tx_hash = %receipt.tx_hash,
                        "Target call failed inside relayMessage"
                    );
                    return Err(RelayError::RelayRejected {
                        reason: format!("FailedRelayedMessage emitted in {}", receipt.tx_hash),
                    });
                }
                info!(
                    nonce = %message.nonce,
                    tx_hash = %receipt.tx_hash,
                    block = receipt.block_number,
                    "Message relayed"
                );
                Ok(RelayOutcome::Relayed {
                    tx_hash: receipt.tx_hash,
                    block_number: receipt.block_number,
                })
            }
            Err(RelayError::TxRejected { tx_hash, reason }) => {
                if classify_error(&reason) == ErrorClass::AlreadyRelayed {
                    info!(nonce = %message.nonce, "Relay reverted as replay, counting as relayed");
                    return Ok(RelayOutcome::AlreadyRelayed);
                }
                // A concurrent relayer may have won the race
                if tx_hash.is_some() && self.messenger.is_relayed(message_hash).await? {
                    return Ok(RelayOutcome::AlreadyRelayed);
                }
                Err(RelayError::RelayRejected { reason })
            }
            Err(e) => Err(e),
        }
    }

    fn failed_relay_logged(&self, receipt: &Receipt) -> bool {
        let address = self.messenger.address();
        receipt.logs.iter().any(|log| {
            log.address == address
                && log.topics.first() == Some(&FailedRelayedMessage::SIGNATURE_HASH)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMessenger;
    use alloy::primitives::{Address, Bytes, U256};
    use alloy::sol_types::SolCall;

    fn message(nonce: u64) -> CrossDomainMessage {
        CrossDomainMessage {
            target: Address::repeat_byte(0x0a),
            sender: Address::repeat_byte(0x0b),
            payload: Bytes::from_static(b"hi"),
            nonce: U256::from(nonce),
        }
    }

    #[tokio::test]
    async fn test_relays_once_then_reports_already_relayed() {
        let messenger = Arc::new(RecordingMessenger::new(Address::repeat_byte(7)));
        let submitter = RelaySubmitter::new(messenger.clone());

        assert!(matches!(
            submitter.relay(&message(1), None).await.unwrap(),
            RelayOutcome::Relayed { .. }
        ));
        assert_eq!(
            submitter.relay(&message(1), None).await.unwrap(),
            RelayOutcome::AlreadyRelayed
        );
        assert_eq!(messenger.relay_count(), 1);
    }

    #[tokio::test]
    async fn test_replay_revert_is_already_relayed() {
        let messenger = Arc::new(RecordingMessenger::new(Address::repeat_byte(7)));
        messenger.skip_precheck(true);
        let submitter = RelaySubmitter::new(messenger.clone());

        submitter.relay(&message(2), None).await.unwrap();
        assert_eq!(
            submitter.relay(&message(2), None).await.unwrap(),
            RelayOutcome::AlreadyRelayed
        );
        assert_eq!(messenger.relay_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_target_call_is_rejected() {
        let messenger = Arc::new(RecordingMessenger::new(Address::repeat_byte(7)));
        messenger.set_handler(|_| Err("target reverted".to_string()));
        let submitter = RelaySubmitter::new(messenger);

        assert!(matches!(
            submitter.relay(&message(3), None).await,
            Err(RelayError::RelayRejected { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_waits_for_the_destination_relay() {
        let messenger = Arc::new(RecordingMessenger::new(Address::repeat_byte(7)));
        let submitter = RelaySubmitter::new(messenger.clone()).with_mode(DeliveryMode::Observe {
            poll_interval: Duration::from_millis(100),
            max_rounds: 10,
        });

        let sequencer = messenger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            sequencer.relay_message(&message(5), None).await.unwrap();
        });

        let outcome = submitter
            .deliver(&message(5), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::AlreadyRelayed);
        // Only the simulated sequencer executed the message
        assert_eq!(messenger.relay_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_times_out_without_submitting() {
        let messenger = Arc::new(RecordingMessenger::new(Address::repeat_byte(7)));
        let submitter = RelaySubmitter::new(messenger.clone()).with_mode(DeliveryMode::Observe {
            poll_interval: Duration::from_millis(100),
            max_rounds: 3,
        });

        let err = submitter
            .deliver(&message(6), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Timeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(messenger.relay_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_revert_through_evm_messenger() {
        use crate::messenger::EvmMessenger;
        use crate::testing::FakeChain;

        let chain = Arc::new(FakeChain::new(1));
        let address = Address::repeat_byte(7);
        let msg = message(8);
        // successfulMessages(hash) = false, but the relay reverts as a replay
        chain.set_call_response(
            address,
            crate::contracts::IL2CrossDomainMessenger::successfulMessagesCall {
                _xDomainCalldataHash: msg.hash(),
            }
            .abi_encode(),
            crate::contracts::IL2CrossDomainMessenger::successfulMessagesCall::abi_encode_returns(
                &(false,),
            ),
        );
        chain.fail_next_submit(RelayError::from_rpc(
            "execution reverted: Provided message has already been received.",
        ));
        chain.fail_next_submit(RelayError::from_rpc("execution reverted: invalid proof"));
        let submitter = RelaySubmitter::new(Arc::new(EvmMessenger::new(chain.clone(), address)));

        assert_eq!(
            submitter.relay(&msg, None).await.unwrap(),
            RelayOutcome::AlreadyRelayed
        );
        assert!(matches!(
            submitter.relay(&msg, None).await,
            Err(RelayError::RelayRejected { .. })
        ));
        assert!(chain.submitted_calls().is_empty());
    }

    #[tokio::test]
    async fn test_other_revert_is_rejected_and_transport_passes_through() {
        let messenger = Arc::new(RecordingMessenger::new(Address::repeat_byte(7)));
        messenger.fail_next(RelayError::TxRejected {
            tx_hash: None,
            reason: "execution reverted: Provided message could not be verified.".into(),
        });
        messenger.fail_next(RelayError::RpcUnavailable("connection refused".into()));
        let submitter = RelaySubmitter::new(messenger);

        assert!(matches!(
            submitter.relay(&message(4), None).await,
            Err(RelayError::RelayRejected { .. })
        ));
        assert_eq!(
            submitter.relay(&message(4), None).await,
            Err(RelayError::RpcUnavailable("connection refused".into()))
        );
    }
}
