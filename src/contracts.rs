//! Cross-domain contract ABI definitions
//!
//! Uses alloy's sol! macro to generate call/event codecs for the messenger,
//! state commitment and canonical transaction chain contracts. All traffic
//! goes through [`crate::chain::ChainClient`], so no `#[sol(rpc)]` bindings
//! are generated.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Header of one committed batch of L2 state roots
    #[derive(Debug, PartialEq, Eq)]
    struct ChainBatchHeader {
        uint256 batchIndex;
        bytes32 batchRoot;
        uint256 batchSize;
        uint256 prevTotalElements;
        bytes extraData;
    }

    /// Merkle path of one element inside a batch
    #[derive(Debug, PartialEq, Eq)]
    struct ChainInclusionProof {
        uint256 index;
        bytes32[] siblings;
    }

    /// Proof bundle accepted by the L1 messenger's relayMessage
    #[derive(Debug, PartialEq, Eq)]
    struct L2MessageInclusionProof {
        bytes32 stateRoot;
        ChainBatchHeader stateRootBatchHeader;
        ChainInclusionProof stateRootProof;
        bytes stateTrieWitness;
        bytes storageTrieWitness;
    }

    /// L1 side of the messenger pair. Relays require an inclusion proof.
    interface IL1CrossDomainMessenger {
        event SentMessage(bytes message);
        event RelayedMessage(bytes32 msgHash);
        event FailedRelayedMessage(bytes32 msgHash);

        function sendMessage(address _target, bytes _message, uint32 _gasLimit) external;

        function relayMessage(
            address _target,
            address _sender,
            bytes _message,
            uint256 _messageNonce,
            L2MessageInclusionProof _proof
        ) external;

        function successfulMessages(bytes32 _xDomainCalldataHash) external view returns (bool);
        function xDomainMessageSender() external view returns (address);
        function messageNonce() external view returns (uint256);
    }

    /// L2 side of the messenger pair. Its relayMessage signature is also the
    /// canonical encoding carried inside every SentMessage event.
    interface IL2CrossDomainMessenger {
        event SentMessage(bytes message);
        event RelayedMessage(bytes32 msgHash);
        event FailedRelayedMessage(bytes32 msgHash);

        function sendMessage(address _target, bytes _message, uint32 _gasLimit) external;

        function relayMessage(
            address _target,
            address _sender,
            bytes _message,
            uint256 _messageNonce
        ) external;

        function successfulMessages(bytes32 _xDomainCalldataHash) external view returns (bool);
        function xDomainMessageSender() external view returns (address);
        function messageNonce() external view returns (uint256);
    }

    /// L1 contract committing batches of L2 state roots
    interface IStateCommitmentChain {
        event StateBatchAppended(
            uint256 indexed _batchIndex,
            bytes32 _batchRoot,
            uint256 _batchSize,
            uint256 _prevTotalElements,
            bytes _extraData
        );

        function getTotalElements() external view returns (uint256 _totalElements);
        function getTotalBatches() external view returns (uint256 _totalBatches);
        function insideFraudProofWindow(ChainBatchHeader _batchHeader) external view returns (bool _inside);
        function appendStateBatch(bytes32[] _batch, uint256 _shouldStartAtElement) external;
    }

    /// L1 contract ordering L2 transactions
    interface ICanonicalTransactionChain {
        function getTotalElements() external view returns (uint256 _totalElements);
        function getNumPendingQueueElements() external view returns (uint40);
    }
}
