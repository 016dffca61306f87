//! Relay error taxonomy
//!
//! Leaf components (chain client, extractor, proof builder) return these
//! without retrying. Retry decisions are made by the orchestrator and the
//! relay submitter based on [`RelayError::is_retryable`].

use alloy::primitives::B256;
use std::time::Duration;
use thiserror::Error;

/// Errors produced anywhere in the relay pipeline
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelayError {
    /// Network or node failure talking to a JSON-RPC endpoint
    #[error("RPC unavailable: {0}")]
    RpcUnavailable(String),

    /// A submitted transaction reverted or was refused by the node
    #[error("transaction rejected{}: {reason}", tx_suffix(.tx_hash))]
    TxRejected {
        tx_hash: Option<B256>,
        reason: String,
    },

    /// A transaction receipt did not show up in time
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    /// The covering state batch was not committed within the polling budget
    #[error("no state batch covering index {index} after {rounds} polling rounds")]
    BatchTimeout { index: u64, rounds: u32 },

    /// The index is not inside any committed batch (re-poll the tracker)
    #[error("index {index} is not covered by a committed state batch")]
    BatchNotFound { index: u64 },

    /// The node cannot serve the requested state (pruned or missing)
    #[error("state proof unavailable: {0}")]
    ProofUnavailable(String),

    /// The destination messenger refused the relay for a reason other than replay
    #[error("relay rejected: {reason}")]
    RelayRejected { reason: String },

    /// Malformed log, calldata or RPC payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Caller cancelled the operation between polling rounds
    #[error("operation cancelled")]
    Cancelled,
}

impl RelayError {
    /// Whether the orchestrator may retry the failed step with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::RpcUnavailable(_)
                | RelayError::RelayRejected { .. }
                | RelayError::Timeout { .. }
        )
    }

    /// Short label used for metrics and persisted attempt rows
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::RpcUnavailable(_) => "rpc_unavailable",
            RelayError::TxRejected { .. } => "tx_rejected",
            RelayError::Timeout { .. } => "timeout",
            RelayError::BatchTimeout { .. } => "batch_timeout",
            RelayError::BatchNotFound { .. } => "batch_not_found",
            RelayError::ProofUnavailable(_) => "proof_unavailable",
            RelayError::RelayRejected { .. } => "relay_rejected",
            RelayError::Decode(_) => "decode",
            RelayError::Cancelled => "cancelled",
        }
    }

    /// Map a raw transport/RPC error message into the taxonomy
    pub fn from_rpc(error: impl std::fmt::Display) -> Self {
        let message = error.to_string();
        match classify_error(&message) {
            ErrorClass::Reverted | ErrorClass::AlreadyRelayed => RelayError::TxRejected {
                tx_hash: None,
                reason: message,
            },
            ErrorClass::MissingState => RelayError::ProofUnavailable(message),
            ErrorClass::Transient | ErrorClass::Unknown => RelayError::RpcUnavailable(message),
        }
    }
}

/// Failure kinds that a later relay of the same message can get past
pub fn is_resumable_kind(kind: &str) -> bool {
    matches!(
        kind,
        "rpc_unavailable" | "timeout" | "batch_timeout" | "batch_not_found"
    )
}

fn tx_suffix(tx_hash: &Option<B256>) -> String {
    tx_hash.map(|h| format!(" ({h})")).unwrap_or_default()
}

/// Classifies RPC error strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues)
    Transient,
    /// Destination already processed this message
    AlreadyRelayed,
    /// Execution reverted or the node refused the transaction outright
    Reverted,
    /// Node pruned or never had the requested state
    MissingState,
    /// Anything else
    Unknown,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Replays first: these arrive wrapped in "execution reverted"
    if error_lower.contains("already been received")
        || error_lower.contains("already relayed")
        || error_lower.contains("nonce already")
        || error_lower.contains("message has already")
    {
        return ErrorClass::AlreadyRelayed;
    }

    if error_lower.contains("missing trie node")
        || error_lower.contains("state not available")
        || error_lower.contains("historical state")
        || error_lower.contains("pruned")
    {
        return ErrorClass::MissingState;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("execution reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("nonce too low")
    {
        return ErrorClass::Reverted;
    }

    ErrorClass::Unknown
}
