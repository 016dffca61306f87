//! OVM Bridge Relayer - Library interface
//!
//! Relays cross-domain messages between L1 and an optimistic rollup:
//! extracts `SentMessage` events, waits for state commitments, builds
//! inclusion proofs and submits `relayMessage` transactions.

pub mod app;
pub mod chain;
pub mod commitment;
pub mod config;
pub mod contracts;
pub mod error;
pub mod extractor;
pub mod hash;
pub mod merkle;
pub mod messenger;
pub mod orchestrator;
pub mod proof;
pub mod retry;
pub mod server;
pub mod store;
pub mod submitter;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod watcher;

pub use error::RelayError;
pub use orchestrator::BridgeOrchestrator;
pub use types::{Direction, RelayOutcome, RelayReport};
