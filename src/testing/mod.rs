//! In-memory fakes for exercising the relay pipeline without nodes
//!
//! ## Submodules
//!
//! - `fake_chain` - EVM chain with messenger, message passer and state commitment emulation
//! - `fake_commitment` - Commitment source with batches appended by the test
//! - `recording_messenger` - Destination messenger that executes relays in memory
//!
//! [`TestBridge`] wires them into a full two-route [`BridgeOrchestrator`].

pub mod fake_chain;
pub mod fake_commitment;
pub mod recording_messenger;

pub use fake_chain::FakeChain;
pub use fake_commitment::FakeCommitmentSource;
pub use recording_messenger::{RecordedRelay, RecordingMessenger, RelayHandler};

use alloy::primitives::{address, Address, B256};
use std::sync::Arc;

use crate::commitment::{ConfirmedBlocks, PollConfig, StateCommitmentChain, StateCommitmentTracker};
use crate::extractor::MessageExtractor;
use crate::orchestrator::{BridgeOrchestrator, ReceiptWait, Route};
use crate::proof::{MessagePasser, ProofBuilder};
use crate::retry::RetryConfig;
use crate::store::MemoryStore;
use crate::submitter::{DeliveryMode, RelaySubmitter};
use crate::types::Direction;

pub const L1_CHAIN_ID: u64 = 1;
pub const L2_CHAIN_ID: u64 = 420;
pub const L1_MESSENGER: Address = address!("6d4528d192db72e282265d6092f4b872f9dff69e");
pub const L2_MESSENGER: Address = address!("4200000000000000000000000000000000000007");
pub const MESSAGE_PASSER: Address = address!("4200000000000000000000000000000000000000");
pub const STATE_COMMITMENT_CHAIN: Address = address!("901a629a72a5daf01b89f9a12b2c1f69c2c55e3c");

/// Both chains, both messengers and an orchestrator over them
pub struct TestBridge {
    pub l1: Arc<FakeChain>,
    pub l2: Arc<FakeChain>,
    /// Destination of withdrawals
    pub l1_messenger: Arc<RecordingMessenger>,
    /// Destination of deposits
    pub l2_messenger: Arc<RecordingMessenger>,
    pub store: Arc<MemoryStore>,
    pub orchestrator: Arc<BridgeOrchestrator>,
}

impl TestBridge {
    pub fn new(poll: PollConfig, retry: RetryConfig) -> Self {
        Self::with_deposit_delivery(poll, retry, DeliveryMode::Submit)
    }

    /// Like [`TestBridge::new`], with deposits delivered according to `delivery`
    pub fn with_deposit_delivery(
        poll: PollConfig,
        retry: RetryConfig,
        delivery: DeliveryMode,
    ) -> Self {
        let l1 = Arc::new(FakeChain::new(L1_CHAIN_ID));
        let l2 = Arc::new(FakeChain::new(L2_CHAIN_ID));
        l2.set_message_passer(MESSAGE_PASSER);
        l1.deploy_state_commitment_chain(STATE_COMMITMENT_CHAIN);

        let l1_messenger = Arc::new(RecordingMessenger::new(L1_MESSENGER));
        l1_messenger.require_proof(true);
        let l2_messenger = Arc::new(RecordingMessenger::new(L2_MESSENGER));
        let store = Arc::new(MemoryStore::new());

        let confirmed = Arc::new(ConfirmedBlocks::new(l1.clone(), 0));
        let deposit = Route {
            direction: Direction::Deposit,
            source: l1.clone(),
            extractor: MessageExtractor::new(L1_MESSENGER, 0),
            tracker: StateCommitmentTracker::new(confirmed.clone(), poll.clone()),
            proof_builder: ProofBuilder::new(confirmed, l1.clone(), None),
            submitter: RelaySubmitter::new(l2_messenger.clone()).with_mode(delivery),
            attach_proof: false,
        };

        let scc = Arc::new(StateCommitmentChain::new(l1.clone(), STATE_COMMITMENT_CHAIN));
        let withdrawal = Route {
            direction: Direction::Withdrawal,
            source: l2.clone(),
            extractor: MessageExtractor::new(L2_MESSENGER, 1),
            tracker: StateCommitmentTracker::new(scc.clone(), poll),
            proof_builder: ProofBuilder::new(
                scc,
                l2.clone(),
                Some(MessagePasser {
                    address: MESSAGE_PASSER,
                    messenger: L2_MESSENGER,
                    block_offset: 1,
                }),
            ),
            submitter: RelaySubmitter::new(l1_messenger.clone()),
            attach_proof: true,
        };

        let orchestrator = Arc::new(BridgeOrchestrator::new(
            deposit,
            withdrawal,
            store.clone(),
            retry,
            ReceiptWait::default(),
        ));

        Self {
            l1,
            l2,
            l1_messenger,
            l2_messenger,
            store,
            orchestrator,
        }
    }

    /// Commit every L2 block not yet covered as one new batch on L1
    ///
    /// State root index `i` is the root of L2 block `i + 1`.
    pub fn commit_l2_blocks(&self) -> Option<crate::types::StateRootBatchHeader> {
        let committed = self.l1.committed_elements(STATE_COMMITMENT_CHAIN);
        let head = self.l2.head();
        let roots: Vec<B256> = (committed + 1..=head)
            .filter_map(|n| self.l2.block(n).map(|b| b.state_root))
            .collect();
        if roots.is_empty() {
            return None;
        }
        Some(self.l1.append_state_batch(STATE_COMMITMENT_CHAIN, &roots))
    }
}
