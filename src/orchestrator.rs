//! Per-request relay state machine
//!
//! ```text
//! Extracting → WaitingForCommitment → BuildingProof → Submitting → Relayed
//!                      ↑                    │ ↺ retryable   │ ↺ retryable
//!                      └── BatchNotFound ───┘              └──→ Failed
//! ```
//!
//! A `Failed` attempt whose cause can clear by itself stays eligible for
//! [`BridgeOrchestrator::resume`].
//!
//! Deposits and withdrawals run the same machine over a different [`Route`].

use alloy::primitives::{B256, U256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::ChainClient;
use crate::commitment::StateCommitmentTracker;
use crate::error::RelayError;
use crate::extractor::MessageExtractor;
use crate::proof::ProofBuilder;
use crate::retry::{backoff_sleep, RetryAction, RetryConfig};
use crate::server::Metrics;
use crate::store::RelayStore;
use crate::submitter::RelaySubmitter;
use crate::types::{
    Direction, RelayAttempt, RelayOutcome, RelayReport, RelayStatus, SentMessageProof,
    SentMessageRecord, StateRootBatchHeader,
};

/// Everything needed to move messages in one direction
pub struct Route {
    pub direction: Direction,
    pub source: Arc<dyn ChainClient>,
    pub extractor: MessageExtractor,
    pub tracker: StateCommitmentTracker,
    pub proof_builder: ProofBuilder,
    pub submitter: RelaySubmitter,
    /// Pass the inclusion proof to the destination messenger
    pub attach_proof: bool,
}

/// Receipt polling for source transactions
#[derive(Debug, Clone)]
pub struct ReceiptWait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReceiptWait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(120),
        }
    }
}

enum RelayState {
    WaitingForCommitment,
    BuildingProof(StateRootBatchHeader),
    Submitting(SentMessageProof),
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::WaitingForCommitment => "waiting_for_commitment",
            RelayState::BuildingProof(_) => "building_proof",
            RelayState::Submitting(_) => "submitting",
        };
        write!(f, "{name}")
    }
}

pub struct BridgeOrchestrator {
    deposit: Route,
    withdrawal: Route,
    store: Arc<dyn RelayStore>,
    retry: RetryConfig,
    receipt_wait: ReceiptWait,
    metrics: Option<Arc<Metrics>>,
}

impl BridgeOrchestrator {
    pub fn new(
        deposit: Route,
        withdrawal: Route,
        store: Arc<dyn RelayStore>,
        retry: RetryConfig,
        receipt_wait: ReceiptWait,
    ) -> Self {
        Self {
            deposit,
            withdrawal,
            store,
            retry,
            receipt_wait,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn route(&self, direction: Direction) -> &Route {
        match direction {
            Direction::Deposit => &self.deposit,
            Direction::Withdrawal => &self.withdrawal,
        }
    }

    pub fn store(&self) -> &Arc<dyn RelayStore> {
        &self.store
    }

    /// Relay every message sent by an L1 transaction to L2
    pub async fn relay_deposit(
        &self,
        l1_tx: B256,
        cancel: &CancellationToken,
    ) -> Result<RelayReport, RelayError> {
        self.relay(Direction::Deposit, l1_tx, cancel).await
    }

    /// Relay every message sent by an L2 transaction to L1
    pub async fn relay_withdrawal(
        &self,
        l2_tx: B256,
        cancel: &CancellationToken,
    ) -> Result<RelayReport, RelayError> {
        self.relay(Direction::Withdrawal, l2_tx, cancel).await
    }

    /// Run the state machine for every message of `source_tx`, in emission order
    ///
    /// A message that fails is recorded in the report and processing moves on
    /// to the next one. Extraction errors and cancellation abort the request.
    pub async fn relay(
        &self,
        direction: Direction,
        source_tx: B256,
        cancel: &CancellationToken,
    ) -> Result<RelayReport, RelayError> {
        let route = self.route(direction);
        let source_chain_id = route.source.chain_id();

        debug!(%direction, tx = %source_tx, state = "extracting", "Relay started");
        let receipt = route
            .source
            .wait_for_receipt(
                source_tx,
                self.receipt_wait.poll_interval,
                self.receipt_wait.timeout,
            )
            .await?;
        if !receipt.status {
            return Err(RelayError::TxRejected {
                tx_hash: Some(source_tx),
                reason: "source transaction reverted".to_string(),
            });
        }
        let records = route.extractor.extract_messages(&receipt)?;
        info!(%direction, tx = %source_tx, messages = records.len(), "Extracted messages");

        let mut attempts = Vec::with_capacity(records.len());
        for record in &records {
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }

            let stored = self.load_attempt(source_chain_id, record).await;
            if let Some(existing) = stored.as_ref().filter(|a| a.status == RelayStatus::Relayed) {
                info!(
                    %direction,
                    nonce = %record.message.nonce,
                    "Message already relayed by a previous run, skipping"
                );
                attempts.push(existing.clone());
                continue;
            }

            let mut attempt = match stored {
                Some(mut previous) => {
                    previous.status = RelayStatus::Pending;
                    previous.retry_count = 0;
                    previous
                }
                None => RelayAttempt::new(source_chain_id, direction, record),
            };
            self.save_attempt(&attempt).await;

            match self.run_message(route, record, &mut attempt, cancel).await {
                Ok(outcome) => {
                    attempt.mark_relayed(outcome);
                    self.record_metric(direction, &outcome);
                }
                Err(RelayError::Cancelled) => {
                    attempt.last_error = Some(RelayError::Cancelled.to_string());
                    self.save_attempt(&attempt).await;
                    return Err(RelayError::Cancelled);
                }
                Err(e) => {
                    error!(
                        %direction,
                        nonce = %record.message.nonce,
                        error = %e,
                        "Relay failed"
                    );
                    attempt.mark_failed(&e);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_relay(direction, "failed");
                    }
                }
            }
            self.save_attempt(&attempt).await;
            attempts.push(attempt);
        }

        Ok(RelayReport {
            direction,
            source_tx,
            attempts,
        })
    }

    async fn run_message(
        &self,
        route: &Route,
        record: &SentMessageRecord,
        attempt: &mut RelayAttempt,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError> {
        let nonce = record.message.nonce;
        let mut commitment_polls = 0u32;
        let mut state = RelayState::WaitingForCommitment;

        loop {
            debug!(direction = %route.direction, %nonce, %state, "Relay state");
            state = match state {
                RelayState::WaitingForCommitment => {
                    let header = route
                        .tracker
                        .wait_for_batch_containing(record.parent_block_index, cancel)
                        .await?;
                    commitment_polls += 1;
                    RelayState::BuildingProof(header)
                }
                RelayState::BuildingProof(header) => {
                    match route.proof_builder.build_proof(record, &header).await {
                        Ok(proof) => {
                            attempt.proof = Some(proof.clone());
                            RelayState::Submitting(proof)
                        }
                        Err(RelayError::BatchNotFound { index })
                            if commitment_polls <= self.retry.max_retries =>
                        {
                            warn!(%nonce, index, "Batch moved under us, waiting for commitment again");
                            RelayState::WaitingForCommitment
                        }
                        Err(e) => {
                            self.back_off(attempt, e, "building_proof", cancel).await?;
                            RelayState::BuildingProof(header)
                        }
                    }
                }
                RelayState::Submitting(proof) => {
                    let attached = route.attach_proof.then_some(&proof);
                    match route.submitter.deliver(&record.message, attached, cancel).await {
                        Ok(outcome) => return Ok(outcome),
                        Err(e) => {
                            self.back_off(attempt, e, "submitting", cancel).await?;
                            RelayState::Submitting(proof)
                        }
                    }
                }
            };
        }
    }

    /// Count a failed step and sleep before repeating it, or hand the error back
    async fn back_off(
        &self,
        attempt: &mut RelayAttempt,
        error: RelayError,
        step: &'static str,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        if matches!(error, RelayError::Cancelled) {
            return Err(error);
        }
        attempt.record_failure(&error);
        match self.retry.next_action(&error, attempt.retry_count) {
            RetryAction::Retry(delay) => {
                warn!(
                    nonce = %attempt.message.nonce,
                    step,
                    attempt = attempt.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Relay step failed, retrying"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.retries_total.inc();
                }
                self.save_attempt(attempt).await;
                backoff_sleep(delay, cancel).await
            }
            RetryAction::GiveUp => Err(error),
        }
    }

    /// Relay again the stored messages of `direction` that can still succeed
    ///
    /// Source transactions are visited in the order their attempts were
    /// first stored, at most `limit` of them. Each report only carries the
    /// attempts that were unfinished when the call started.
    pub async fn resume(
        &self,
        direction: Direction,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelayReport>, RelayError> {
        let source_chain_id = self.route(direction).source.chain_id();
        let unfinished = match self.store.list_unfinished(direction, source_chain_id).await {
            Ok(attempts) => attempts,
            Err(e) => {
                warn!(%direction, error = %e, "Failed to list unfinished relay attempts");
                return Ok(Vec::new());
            }
        };

        let mut pending: Vec<(B256, Vec<U256>)> = Vec::new();
        for attempt in unfinished.iter().filter(|a| a.is_resumable()) {
            if let Some(i) = pending.iter().position(|(tx, _)| *tx == attempt.parent_tx_hash) {
                pending[i].1.push(attempt.message.nonce);
            } else if pending.len() < limit {
                pending.push((attempt.parent_tx_hash, vec![attempt.message.nonce]));
            }
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!(%direction, transactions = pending.len(), "Resuming unfinished relays");

        let mut reports = Vec::with_capacity(pending.len());
        for (tx, nonces) in pending {
            match self.relay(direction, tx, cancel).await {
                Ok(mut report) => {
                    report.attempts.retain(|a| nonces.contains(&a.message.nonce));
                    reports.push(report);
                }
                Err(RelayError::Cancelled) => return Err(RelayError::Cancelled),
                Err(e) => warn!(%direction, %tx, error = %e, "Resumed relay failed"),
            }
        }
        Ok(reports)
    }

    async fn load_attempt(
        &self,
        source_chain_id: u64,
        record: &SentMessageRecord,
    ) -> Option<RelayAttempt> {
        match self
            .store
            .get_attempt(source_chain_id, record.message.nonce)
            .await
        {
            Ok(attempt) => attempt,
            Err(e) => {
                warn!(error = %e, "Failed to read relay attempt, continuing without it");
                None
            }
        }
    }

    // Persistence failures never fail a relay; the destination's replay
    // protection keeps relays idempotent.
    async fn save_attempt(&self, attempt: &RelayAttempt) {
        if let Err(e) = self.store.save_attempt(attempt).await {
            warn!(error = %e, nonce = %attempt.message.nonce, "Failed to persist relay attempt");
        }
    }

    fn record_metric(&self, direction: Direction, outcome: &RelayOutcome) {
        if let Some(metrics) = &self.metrics {
            let label = match outcome {
                RelayOutcome::Relayed { .. } => "relayed",
                RelayOutcome::AlreadyRelayed => "already_relayed",
            };
            metrics.record_relay(direction, label);
        }
    }
}
