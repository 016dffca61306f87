//! Long-running scan for sent messages
//!
//! Each watcher follows one source messenger, block range by block range,
//! and hands every transaction that emitted a `SentMessage` to the
//! orchestrator. The last fully processed block is persisted so a restart
//! resumes where it stopped. Messages left behind by a late batch or a
//! flaky node are picked up again on later polls.

use alloy::primitives::B256;
use alloy::sol_types::SolEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::contracts::IL2CrossDomainMessenger::SentMessage;
use crate::error::RelayError;
use crate::orchestrator::BridgeOrchestrator;
use crate::server::SharedStats;
use crate::types::{Direction, LogFilter, RelayReport, RelayStatus};

const DEFAULT_MAX_BLOCK_RANGE: u64 = 1000;
const DEFAULT_MAX_RESUMED_PER_POLL: usize = 16;

pub struct MessageWatcher {
    orchestrator: Arc<BridgeOrchestrator>,
    direction: Direction,
    stats: SharedStats,
    poll_interval: Duration,
    max_block_range: u64,
    max_resumed: usize,
    start_block: Option<u64>,
}

impl MessageWatcher {
    pub fn new(
        orchestrator: Arc<BridgeOrchestrator>,
        direction: Direction,
        stats: SharedStats,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            direction,
            stats,
            poll_interval,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            max_resumed: DEFAULT_MAX_RESUMED_PER_POLL,
            start_block: None,
        }
    }

    pub fn with_max_block_range(mut self, range: u64) -> Self {
        self.max_block_range = range.max(1);
        self
    }

    /// Source transactions with unfinished messages retried per poll
    pub fn with_max_resumed(mut self, count: usize) -> Self {
        self.max_resumed = count;
        self
    }

    /// First block to scan when no cursor is stored (defaults to the current head)
    pub fn with_start_block(mut self, block: u64) -> Self {
        self.start_block = Some(block);
        self
    }

    /// Cursor key, unique per direction and source chain
    pub fn cursor_name(&self) -> String {
        let chain_id = self.orchestrator.route(self.direction).source.chain_id();
        format!("{}:{}", self.direction, chain_id)
    }

    /// Run until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> eyre::Result<()> {
        info!(direction = %self.direction, cursor = %self.cursor_name(), "Watcher started");

        loop {
            match self.poll_once(&cancel).await {
                Ok(_) => {}
                Err(RelayError::Cancelled) => break,
                Err(e) => warn!(direction = %self.direction, error = %e, "Watcher poll failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(direction = %self.direction, "Watcher stopped");
        Ok(())
    }

    /// Retry unfinished messages, then scan the next block range
    ///
    /// Returns the reports of every transaction handled in this poll.
    pub async fn poll_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelayReport>, RelayError> {
        let mut reports = self
            .orchestrator
            .resume(self.direction, self.max_resumed, cancel)
            .await?;
        for report in &reports {
            self.record(report).await;
        }
        reports.extend(self.poll_new_blocks(cancel).await?);
        Ok(reports)
    }

    async fn poll_new_blocks(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelayReport>, RelayError> {
        let source = &self.orchestrator.route(self.direction).source;
        let head = source.block_number().await?;
        let name = self.cursor_name();

        let stored = self
            .orchestrator
            .store()
            .get_cursor(&name)
            .await
            .map_err(|e| RelayError::RpcUnavailable(format!("cursor store: {e}")))?;
        let last = match stored {
            Some(block) => block,
            None => {
                let initial = self.start_block.map_or(head, |b| b.saturating_sub(1));
                info!(cursor = %name, block = initial, "No stored cursor, starting fresh");
                initial
            }
        };

        if head <= last {
            debug!(cursor = %name, head, "No new blocks");
            self.save_cursor(&name, last).await;
            return Ok(Vec::new());
        }

        let from_block = last + 1;
        let to_block = head.min(last + self.max_block_range);
        let reports = self.scan_range(from_block, to_block, cancel).await?;

        self.save_cursor(&name, to_block).await;
        self.stats.write().await.record_scan(self.direction, to_block);
        Ok(reports)
    }

    /// Relay every transaction in `[from_block, to_block]` that sent a message
    pub async fn scan_range(
        &self,
        from_block: u64,
        to_block: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelayReport>, RelayError> {
        let route = self.orchestrator.route(self.direction);
        let filter = LogFilter::new(route.extractor.messenger(), from_block, to_block)
            .event_signature(SentMessage::SIGNATURE_HASH);

        let mut logs = route.source.get_logs(&filter).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        let mut txs: Vec<B256> = Vec::new();
        for log in &logs {
            if !txs.contains(&log.tx_hash) {
                txs.push(log.tx_hash);
            }
        }

        info!(
            direction = %self.direction,
            from_block,
            to_block,
            transactions = txs.len(),
            "Scanned block range"
        );

        let mut reports = Vec::with_capacity(txs.len());
        for tx in txs {
            let report = self.orchestrator.relay(self.direction, tx, cancel).await?;
            self.record(&report).await;
            reports.push(report);
        }
        Ok(reports)
    }

    async fn record(&self, report: &RelayReport) {
        let mut stats = self.stats.write().await;
        for attempt in &report.attempts {
            match (&attempt.status, &attempt.outcome) {
                (RelayStatus::Relayed, Some(outcome)) => stats.record_outcome(outcome),
                (RelayStatus::Failed, _) => {
                    stats.failed += 1;
                    error!(
                        direction = %self.direction,
                        tx = %report.source_tx,
                        nonce = %attempt.message.nonce,
                        error = attempt.last_error.as_deref().unwrap_or("unknown"),
                        "Message left unrelayed"
                    );
                }
                _ => {}
            }
        }
    }

    async fn save_cursor(&self, name: &str, block: u64) {
        if let Err(e) = self.orchestrator.store().set_cursor(name, block).await {
            warn!(cursor = %name, block, error = %e, "Failed to persist watcher cursor");
        }
    }
}
