//! Wiring from [`Config`] to running components

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use eyre::{Result, WrapErr};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::chain::{ChainClient, EvmChainClient, FallbackChainClient};
use crate::commitment::{
    CommitmentSource, ConfirmedBlocks, StateCommitmentChain, StateCommitmentTracker,
};
use crate::config::{ChainConfig, Config};
use crate::contracts::ICanonicalTransactionChain;
use crate::extractor::MessageExtractor;
use crate::messenger::{EvmMessenger, Messenger};
use crate::orchestrator::{BridgeOrchestrator, Route};
use crate::proof::{MessagePasser, ProofBuilder};
use crate::server::Metrics;
use crate::store::{MemoryStore, PgStore, RelayStore};
use crate::submitter::RelaySubmitter;
use crate::types::Direction;

/// Both chain clients, signing enabled
pub struct Clients {
    pub l1: Arc<dyn ChainClient>,
    pub l2: Arc<dyn ChainClient>,
}

pub fn connect(config: &Config) -> Result<Clients> {
    Ok(Clients {
        l1: connect_chain("L1", &config.l1, config)?,
        l2: connect_chain("L2", &config.l2, config)?,
    })
}

/// One client per configured URL, behind failover when there are several
fn connect_chain(name: &str, chain: &ChainConfig, config: &Config) -> Result<Arc<dyn ChainClient>> {
    let mut clients: Vec<Arc<dyn ChainClient>> = Vec::new();
    for url in chain.rpc_urls() {
        let client = EvmChainClient::new(&url, chain.chain_id, config.tx_timeout())
            .wrap_err_with(|| format!("Failed to create {} client", name))?
            .with_signer(&config.relayer.private_key)?;
        clients.push(Arc::new(client));
    }
    if clients.len() == 1 {
        return Ok(clients.remove(0));
    }
    info!(chain = name, endpoints = clients.len(), "RPC failover enabled");
    Ok(Arc::new(FallbackChainClient::new(clients)?))
}

/// PostgreSQL when `DATABASE_URL` is set, memory otherwise
pub async fn open_store(config: &Config) -> Result<Arc<dyn RelayStore>> {
    match &config.service.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            info!("Database connected, migrations complete");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set, relay attempts are kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Build the deposit (L1→L2) and withdrawal (L2→L1) routes
pub fn build_orchestrator(
    config: &Config,
    clients: &Clients,
    store: Arc<dyn RelayStore>,
    metrics: Option<Arc<Metrics>>,
) -> BridgeOrchestrator {
    let contracts = &config.contracts;
    let poll = config.poll_config();

    let confirmed: Arc<dyn CommitmentSource> = Arc::new(ConfirmedBlocks::new(
        clients.l1.clone(),
        config.relayer.l1_confirmations,
    ));
    let mut deposit_tracker = StateCommitmentTracker::new(confirmed.clone(), poll.clone());

    let scc: Arc<dyn CommitmentSource> = Arc::new(state_commitment_chain(config, clients));
    let mut withdrawal_tracker = StateCommitmentTracker::new(scc.clone(), poll);

    if let Some(metrics) = &metrics {
        deposit_tracker = deposit_tracker.with_metrics(metrics.clone());
        withdrawal_tracker = withdrawal_tracker.with_metrics(metrics.clone());
    }

    let deposit = Route {
        direction: Direction::Deposit,
        source: clients.l1.clone(),
        extractor: MessageExtractor::new(contracts.l1_messenger, 0),
        tracker: deposit_tracker,
        proof_builder: ProofBuilder::new(confirmed, clients.l1.clone(), None),
        submitter: RelaySubmitter::new(Arc::new(EvmMessenger::new(
            clients.l2.clone(),
            contracts.l2_messenger,
        )))
        .with_mode(config.delivery_mode(config.relayer.deposit_relay_mode)),
        attach_proof: false,
    };

    let withdrawal = Route {
        direction: Direction::Withdrawal,
        source: clients.l2.clone(),
        extractor: MessageExtractor::new(contracts.l2_messenger, config.relayer.l2_block_offset),
        tracker: withdrawal_tracker,
        proof_builder: ProofBuilder::new(
            scc,
            clients.l2.clone(),
            Some(MessagePasser {
                address: contracts.l2_message_passer,
                messenger: contracts.l2_messenger,
                block_offset: config.relayer.l2_block_offset,
            }),
        ),
        submitter: RelaySubmitter::new(Arc::new(EvmMessenger::new(
            clients.l1.clone(),
            contracts.l1_messenger,
        )))
        .with_mode(config.delivery_mode(config.relayer.withdrawal_relay_mode)),
        attach_proof: true,
    };

    let orchestrator = BridgeOrchestrator::new(
        deposit,
        withdrawal,
        store,
        config.retry_config(),
        config.receipt_wait(),
    );
    match metrics {
        Some(metrics) => orchestrator.with_metrics(metrics),
        None => orchestrator,
    }
}

fn state_commitment_chain(config: &Config, clients: &Clients) -> StateCommitmentChain {
    StateCommitmentChain::new(clients.l1.clone(), config.contracts.state_commitment_chain)
        .with_start_block(config.contracts.state_commitment_chain_start_block)
        .with_max_block_range(config.relayer.log_max_block_range)
}

/// Snapshot of both chains and the rollup's L1 contracts
#[derive(Debug, Clone, Serialize)]
pub struct RollupStatus {
    pub l1_chain_id: u64,
    pub l2_chain_id: u64,
    pub l1_block: u64,
    pub l2_block: u64,
    pub committed_state_roots: u64,
    pub committed_batches: u64,
    /// L2 blocks not yet covered by a committed state root
    pub uncommitted_l2_blocks: u64,
    pub canonical_tx_elements: Option<U256>,
    pub pending_queue_elements: Option<u64>,
    pub l1_messenger_nonce: Option<U256>,
    pub l2_messenger_nonce: Option<U256>,
}

pub async fn rollup_status(config: &Config, clients: &Clients) -> Result<RollupStatus> {
    let scc = state_commitment_chain(config, clients);
    let l1_block = clients.l1.block_number().await?;
    let l2_block = clients.l2.block_number().await?;
    let committed_state_roots = scc.total_elements().await?;
    let committed_batches = scc.total_batches().await?;

    let (canonical_tx_elements, pending_queue_elements) =
        match config.contracts.canonical_transaction_chain {
            Some(ctc) => {
                let total = ctc_view(
                    clients.l1.as_ref(),
                    ctc,
                    ICanonicalTransactionChain::getTotalElementsCall {},
                )
                .await?
                ._totalElements;
                let pending = ctc_view(
                    clients.l1.as_ref(),
                    ctc,
                    ICanonicalTransactionChain::getNumPendingQueueElementsCall {},
                )
                .await?
                ._0;
                let pending =
                    u64::try_from(pending).wrap_err("Pending queue length does not fit in u64")?;
                (Some(total), Some(pending))
            }
            None => (None, None),
        };

    // Nonce views are informational; older messengers may not expose them
    let l1_messenger = EvmMessenger::new(clients.l1.clone(), config.contracts.l1_messenger);
    let l2_messenger = EvmMessenger::new(clients.l2.clone(), config.contracts.l2_messenger);

    Ok(RollupStatus {
        l1_chain_id: clients.l1.chain_id(),
        l2_chain_id: clients.l2.chain_id(),
        l1_block,
        l2_block,
        committed_state_roots,
        committed_batches,
        uncommitted_l2_blocks: (l2_block + 1)
            .saturating_sub(config.relayer.l2_block_offset)
            .saturating_sub(committed_state_roots),
        canonical_tx_elements,
        pending_queue_elements,
        l1_messenger_nonce: l1_messenger.message_nonce().await.ok(),
        l2_messenger_nonce: l2_messenger.message_nonce().await.ok(),
    })
}

async fn ctc_view<C: SolCall>(
    client: &dyn ChainClient,
    address: Address,
    call: C,
) -> Result<C::Return> {
    let raw: Bytes = client.call(address, call.abi_encode().into()).await?;
    C::abi_decode_returns(&raw, true).wrap_err_with(|| format!("Failed to decode {}", C::SIGNATURE))
}
