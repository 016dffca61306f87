use alloy::primitives::B256;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use ovm_bridge_relayer::app;
use ovm_bridge_relayer::config::Config;
use ovm_bridge_relayer::server::{self, Metrics, RelayerStats};
use ovm_bridge_relayer::types::{Direction, RelayReport};
use ovm_bridge_relayer::watcher::MessageWatcher;

#[derive(Parser)]
#[command(name = "ovm-bridge-relayer", version, about = "Relays L1/L2 cross-domain messages")]
struct Cli {
    /// Path to a .env file with relayer settings
    #[arg(long, global = true, default_value = ".env")]
    env_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relay every message sent by an L1 transaction to L2
    RelayDeposit {
        /// L1 transaction hash
        tx_hash: B256,
    },
    /// Relay every message sent by an L2 transaction to L1
    RelayWithdrawal {
        /// L2 transaction hash
        tx_hash: B256,
    },
    /// Watch both messengers and relay new messages until stopped
    Watch {
        /// First L1 block to scan when no cursor is stored
        #[arg(long)]
        l1_start_block: Option<u64>,
        /// First L2 block to scan when no cursor is stored
        #[arg(long)]
        l2_start_block: Option<u64>,
        /// Maximum blocks scanned per poll
        #[arg(long, default_value_t = 1000)]
        max_block_range: u64,
    },
    /// Print chain heads and state commitment progress as JSON
    RollupStatus,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::load_from_file(&cli.env_file)?;
    tracing::info!(
        l1_chain_id = config.l1.chain_id,
        l2_chain_id = config.l2.chain_id,
        "Configuration loaded"
    );

    let clients = app::connect(&config)?;

    match cli.command {
        Command::RelayDeposit { tx_hash } => {
            relay_once(&config, &clients, Direction::Deposit, tx_hash).await
        }
        Command::RelayWithdrawal { tx_hash } => {
            relay_once(&config, &clients, Direction::Withdrawal, tx_hash).await
        }
        Command::Watch {
            l1_start_block,
            l2_start_block,
            max_block_range,
        } => watch(&config, &clients, l1_start_block, l2_start_block, max_block_range).await,
        Command::RollupStatus => {
            let status = app::rollup_status(&config, &clients).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn relay_once(
    config: &Config,
    clients: &app::Clients,
    direction: Direction,
    tx_hash: B256,
) -> eyre::Result<()> {
    let store = app::open_store(config).await?;
    let orchestrator = app::build_orchestrator(config, clients, store, None);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_cancel.cancel();
    });

    match orchestrator.relay(direction, tx_hash, &cancel).await {
        Ok(report) => {
            print_report(&report)?;
            if !report.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(%direction, %tx_hash, error = %e, "Relay failed");
            std::process::exit(1);
        }
    }
}

fn print_report(report: &RelayReport) -> eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

async fn watch(
    config: &Config,
    clients: &app::Clients,
    l1_start_block: Option<u64>,
    l2_start_block: Option<u64>,
    max_block_range: u64,
) -> eyre::Result<()> {
    let store = app::open_store(config).await?;
    let metrics = Arc::new(Metrics::new());
    let stats = Arc::new(RwLock::new(RelayerStats::default()));
    let orchestrator = Arc::new(app::build_orchestrator(
        config,
        clients,
        store,
        Some(metrics.clone()),
    ));

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let bind_address = config.service.api_bind_address.clone();
    let server_stats = stats.clone();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) =
            server::start_server(&bind_address, server_stats, metrics, server_shutdown).await
        {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let poll_interval = Duration::from_millis(config.relayer.poll_interval_ms);
    let mut deposits = MessageWatcher::new(
        orchestrator.clone(),
        Direction::Deposit,
        stats.clone(),
        poll_interval,
    )
    .with_max_block_range(max_block_range);
    if let Some(block) = l1_start_block {
        deposits = deposits.with_start_block(block);
    }
    let mut withdrawals =
        MessageWatcher::new(orchestrator, Direction::Withdrawal, stats, poll_interval)
            .with_max_block_range(max_block_range);
    if let Some(block) = l2_start_block {
        withdrawals = withdrawals.with_start_block(block);
    }

    tracing::info!("Watchers initialized, starting processing");

    let (deposit_result, withdrawal_result) =
        tokio::join!(deposits.run(shutdown.clone()), withdrawals.run(shutdown.clone()));
    if let Err(e) = deposit_result {
        tracing::error!(error = %e, "Deposit watcher error");
    }
    if let Err(e) = withdrawal_result {
        tracing::error!(error = %e, "Withdrawal watcher error");
    }

    tracing::info!("OVM bridge relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ovm_bridge_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
