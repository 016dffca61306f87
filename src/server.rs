//! HTTP server for health and metrics endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::types::{Direction, RelayOutcome};

/// Relayer statistics shared between the watcher and the HTTP server
#[derive(Debug, Default, Clone)]
pub struct RelayerStats {
    /// Messages relayed by this process
    pub relayed: u64,
    /// Messages found already relayed
    pub already_relayed: u64,
    /// Messages that ended in Failed
    pub failed: u64,
    /// Last scanned L1 block
    pub last_l1_block: u64,
    /// Last scanned L2 block
    pub last_l2_block: u64,
}

impl RelayerStats {
    pub fn record_outcome(&mut self, outcome: &RelayOutcome) {
        match outcome {
            RelayOutcome::Relayed { .. } => self.relayed += 1,
            RelayOutcome::AlreadyRelayed => self.already_relayed += 1,
        }
    }

    pub fn record_scan(&mut self, direction: Direction, block: u64) {
        match direction {
            Direction::Deposit => self.last_l1_block = block,
            Direction::Withdrawal => self.last_l2_block = block,
        }
    }
}

/// Prometheus metrics
pub struct Metrics {
    /// Relays by direction and outcome (relayed, already_relayed, failed)
    pub relays_total: IntCounterVec,
    /// Step retries after a retryable error
    pub retries_total: IntCounter,
    /// Commitment polling rounds
    pub batch_wait_rounds: IntCounter,
    pub last_l1_block: IntGauge,
    pub last_l2_block: IntGauge,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let relays_total = IntCounterVec::new(
            Opts::new(
                "relayer_messages_total",
                "Cross-domain messages processed, by direction and outcome",
            ),
            &["direction", "outcome"],
        )
        .expect("constant metric name is valid");

        let retries_total = IntCounter::new(
            "relayer_submission_retries_total",
            "Relay submissions retried after a retryable error",
        )
        .expect("constant metric name is valid");

        let batch_wait_rounds = IntCounter::new(
            "relayer_batch_wait_rounds_total",
            "Polling rounds spent waiting for state commitments",
        )
        .expect("constant metric name is valid");

        let last_l1_block = IntGauge::new(
            "relayer_last_l1_block_scanned",
            "Last L1 block scanned for deposits",
        )
        .expect("constant metric name is valid");

        let last_l2_block = IntGauge::new(
            "relayer_last_l2_block_scanned",
            "Last L2 block scanned for withdrawals",
        )
        .expect("constant metric name is valid");

        registry
            .register(Box::new(relays_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(retries_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(batch_wait_rounds.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(last_l1_block.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(last_l2_block.clone()))
            .expect("metric registration must not be called twice");

        Self {
            relays_total,
            retries_total,
            batch_wait_rounds,
            last_l1_block,
            last_l2_block,
            registry,
        }
    }

    pub fn record_relay(&self, direction: Direction, outcome: &str) {
        self.relays_total
            .with_label_values(&[direction.as_str(), outcome])
            .inc();
    }
}

/// Shared state for the HTTP server
pub type SharedStats = Arc<RwLock<RelayerStats>>;
pub type SharedMetrics = Arc<Metrics>;

/// Combined app state
#[derive(Clone)]
pub struct AppState {
    pub stats: SharedStats,
    pub metrics: SharedMetrics,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub relayed: u64,
    pub already_relayed: u64,
    pub failed: u64,
    pub last_l1_block: u64,
    pub last_l2_block: u64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.stats.read().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        relayed: stats.relayed,
        already_relayed: stats.already_relayed,
        failed: stats.failed,
        last_l1_block: stats.last_l1_block,
        last_l2_block: stats.last_l2_block,
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness probe: ready once either watcher has scanned a block
async fn readiness(State(state): State<AppState>) -> &'static str {
    let stats = state.stats.read().await;
    if stats.last_l1_block > 0 || stats.last_l2_block > 0 {
        "OK"
    } else {
        "NOT_READY"
    }
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let stats = state.stats.read().await;
    state.metrics.last_l1_block.set(stats.last_l1_block as i64);
    state.metrics.last_l2_block.set(stats.last_l2_block as i64);
    drop(stats);

    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve health and metrics until `shutdown` fires
pub async fn start_server(
    bind_address: &str,
    stats: SharedStats,
    metrics: SharedMetrics,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let app = router(AppState { stats, metrics });

    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}: {}", bind_address, e))?;
    info!("Health server listening on {}", addr);
    info!("  /health  - Full health status (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
