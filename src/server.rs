//! Server bootstrap.
//!
//! Wires together configuration, the database pool, the L1 gateway, the
//! long-lived tasks (arranger, sender, janitor, watchdog) and the two
//! listening surfaces: the prover gRPC endpoint and the ops HTTP endpoint.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::Context;
use axum::routing::get;
use axum::Json;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::arranger::{ArrangerConfig, ProofArranger};
use crate::grpc::AggregatorGrpcService;
use crate::infra::{
    AcceptAllProfitabilityChecker, BaseProfitabilityChecker, L1Client, L1TxMonitor, PgProofStore,
    PgTxMonitor, ProfitabilityChecker, ProofStore,
};
use crate::l1::EthClient;
use crate::metrics;
use crate::orchestrator::{
    run_locked_proof_janitor, run_skipped_sequence_watchdog, Orchestrator, OrchestratorConfig,
};
use crate::proto::aggregator_service_server::AggregatorServiceServer;
use crate::sender::{ProofSender, SenderConfig};

/// Backpressure bound for the arranger/sender/monitor channels.
const CHANNEL_CAPACITY: usize = 10_240;

/// Profitability predicate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfitabilityCheckerType {
    Base,
    AcceptAll,
}

impl FromStr for ProfitabilityCheckerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(ProfitabilityCheckerType::Base),
            "acceptall" => Ok(ProfitabilityCheckerType::AcceptAll),
            other => Err(format!("unknown profitability checker: {other}")),
        }
    }
}

/// Aggregator configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub sender_address: Address,
    pub sender_private_key: String,
    pub chain_id: u64,
    pub fork_id: u64,
    pub host: String,
    pub port: u16,
    pub ops_port: u16,
    pub database_url: String,
    pub l1_rpc_url: String,
    pub rollup_address: Address,
    pub proof_state_polling_interval: Duration,
    pub retry_time: Duration,
    pub verify_proof_interval: Duration,
    pub cleanup_locked_proofs_interval: Duration,
    pub interval_after_which_batch_consolidate_anyway: Duration,
    pub tx_profitability_checker_type: ProfitabilityCheckerType,
    pub tx_profitability_min_reward: U256,
    pub start_batch_num: u64,
    pub max_db_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let sender_address = required("AGG_SENDER_ADDRESS")?
            .parse()
            .context("AGG_SENDER_ADDRESS is not a valid address")?;
        let rollup_address = required("AGG_ROLLUP_ADDRESS")?
            .parse()
            .context("AGG_ROLLUP_ADDRESS is not a valid address")?;
        let chain_id = required("AGG_CHAIN_ID")?
            .parse()
            .context("AGG_CHAIN_ID is not a valid u64")?;
        let fork_id = required("AGG_FORK_ID")?
            .parse()
            .context("AGG_FORK_ID is not a valid u64")?;

        Ok(Self {
            sender_address,
            sender_private_key: required("AGG_SENDER_PRIVATE_KEY")?,
            chain_id,
            fork_id,
            host: std::env::var("AGG_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed_or("AGG_PORT", 50081),
            ops_port: parsed_or("AGG_OPS_PORT", 8090),
            database_url: required("DATABASE_URL")?,
            l1_rpc_url: required("AGG_L1_RPC_URL")?,
            rollup_address,
            proof_state_polling_interval: secs_or("AGG_PROOF_STATE_POLLING_INTERVAL_SECS", 5),
            retry_time: secs_or("AGG_RETRY_TIME_SECS", 5),
            verify_proof_interval: secs_or("AGG_VERIFY_PROOF_INTERVAL_SECS", 90),
            cleanup_locked_proofs_interval: secs_or("AGG_CLEANUP_LOCKED_PROOFS_INTERVAL_SECS", 120),
            interval_after_which_batch_consolidate_anyway: secs_or(
                "AGG_CONSOLIDATE_ANYWAY_INTERVAL_SECS",
                0,
            ),
            tx_profitability_checker_type: std::env::var("AGG_PROFITABILITY_CHECKER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(ProfitabilityCheckerType::AcceptAll),
            tx_profitability_min_reward: std::env::var("AGG_PROFITABILITY_MIN_REWARD_WEI")
                .ok()
                .and_then(|v| U256::from_str(&v).ok())
                .unwrap_or(U256::ZERO),
            start_batch_num: parsed_or("AGG_START_BATCH_NUM", 0),
            max_db_connections: parsed_or("MAX_DB_CONNECTIONS", 10),
        })
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_or(name: &str, default: u64) -> Duration {
    Duration::from_secs(parsed_or(name, default))
}

/// Start the aggregator.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let cfg = Config::from_env()?;
    info!(
        "Starting zkEVM aggregator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_db_connections)
        .connect(&cfg.database_url)
        .await
        .context("failed to connect to database")?;
    crate::migrations::run_postgres(&pool).await?;

    let store: Arc<dyn ProofStore> = Arc::new(PgProofStore::new(pool.clone()));
    let l1: Arc<dyn L1Client> = Arc::new(EthClient::new(
        cfg.l1_rpc_url.clone(),
        cfg.rollup_address,
    ));
    let monitor: Arc<dyn L1TxMonitor> = Arc::new(PgTxMonitor::new(
        pool.clone(),
        cfg.l1_rpc_url.clone(),
        &cfg.sender_private_key,
    )?);

    // The epoch constants gate the whole commit-reveal protocol; refusing to
    // start without them is the only permitted hard failure.
    let hash_epoch = l1
        .get_proof_hash_commit_epoch()
        .await
        .context("failed to read proof hash commit epoch from L1")?;
    let proof_epoch = l1
        .get_proof_commit_epoch()
        .await
        .context("failed to read proof commit epoch from L1")?;
    info!(hash_epoch, proof_epoch, "Commit-reveal epochs loaded");

    store
        .delete_ungenerated_proofs()
        .await
        .context("failed to reset ungenerated proofs")?;

    let profitability: Arc<dyn ProfitabilityChecker> = match cfg.tx_profitability_checker_type {
        ProfitabilityCheckerType::Base => Arc::new(BaseProfitabilityChecker::new(
            cfg.tx_profitability_min_reward,
            cfg.interval_after_which_batch_consolidate_anyway,
        )),
        ProfitabilityCheckerType::AcceptAll => Arc::new(AcceptAllProfitabilityChecker),
    };

    let start_sequence = if cfg.start_batch_num > 0 {
        Some(
            store
                .get_sequence(cfg.start_batch_num)
                .await
                .context("failed to resolve the start batch sequence")?,
        )
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let (final_proof_tx, final_proof_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (proof_hash_tx, proof_hash_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (send_fail_tx, send_fail_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig {
            sender_address: cfg.sender_address,
            chain_id: cfg.chain_id,
            fork_id: cfg.fork_id,
            retry_time: cfg.retry_time,
        },
        store.clone(),
        l1.clone(),
        profitability,
        start_sequence,
    ));

    tokio::spawn(run_locked_proof_janitor(
        store.clone(),
        cfg.cleanup_locked_proofs_interval,
        cancel.clone(),
    ));
    tokio::spawn(run_skipped_sequence_watchdog(
        orchestrator.clone(),
        cfg.verify_proof_interval,
        cancel.clone(),
    ));

    let arranger = ProofArranger::new(
        ArrangerConfig {
            sender_address: cfg.sender_address,
        },
        store.clone(),
        final_proof_tx,
        proof_hash_tx.clone(),
        send_fail_rx,
    );
    tokio::spawn(arranger.run(cancel.clone()));

    let sender = ProofSender::new(
        SenderConfig {
            sender_address: cfg.sender_address,
            retry_time: cfg.retry_time,
        },
        store.clone(),
        l1.clone(),
        monitor,
        final_proof_rx,
        proof_hash_rx,
        proof_hash_tx,
        send_fail_tx,
        hash_epoch,
        proof_epoch,
    );
    tokio::spawn(sender.run(cancel.clone()));

    // Ops surface: health + metrics.
    let ops_router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(TraceLayer::new_for_http());
    let ops_addr: SocketAddr = format!("{}:{}", cfg.host, cfg.ops_port)
        .parse()
        .context("invalid ops listen address")?;
    let ops_listener = tokio::net::TcpListener::bind(ops_addr)
        .await
        .context("failed to bind ops listener")?;
    info!(%ops_addr, "Ops server listening");
    tokio::spawn(async move {
        let _ = axum::serve(ops_listener, ops_router).await;
    });

    // Prover gRPC surface.
    let grpc_addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid gRPC listen address")?;
    let service = AggregatorGrpcService::new(
        orchestrator,
        cfg.fork_id,
        cfg.proof_state_polling_interval,
        cancel.clone(),
    );
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<AggregatorServiceServer<AggregatorGrpcService>>()
        .await;

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    info!(%grpc_addr, "gRPC server listening");
    let shutdown = cancel.clone();
    tonic::transport::Server::builder()
        .add_service(health_service)
        .add_service(AggregatorServiceServer::new(service))
        .serve_with_shutdown(grpc_addr, async move { shutdown.cancelled().await })
        .await
        .context("gRPC server failed")?;

    cancel.cancel();
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_text() -> String {
    metrics::render()
}
