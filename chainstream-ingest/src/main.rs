//! Chainstream Ingest CLI
//!
//! Entry point for the service binary. Provides subcommands for:
//! - `run` - Start ingestion, compaction, and the streaming server
//! - `version` - Show version information

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chainstream_ingest::config::Settings;
use chainstream_ingest::error::{AppError, Result};
use chainstream_ingest::ingest::{
    AdaptiveController, BlockFetcher, Compactor, HeadTracker, Orchestrator,
};
use chainstream_ingest::server::{ServerState, serve};
use chainstream_ingest::store::{BlockStore, RocksStore};
use evm_rpc::EvmRpcClient;

/// Chainstream ingestion service
#[derive(Parser, Debug)]
#[command(name = "chainstream-ingest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Environment name used to pick the configuration file
    #[arg(short, long, default_value = "production")]
    environment: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingestion service
    Run,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run(&cli.environment).await,
        Commands::Version => {
            println!("chainstream-ingest {}", chainstream_ingest::VERSION);
            Ok(())
        }
    }
}

/// Load configuration, wire the pipeline, and run until interrupted.
async fn run(environment: &str) -> Result<()> {
    let settings = Settings::load(environment).map_err(|e| AppError::Config(e.to_string()))?;
    settings
        .validate()
        .map_err(|errors| AppError::Config(errors.join("; ")))?;

    init_tracing(&settings);

    info!(
        version = chainstream_ingest::VERSION,
        environment, "Starting Chainstream ingest"
    );

    if settings.metrics.enabled {
        let addr = settings
            .metrics
            .listen_addr
            .parse()
            .map_err(|e| AppError::Config(format!("metrics.listen_addr: {e}")))?;
        chainstream_ingest::metrics::init(addr)?;
    }

    let cancel = CancellationToken::new();

    // Upstream transport and head tracking.
    let client = Arc::new(EvmRpcClient::new(settings.rpc.url.clone())?);
    let head_tracker = Arc::new(HeadTracker::new(Arc::clone(&client))?);
    head_tracker.start().await?;

    match client.chain_id().await {
        Ok(rpc_chain_id) => {
            info!(rpc_chain_id, chain = %settings.chain.id, "Connected to RPC");
        }
        Err(e) => warn!(error = %e, "Could not read eth_chainId from RPC"),
    }

    // Controller, fetcher, store.
    let controller = AdaptiveController::new(
        settings.rpc.max_parallelism,
        settings.rpc.max_p95_latency(),
    );
    let fetcher = Arc::new(BlockFetcher::new(
        Arc::clone(&client),
        Arc::clone(&controller),
        Arc::clone(&head_tracker),
        settings.ingest.lookahead,
    ));
    let store = Arc::new(RocksStore::open(&settings.storage.path)?);

    // Background tasks: ingestion, compaction, streaming server.
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        settings.ingest.lookahead,
    );
    let ingest_cancel = cancel.child_token();
    let ingest_task = tokio::spawn(async move { orchestrator.run(ingest_cancel).await });

    let compactor = Compactor::new(Arc::clone(&store));
    let compactor_cancel = cancel.child_token();
    let compactor_task = tokio::spawn(async move { compactor.run(compactor_cancel).await });

    let listener = TcpListener::bind(&settings.server.listen_addr)
        .await
        .map_err(|e| {
            AppError::Initialization(format!("bind {}: {e}", settings.server.listen_addr))
        })?;
    let state = ServerState::new(
        Arc::clone(&store) as Arc<dyn BlockStore>,
        settings.chain.id.clone(),
        cancel.child_token(),
    )?;
    let server_task = tokio::spawn(serve(listener, state));

    // Cooperative shutdown: cancel the root, then wait for everything.
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::Task(format!("signal: {e}")))?;
    info!("Shutdown signal received");
    cancel.cancel();

    head_tracker.stop().await;
    controller.stop().await;
    let _ = ingest_task.await;
    let _ = compactor_task.await;
    if let Ok(Err(e)) = server_task.await {
        error!(error = %e, "Server terminated with error");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber from settings, honoring `RUST_LOG`.
fn init_tracing(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
