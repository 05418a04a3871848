//! Metric names and Prometheus exporter setup.
//!
//! Call sites record through the `metrics` macros using the names defined
//! here; [`init`] installs the Prometheus HTTP exporter and registers
//! descriptions.

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::AppError;

// ═══════════════════════════════════════════════════════════════════════════════
// METRIC NAMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Total normalized blocks ingested and persisted.
pub const BLOCKS_INGESTED: &str = "chainstream_blocks_ingested_total";

/// Highest block number persisted so far.
pub const LAST_INGESTED_BLOCK: &str = "chainstream_last_ingested_block";

/// Latest chain head observed by the head tracker.
pub const CHAIN_HEAD: &str = "chainstream_chain_head";

/// Distance between the chain head and the last persisted block.
pub const BEHIND_HEAD: &str = "chainstream_behind_head";

/// RPC requests by outcome (`status` label: `ok` / `error`).
pub const RPC_REQUESTS: &str = "chainstream_rpc_requests_total";

/// Concurrency limit currently chosen by the adaptive controller.
pub const RPC_PARALLELISM: &str = "chainstream_rpc_parallelism";

/// Batches written by the compactor.
pub const BATCHES_COMPACTED: &str = "chainstream_batches_compacted_total";

/// Currently connected stream subscribers.
pub const SUBSCRIBERS: &str = "chainstream_subscribers";

// ═══════════════════════════════════════════════════════════════════════════════
// EXPORTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Install the Prometheus exporter on `addr` and describe all metrics.
///
/// # Errors
///
/// Returns [`AppError::Initialization`] if the exporter cannot bind.
pub fn init(addr: SocketAddr) -> Result<(), AppError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::Initialization(format!("metrics exporter: {e}")))?;

    describe_counter!(BLOCKS_INGESTED, "Total normalized blocks persisted");
    describe_gauge!(LAST_INGESTED_BLOCK, "Highest block number persisted");
    describe_gauge!(CHAIN_HEAD, "Latest observed chain head");
    describe_gauge!(BEHIND_HEAD, "Chain head minus last persisted block");
    describe_counter!(RPC_REQUESTS, "RPC requests by outcome");
    describe_gauge!(RPC_PARALLELISM, "Current adaptive concurrency limit");
    describe_counter!(BATCHES_COMPACTED, "Batches written by the compactor");
    describe_gauge!(SUBSCRIBERS, "Connected stream subscribers");

    info!(%addr, "Metrics exporter listening");
    Ok(())
}
