//! Chainstream Ingestion Service
//!
//! Ingests the full history and live tip of an EVM-compatible chain from a
//! JSON-RPC endpoint, normalizes each block together with its receipts and
//! call traces, persists the stream durably, compacts it into compressed
//! batches, and serves it to subscribers over a push-based binary protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        INGESTION PIPELINE                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │  │    Head      │  │   Adaptive   │  │    Block     │               │
//! │  │   Tracker    │─▶│  Controller  │─▶│   Fetcher    │               │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘               │
//! │                                             │ ordered blocks        │
//! │                                      ┌──────▼───────┐               │
//! │        ┌──────────────┐   reads      │    Block     │               │
//! │        │  Compactor   │◀────────────▶│    Store     │               │
//! │        └──────────────┘   writes     └──────┬───────┘               │
//! │                                             │ reads                 │
//! │                                      ┌──────▼───────┐               │
//! │                                      │  Streaming   │──▶ subscribers│
//! │                                      │   Server     │               │
//! │                                      └──────────────┘               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`error`] - Layered error types
//! - [`config`] - Configuration loading and validation
//! - [`ingest`] - Head tracker, adaptive controller, fetcher, compactor,
//!   and the orchestrator that drives them
//! - [`store`] - Block store port and its RocksDB / in-memory adapters
//! - [`server`] - `/info` and `/ws` streaming endpoints
//! - [`metrics`] - Metric names and Prometheus exporter setup
//!
//! # Getting Started
//!
//! ```bash
//! CHAINSTREAM__RPC__URL=https://node.example.com/rpc \
//! CHAINSTREAM__CHAIN__ID=mainnet \
//! cargo run -- run
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod server;
pub mod store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().starts_with("0."));
    }
}
