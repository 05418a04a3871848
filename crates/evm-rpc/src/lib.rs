//! Raw JSON-RPC transport for EVM endpoints.
//!
//! This crate is the wire layer under the Chainstream ingestion pipeline.
//! It provides [`EvmRpcClient`], a thin reqwest-based JSON-RPC client with
//! array-form batching, and [`ws::NewHeadsSubscription`], a WebSocket
//! new-heads subscription used to follow the chain tip.
//!
//! # Features
//!
//! - **Array batching**: any mix of calls in one HTTP round trip, with
//!   responses matched back by id and returned in request order
//! - **Non-standard methods**: first-class request constructors for
//!   `eth_getBlockReceipts` and `debug_traceBlockByNumber`
//! - **Retry classification**: [`RpcError::is_retryable`] separates
//!   transient transport failures from permanent protocol errors; the
//!   caller owns the retry loop
//!
//! # Example
//!
//! ```ignore
//! use evm_rpc::{EvmRpcClient, RpcCall};
//!
//! let client = EvmRpcClient::new("https://node.example.com/rpc")?;
//!
//! let head = client.block_number().await?;
//! let results = client
//!     .batch(&[RpcCall::block_by_number(head), RpcCall::block_receipts(head)])
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod types;
pub mod ws;

pub use client::EvmRpcClient;
pub use config::ClientConfig;
pub use error::{Result, RpcError};
pub use types::RpcCall;
pub use ws::{NewHeadsSubscription, derive_ws_url};
