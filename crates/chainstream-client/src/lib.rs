//! Consumer library for the Chainstream protocol.
//!
//! [`StreamClient`] connects to a Chainstream server, streams compressed
//! block frames, and hands decoded, strictly-ordered blocks to a
//! [`BlockHandler`]. Two cooperating tasks share a bounded byte buffer:
//!
//! ```text
//! ┌────────────┐  compressed frames  ┌─────────────┐  ordered blocks  ┌─────────┐
//! │  Receiver  │────────────────────▶│ FrameBuffer │─────────────────▶│ Handler │
//! │  (socket)  │   waits for space   │  (bounded)  │   slice_batch    │ (yours) │
//! └────────────┘                     └─────────────┘                  └─────────┘
//! ```
//!
//! The receiver waits while the buffer is full, so a slow handler
//! backpressures the socket instead of growing memory. All accounting is in
//! compressed bytes.
//!
//! # Ordering
//!
//! The handler sees blocks in strictly ascending order starting exactly at
//! the requested block: leading blocks from an aligned first batch are
//! filtered, gaps are protocol errors. On any error the client closes the
//! socket, waits, and reconnects from the last delivered block + 1.
//!
//! # Example
//!
//! ```ignore
//! use chainstream_client::{BlockHandler, ClientOptions, StreamClient};
//!
//! let client = StreamClient::new("ws://localhost:8080", 1, ClientOptions::default())?;
//! client.run(handler, shutdown_token).await?;
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;

pub use buffer::FrameBuffer;
pub use client::{BlockHandler, StreamClient};
pub use config::ClientOptions;
pub use error::{ClientError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
