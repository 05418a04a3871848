//! Shared data model for the Chainstream pipeline.
//!
//! Every Chainstream boundary exchanges the same record: a [`NormalizedBlock`]
//! combining the raw chain block with its transaction receipts and call
//! traces. This crate defines that record, the invariants it must satisfy,
//! and the JSONL + zstd frame codec used both on disk (compacted batches)
//! and on the wire (streamed frames).
//!
//! # Crate Relationships
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Application Layer                                           │
//! │  └─ chainstream-ingest (fetcher, store, compactor, server)   │
//! │  └─ chainstream-client (consumer library)                    │
//! └──────────────────────────────────┬───────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Data Model Layer (chainstream-core) ◄── YOU ARE HERE        │
//! │  └─ NormalizedBlock: block + receipts + traces record        │
//! │  └─ frame: JSONL + zstd batch/frame codec                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! A well-formed normalized block satisfies, and [`NormalizedBlock::validate`]
//! enforces:
//!
//! - `receipts.len() == traces.len() == block.transactions.len()`
//! - `traces[i].tx_hash == block.transactions[i].hash`

pub mod block;
pub mod error;
pub mod frame;

pub use block::{CallFrame, NormalizedBlock, TraceEntry};
pub use error::CoreError;
pub use frame::BATCH_SIZE;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
