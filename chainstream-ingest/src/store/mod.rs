//! Durable, ordered key-value persistence for blocks and batches.
//!
//! The pipeline sees storage through the [`BlockStore`] port; adapters
//! implement it over concrete engines ([`RocksStore`] for production,
//! [`MemoryStore`] for tests and ephemeral runs).
//!
//! # Keyspace
//!
//! Three disjoint key families live in one ordered keyspace:
//!
//! | Family | Key | Value |
//! |--------|-----|-------|
//! | Individual blocks | `block:{N:020}` | JSON-serialized normalized block |
//! | Compressed batches | `batch:{start:020}-{end:020}` | zstd(JSONL) |
//! | Meta | `meta` | last compacted block, 8-byte big-endian |
//!
//! Zero-padded decimal keys make lexicographic iteration ascend numerically.
//! Prefix scans are bounded by `[prefix:, prefix;)` - `;` is the lexical
//! successor of `:` and padded-decimal keys contain only digits and `-`.
//!
//! # Guarantees
//!
//! Adapters must provide per-key durable writes (acknowledged only after
//! sync), snapshot-consistent range scans, and an atomic
//! [`delete_block_range`](BlockStore::delete_block_range). Cross-family
//! invariants (contiguity, batch alignment, no overlap) are enforced by the
//! callers - the fetcher and the compactor.

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use async_trait::async_trait;

use crate::error::{InfraError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// KEY ENCODING
// ═══════════════════════════════════════════════════════════════════════════════

/// Prefix of the individual-block key family.
pub(crate) const BLOCK_PREFIX: &str = "block:";

/// Exclusive upper bound for scans of the block family.
pub(crate) const BLOCK_SCAN_UPPER: &str = "block;";

/// Prefix of the batch key family.
pub(crate) const BATCH_PREFIX: &str = "batch:";

/// Exclusive upper bound for scans of the batch family.
pub(crate) const BATCH_SCAN_UPPER: &str = "batch;";

/// Key of the last-compacted-block marker.
pub(crate) const META_KEY: &str = "meta";

/// Key for an individual block.
pub(crate) fn block_key(number: u64) -> String {
    format!("{BLOCK_PREFIX}{number:020}")
}

/// Key for a compressed batch.
pub(crate) fn batch_key(start: u64, end: u64) -> String {
    format!("{BATCH_PREFIX}{start:020}-{end:020}")
}

/// Parse a block-family key back into its number.
pub(crate) fn parse_block_key(key: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(key)
        .map_err(|_| InfraError::CorruptKey(format!("{key:?}")))?;
    text.strip_prefix(BLOCK_PREFIX)
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| InfraError::CorruptKey(text.into()).into())
}

/// Parse a batch-family key back into its range.
pub(crate) fn parse_batch_key(key: &[u8]) -> Result<BatchRange> {
    let text = std::str::from_utf8(key)
        .map_err(|_| InfraError::CorruptKey(format!("{key:?}")))?;
    let parsed = text.strip_prefix(BATCH_PREFIX).and_then(|rest| {
        let (start, end) = rest.split_once('-')?;
        Some(BatchRange {
            start: start.parse().ok()?,
            end: end.parse().ok()?,
        })
    });
    parsed.ok_or_else(|| InfraError::CorruptKey(text.into()).into())
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK STORE PORT
// ═══════════════════════════════════════════════════════════════════════════════

/// Inclusive block range covered by a stored batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    /// First block in the batch (always a multiple of the batch size).
    pub start: u64,
    /// Last block in the batch (`start + BATCH_SIZE - 1`).
    pub end: u64,
}

/// Port for durable block and batch persistence.
///
/// All writes are durable before returning. Readers may run concurrently
/// with writers; range scans observe a consistent snapshot.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Durably persist the serialized block `number`.
    async fn save_block(&self, number: u64, data: &[u8]) -> Result<()>;

    /// Fetch an individual block, or `None` if absent.
    async fn get_block(&self, number: u64) -> Result<Option<Vec<u8>>>;

    /// Lowest individual block number, or `None` when the family is empty.
    async fn first_block(&self) -> Result<Option<u64>>;

    /// Highest individual block number, or `None` when the family is empty.
    async fn latest_block(&self) -> Result<Option<u64>>;

    /// Atomically delete all individual blocks in `[from, to]`.
    async fn delete_block_range(&self, from: u64, to: u64) -> Result<()>;

    /// Durably persist a compressed batch covering `[start, end]`.
    async fn save_batch(&self, start: u64, end: u64, data: &[u8]) -> Result<()>;

    /// Fetch the stored (still compressed) batch starting at `start`.
    async fn get_batch_compressed(&self, start: u64) -> Result<Option<Vec<u8>>>;

    /// Range of the lowest stored batch.
    async fn first_batch(&self) -> Result<Option<BatchRange>>;

    /// Range of the highest stored batch.
    async fn latest_batch(&self) -> Result<Option<BatchRange>>;

    /// Last compacted block number; 0 when never compacted.
    async fn get_meta(&self) -> Result<u64>;

    /// Durably persist the last compacted block number.
    async fn save_meta(&self, number: u64) -> Result<()>;

    /// Number of individual blocks currently stored
    /// (`latest - first + 1`, 0 when empty).
    async fn block_count(&self) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
