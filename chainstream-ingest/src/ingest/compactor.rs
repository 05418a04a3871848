//! Background compaction of individual blocks into aligned batches.
//!
//! Every tick the compactor looks for a full, aligned window of
//! [`BATCH_SIZE`] individual blocks that is at least [`MIN_BUFFER`] blocks
//! behind the newest individual block, serializes the window as JSONL,
//! compresses it, and replaces the individual entries with one batch key.
//! The newest `MIN_BUFFER` blocks always stay individual so tip consumers
//! read them without touching a batch.
//!
//! # Crash safety
//!
//! One window commits in three durable steps, in this order: write batch,
//! write meta, delete individuals. A crash between any two steps leaves a
//! state the next run repairs: an existing batch whose individual blocks
//! are still present is recompacted byte-identically (blocks are immutable)
//! and then deleted; an existing batch whose blocks are gone is skipped.
//! The range delete itself is a single atomic write.
//!
//! # Window selection
//!
//! The window start aligns down from the first individual block. Two
//! irregular cases advance it instead of wedging the loop: a chain whose
//! history starts mid-window (block 0 never exists, so `0..B-1` can never
//! fill), and windows already fully compacted whose individuals are gone.

use std::sync::Arc;
use std::time::Duration;

use chainstream_core::{BATCH_SIZE, frame};
use metrics::counter;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::metrics::BATCHES_COMPACTED;
use crate::store::BlockStore;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Pause between compaction passes.
const TICK_INTERVAL: Duration = Duration::from_secs(3);

/// Number of newest individual blocks never compacted, so consumers at the
/// tip are always served single blocks with no batch latency.
const MIN_BUFFER: u64 = 1000;

// ═══════════════════════════════════════════════════════════════════════════════
// COMPACTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a single window attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompactOutcome {
    /// A batch was written; there may be more work immediately.
    Compacted,
    /// Nothing eligible right now.
    Idle,
}

/// Converts buffered individual blocks into compressed aligned batches.
#[derive(Debug)]
pub struct Compactor<S> {
    store: Arc<S>,
    min_buffer: u64,
}

impl<S> Compactor<S>
where
    S: BlockStore,
{
    /// Create a compactor over `store` with the production buffer size.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            min_buffer: MIN_BUFFER,
        }
    }

    /// Override the tip buffer size. Tests compact short chains with this.
    #[must_use]
    pub const fn with_min_buffer(mut self, min_buffer: u64) -> Self {
        self.min_buffer = min_buffer;
        self
    }

    /// Run until cancelled, compacting every eligible window each tick.
    ///
    /// Errors are logged and retried next tick; a failed pass never leaves
    /// a half-applied window thanks to the step ordering.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: CancellationToken) {
        info!(min_buffer = self.min_buffer, "Compactor started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Compactor stopped");
                    return;
                }
                () = sleep(TICK_INTERVAL) => {}
            }

            if let Err(e) = self.compact_ready().await {
                warn!(error = %e, "Compaction pass failed, will retry next tick");
            }
        }
    }

    /// Compact windows until none is eligible.
    ///
    /// # Errors
    ///
    /// Returns the first store or serialization error; partial progress
    /// stays durable.
    pub async fn compact_ready(&self) -> Result<()> {
        while self.compact_next().await? == CompactOutcome::Compacted {}
        Ok(())
    }

    /// Attempt one window.
    async fn compact_next(&self) -> Result<CompactOutcome> {
        let (Some(first), Some(latest)) = (
            self.store.first_block().await?,
            self.store.latest_block().await?,
        ) else {
            return Ok(CompactOutcome::Idle);
        };

        // Keep a live buffer so consumers at the tip see individual blocks.
        if latest - first + 1 < self.min_buffer + BATCH_SIZE {
            return Ok(CompactOutcome::Idle);
        }

        let Some(batch_start) = self.next_window_start(first).await? else {
            return Ok(CompactOutcome::Idle);
        };
        let batch_end = batch_start + BATCH_SIZE - 1;

        // Never compact into the tip buffer.
        if latest < batch_end + self.min_buffer {
            return Ok(CompactOutcome::Idle);
        }

        let mut payloads = Vec::with_capacity(BATCH_SIZE as usize);
        for number in batch_start..=batch_end {
            match self.store.get_block(number).await? {
                Some(data) => payloads.push(data),
                None => {
                    warn!(number, batch_start, "Missing block in compaction window");
                    return Ok(CompactOutcome::Idle);
                }
            }
        }

        let compressed = frame::compress(&frame::jsonl_join(&payloads))?;
        self.store.save_batch(batch_start, batch_end, &compressed).await?;
        self.store.save_meta(batch_end).await?;
        self.store.delete_block_range(batch_start, batch_end).await?;

        counter!(BATCHES_COMPACTED).increment(1);
        debug!(
            batch_start,
            batch_end,
            compressed_bytes = compressed.len(),
            "Compacted batch"
        );

        Ok(CompactOutcome::Compacted)
    }

    /// Choose the aligned window to compact next, starting from the first
    /// individual block and skipping windows that can never fill.
    async fn next_window_start(&self, first: u64) -> Result<Option<u64>> {
        let mut start = first - first % BATCH_SIZE;

        // A history starting mid-window (no genesis block stored) leaves an
        // unfillable partial window below it.
        if start < first {
            start += BATCH_SIZE;
        }

        // Skip windows whose batch already exists and whose individuals are
        // gone: those compactions completed. A batch whose individuals
        // remain is a crash leftover and gets redone idempotently.
        loop {
            let batch_exists = self.store.get_batch_compressed(start).await?.is_some();
            if !batch_exists {
                return Ok(Some(start));
            }
            if self.store.get_block(start).await?.is_some() {
                return Ok(Some(start));
            }
            let Some(next) = start.checked_add(BATCH_SIZE) else {
                return Ok(None);
            };
            start = next;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
