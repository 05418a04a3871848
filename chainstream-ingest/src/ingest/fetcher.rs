//! Sliding-window block fetcher.
//!
//! Turns an unordered pool of concurrent RPC workers into a strictly
//! contiguous stream of normalized blocks. Given a starting block `S`, the
//! fetcher emits `S, S+1, S+2, ...` forever, pulling in parallel up to the
//! controller's current limit and its own lookahead window.
//!
//! # Assembly
//!
//! Each block needs three pieces: the full block, its receipts, and its
//! call traces. The window is sliced into assembly chunks of up to
//! [`BLOCKS_PER_ASSEMBLY`] blocks; one chunk's block and receipt calls fill
//! a single [`STANDARD_BATCH_LIMIT`]-element JSON-RPC array, while traces
//! ship [`TRACE_BATCH_LIMIT`] per array because servers execute them. Every
//! array takes one controller permit and carries its own retry budget.
//!
//! # Ordering
//!
//! Completed chunks land in a reorder buffer keyed by their first block;
//! the emit cursor drains it in order. Stale or duplicate completions are
//! discarded. When the cursor passes the last known head, the fetcher polls
//! the head tracker at a short cadence until the chain moves.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chainstream_core::{NormalizedBlock, TraceEntry};
use evm_rpc::{EvmRpcClient, RpcCall, RpcError};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::controller::AdaptiveController;
use super::head_tracker::HeadSource;
use crate::error::{AppError, InfraError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum standard calls per JSON-RPC array.
const STANDARD_BATCH_LIMIT: usize = 50;

/// Maximum debug-trace calls per JSON-RPC array. Traces replay every
/// transaction server-side; small arrays keep per-request latency sane.
const TRACE_BATCH_LIMIT: usize = 2;

/// Blocks per assembly chunk. Two standard calls per block, so one chunk
/// exactly fills a standard array.
const BLOCKS_PER_ASSEMBLY: u64 = (STANDARD_BATCH_LIMIT / 2) as u64;

/// Retry budget per JSON-RPC array.
const MAX_FETCH_ATTEMPTS: u32 = 20;

/// First retry delay; doubles per attempt.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Ceiling on the exponential backoff.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Cadence for re-checking the head once the stream has caught up.
const TIP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default lookahead window (blocks in flight ahead of the emit cursor).
pub const DEFAULT_LOOKAHEAD: u64 = 100;

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK FETCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered, parallel fetcher of normalized blocks.
///
/// # Type Parameters
///
/// * `H` - Source of the latest known chain head
#[derive(Debug)]
pub struct BlockFetcher<H> {
    /// RPC transport shared with the rest of the pipeline.
    client: Arc<EvmRpcClient>,
    /// Concurrency limiter bounding every RPC array.
    controller: Arc<AdaptiveController>,
    /// Latest-head source consulted on the scheduling path.
    head: Arc<H>,
    /// Window size: blocks in flight ahead of the emit cursor.
    lookahead: u64,
}

impl<H> BlockFetcher<H>
where
    H: HeadSource + 'static,
{
    /// Create a fetcher with the given lookahead window.
    pub fn new(
        client: Arc<EvmRpcClient>,
        controller: Arc<AdaptiveController>,
        head: Arc<H>,
        lookahead: u64,
    ) -> Self {
        Self {
            client,
            controller,
            head,
            lookahead: lookahead.max(1),
        }
    }

    /// Latest known chain head (delegates to the head source).
    #[must_use]
    pub fn latest_known_head(&self) -> u64 {
        self.head.latest()
    }

    /// Stream normalized blocks `from_block, from_block+1, ...` into `out`
    /// in strict ascending order, until cancelled or a fatal error.
    ///
    /// Transient RPC failures are retried per array; what escapes here is
    /// unrecoverable for this stream and the caller decides where to resume.
    ///
    /// # Errors
    ///
    /// Returns retry exhaustion, invariant violations in fetched data, or
    /// task failures. Cancellation and a closed `out` end the stream with
    /// `Ok(())`.
    #[instrument(skip(self, out, cancel), fields(from_block, lookahead = self.lookahead))]
    pub async fn stream(
        &self,
        from_block: u64,
        out: mpsc::Sender<NormalizedBlock>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut cursor = from_block;
        let mut next_schedule = from_block;
        let mut in_flight: u64 = 0;
        let mut buffered: u64 = 0;
        let mut pending: BTreeMap<u64, Vec<NormalizedBlock>> = BTreeMap::new();
        let mut tasks: JoinSet<Result<(u64, Vec<NormalizedBlock>)>> = JoinSet::new();

        debug!(from_block, "Fetch stream starting");

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            // Fill the window with assembly chunks up to the head.
            let head = self.head.latest();
            while in_flight + buffered < self.lookahead
                && next_schedule <= head
                && next_schedule < cursor + self.lookahead
            {
                let capacity = self.lookahead - (in_flight + buffered);
                let chunk_start = next_schedule;
                let chunk_end = chunk_start
                    .saturating_add(BLOCKS_PER_ASSEMBLY - 1)
                    .min(head)
                    .min(cursor + self.lookahead - 1)
                    .min(chunk_start + capacity - 1);

                let client = Arc::clone(&self.client);
                let controller = Arc::clone(&self.controller);
                let task_cancel = cancel.clone();
                tasks.spawn(async move {
                    assemble_range(&client, &controller, &task_cancel, chunk_start, chunk_end).await
                });

                in_flight += chunk_end - chunk_start + 1;
                next_schedule = chunk_end + 1;
            }

            // Caught up and nothing in flight: poll the tip.
            if tasks.is_empty() {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = sleep(TIP_POLL_INTERVAL) => continue,
                }
            }

            let joined = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                joined = tasks.join_next() => joined,
                // Keep scheduling while long assemblies run and the head moves.
                () = sleep(TIP_POLL_INTERVAL) => continue,
            };
            let Some(joined) = joined else { continue };

            let (chunk_start, blocks) = match joined {
                Err(join_error) => {
                    return Err(AppError::Task(format!("assembly task: {join_error}")));
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(completed)) => completed,
            };

            in_flight -= blocks.len() as u64;
            if chunk_start < cursor {
                debug!(chunk_start, cursor, "Discarding stale assembly");
            } else {
                buffered += blocks.len() as u64;
                pending.insert(chunk_start, blocks);
            }

            // Drain everything contiguous with the cursor.
            while let Some(blocks) = pending.remove(&cursor) {
                buffered -= blocks.len() as u64;
                let advance = blocks.len() as u64;
                for block in blocks {
                    if out.send(block).await.is_err() {
                        // Consumer hung up; nothing left to stream to.
                        return Ok(());
                    }
                }
                cursor += advance;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ASSEMBLY
// ═══════════════════════════════════════════════════════════════════════════════

/// Fetch and combine blocks `[start, end]` into normalized form.
async fn assemble_range(
    client: &EvmRpcClient,
    controller: &AdaptiveController,
    cancel: &CancellationToken,
    start: u64,
    end: u64,
) -> Result<(u64, Vec<NormalizedBlock>)> {
    let numbers: Vec<u64> = (start..=end).collect();

    // Interleaved per block: [block N, receipts N, block N+1, receipts N+1, ...]
    let standard_calls: Vec<RpcCall> = numbers
        .iter()
        .flat_map(|&n| [RpcCall::block_by_number(n), RpcCall::block_receipts(n)])
        .collect();
    let trace_calls: Vec<RpcCall> = numbers.iter().map(|&n| RpcCall::trace_block(n)).collect();

    let (standard_results, trace_results) = tokio::join!(
        fetch_arrays(client, controller, cancel, &standard_calls, STANDARD_BATCH_LIMIT),
        fetch_arrays(client, controller, cancel, &trace_calls, TRACE_BATCH_LIMIT),
    );
    let mut standard_results = standard_results?;
    let mut trace_results = trace_results?;

    let mut blocks = Vec::with_capacity(numbers.len());
    for (i, &number) in numbers.iter().enumerate() {
        let block = std::mem::take(&mut standard_results[2 * i]);
        if block.is_null() {
            return Err(InfraError::Rpc(RpcError::InvalidResponse(format!(
                "block {number} not found"
            )))
            .into());
        }
        let receipts: Vec<Value> = serde_json::from_value(std::mem::take(&mut standard_results[2 * i + 1]))?;
        let traces: Vec<TraceEntry> = serde_json::from_value(std::mem::take(&mut trace_results[i]))?;

        let normalized = NormalizedBlock {
            block,
            receipts,
            traces,
        };

        let got = normalized.number()?;
        if got != number {
            return Err(AppError::BlockMismatch {
                expected: number,
                got,
            });
        }
        normalized.validate()?;

        blocks.push(normalized);
    }

    Ok((start, blocks))
}

/// Split calls into arrays of at most `limit`, fetch them concurrently (one
/// permit each), and return the flattened results in call order.
async fn fetch_arrays(
    client: &EvmRpcClient,
    controller: &AdaptiveController,
    cancel: &CancellationToken,
    calls: &[RpcCall],
    limit: usize,
) -> Result<Vec<Value>> {
    let futures: Vec<_> = calls
        .chunks(limit)
        .map(|array| fetch_array_with_retry(client, controller, cancel, array))
        .collect();

    let mut flat = Vec::with_capacity(calls.len());
    for result in join_all(futures).await {
        flat.extend(result?);
    }
    Ok(flat)
}

/// One JSON-RPC array through the controller, with exponential-backoff
/// retries for transient failures.
async fn fetch_array_with_retry(
    client: &EvmRpcClient,
    controller: &AdaptiveController,
    cancel: &CancellationToken,
    calls: &[RpcCall],
) -> Result<Vec<Value>> {
    let mut attempt = 0u32;
    let mut delay = INITIAL_RETRY_DELAY;

    loop {
        attempt += 1;
        match controller.execute(cancel, || client.batch(calls)).await? {
            Ok(results) => return Ok(results),
            Err(e) if !e.is_retryable() => return Err(InfraError::Rpc(e).into()),
            Err(e) if attempt >= MAX_FETCH_ATTEMPTS => {
                return Err(AppError::RetriesExhausted {
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                warn!(
                    attempt,
                    max = MAX_FETCH_ATTEMPTS,
                    calls = calls.len(),
                    error = %e,
                    "Batch fetch failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(AppError::ShutdownRequested),
                    () = sleep(delay) => {}
                }
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
