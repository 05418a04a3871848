//! The ingestion pipeline.
//!
//! - [`head_tracker`] - follows the chain tip via a push subscription
//! - [`controller`] - adaptive RPC concurrency limiter
//! - [`fetcher`] - ordered parallel block fetcher
//! - [`compactor`] - background batch compaction
//! - [`Orchestrator`] (here) - decides where to resume, drives the fetcher,
//!   persists its output, and restarts on fatal errors
//!
//! # Resume policy
//!
//! At startup and after every fatal fetcher termination, ingestion resumes
//! at the first block not yet durably persisted:
//!
//! 1. newest individual block + 1, if any individual blocks exist
//! 2. else newest batch end + 1, if any batches exist
//! 3. else meta + 1, if meta was ever written
//! 4. else block 1
//!
//! The store directory alone is enough to rebuild ingestion state; no
//! graceful shutdown is assumed anywhere.

pub mod compactor;
pub mod controller;
pub mod fetcher;
pub mod head_tracker;

pub use compactor::Compactor;
pub use controller::AdaptiveController;
pub use fetcher::BlockFetcher;
pub use head_tracker::{HeadSource, HeadTracker};

use std::sync::Arc;
use std::time::Duration;

use chainstream_core::NormalizedBlock;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::{AppError, Result};
use crate::metrics::{BEHIND_HEAD, BLOCKS_INGESTED, LAST_INGESTED_BLOCK};
use crate::store::BlockStore;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Pause before restarting the pipeline after a fatal termination.
const RESTART_DELAY: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Drives the fetcher and persists its ordered output.
#[derive(Debug)]
pub struct Orchestrator<S, H> {
    store: Arc<S>,
    fetcher: Arc<BlockFetcher<H>>,
    lookahead: u64,
}

impl<S, H> Orchestrator<S, H>
where
    S: BlockStore,
    H: HeadSource + 'static,
{
    /// Create an orchestrator. `lookahead` sizes the fetcher channel.
    pub fn new(store: Arc<S>, fetcher: Arc<BlockFetcher<H>>, lookahead: u64) -> Self {
        Self {
            store,
            fetcher,
            lookahead: lookahead.max(1),
        }
    }

    /// Derive the block to resume ingestion from.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn resume_position(&self) -> Result<u64> {
        if let Some(latest) = self.store.latest_block().await? {
            return Ok(latest + 1);
        }
        if let Some(batch) = self.store.latest_batch().await? {
            return Ok(batch.end + 1);
        }
        let meta = self.store.get_meta().await?;
        Ok(if meta > 0 { meta + 1 } else { 1 })
    }

    /// Run ingestion until cancelled, restarting after fatal errors.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            if let Err(e) = self.run_once(&cancel).await {
                error!(error = %e, "Ingestion terminated, will restart");
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep(RESTART_DELAY) => {}
            }
        }
    }

    /// One pipeline incarnation: resume, fetch, persist, until something
    /// dies or cancellation lands.
    async fn run_once(&self, cancel: &CancellationToken) -> Result<()> {
        let start = self.resume_position().await?;
        info!(start, "Ingestion starting");

        let (tx, rx) = mpsc::channel(self.lookahead as usize);
        let fetch_cancel = cancel.child_token();
        let fetch_handle = tokio::spawn({
            let fetcher = Arc::clone(&self.fetcher);
            let fetch_cancel = fetch_cancel.clone();
            async move { fetcher.stream(start, tx, fetch_cancel).await }
        });

        let persist_result = self.persist_stream(rx, start, cancel).await;

        fetch_cancel.cancel();
        let fetch_result = match fetch_handle.await {
            Ok(result) => result,
            Err(join_error) => Err(AppError::Task(format!("fetcher task: {join_error}"))),
        };

        match persist_result {
            // The channel closing cleanly means the fetcher ended; its
            // result says why.
            Ok(()) => fetch_result,
            Err(e) => {
                if let Err(fetch_error) = fetch_result {
                    warn!(error = %fetch_error, "Fetcher also terminated");
                }
                Err(e)
            }
        }
    }

    /// Consume the ordered stream, re-verify contiguity, persist durably.
    async fn persist_stream(
        &self,
        mut rx: mpsc::Receiver<NormalizedBlock>,
        start: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut expected = start;
        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                received = rx.recv() => received,
            };
            let Some(block) = received else {
                return Ok(());
            };

            let number = block.number()?;
            if number != expected {
                return Err(AppError::BlockMismatch {
                    expected,
                    got: number,
                });
            }

            let data = serde_json::to_vec(&block)?;
            self.store.save_block(number, &data).await?;

            counter!(BLOCKS_INGESTED).increment(1);
            gauge!(LAST_INGESTED_BLOCK).set(number as f64);
            let head = self.fetcher.latest_known_head();
            gauge!(BEHIND_HEAD).set(head.saturating_sub(number) as f64);

            expected += 1;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use evm_rpc::EvmRpcClient;
    use serde_json::json;

    struct FixedHead(u64);

    impl HeadSource for FixedHead {
        fn latest(&self) -> u64 {
            self.0
        }
    }

    fn orchestrator(store: Arc<MemoryStore>) -> Orchestrator<MemoryStore, FixedHead> {
        // The RPC endpoint is never contacted by these tests.
        let client = Arc::new(EvmRpcClient::new("http://localhost:1/rpc").expect("client"));
        let controller = AdaptiveController::new(2, Duration::from_secs(1));
        let fetcher = Arc::new(BlockFetcher::new(
            client,
            controller,
            Arc::new(FixedHead(0)),
            10,
        ));
        Orchestrator::new(store, fetcher, 10)
    }

    fn normalized_block(number: u64) -> NormalizedBlock {
        NormalizedBlock {
            block: json!({"number": format!("0x{number:x}"), "transactions": []}),
            receipts: vec![],
            traces: vec![],
        }
    }

    #[tokio::test]
    async fn resume_from_empty_store_starts_at_one() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(Arc::clone(&store));
        assert_eq!(orchestrator.resume_position().await.expect("resume"), 1);
    }

    #[tokio::test]
    async fn resume_prefers_latest_individual_block() {
        let store = Arc::new(MemoryStore::new());
        store.save_block(250, b"x").await.expect("save");
        store.save_batch(100, 199, b"b").await.expect("save");
        store.save_meta(199).await.expect("save");

        let orchestrator = orchestrator(Arc::clone(&store));
        assert_eq!(orchestrator.resume_position().await.expect("resume"), 251);
    }

    #[tokio::test]
    async fn resume_falls_back_to_latest_batch() {
        let store = Arc::new(MemoryStore::new());
        store.save_batch(100, 199, b"b").await.expect("save");
        store.save_meta(150).await.expect("save");

        let orchestrator = orchestrator(Arc::clone(&store));
        assert_eq!(orchestrator.resume_position().await.expect("resume"), 200);
    }

    #[tokio::test]
    async fn resume_falls_back_to_meta() {
        let store = Arc::new(MemoryStore::new());
        store.save_meta(199).await.expect("save");

        let orchestrator = orchestrator(Arc::clone(&store));
        assert_eq!(orchestrator.resume_position().await.expect("resume"), 200);
    }

    #[tokio::test]
    async fn persist_saves_contiguous_stream() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(Arc::clone(&store));
        let cancel = CancellationToken::new();

        let (tx, rx) = mpsc::channel(4);
        for number in 5..=7 {
            tx.send(normalized_block(number)).await.expect("send");
        }
        drop(tx);

        orchestrator
            .persist_stream(rx, 5, &cancel)
            .await
            .expect("persist");

        assert_eq!(store.first_block().await.expect("first"), Some(5));
        assert_eq!(store.latest_block().await.expect("latest"), Some(7));
        let raw = store.get_block(6).await.expect("get").expect("present");
        let block: NormalizedBlock = serde_json::from_slice(&raw).expect("parse");
        assert_eq!(block.number().expect("number"), 6);
    }

    #[tokio::test]
    async fn persist_rejects_gap_in_stream() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(Arc::clone(&store));
        let cancel = CancellationToken::new();

        let (tx, rx) = mpsc::channel(4);
        tx.send(normalized_block(5)).await.expect("send");
        tx.send(normalized_block(7)).await.expect("send");
        drop(tx);

        let err = orchestrator
            .persist_stream(rx, 5, &cancel)
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            AppError::BlockMismatch {
                expected: 6,
                got: 7
            }
        ));

        // Block 5 was persisted before the mismatch; resume picks up at 6.
        assert_eq!(orchestrator.resume_position().await.expect("resume"), 6);
    }
}
