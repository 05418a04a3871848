//! Chain-tip follower.
//!
//! Maintains a cheap, lock-free read of the highest block number the chain
//! has announced, fed by a new-heads push subscription. The fetcher polls
//! [`HeadTracker::latest`] on its scheduling path, so the read must never
//! block.
//!
//! # Failure semantics
//!
//! Bootstrap (one `eth_blockNumber` call) is the only fatal path. After
//! that, any subscription error closes the socket, sleeps, and reconnects;
//! the stored head simply goes stale in the meantime. Updates are monotone:
//! a head announcement can never move the stored value backwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use evm_rpc::{EvmRpcClient, NewHeadsSubscription, derive_ws_url};
use metrics::gauge;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::metrics::CHAIN_HEAD;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Delay before reconnecting a failed subscription.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════════════════════
// HEAD SOURCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Non-blocking source of the latest known chain head.
///
/// The fetcher depends on this seam rather than on the concrete tracker so
/// tests can pin the head wherever they need it.
pub trait HeadSource: Send + Sync {
    /// Most recent observed block number.
    fn latest(&self) -> u64;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEAD TRACKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Follows the chain tip via a new-heads subscription.
pub struct HeadTracker {
    client: Arc<EvmRpcClient>,
    ws_url: String,
    latest: Arc<AtomicU64>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HeadTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadTracker")
            .field("ws_url", &self.ws_url)
            .field("latest", &self.latest.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl HeadTracker {
    /// Create a tracker for the chain behind `client`.
    ///
    /// The subscription endpoint is derived from the client's RPC URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC URL cannot be rewritten into a
    /// subscription URL.
    pub fn new(client: Arc<EvmRpcClient>) -> Result<Self> {
        let ws_url = derive_ws_url(client.rpc_url())?;
        Ok(Self {
            client,
            ws_url,
            latest: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Bootstrap the head via RPC and start the subscription loop.
    ///
    /// # Errors
    ///
    /// Fails only if the bootstrap `eth_blockNumber` call fails; the
    /// subscription itself retries forever in the background.
    #[instrument(skip(self), fields(ws_url = %self.ws_url))]
    pub async fn start(&self) -> Result<()> {
        let bootstrap = self.client.block_number().await?;
        self.latest.store(bootstrap, Ordering::Relaxed);
        gauge!(CHAIN_HEAD).set(bootstrap as f64);
        info!(head = bootstrap, "Bootstrapped chain head");

        let handle = tokio::spawn(run_subscription_loop(
            self.ws_url.clone(),
            Arc::clone(&self.latest),
            self.cancel.child_token(),
        ));
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Most recent observed block number. Never blocks.
    #[must_use]
    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::Relaxed)
    }

    /// Stop the subscription loop and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl HeadSource for HeadTracker {
    fn latest(&self) -> u64 {
        Self::latest(self)
    }
}

/// Connect, consume heads, reconnect on any failure.
async fn run_subscription_loop(
    ws_url: String,
    latest: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match NewHeadsSubscription::connect(&ws_url).await {
            Ok(mut subscription) => {
                info!(ws_url = %ws_url, "Head subscription established");
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            subscription.close().await;
                            return;
                        }
                        head = subscription.next_head() => match head {
                            Ok(number) => {
                                let previous = latest.fetch_max(number, Ordering::Relaxed);
                                if number > previous {
                                    gauge!(CHAIN_HEAD).set(number as f64);
                                    debug!(number, "Chain head advanced");
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Head subscription failed, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(ws_url = %ws_url, error = %e, "Head subscription connect failed");
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = sleep(RECONNECT_DELAY) => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_matches_policy() {
        assert_eq!(RECONNECT_DELAY, Duration::from_secs(5));
    }

    #[test]
    fn monotone_updates_never_regress() {
        // fetch_max is the whole monotonicity argument; pin its behavior.
        let latest = AtomicU64::new(0);
        latest.fetch_max(100, Ordering::Relaxed);
        latest.fetch_max(90, Ordering::Relaxed);
        assert_eq!(latest.load(Ordering::Relaxed), 100);
        latest.fetch_max(101, Ordering::Relaxed);
        assert_eq!(latest.load(Ordering::Relaxed), 101);
    }

    #[tokio::test]
    async fn tracker_derives_ws_url() {
        let client =
            Arc::new(EvmRpcClient::new("http://node.example.com/rpc").expect("client"));
        let tracker = HeadTracker::new(client).expect("tracker");
        assert_eq!(tracker.ws_url, "ws://node.example.com/ws");
        assert_eq!(HeadSource::latest(&tracker), 0);
    }
}
