//! Push-based streaming server.
//!
//! Two endpoints:
//!
//! - `GET /info` - JSON `{"chainID": <string>, "latestBlock": <number>}`
//! - `GET /ws?from=<block>` - binary push stream
//!
//! Every frame on the stream is `zstd(JSONL)` of normalized blocks. A
//! subscriber behind the tip receives stored batches exactly as they sit on
//! disk - no decompress/recompress cycle - so a historical frame carries a
//! full aligned batch. Once caught up it receives one block per frame as
//! blocks land.
//!
//! # Starting alignment
//!
//! Batches are aligned and sent verbatim, so a subscriber starting inside a
//! batch gets leading blocks below its requested `from`. Filtering those is
//! the subscriber's job; the consumer library does it automatically.
//!
//! # Backpressure
//!
//! The server never buffers per subscriber. A slow reader blocks its own
//! serving loop on the socket send until transport buffers drain.

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Json;
use chainstream_core::BATCH_SIZE;
use chainstream_core::frame::{COMPRESSION_LEVEL, batch_start_for};
use metrics::gauge;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use zstd::bulk::Compressor;

use crate::error::{ApiError, AppError, InfraError, Result};
use crate::metrics::SUBSCRIBERS;
use crate::store::BlockStore;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// How long a serving loop sleeps when the subscriber has consumed
/// everything the store holds.
const TIP_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ═══════════════════════════════════════════════════════════════════════════════
// SERVER STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared state behind the router.
#[derive(Clone)]
pub struct ServerState {
    store: Arc<dyn BlockStore>,
    chain_id: String,
    /// One encoder reused for all single-block frames. Stored batches skip
    /// it entirely.
    live_encoder: Arc<Mutex<Compressor<'static>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// Build server state over a store handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the zstd encoder cannot be created.
    pub fn new(
        store: Arc<dyn BlockStore>,
        chain_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let encoder = Compressor::new(COMPRESSION_LEVEL).map_err(InfraError::Compression)?;
        Ok(Self {
            store,
            chain_id: chain_id.into(),
            live_encoder: Arc::new(Mutex::new(encoder)),
            cancel,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER & ENDPOINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the service router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `listener` until the state's token cancels.
///
/// # Errors
///
/// Returns an error if the server fails to run.
pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    let cancel = state.cancel.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Streaming server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| AppError::Task(format!("server: {e}")))
}

/// `/info` response body.
#[derive(Debug, Serialize)]
struct InfoResponse {
    #[serde(rename = "chainID")]
    chain_id: String,
    #[serde(rename = "latestBlock")]
    latest_block: u64,
}

async fn info(State(state): State<ServerState>) -> std::result::Result<Json<InfoResponse>, ApiError> {
    let latest_block = latest_available(&*state.store).await?;
    Ok(Json(InfoResponse {
        chain_id: state.chain_id.clone(),
        latest_block,
    }))
}

/// Highest block the store can serve: the newest individual block, or the
/// newest batch end while the tip buffer is empty.
async fn latest_available(store: &dyn BlockStore) -> Result<u64> {
    if let Some(latest) = store.latest_block().await? {
        return Ok(latest);
    }
    Ok(store.latest_batch().await?.map_or(0, |batch| batch.end))
}

/// `/ws` query parameters.
#[derive(Debug, Deserialize)]
struct WsQuery {
    /// First block the subscriber wants. `0` means `1`.
    #[serde(default)]
    from: u64,
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state, query.from))
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSCRIBER SERVING
// ═══════════════════════════════════════════════════════════════════════════════

/// Starting cursor for a requested `from`. Block numbering starts at 1.
const fn initial_cursor(from: u64) -> u64 {
    if from == 0 { 1 } else { from }
}

/// One subscriber's serving loop: individual block if present, else the
/// aligned stored batch, else wait for ingestion to catch up.
async fn serve_subscriber(mut socket: WebSocket, state: ServerState, from: u64) {
    let mut cursor = initial_cursor(from);
    gauge!(SUBSCRIBERS).increment(1.0);
    info!(from = cursor, "Subscriber connected");

    loop {
        let next = tokio::select! {
            () = state.cancel.cancelled() => break,
            next = next_frame(&state, cursor) => next,
        };

        match next {
            Ok(Some((frame, next_cursor))) => {
                if socket.send(Message::Binary(frame)).await.is_err() {
                    debug!(cursor, "Subscriber send failed, closing");
                    break;
                }
                cursor = next_cursor;
            }
            Ok(None) => {
                tokio::select! {
                    () = state.cancel.cancelled() => break,
                    () = sleep(TIP_POLL_INTERVAL) => {}
                }
            }
            Err(e) => {
                warn!(cursor, error = %e, "Subscriber serving failed");
                break;
            }
        }
    }

    gauge!(SUBSCRIBERS).decrement(1.0);
    debug!(cursor, "Subscriber disconnected");
}

/// Produce the next frame for a cursor, plus the cursor after it.
///
/// `None` means the store has nothing at the cursor yet.
async fn next_frame(state: &ServerState, cursor: u64) -> Result<Option<(Vec<u8>, u64)>> {
    if let Some(mut payload) = state.store.get_block(cursor).await? {
        payload.push(b'\n');
        let frame = state
            .live_encoder
            .lock()
            .compress(&payload)
            .map_err(InfraError::Compression)?;
        return Ok(Some((frame, cursor + 1)));
    }

    let batch_start = batch_start_for(cursor);
    if let Some(stored) = state.store.get_batch_compressed(batch_start).await? {
        // Verbatim bytes; the subscriber filters leading blocks below its
        // requested start.
        return Ok(Some((stored, batch_start + BATCH_SIZE)));
    }

    Ok(None)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chainstream_core::{NormalizedBlock, frame};
    use serde_json::json;

    fn block_payload(number: u64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "block": {"number": format!("0x{number:x}"), "transactions": []},
            "receipts": [],
            "traces": [],
        }))
        .expect("serialize")
    }

    fn seeded_state() -> (Arc<MemoryStore>, ServerState) {
        let store = Arc::new(MemoryStore::new());
        let state = ServerState::new(
            Arc::clone(&store) as Arc<dyn BlockStore>,
            "testnet",
            CancellationToken::new(),
        )
        .expect("state");
        (store, state)
    }

    #[test]
    fn from_zero_is_treated_as_one() {
        assert_eq!(initial_cursor(0), 1);
        assert_eq!(initial_cursor(1), 1);
        assert_eq!(initial_cursor(150), 150);
    }

    #[tokio::test]
    async fn next_frame_prefers_individual_blocks() {
        let (store, state) = seeded_state();
        store.save_block(7, &block_payload(7)).await.expect("save");

        let (frame_bytes, next) = next_frame(&state, 7)
            .await
            .expect("frame")
            .expect("present");
        assert_eq!(next, 8);

        let blocks = frame::decode_frame(&frame_bytes).expect("decode");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].number().expect("number"), 7);
    }

    #[tokio::test]
    async fn next_frame_serves_aligned_batch_verbatim() {
        let (store, state) = seeded_state();
        let payloads: Vec<Vec<u8>> = (100..=199).map(block_payload).collect();
        let stored = frame::compress(&frame::jsonl_join(&payloads)).expect("compress");
        store.save_batch(100, 199, &stored).await.expect("save");

        // A cursor inside the batch maps to the aligned start.
        let (frame_bytes, next) = next_frame(&state, 150)
            .await
            .expect("frame")
            .expect("present");
        assert_eq!(frame_bytes, stored);
        assert_eq!(next, 200);

        let blocks: Vec<NormalizedBlock> = frame::decode_frame(&frame_bytes).expect("decode");
        assert_eq!(blocks.first().and_then(|b| b.number().ok()), Some(100));
        assert_eq!(blocks.last().and_then(|b| b.number().ok()), Some(199));
    }

    #[tokio::test]
    async fn next_frame_is_none_at_the_tip() {
        let (_store, state) = seeded_state();
        assert!(next_frame(&state, 42).await.expect("frame").is_none());
    }

    #[tokio::test]
    async fn latest_available_prefers_individuals_then_batches() {
        let (store, _state) = seeded_state();
        assert_eq!(latest_available(&*store).await.expect("latest"), 0);

        store.save_batch(100, 199, b"batch").await.expect("save");
        assert_eq!(latest_available(&*store).await.expect("latest"), 199);

        store.save_block(250, &block_payload(250)).await.expect("save");
        assert_eq!(latest_available(&*store).await.expect("latest"), 250);
    }

    #[tokio::test]
    async fn info_endpoint_reports_chain_and_height() {
        let (store, state) = seeded_state();
        store.save_block(9, &block_payload(9)).await.expect("save");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let cancel = state.cancel.clone();
        let server = tokio::spawn(serve(listener, state));

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/info"))
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(body, json!({"chainID": "testnet", "latestBlock": 9}));

        cancel.cancel();
        server.await.expect("join").expect("serve");
    }
}
