//! The reconnecting stream client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chainstream_core::{NormalizedBlock, frame};
use futures::StreamExt;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::buffer::FrameBuffer;
use crate::config::ClientOptions;
use crate::error::{ClientError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK HANDLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives ordered block deliveries from a [`StreamClient`].
///
/// Deliveries never overlap: the next `handle` call starts where the
/// previous one ended. Returning an error ends the session; the client
/// reconnects and redelivers from the last acknowledged block.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    /// Process one batch of strictly ascending blocks.
    ///
    /// # Errors
    ///
    /// Any error aborts the current session.
    async fn handle(
        &self,
        blocks: Vec<NormalizedBlock>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// STREAM CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Reconnecting consumer of a Chainstream `/ws` endpoint.
#[derive(Debug)]
pub struct StreamClient {
    /// Server base URL (`ws://host:port`), without the `/ws` path.
    url: String,
    /// Next block to request; advances as deliveries are acknowledged.
    next_from: AtomicU64,
    options: ClientOptions,
}

impl StreamClient {
    /// Create a client that will start streaming at block `from`.
    ///
    /// `from = 0` is treated as 1, matching the server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidOptions`] for inconsistent options.
    pub fn new(url: impl Into<String>, from: u64, options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let url: String = url.into();
        let url = url.trim_end_matches('/').to_string();
        Ok(Self {
            url,
            next_from: AtomicU64::new(from.max(1)),
            options,
        })
    }

    /// Block the stream will resume from (last delivered + 1).
    #[must_use]
    pub fn position(&self) -> u64 {
        self.next_from.load(Ordering::Relaxed)
    }

    /// Stream until cancelled.
    ///
    /// Sessions that fail are reopened from the resume position after the
    /// configured delay; with reconnection disabled the first session error
    /// is returned instead.
    ///
    /// # Errors
    ///
    /// Only with reconnection disabled; see above.
    #[instrument(skip(self, handler, cancel), fields(url = %self.url))]
    pub async fn run(
        &self,
        handler: Arc<dyn BlockHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.run_session(&handler, &cancel).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if !self.options.reconnect {
                        return Err(e);
                    }
                    warn!(error = %e, from = self.position(), "Stream session failed, reconnecting");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = sleep(self.options.reconnect_delay) => {}
            }
        }
    }

    /// One connection: receiver and processor racing over a shared buffer
    /// until either fails or cancellation lands.
    async fn run_session(
        &self,
        handler: &Arc<dyn BlockHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let from = self.position();
        let url = format!("{}/ws?from={from}", self.url);
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|e| ClientError::Connect(format!("{url}: {e}")))?;
        info!(url = %url, "Stream connected");

        let (_write, mut read) = stream.split();
        let buffer = FrameBuffer::new(self.options.buffer_size);

        let receive = async {
            loop {
                // Space first, then read: the buffer may overshoot by one
                // frame but the socket never gets ahead of the processor.
                buffer.wait_for_space().await;
                match read.next().await {
                    None => return ClientError::Closed,
                    Some(Err(e)) => return ClientError::Socket(e.to_string()),
                    Some(Ok(Message::Binary(frame))) => buffer.push(frame).await,
                    Some(Ok(Message::Close(_))) => return ClientError::Closed,
                    Some(Ok(_)) => {}
                }
            }
        };

        let process = async {
            let mut expected = from;
            loop {
                let frames = buffer.slice_batch(self.options.max_batch_size).await;
                debug!(frames = frames.len(), "Processing frame batch");

                let delivery = match decode_and_filter(&frames, &mut expected) {
                    Ok(delivery) => delivery,
                    Err(e) => return e,
                };
                if delivery.is_empty() {
                    continue;
                }

                if let Err(e) = handler.handle(delivery).await {
                    return ClientError::Handler(e);
                }
                self.next_from.store(expected, Ordering::Relaxed);
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Ok(()),
            e = receive => Err(e),
            e = process => Err(e),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAME PROCESSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Decode frames, drop blocks below the cursor (batch-alignment leaders and
/// redelivered blocks), and enforce contiguity from the cursor on.
fn decode_and_filter(frames: &[Bytes], expected: &mut u64) -> Result<Vec<NormalizedBlock>> {
    let mut delivery = Vec::new();
    for compressed in frames {
        for block in frame::decode_frame(compressed)? {
            let number = block.number()?;
            if number < *expected {
                continue;
            }
            if number > *expected {
                return Err(ClientError::OrderingViolation {
                    expected: *expected,
                    got: number,
                });
            }
            delivery.push(block);
            *expected += 1;
        }
    }
    Ok(delivery)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(number: u64) -> NormalizedBlock {
        NormalizedBlock {
            block: json!({"number": format!("0x{number:x}"), "transactions": []}),
            receipts: vec![],
            traces: vec![],
        }
    }

    fn encoded(range: std::ops::RangeInclusive<u64>) -> Bytes {
        let blocks: Vec<_> = range.map(block).collect();
        Bytes::from(frame::encode_frame(&blocks).expect("encode"))
    }

    #[test]
    fn client_normalizes_from_zero() {
        let client =
            StreamClient::new("ws://localhost:8080/", 0, ClientOptions::default()).expect("client");
        assert_eq!(client.position(), 1);
        assert_eq!(client.url, "ws://localhost:8080");
    }

    #[test]
    fn filter_drops_alignment_leaders() {
        // A subscriber at 150 receives the aligned batch 100..=199 first.
        let mut expected = 150;
        let delivery =
            decode_and_filter(&[encoded(100..=199)], &mut expected).expect("decode");

        assert_eq!(delivery.len(), 50);
        assert_eq!(delivery[0].number().expect("number"), 150);
        assert_eq!(delivery[49].number().expect("number"), 199);
        assert_eq!(expected, 200);
    }

    #[test]
    fn filter_spans_multiple_frames() {
        let mut expected = 150;
        let delivery = decode_and_filter(
            &[encoded(100..=199), encoded(200..=299)],
            &mut expected,
        )
        .expect("decode");

        assert_eq!(delivery.len(), 150);
        assert_eq!(delivery.first().and_then(|b| b.number().ok()), Some(150));
        assert_eq!(delivery.last().and_then(|b| b.number().ok()), Some(299));
        assert_eq!(expected, 300);
    }

    #[test]
    fn gap_is_an_ordering_violation() {
        let mut expected = 1;
        let err = decode_and_filter(&[encoded(1..=3), encoded(5..=6)], &mut expected)
            .expect_err("should fail");
        assert!(matches!(
            err,
            ClientError::OrderingViolation {
                expected: 4,
                got: 5
            }
        ));
    }

    #[test]
    fn redelivered_blocks_are_dropped() {
        // After a reconnect the first batch may replay delivered blocks.
        let mut expected = 180;
        let delivery =
            decode_and_filter(&[encoded(100..=199)], &mut expected).expect("decode");
        assert_eq!(delivery.len(), 20);
        assert_eq!(delivery[0].number().expect("number"), 180);
    }

    #[test]
    fn corrupt_frame_is_an_error() {
        let mut expected = 1;
        let err = decode_and_filter(&[Bytes::from_static(b"junk")], &mut expected)
            .expect_err("should fail");
        assert!(matches!(err, ClientError::Frame(_)));
    }
}
