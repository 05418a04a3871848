//! Bounded byte buffer between the receiver and the processor.
//!
//! The receiver checks for space *before* reading the socket, then pushes
//! whatever arrived - so the buffer can overshoot its capacity by at most
//! one frame, and a frame larger than the whole capacity still gets
//! through. The processor slices frames off the front up to a compressed
//! byte budget, always taking at least one.
//!
//! Two [`Notify`] handles stand in for a condition-variable pair: `space`
//! wakes the single receiver after a drain, `items` wakes the single
//! processor after a push. `notify_one` stores a permit when nobody is
//! waiting, so neither side can miss a wakeup.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

/// Bounded FIFO of compressed frames with byte accounting.
#[derive(Debug)]
pub struct FrameBuffer {
    state: Mutex<BufferState>,
    space: Notify,
    items: Notify,
    capacity: usize,
}

#[derive(Debug)]
struct BufferState {
    frames: VecDeque<Bytes>,
    bytes: usize,
}

impl FrameBuffer {
    /// Create a buffer that admits reads while under `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                frames: VecDeque::new(),
                bytes: 0,
            }),
            space: Notify::new(),
            items: Notify::new(),
            capacity,
        }
    }

    /// Wait until the buffer is below capacity.
    ///
    /// Call before each socket read; the subsequent [`push`](Self::push)
    /// is then unconditional.
    pub async fn wait_for_space(&self) {
        loop {
            {
                let state = self.state.lock().await;
                if state.bytes < self.capacity {
                    return;
                }
            }
            self.space.notified().await;
        }
    }

    /// Append one frame. Never blocks.
    pub async fn push(&self, frame: Bytes) {
        let mut state = self.state.lock().await;
        state.bytes += frame.len();
        state.frames.push_back(frame);
        drop(state);
        self.items.notify_one();
    }

    /// Wait for at least one frame, then take frames from the front while
    /// their summed size stays within `max_batch_bytes`. The first frame is
    /// always taken, however large.
    pub async fn slice_batch(&self, max_batch_bytes: usize) -> Vec<Bytes> {
        loop {
            {
                let mut state = self.state.lock().await;
                if !state.frames.is_empty() {
                    let mut batch = Vec::new();
                    let mut total = 0usize;
                    while let Some(len) = state.frames.front().map(Bytes::len) {
                        if !batch.is_empty() && total + len > max_batch_bytes {
                            break;
                        }
                        total += len;
                        if let Some(frame) = state.frames.pop_front() {
                            batch.push(frame);
                        }
                    }
                    state.bytes -= total;
                    drop(state);
                    self.space.notify_one();
                    return batch;
                }
            }
            self.items.notified().await;
        }
    }

    /// Compressed bytes currently buffered.
    pub async fn buffered_bytes(&self) -> usize {
        self.state.lock().await.bytes
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
