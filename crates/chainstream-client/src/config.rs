//! Client options.

use std::time::Duration;

use crate::error::{ClientError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default cap on compressed bytes handed to the processor per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 30 * 1024 * 1024;

/// Default buffer capacity: five max-size batches of compressed frames.
pub const DEFAULT_BUFFER_SIZE: usize = 5 * DEFAULT_MAX_BATCH_SIZE;

/// Default pause before reconnecting after a session error.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Tuning for [`StreamClient`](crate::StreamClient).
///
/// All sizes count compressed bytes.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Maximum summed compressed size of frames processed per batch. A
    /// single larger frame is still delivered alone.
    pub max_batch_size: usize,

    /// Receiver stops reading the socket while the buffer holds at least
    /// this many compressed bytes.
    pub buffer_size: usize,

    /// Reconnect after session errors. Disable to surface the first error.
    pub reconnect: bool,

    /// Pause between reconnection attempts.
    pub reconnect_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ClientOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-batch compressed-size cap.
    #[must_use]
    pub const fn with_max_batch_size(mut self, bytes: usize) -> Self {
        self.max_batch_size = bytes;
        self
    }

    /// Set the buffer capacity.
    #[must_use]
    pub const fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Enable or disable reconnection.
    #[must_use]
    pub const fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Validate the options.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidOptions`] for a zero batch size or a
    /// buffer smaller than one batch.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(ClientError::InvalidOptions(
                "max_batch_size must be non-zero".into(),
            ));
        }
        if self.buffer_size < self.max_batch_size {
            return Err(ClientError::InvalidOptions(format!(
                "buffer_size ({}) must be at least max_batch_size ({})",
                self.buffer_size, self.max_batch_size
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
