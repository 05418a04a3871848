//! Error types for the streaming consumer.

use thiserror::Error;

/// Result type alias using [`ClientError`].
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while consuming a Chainstream stream.
///
/// Every variant except `InvalidOptions` is a session error: the client
/// closes the socket and, unless reconnection is disabled, resumes from its
/// last delivered position.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Failed to establish the WebSocket connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The socket failed mid-stream.
    #[error("socket error: {0}")]
    Socket(String),

    /// The server closed the stream.
    #[error("stream closed by server")]
    Closed,

    /// A frame failed to decompress or parse.
    #[error("frame decode error: {0}")]
    Frame(#[from] chainstream_core::CoreError),

    /// The stream skipped ahead: a protocol violation, since frames must be
    /// contiguous after the leading-block filter.
    #[error("ordering violation: expected block {expected}, got {got}")]
    OrderingViolation {
        /// Block number the client expected next.
        expected: u64,
        /// Block number the stream delivered.
        got: u64,
    },

    /// The user handler rejected a delivery.
    #[error("handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invalid client options.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}
