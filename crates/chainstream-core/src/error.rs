//! Error types for the data model and frame codec.

use thiserror::Error;

/// Errors produced while parsing, validating, or encoding normalized blocks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression or decompression error.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// The raw block payload is missing a field or carries one in an
    /// unexpected shape.
    #[error("malformed block: {0}")]
    MalformedBlock(String),

    /// Receipt count does not match the block's transaction count.
    #[error("receipt count {receipts} does not match transaction count {transactions}")]
    ReceiptCountMismatch {
        /// Number of receipts in the record.
        receipts: usize,
        /// Number of transactions in the block.
        transactions: usize,
    },

    /// Trace count does not match the block's transaction count.
    #[error("trace count {traces} does not match transaction count {transactions}")]
    TraceCountMismatch {
        /// Number of trace entries in the record.
        traces: usize,
        /// Number of transactions in the block.
        transactions: usize,
    },

    /// A trace entry refers to a different transaction than the one at its
    /// position in the block.
    #[error("trace {index} refers to {trace_hash} but transaction {index} is {tx_hash}")]
    TraceHashMismatch {
        /// Position of the mismatched entry.
        index: usize,
        /// Hash carried by the trace entry.
        trace_hash: String,
        /// Hash of the transaction at that position.
        tx_hash: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_counts() {
        let err = CoreError::ReceiptCountMismatch {
            receipts: 3,
            transactions: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('5'));
    }
}
