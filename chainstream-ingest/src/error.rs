//! Layered error types for the ingestion service.
//!
//! - [`InfraError`] - Infrastructure errors (store, RPC, serialization)
//! - [`AppError`] - Application-level errors combining infra failures with
//!   pipeline-specific conditions
//! - [`ApiError`] - HTTP API errors with status codes
//!
//! # Error Philosophy
//!
//! - Transient conditions are retried where they occur (the fetcher's retry
//!   loop, the head tracker's reconnect); what reaches `AppError` terminates
//!   the current task and lets the orchestrator re-derive its position
//! - Infrastructure details are logged but hidden from API consumers

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from external systems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Storage engine error.
    #[error("store error: {0}")]
    Store(#[from] rocksdb::Error),

    /// RPC error (chain node communication).
    #[error("RPC error: {0}")]
    Rpc(#[from] evm_rpc::RpcError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression or decompression error.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// Invalid persisted or fetched block payload.
    #[error("block payload error: {0}")]
    Block(#[from] chainstream_core::CoreError),

    /// A stored key did not parse as a member of its key family.
    #[error("corrupt store key: {0}")]
    CorruptKey(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Application-level errors for the ingestion pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// The RPC returned a block other than the one requested.
    #[error("block number mismatch: expected {expected}, got {got}")]
    BlockMismatch {
        /// Block number the pipeline expected next.
        expected: u64,
        /// Block number actually received.
        got: u64,
    },

    /// A fetch exhausted its retry budget.
    #[error("fetch failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final error.
        #[source]
        source: evm_rpc::RpcError,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Initialization error.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// A background task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),

    /// Graceful shutdown requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for application Results.
pub type Result<T> = std::result::Result<T, AppError>;

// Allow `?` on infra error sources without naming the intermediate layer.
impl From<rocksdb::Error> for AppError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Infra(err.into())
    }
}

impl From<evm_rpc::RpcError> for AppError {
    fn from(err: evm_rpc::RpcError) -> Self {
        Self::Infra(err.into())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infra(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Infra(err.into())
    }
}

impl From<chainstream_core::CoreError> for AppError {
    fn from(err: chainstream_core::CoreError) -> Self {
        Self::Infra(err.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API ERRORS (HTTP-specific)
// ═══════════════════════════════════════════════════════════════════════════════

/// API-level errors with HTTP status codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Wrapped application error.
    #[error(transparent)]
    App(#[from] AppError),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string()),

            // Internal errors: log but don't expose details
            Self::App(_) => {
                tracing::error!(error = ?self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

impl From<InfraError> for ApiError {
    fn from(err: InfraError) -> Self {
        Self::App(err.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_from_infra() {
        let infra = InfraError::CorruptKey("block:abc".into());
        let app: AppError = infra.into();
        assert!(matches!(app, AppError::Infra(InfraError::CorruptKey(_))));
    }

    #[test]
    fn block_mismatch_display() {
        let err = AppError::BlockMismatch {
            expected: 10,
            got: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn retries_exhausted_keeps_source() {
        let err = AppError::RetriesExhausted {
            attempts: 20,
            source: evm_rpc::RpcError::Timeout,
        };
        assert!(err.to_string().contains("20"));
    }
}
