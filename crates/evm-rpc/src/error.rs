//! Error types for the JSON-RPC transport.
//!
//! The taxonomy mirrors how the ingestion pipeline treats failures:
//! transient transport problems (network, 5xx, timeouts, malformed bodies)
//! are retryable; protocol rejections (unknown method, invalid params) are
//! not. [`RpcError::is_retryable`] encodes that split so callers own the
//! retry loop without re-inspecting reqwest internals.

use std::fmt;

use thiserror::Error;

/// Result type alias using [`RpcError`].
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors that can occur when talking to an EVM JSON-RPC endpoint.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// Failed to establish connection to the RPC endpoint.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request timed out waiting for a response.
    #[error("request timed out")]
    Timeout,

    /// HTTP-level error (non-2xx status code, TLS issues, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error returned by the server.
    #[error("RPC error ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code (e.g., -32601 for method not found).
        code: i64,
        /// Human-readable error message from the server.
        message: String,
        /// Optional additional data from the error response.
        data: Option<String>,
    },

    /// The requested RPC method is not supported by this endpoint.
    ///
    /// Separated from [`RpcError::Rpc`] because this one never heals on
    /// retry: a node without `debug_traceBlockByNumber` stays that way.
    #[error("method not supported: {method}")]
    MethodNotSupported {
        /// The method name that was not supported.
        method: String,
    },

    /// Failed to serialize a request or deserialize a response body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Response was parseable but had unexpected structure (missing result,
    /// wrong entry count in a batch, unknown id).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration provided to the client.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket subscription failure (connect, read, or protocol).
    #[error("subscription error: {0}")]
    Subscription(String),
}

impl RpcError {
    /// Create an RPC error from code and message.
    #[must_use]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Check if this error indicates the method is not supported.
    ///
    /// Returns `true` for both [`RpcError::MethodNotSupported`] and
    /// [`RpcError::Rpc`] with method-not-found error codes.
    #[must_use]
    pub const fn is_method_not_supported(&self) -> bool {
        match self {
            Self::MethodNotSupported { .. } => true,
            Self::Rpc { code, .. } => {
                // -32601 = Method not found (JSON-RPC standard)
                // -32600 = Invalid request (some providers use this for unsupported methods)
                *code == -32601 || *code == -32600
            }
            _ => false,
        }
    }

    /// Check if this error is likely transient and retryable.
    ///
    /// Network failures, timeouts, 5xx responses, malformed bodies, and
    /// generic server-side RPC errors may succeed on retry. Protocol
    /// rejections (unknown method, invalid params, bad config) will not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_)
            | Self::Timeout
            | Self::Serialization(_)
            | Self::InvalidResponse(_)
            | Self::Subscription(_) => true,
            Self::Http(msg) => {
                // 5xx errors are typically retryable
                msg.contains("500")
                    || msg.contains("502")
                    || msg.contains("503")
                    || msg.contains("504")
            }
            Self::Rpc { code, .. } => {
                // -32000..=-32099 is the server-error range; -32005 is the
                // conventional rate-limit code
                (-32099..=-32000).contains(code) || *code == -32005
            }
            Self::MethodNotSupported { .. } | Self::InvalidConfig(_) => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSIONS FROM reqwest ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else if err.is_status() || err.is_request() || err.is_body() {
            Self::Http(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RPC ERROR DETAILS
// ═══════════════════════════════════════════════════════════════════════════════

/// Detailed information from a JSON-RPC error response.
///
/// Used internally for parsing error responses from the server.
#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct RpcErrorDetail {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RpcErrorDetail {
    /// Convert this detail into an [`RpcError`].
    pub fn into_error(self, method: &str) -> RpcError {
        if self.code == -32601 || self.code == -32600 {
            return RpcError::MethodNotSupported {
                method: method.to_string(),
            };
        }

        RpcError::Rpc {
            code: self.code,
            message: self.message,
            data: self.data.map(|v| v.to_string()),
        }
    }
}

impl fmt::Display for RpcErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC error ({}): {}", self.code, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_method_not_supported() {
        let explicit = RpcError::MethodNotSupported {
            method: "debug_traceBlockByNumber".into(),
        };
        assert!(explicit.is_method_not_supported());

        let rpc_32601 = RpcError::rpc(-32601, "Method not found");
        assert!(rpc_32601.is_method_not_supported());

        let rpc_32600 = RpcError::rpc(-32600, "Invalid request");
        assert!(rpc_32600.is_method_not_supported());

        let rpc_other = RpcError::rpc(-32000, "Server error");
        assert!(!rpc_other.is_method_not_supported());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(RpcError::Timeout.is_retryable());
        assert!(RpcError::Connection("connection refused".into()).is_retryable());
        assert!(RpcError::Http("503 Service Unavailable".into()).is_retryable());
        assert!(RpcError::InvalidResponse("missing result".into()).is_retryable());
        assert!(RpcError::rpc(-32000, "server busy").is_retryable());
        assert!(RpcError::rpc(-32005, "limit exceeded").is_retryable());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        let method_not_supported = RpcError::MethodNotSupported {
            method: "debug_traceBlockByNumber".into(),
        };
        assert!(!method_not_supported.is_retryable());
        assert!(!RpcError::Http("400 Bad Request".into()).is_retryable());
        assert!(!RpcError::rpc(-32602, "invalid params").is_retryable());
        assert!(!RpcError::InvalidConfig("bad url".into()).is_retryable());
    }

    #[test]
    fn rpc_error_detail_deserialization() {
        let json = r#"{"code": -32601, "message": "Method not found"}"#;
        let detail: RpcErrorDetail = serde_json::from_str(json).expect("parse failed");
        assert_eq!(detail.code, -32601);
        assert_eq!(detail.message, "Method not found");
        assert!(detail.data.is_none());
    }

    #[test]
    fn rpc_error_detail_into_method_not_supported() {
        let detail = RpcErrorDetail {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        let error = detail.into_error("eth_getBlockReceipts");
        assert!(
            matches!(error, RpcError::MethodNotSupported { method } if method == "eth_getBlockReceipts")
        );
    }
}
