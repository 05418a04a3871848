//! Request and response types for the JSON-RPC wire format.
//!
//! - [`RpcCall`] - a method + params pair, the unit of batching
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] - the wire envelope

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ═══════════════════════════════════════════════════════════════════════════════
// RPC CALLS
// ═══════════════════════════════════════════════════════════════════════════════

/// A single JSON-RPC call: method name plus parameters.
///
/// Calls are built without ids; [`EvmRpcClient::batch`](crate::EvmRpcClient::batch)
/// assigns ids at send time and matches responses back by them.
#[derive(Debug, Clone)]
pub struct RpcCall {
    /// JSON-RPC method name.
    pub method: &'static str,
    /// Positional parameters.
    pub params: Value,
}

impl RpcCall {
    /// `eth_getBlockByNumber(N, true)` - full block with transaction objects.
    #[must_use]
    pub fn block_by_number(number: u64) -> Self {
        Self {
            method: "eth_getBlockByNumber",
            params: json!([format!("0x{number:x}"), true]),
        }
    }

    /// `eth_getBlockReceipts(N)` - all receipts for a block.
    #[must_use]
    pub fn block_receipts(number: u64) -> Self {
        Self {
            method: "eth_getBlockReceipts",
            params: json!([format!("0x{number:x}")]),
        }
    }

    /// `debug_traceBlockByNumber(N, callTracer)` - call traces for every
    /// transaction in a block.
    #[must_use]
    pub fn trace_block(number: u64) -> Self {
        Self {
            method: "debug_traceBlockByNumber",
            params: json!([format!("0x{number:x}"), {"tracer": "callTracer"}]),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE ENVELOPE
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON-RPC request structure.
#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<P: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: P,
    pub id: u64,
}

impl<P: Serialize> JsonRpcRequest<P> {
    pub fn new(method: &'static str, params: P, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
            id,
        }
    }
}

/// JSON-RPC response wrapper for extracting result or error.
#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse<T> {
    pub id: u64,
    pub result: Option<T>,
    pub error: Option<crate::error::RpcErrorDetail>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
