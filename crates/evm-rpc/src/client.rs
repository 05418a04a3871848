//! JSON-RPC client with array batching.
//!
//! [`EvmRpcClient`] is deliberately thin: it sends requests, matches
//! responses by id, and classifies failures. Concurrency limiting and
//! retries live with the caller, which knows whether a call is on the hot
//! ingestion path or a one-shot bootstrap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::types::{JsonRpcRequest, JsonRpcResponse, RpcCall};

// ═══════════════════════════════════════════════════════════════════════════════
// EVM RPC CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw JSON-RPC client for an EVM endpoint.
///
/// # Thread Safety
///
/// The client is `Send + Sync` and intended to be shared across tasks; the
/// internal `reqwest::Client` pools connections for concurrent use.
#[derive(Debug)]
pub struct EvmRpcClient {
    /// HTTP client for JSON-RPC requests.
    client: reqwest::Client,

    /// RPC endpoint URL.
    rpc_url: String,

    /// Request ID counter for JSON-RPC correlation.
    request_id: AtomicU64,
}

impl EvmRpcClient {
    /// Create a new client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(rpc_url: impl Into<String>) -> Result<Self> {
        Self::with_config(rpc_url, ClientConfig::default())
    }

    /// Create a new client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn with_config(rpc_url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| RpcError::Connection(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            request_id: AtomicU64::new(1),
        })
    }

    /// Get the RPC URL this client is connected to.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the next request ID for JSON-RPC correlation.
    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // SINGLE CALLS
    // ───────────────────────────────────────────────────────────────────────────

    /// Execute a single JSON-RPC call and deserialize the result.
    ///
    /// # Errors
    ///
    /// Returns transport errors, server-side RPC errors, or
    /// [`RpcError::InvalidResponse`] when the result field is missing.
    pub async fn call<R: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<R> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(method, params, id);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: JsonRpcResponse<R> = response.json().await?;

        if let Some(error) = body.error {
            return Err(error.into_error(method));
        }

        body.result
            .ok_or_else(|| RpcError::InvalidResponse(format!("missing result for {method}")))
    }

    /// `eth_chainId` as a number.
    ///
    /// # Errors
    ///
    /// Returns transport or protocol errors.
    pub async fn chain_id(&self) -> Result<u64> {
        let raw: String = self.call("eth_chainId", Value::Array(vec![])).await?;
        parse_quantity(&raw)
    }

    /// `eth_blockNumber` - current chain head as a number.
    ///
    /// # Errors
    ///
    /// Returns transport or protocol errors.
    pub async fn block_number(&self) -> Result<u64> {
        let raw: String = self.call("eth_blockNumber", Value::Array(vec![])).await?;
        parse_quantity(&raw)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // ARRAY BATCHES
    // ───────────────────────────────────────────────────────────────────────────

    /// Execute calls as a single JSON-RPC array request.
    ///
    /// Servers may answer batch entries in any order; results are matched
    /// back by id and returned in the order of `calls`.
    ///
    /// # Errors
    ///
    /// Fails as a whole: any transport failure, any per-entry RPC error, a
    /// response count mismatch, or an unknown/duplicate id rejects the batch.
    #[instrument(skip(self, calls), fields(calls = calls.len()))]
    pub async fn batch(&self, calls: &[RpcCall]) -> Result<Vec<Value>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let first_id = self
            .request_id
            .fetch_add(calls.len() as u64, Ordering::Relaxed);
        let requests: Vec<JsonRpcRequest<&Value>> = calls
            .iter()
            .enumerate()
            .map(|(i, call)| JsonRpcRequest::new(call.method, &call.params, first_id + i as u64))
            .collect();

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&requests)
            .send()
            .await?
            .error_for_status()?;

        let entries: Vec<JsonRpcResponse<Value>> = response.json().await?;

        if entries.len() != calls.len() {
            return Err(RpcError::InvalidResponse(format!(
                "batch returned {} entries for {} requests",
                entries.len(),
                calls.len()
            )));
        }

        let mut by_id: HashMap<u64, JsonRpcResponse<Value>> =
            entries.into_iter().map(|entry| (entry.id, entry)).collect();
        if by_id.len() != calls.len() {
            return Err(RpcError::InvalidResponse(
                "batch response contained duplicate ids".into(),
            ));
        }

        debug!(first_id, "batch response matched");

        calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                let entry = by_id.remove(&(first_id + i as u64)).ok_or_else(|| {
                    RpcError::InvalidResponse(format!("batch response missing id {}", first_id + i as u64))
                })?;
                if let Some(error) = entry.error {
                    return Err(error.into_error(call.method));
                }
                entry
                    .result
                    .ok_or_else(|| RpcError::InvalidResponse(format!("missing result for {}", call.method)))
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEX QUANTITIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a `0x`-prefixed hex quantity.
pub(crate) fn parse_quantity(raw: &str) -> Result<u64> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(stripped, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("invalid hex quantity {raw:?}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
