//! Configuration for the JSON-RPC client.
//!
//! [`ClientConfig`] covers request timeouts and connection-pool behavior.
//! Pool limits matter here: the ingestion pipeline keeps dozens of batch
//! requests in flight against a single host, and unbounded idle connections
//! exhaust local ports long before they help throughput.
//!
//! # Example
//!
//! ```
//! use evm_rpc::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::default()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_pool_max_idle_per_host(20);
//! ```

use std::time::Duration;

use crate::error::{Result, RpcError};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default timeout for HTTP requests to the RPC endpoint.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle timeout for pooled connections.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default cap on idle pooled connections per host.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 50;

/// Minimum allowed request timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum allowed request timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration options for [`EvmRpcClient`](crate::EvmRpcClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout for HTTP calls.
    ///
    /// Default: 30 seconds. Range: 1-300 seconds.
    pub timeout: Duration,

    /// How long pooled connections may sit idle before being closed.
    ///
    /// Default: 90 seconds.
    pub pool_idle_timeout: Duration,

    /// Cap on idle pooled connections kept per host.
    ///
    /// Default: 50.
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request timeout (1-300 seconds).
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the idle timeout for pooled connections.
    #[must_use]
    pub const fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Set the cap on idle pooled connections per host.
    #[must_use]
    pub const fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Validate the configuration.
    ///
    /// Called automatically when creating a client.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] if the timeout is outside the
    /// allowed range or the pool cap is zero.
    pub fn validate(&self) -> Result<()> {
        if self.timeout < MIN_TIMEOUT {
            return Err(RpcError::InvalidConfig(format!(
                "timeout must be at least {MIN_TIMEOUT:?}"
            )));
        }

        if self.timeout > MAX_TIMEOUT {
            return Err(RpcError::InvalidConfig(format!(
                "timeout must be at most {MAX_TIMEOUT:?}"
            )));
        }

        if self.pool_max_idle_per_host == 0 {
            return Err(RpcError::InvalidConfig(
                "pool_max_idle_per_host must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
