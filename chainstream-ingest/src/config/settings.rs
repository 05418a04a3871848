//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Upstream RPC configuration.
    pub rpc: RpcSettings,
    /// Chain identity returned to consumers.
    pub chain: ChainSettings,
    /// Block store configuration.
    pub storage: StorageSettings,
    /// Streaming server configuration.
    pub server: ServerSettings,
    /// Metrics exposition configuration.
    pub metrics: MetricsSettings,
    /// Fetcher/orchestrator tuning.
    pub ingest: IngestSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with `CHAINSTREAM` prefix
    ///
    /// # Arguments
    /// * `environment` - Environment name (e.g., "development", "production")
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("rpc.url", "http://localhost:8545/rpc")?
            .set_default("rpc.max_parallelism", 40)?
            .set_default("rpc.max_p95_latency_ms", 1000)?
            // Chain identifier - MUST be set in production config
            .set_default("chain.id", "")?
            .set_default("storage.path", "data/chainstream")?
            .set_default("server.listen_addr", "0.0.0.0:8080")?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.listen_addr", "0.0.0.0:9090")?
            .set_default("ingest.lookahead", 100)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // Load default configuration file
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            // Load environment-specific file
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            // Override with environment variables (CHAINSTREAM prefix)
            .add_source(
                Environment::with_prefix("CHAINSTREAM")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // RPC validation
        if self.rpc.url.is_empty() {
            errors.push("rpc.url cannot be empty".into());
        }
        if self.rpc.max_parallelism < 2 {
            errors.push("rpc.max_parallelism must be at least 2".into());
        }
        if self.rpc.max_p95_latency_ms == 0 {
            errors.push("rpc.max_p95_latency_ms must be non-zero".into());
        }

        // Chain validation
        if self.chain.id.is_empty() {
            errors.push("chain.id must be set".into());
        }

        // Storage validation
        if self.storage.path.is_empty() {
            errors.push("storage.path cannot be empty".into());
        }

        // Listen address validation
        if self.server.listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "server.listen_addr is not a socket address: {}",
                self.server.listen_addr
            ));
        }
        if self.metrics.enabled && self.metrics.listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "metrics.listen_addr is not a socket address: {}",
                self.metrics.listen_addr
            ));
        }

        // Ingest validation
        if self.ingest.lookahead == 0 {
            errors.push("ingest.lookahead must be non-zero".into());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Upstream RPC configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSettings {
    /// HTTP RPC endpoint URL. The subscription endpoint is derived from it.
    pub url: String,
    /// Upper bound on adaptive RPC parallelism.
    pub max_parallelism: usize,
    /// P95 latency above which the controller reduces parallelism.
    pub max_p95_latency_ms: u64,
}

impl RpcSettings {
    /// Get the P95 latency threshold as a `Duration`.
    #[must_use]
    pub const fn max_p95_latency(&self) -> Duration {
        Duration::from_millis(self.max_p95_latency_ms)
    }
}

/// Chain identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    /// Opaque chain identifier returned by `/info`.
    pub id: String,
}

/// Block store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Directory for the underlying key-value store.
    pub path: String,
}

/// Streaming server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Bind address for the streaming server.
    pub listen_addr: String,
}

/// Metrics exposition configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Whether to run the Prometheus exporter.
    pub enabled: bool,
    /// Bind address for metrics exposition.
    pub listen_addr: String,
}

/// Fetcher and orchestrator tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Fetcher reorder-buffer window size (blocks in flight ahead of the
    /// emit cursor).
    pub lookahead: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (`trace`..`error`).
    pub level: String,
    /// Output format: `json` or `pretty`.
    pub format: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
