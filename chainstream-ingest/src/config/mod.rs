//! Configuration loading and validation for the ingestion service.
//!
//! Configuration is loaded from multiple sources in order of precedence:
//! 1. Environment variables (highest)
//! 2. Environment-specific file (e.g., `development.toml`)
//! 3. Default file (`default.toml`)
//!
//! # Example
//!
//! ```ignore
//! use chainstream_ingest::config::Settings;
//!
//! let settings = Settings::load("development")?;
//! println!("RPC URL: {}", settings.rpc.url);
//! ```

mod settings;

pub use settings::{
    ChainSettings, IngestSettings, LoggingSettings, MetricsSettings, RpcSettings, ServerSettings,
    Settings, StorageSettings,
};
