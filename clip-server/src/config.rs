//! Configuration loading for clipsync-server.
//!
//! Configuration is loaded from a TOML file (default: `clipsync.toml`).

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for clipsync-server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Liveness sweep configuration.
    pub liveness: LivenessConfig,
    /// Retention policy configuration.
    pub retention: RetentionConfig,
    /// Store/blob reconciliation configuration.
    pub reconcile: ReconcileConfig,
    /// Protocol limits.
    pub limits: LimitsConfig,
}

/// Server configuration.
///
/// One bind address serves the WebSocket endpoint and the HTTP
/// health/metrics endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0:3002).
    pub bind_address: String,
    /// Enable the metrics endpoint (default: true).
    pub metrics_enabled: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub database: PathBuf,
    /// Directory holding file/image blobs.
    pub upload_dir: PathBuf,
}

/// Liveness sweep configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Seconds between sweep runs; each run also probes live connections
    /// (default: 30).
    pub probe_interval_secs: u64,
    /// A connection silent for longer than this is forcibly closed
    /// (default: 60).
    pub timeout_secs: u64,
}

/// File eviction strategy for count-based file retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStrategy {
    /// Keep the most recently created files.
    OldestFirst,
    /// Keep the smallest files; unknown sizes count as zero.
    LargestFirst,
}

/// Retention policy configuration.
///
/// Declarative limits consumed read-only by the retention engine per run.
/// A limit of `None` disables that policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Enable the periodic retention task (default: true).
    pub enabled: bool,
    /// Seconds between periodic retention runs (default: 3600).
    pub interval_secs: u64,
    /// Maximum number of items to keep across all kinds.
    pub max_items: Option<u32>,
    /// Maximum item age in seconds.
    pub max_age_secs: Option<u64>,
    /// Maximum number of file/image items to keep.
    pub max_files: Option<u32>,
    /// Which files survive count-based file eviction (default: oldest_first).
    pub strategy: EvictionStrategy,
}

/// Store/blob reconciliation configuration.
///
/// The backstop for non-fatal blob-deletion failures: orphaned blobs and
/// dangling rows are cleaned up here, independent of the live eviction path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Enable the periodic reconciliation task (default: true).
    pub enabled: bool,
    /// Seconds between reconciliation runs (default: 21600 = 6 hours).
    pub interval_secs: u64,
}

/// Protocol limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Hard ceiling on `get_all_content` page size (default: 5000).
    pub max_query_limit: u32,
    /// Items returned by `get_latest` when the client omits a count
    /// (default: 10).
    pub default_latest_count: u32,
    /// Per-connection outbound queue capacity (default: 64).
    pub queue_capacity: usize,
    /// A socket write that takes longer than this marks the connection
    /// dead (default: 10).
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3002".to_string(),
            metrics_enabled: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("clipsync.db"),
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            timeout_secs: 60,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            max_items: None,
            max_age_secs: None,
            max_files: None,
            strategy: EvictionStrategy::OldestFirst,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 21_600,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_query_limit: 5000,
            default_latest_count: 10,
            queue_capacity: 64,
            write_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
