//! Configuration types for OMM
//!
//! Every section is optional in the config file; missing keys take the
//! defaults below. Environment variables prefixed `OMM_` override the file,
//! with `__` separating nesting levels (`OMM_TRASH__RETENTION_SECS=60`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "OMM";

/// Default cap on one client request: 5 TiB
pub const DEFAULT_MAX_REQUEST_BYTES: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Root configuration for the metadata manager
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OmConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub om: ManagerConfig,
    pub open_key: OpenKeyConfig,
    pub trash: TrashConfig,
    pub metrics: MetricsConfig,
    pub block: BlockConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

impl OmConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the manager cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.om.max_list_limit == 0 {
            return Err(ConfigError::Invalid("om.max_list_limit must be > 0".into()));
        }
        if self.block.size_bytes == 0 {
            return Err(ConfigError::Invalid("block.size_bytes must be > 0".into()));
        }
        if self.block.max_request_bytes == 0 {
            return Err(ConfigError::Invalid(
                "block.max_request_bytes must be > 0".into(),
            ));
        }
        if self.metrics.save_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "metrics.save_interval_ms must be > 0".into(),
            ));
        }
        if self.trash.sweep_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "trash.sweep_batch_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Path of the redb database file
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.node.data_dir.join("om.db")
    }
}

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config source error: {0}")]
    Source(#[from] config::ConfigError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Node identity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Instance name used in logs and metrics
    pub name: String,
    /// Directory holding the metadata database
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "omm".to_string(),
            data_dir: PathBuf::from("/var/lib/omm"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listener for `/metrics` and `/health`
    pub metrics_listen: SocketAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            metrics_listen: SocketAddr::from(([0, 0, 0, 0], 9875)),
        }
    }
}

/// Request-path tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Default lock acquisition deadline
    pub lock_timeout_ms: u64,
    /// List limits above this are clamped
    pub max_list_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            max_list_limit: 1000,
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenKeyConfig {
    /// OpenKey rows older than this are abandoned
    pub expiry_secs: u64,
}

impl Default for OpenKeyConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 7 * 24 * 3600, // 7 days
        }
    }
}

impl OpenKeyConfig {
    #[must_use]
    pub const fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrashConfig {
    /// Trash rows older than this are purged
    pub retention_secs: u64,
    /// Period of the background sweep
    pub sweep_interval_secs: u64,
    /// Rows fetched per scan page during a sweep
    pub sweep_batch_size: usize,
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            retention_secs: 14 * 24 * 3600, // 14 days
            sweep_interval_secs: 60,
            sweep_batch_size: 1000,
        }
    }
}

impl TrashConfig {
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// How often gauges are snapshotted to the store
    pub save_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            save_interval_ms: 1000,
        }
    }
}

impl MetricsConfig {
    #[must_use]
    pub const fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Size of each block handed out by the local allocator
    pub size_bytes: u64,
    /// Largest single open, commit extension or part a client may request
    pub max_request_bytes: u64,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            size_bytes: 256 * 1024 * 1024, // 256 MB
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl BlockConfig {
    /// Blocks needed to cover the largest allowed request
    #[must_use]
    pub const fn max_blocks_per_request(&self) -> u64 {
        self.max_request_bytes.div_ceil(self.size_bytes)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enforce owner and ACL checks
    pub acl_enabled: bool,
    /// Users that bypass ACL checks
    pub administrators: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
