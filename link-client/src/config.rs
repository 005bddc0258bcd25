//! Configuration loading for fieldlink-client.
//!
//! Configuration is loaded from a TOML file (default: `fieldlink.toml`).

use crate::control::ControlEndpoint;
use crate::live::LiveConfig;
use crate::store::UploadLimit;
use fieldlink_core::{HeartbeatError, HeartbeatInterval};
use fieldlink_types::DeviceCredentials;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a device client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Device identity and control-plane address.
    pub device: DeviceSection,
    /// Durable buffer configuration.
    #[serde(default)]
    pub buffer: BufferSection,
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkSection,
    /// Live session configuration.
    #[serde(default)]
    pub live: LiveSection,
}

/// Device identity and control-plane address.
#[derive(Clone, Deserialize)]
pub struct DeviceSection {
    /// Device identifier.
    pub mid: String,
    /// Pre-shared key.
    pub pre_shared_key: String,
    /// Control-plane host, e.g. `api.example.net`.
    pub host: String,
    /// Use HTTPS (default: true).
    #[serde(default = "default_use_https")]
    pub use_https: bool,
    /// Port override.
    #[serde(default)]
    pub port: Option<u16>,
}

impl std::fmt::Debug for DeviceSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSection")
            .field("mid", &self.mid)
            .field("pre_shared_key", &"[REDACTED]")
            .field("host", &self.host)
            .field("use_https", &self.use_https)
            .field("port", &self.port)
            .finish()
    }
}

/// Durable buffer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferSection {
    /// Path to the SQLite buffer file (default: fieldlink.db).
    #[serde(default = "default_buffer_path")]
    pub path: PathBuf,
    /// Maximum records per upload (default: 1000, 0 or negative: unlimited).
    #[serde(default = "default_upload_row_limit")]
    pub upload_row_limit: i64,
    /// Notify service-side listeners when uploading through the buffer (default: false).
    ///
    /// Buffered uploads go to the import endpoint unless this is set. Direct
    /// uploads through [`HttpControlPlane`](crate::HttpControlPlane)
    /// notify by default.
    #[serde(default)]
    pub notify_listeners_on_upload: bool,
}

/// Network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    /// Timeout in seconds for each network call (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Accept invalid TLS certificates (default: false).
    #[serde(default)]
    pub ignore_ssl_certificate_errors: bool,
}

/// Live session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveSection {
    /// Heartbeat interval in seconds: 0 or 60..=3600 (default: 60).
    #[serde(default)]
    pub heartbeat_interval: HeartbeatInterval,
    /// Maximum unacknowledged deliveries (default: 20).
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    /// Dispatch inbound messages automatically (default: true).
    #[serde(default = "default_true")]
    pub automatic_callbacks: bool,
    /// Refuse publishes while a transaction is open (default: true).
    #[serde(default = "default_true")]
    pub atomic_transactions: bool,
}

// Default value functions
fn default_use_https() -> bool {
    true
}

fn default_buffer_path() -> PathBuf {
    PathBuf::from("fieldlink.db")
}

fn default_upload_row_limit() -> i64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_prefetch_count() -> u16 {
    20
}

fn default_true() -> bool {
    true
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            path: default_buffer_path(),
            upload_row_limit: default_upload_row_limit(),
            notify_listeners_on_upload: false,
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            ignore_ssl_certificate_errors: false,
        }
    }
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            heartbeat_interval: HeartbeatInterval::default(),
            prefetch_count: default_prefetch_count(),
            automatic_callbacks: true,
            atomic_transactions: true,
        }
    }
}

impl DeviceSection {
    /// Credentials for this device.
    pub fn credentials(&self) -> DeviceCredentials {
        DeviceCredentials::new(&self.mid, &self.pre_shared_key)
    }

    /// Control-plane address.
    pub fn endpoint(&self) -> ControlEndpoint {
        ControlEndpoint {
            host: self.host.clone(),
            use_https: self.use_https,
            port: self.port,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.mid.trim().is_empty() {
            return Err(ConfigError::Invalid("device.mid must not be empty".into()));
        }
        if self.device.mid.contains('.') {
            return Err(ConfigError::Invalid(
                "device.mid must not contain '.'".into(),
            ));
        }
        if self.device.host.trim().is_empty() {
            return Err(ConfigError::Invalid("device.host must not be empty".into()));
        }
        Ok(())
    }

    /// Per-call network timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }

    /// Upload slice size for draining the buffer.
    pub fn upload_limit(&self) -> UploadLimit {
        UploadLimit::from_config(self.buffer.upload_row_limit)
    }

    /// Live session options.
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig::default()
            .with_heartbeat(self.live.heartbeat_interval)
            .with_prefetch_count(self.live.prefetch_count)
            .with_automatic_callbacks(self.live.automatic_callbacks)
            .with_atomic_transactions(self.live.atomic_transactions)
            .with_use_tls(self.device.use_https)
            .with_ignore_ssl_certificate_errors(self.network.ignore_ssl_certificate_errors)
            .with_timeout(self.timeout())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Heartbeat outside the allowed range.
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),

    /// Begin/commit/rollback called while automatic dispatch is enabled.
    #[error("explicit transactions are not allowed while automatic callbacks are enabled")]
    TransactionsWithAutomaticCallbacks,

    /// Publish attempted while a transaction is open in atomic mode.
    #[error("cannot publish while a transaction is open with atomic transactions enabled")]
    PublishDuringTransaction,

    /// Pause/resume called while automatic dispatch was never enabled.
    #[error("automatic callbacks are disabled")]
    AutomaticDispatchDisabled,

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

    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
