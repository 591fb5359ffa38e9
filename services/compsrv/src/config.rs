//! Service configuration
//!
//! Configuration is loaded from a single YAML file and passed into the
//! components at construction - there is no process-wide mutable state.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CompSrvError, Result};

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_grace_period_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reconnect_backoff_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_channel_prefix() -> String {
    "compsrv".to_string()
}

/// Compressor supervision configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompressorConfig {
    /// Hostname of the Modbus TCP gateway
    pub host: String,

    /// TCP port of the gateway
    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit id of the compressor behind the gateway
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// How long a lost connection is tolerated before escalating to a fault
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Telemetry poll cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between reconnect attempts while degraded
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Per-request transport timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Telemetry sink settings
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Telemetry sink settings
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for published channel names (`<prefix>:<topic>`)
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            unit_id: default_unit_id(),
            grace_period_secs: default_grace_period_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            sink: SinkConfig::default(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            channel_prefix: default_channel_prefix(),
        }
    }
}

impl CompressorConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CompSrvError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: CompressorConfig = serde_yaml::from_str(&raw).map_err(|e| {
            CompSrvError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(CompSrvError::Config("host must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(CompSrvError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
