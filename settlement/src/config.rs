//! Configuration for settlement engine

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settlement service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// HTTP listen address
    pub http_listen_addr: String,

    /// Log output format
    pub log_format: LogFormat,

    /// Ledger configuration
    pub ledger: ledger_core::Config,

    /// Settlement behaviour
    pub settlement: SettlementConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-server".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            http_listen_addr: "0.0.0.0:8080".to_string(),
            log_format: LogFormat::Pretty,
            ledger: ledger_core::Config::default(),
            settlement: SettlementConfig::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

/// Settlement behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Request deadline in milliseconds (default: 10s)
    pub request_timeout_ms: u64,

    /// Extra wait after the deadline for the writer's verdict
    pub deadline_grace_ms: u64,

    /// Credit back `credits_used` when a transfer is cancelled or fails
    pub refund_on_cancel: bool,

    /// Retry policy for transient store failures
    pub retry: RetryConfig,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            deadline_grace_ms: 250,
            refund_on_cancel: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// `SETTLEMENT_CONFIG` names a TOML file loaded first; the remaining
    /// variables override it.
    pub fn from_env() -> crate::Result<Self> {
        let config = match std::env::var("SETTLEMENT_CONFIG") {
            Ok(path) => Config::from_file(PathBuf::from(path))?,
            Err(_) => Config::default(),
        };

        config.with_env_overrides()
    }

    /// Apply `SETTLEMENT_*` and `LEDGER_*` overrides on top of `self`
    pub fn with_env_overrides(mut self) -> crate::Result<Self> {
        self.ledger = self.ledger.with_env_overrides()?;

        if let Ok(addr) = std::env::var("SETTLEMENT_HTTP_ADDR") {
            self.http_listen_addr = addr;
        }

        if let Ok(timeout) = std::env::var("SETTLEMENT_TIMEOUT_MS") {
            self.settlement.request_timeout_ms = timeout.parse().map_err(|_| {
                crate::Error::Config(format!("Invalid SETTLEMENT_TIMEOUT_MS: {}", timeout))
            })?;
        }

        if let Ok(refund) = std::env::var("SETTLEMENT_REFUND_ON_CANCEL") {
            self.settlement.refund_on_cancel = refund.parse().map_err(|_| {
                crate::Error::Config(format!("Invalid SETTLEMENT_REFUND_ON_CANCEL: {}", refund))
            })?;
        }

        if let Ok(format) = std::env::var("SETTLEMENT_LOG_FORMAT") {
            self.log_format = match format.to_ascii_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown log format: {}",
                        other
                    )))
                }
            };
        }

        Ok(self)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> crate::Result<()> {
        if self.settlement.request_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "settlement.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.ledger.writer.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "ledger.writer.mailbox_capacity must be greater than zero".to_string(),
            ));
        }
        self.http_listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| crate::Error::Config(format!("Invalid http_listen_addr: {}", e)))?;
        Ok(())
    }
}
