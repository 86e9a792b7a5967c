#![deny(unsafe_code)]

//! Configuration loading and validation for vpnwarden.
//!
//! Loads TOML configuration files and validates them before any component
//! touches the network. [`AppConfig`] is the central configuration structure;
//! every section has defaults so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the daemon's management interface listens.
    #[serde(default)]
    pub management: ManagementConfig,

    /// Connect/retry behaviour.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Periodic state/status/log polling.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Detection of daemon instances left over from earlier runs.
    #[serde(default)]
    pub takeover: TakeoverConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Management interface endpoint.
///
/// `port = "unix"` means `host` is the path of a Unix domain socket;
/// anything else must be a TCP port number.
///
/// ## TOML Example
///
/// ```toml
/// [management]
/// host = "/tmp/vpnwarden-x1y2/management.socket"
/// port = "unix"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    #[serde(default = "default_management_host")]
    pub host: String,

    /// `"unix"` or a port number. Integers are accepted as well as strings.
    #[serde(
        default = "default_management_port",
        deserialize_with = "deserialize_port"
    )]
    pub port: String,

    /// Upper bound on waiting for a command's terminator line.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// How long a non-blocking drain waits for more bytes before giving up.
    #[serde(default = "default_drain_window_ms")]
    pub drain_window_ms: u64,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            host: default_management_host(),
            port: default_management_port(),
            command_timeout_ms: default_command_timeout_ms(),
            drain_window_ms: default_drain_window_ms(),
        }
    }
}

impl ManagementConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }

    /// Whether this endpoint names a Unix domain socket.
    pub fn is_unix(&self) -> bool {
        self.port == "unix"
    }
}

fn default_management_host() -> String {
    "127.0.0.1".to_string()
}

fn default_management_port() -> String {
    "7505".to_string()
}

fn default_command_timeout_ms() -> u64 {
    5000
}

fn default_drain_window_ms() -> u64 {
    20
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Text(String),
    Number(u64),
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match RawPort::deserialize(deserializer)? {
        RawPort::Text(s) => s,
        RawPort::Number(n) => n.to_string(),
    })
}

/// Connection supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Delay between two connection attempts.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Attempt budget for the initial connect loop. `0` retries forever.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Attempt budget after a mid-session socket error.
    #[serde(default = "default_reconnect_retries")]
    pub reconnect_retries: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
            reconnect_retries: default_reconnect_retries(),
        }
    }
}

impl SupervisorConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// The initial connect budget, `None` when unbounded.
    pub fn max_retries(&self) -> Option<u32> {
        (self.max_retries > 0).then_some(self.max_retries)
    }
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    10
}

fn default_reconnect_retries() -> u32 {
    5
}

/// Status/log observer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of daemon log lines requested per poll (`log N`).
    #[serde(default = "default_log_lines")]
    pub log_lines: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            log_lines: default_log_lines(),
        }
    }
}

impl ObserverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_log_lines() -> u32 {
    20
}

/// Fingerprint used to recognise a daemon this system launched.
///
/// `launch_marker` is baked into every launch invocation and makes a
/// process a candidate. A candidate is ours only if some argument also
/// contains both `brand_marker` and `provider_marker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeoverConfig {
    #[serde(default = "default_launch_marker")]
    pub launch_marker: String,

    #[serde(default = "default_brand_marker")]
    pub brand_marker: String,

    #[serde(default = "default_provider_marker")]
    pub provider_marker: String,

    /// How long to keep re-scanning for the process after asking it to exit.
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
}

impl Default for TakeoverConfig {
    fn default() -> Self {
        Self {
            launch_marker: default_launch_marker(),
            brand_marker: default_brand_marker(),
            provider_marker: default_provider_marker(),
            exit_grace_ms: default_exit_grace_ms(),
        }
    }
}

impl TakeoverConfig {
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

fn default_launch_marker() -> String {
    "LEAPOPENVPN".to_string()
}

fn default_brand_marker() -> String {
    "leap".to_string()
}

fn default_provider_marker() -> String {
    "providers".to_string()
}

fn default_exit_grace_ms() -> u64 {
    2000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading configuration");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.management.host.is_empty() {
            return Err(ConfigError::Validation(
                "management.host must not be empty".to_string(),
            ));
        }
        if !self.management.is_unix() {
            match self.management.port.parse::<u16>() {
                Ok(p) if p != 0 => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "management.port must be \"unix\" or a port in 1..=65535, got {:?}",
                        self.management.port
                    )));
                }
            }
        }
        if self.management.command_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "management.command_timeout_ms must be non-zero".to_string(),
            ));
        }

        if self.supervisor.retry_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "supervisor.retry_interval_ms must be non-zero".to_string(),
            ));
        }

        if self.observer.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "observer.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.observer.log_lines == 0 || self.observer.log_lines > 1000 {
            return Err(ConfigError::Validation(format!(
                "observer.log_lines must be in 1..=1000, got {}",
                self.observer.log_lines
            )));
        }

        for (name, value) in [
            ("launch_marker", &self.takeover.launch_marker),
            ("brand_marker", &self.takeover.brand_marker),
            ("provider_marker", &self.takeover.provider_marker),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "takeover.{name} must not be empty"
                )));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
