//! Configuration Module
//!
//! Provides TOML-based configuration for QuillMQ with support for:
//! - Logging
//! - Connection and delivery limits
//! - Session parameters
//! - MQTT feature flags
//! - Retained message persistence
//! - Environment variable overrides (QUILLMQ__* prefix)

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use persistence::{BackendType, PersistenceConfig};

mod persistence;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Connection and delivery limits
    pub limits: LimitsConfig,
    /// Session configuration
    pub session: SessionConfig,
    /// MQTT feature configuration
    pub mqtt: MqttConfig,
    /// Retained message persistence
    pub persistence: PersistenceConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or filter directive: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outgoing QoS 1/2 messages in flight per session
    #[serde(default = "default_max_inflight")]
    pub max_inflight: u16,
    /// Messages waiting for an in-flight slot per session
    #[serde(default = "default_max_queued_messages")]
    pub max_queued_messages: usize,
    /// Inbound QoS 2 messages awaiting PUBREL per session (0 = unbounded)
    #[serde(default = "default_max_awaiting_rel")]
    pub max_awaiting_rel: usize,
    /// Time before an unacknowledged message is retransmitted (e.g. "10s")
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Retransmissions before a delivery is reported as failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_outbound_channel_capacity")]
    pub outbound_channel_capacity: usize,
}

fn default_max_connections() -> usize {
    100_000
}
fn default_max_inflight() -> u16 {
    32
}
fn default_max_queued_messages() -> usize {
    1000
}
fn default_max_awaiting_rel() -> usize {
    100
}
fn default_retry_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_max_retries() -> u32 {
    3
}
fn default_outbound_channel_capacity() -> usize {
    1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_inflight: default_max_inflight(),
            max_queued_messages: default_max_queued_messages(),
            max_awaiting_rel: default_max_awaiting_rel(),
            retry_interval: default_retry_interval(),
            max_retries: default_max_retries(),
            outbound_channel_capacity: default_outbound_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Keep alive used when a client asks for 0
    #[serde(default = "default_keep_alive")]
    pub default_keep_alive: u16,
    #[serde(default = "default_max_keep_alive")]
    pub max_keep_alive: u16,
}

fn default_keep_alive() -> u16 {
    60
}
fn default_max_keep_alive() -> u16 {
    65535
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_keep_alive: default_keep_alive(),
            max_keep_alive: default_max_keep_alive(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Highest QoS granted to any subscription
    #[serde(default = "default_max_qos")]
    pub max_qos: u8,
    #[serde(default = "default_true")]
    pub retain_available: bool,
    /// Maximum topic levels (0 = unlimited)
    #[serde(default)]
    pub max_topic_levels: usize,
}

fn default_max_qos() -> u8 {
    2
}
fn default_true() -> bool {
    true
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            max_qos: default_max_qos(),
            retain_available: true,
            max_topic_levels: 0,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("limits.max_connections", 100_000)?
            .set_default("limits.max_inflight", 32)?
            .set_default("limits.max_queued_messages", 1000)?
            .set_default("limits.max_awaiting_rel", 100)?
            .set_default("limits.retry_interval", "10s")?
            .set_default("limits.max_retries", 3)?
            .set_default("limits.outbound_channel_capacity", 1024)?
            .set_default("session.default_keep_alive", 60)?
            .set_default("session.max_keep_alive", 65535)?
            .set_default("mqtt.max_qos", 2)?
            .set_default("mqtt.retain_available", true)?
            .set_default("mqtt.max_topic_levels", 0)?
            .set_default("persistence.enabled", false)?
            .set_default("persistence.backend", "memory")?
            .set_default("persistence.path", "./data")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (QUILLMQ__LIMITS__MAX_INFLIGHT, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("QUILLMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.max_qos > 2 {
            return Err(ConfigError::Validation(
                "max_qos must be 0, 1, or 2".to_string(),
            ));
        }

        if self.limits.max_inflight == 0 {
            return Err(ConfigError::Validation(
                "max_inflight must be at least 1".to_string(),
            ));
        }

        if self.limits.outbound_channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "outbound_channel_capacity must be at least 1".to_string(),
            ));
        }

        if self.limits.retry_interval.is_zero() {
            return Err(ConfigError::Validation(
                "retry_interval must be greater than zero".to_string(),
            ));
        }

        if self.session.default_keep_alive > self.session.max_keep_alive {
            return Err(ConfigError::Validation(
                "default_keep_alive cannot exceed max_keep_alive".to_string(),
            ));
        }

        Ok(())
    }
}
