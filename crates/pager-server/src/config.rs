//! Configuration loading and validation for consul-pager

use common::LogFormat;
use pager::EngineOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Failed to write YAML: {0}")]
    SerializeError(serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid duration for {field}: {reason}")]
    InvalidDuration { field: &'static str, reason: String },

    #[error("Channel {id} has an unknown type")]
    UnknownChannel { id: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub consul: ConsulSettings,

    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub driver: DriverSettings,

    /// Keyed by channel id
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,

    #[serde(default)]
    pub checks: Vec<CheckConfig>,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.consul.validate()?;
        self.watch.validate()?;
        self.driver.validate()?;
        for check in &self.checks {
            check.validate()?;
        }
        for channel in self.channels.values() {
            match channel {
                ChannelConfig::Slack(slack) => slack.validate()?,
                ChannelConfig::Webhook(webhook) => webhook.validate()?,
                ChannelConfig::Unknown => {}
            }
        }
        Ok(())
    }
}

/// Consul agent and leadership lock settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsulSettings {
    #[validate(custom = "validate_http_address")]
    pub address: String,

    #[serde(default)]
    pub datacenter: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[validate(length(min = 1))]
    pub lock_key: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_session_ttl")]
    pub session_ttl: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_positive")]
    pub lock_retry: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_positive")]
    pub acquire_timeout: Duration,
}

/// Watch engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WatchSettings {
    /// Kept as text; parsed by [`Config::engine_options`]
    pub default_maturity: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_wait_timeout")]
    pub wait_timeout: Duration,

    #[validate(range(min = 1, max = 100000))]
    pub event_retention_cycles: u64,
}

/// Process driver settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DriverSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_positive")]
    pub leadership_check_interval: Duration,
}

/// One notification channel; the map key in `channels` is its id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Slack(SlackSettings),
    Webhook(WebhookSettings),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_slack_endpoint"))]
pub struct SlackSettings {
    #[serde(default)]
    pub subdomain: String,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub channel: String,

    #[serde(default = "default_slack_user")]
    pub user: String,

    /// Overrides the subdomain/token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(url)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WebhookSettings {
    #[validate(url)]
    pub url: String,

    #[serde(with = "humantime_serde", default = "default_webhook_timeout")]
    #[validate(custom = "validate_positive")]
    pub timeout: Duration,
}

/// A script check to register with the local agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CheckConfig {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default)]
    #[validate(custom = "validate_interval")]
    pub interval: String,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub service_name: String,
    pub otlp_endpoint: String,
}

// Default implementations

impl Default for ConsulSettings {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            datacenter: None,
            token: None,
            lock_key: "service/consul-pager/leader".to_string(),
            session_ttl: Duration::from_secs(15),
            lock_retry: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            default_maturity: "3s".to_string(),
            wait_timeout: Duration::from_secs(3),
            event_retention_cycles: 64,
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            leadership_check_interval: Duration::from_secs(10),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9102".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "consul-pager".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
        }
    }
}

fn default_slack_user() -> String {
    "consul-pager".to_string()
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(5)
}

// Custom validators

fn validate_http_address(address: &str) -> Result<(), ValidationError> {
    let trimmed = address.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ValidationError::new("address_scheme"));
    }
    if trimmed.len() <= "https://".len() && trimmed.ends_with("//") {
        return Err(ValidationError::new("address_host_missing"));
    }
    Ok(())
}

// Consul accepts session TTLs between 10s and 24h
fn validate_session_ttl(ttl: &Duration) -> Result<(), ValidationError> {
    let secs = ttl.as_secs();
    if !(10..=86_400).contains(&secs) {
        return Err(ValidationError::new("session_ttl_out_of_range"));
    }
    Ok(())
}

fn validate_wait_timeout(wait: &Duration) -> Result<(), ValidationError> {
    let millis = wait.as_millis();
    if millis < 100 || millis > 600_000 {
        return Err(ValidationError::new("wait_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_positive(duration: &Duration) -> Result<(), ValidationError> {
    if duration.is_zero() {
        return Err(ValidationError::new("duration_zero"));
    }
    Ok(())
}

/// A slack channel needs either a webhook URL or both subdomain and token
fn validate_slack_endpoint(slack: &SlackSettings) -> Result<(), ValidationError> {
    if slack.webhook_url.is_some() {
        return Ok(());
    }
    if slack.subdomain.trim().is_empty() || slack.token.trim().is_empty() {
        return Err(ValidationError::new("slack_endpoint_missing"));
    }
    Ok(())
}

fn validate_interval(interval: &str) -> Result<(), ValidationError> {
    match humantime::parse_duration(interval.trim()) {
        Ok(d) if !d.is_zero() => Ok(()),
        _ => Err(ValidationError::new("interval_invalid")),
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `explicit`, or from the default search paths
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// Write the configuration back as YAML
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = serde_yaml::to_string(self).map_err(ConfigError::SerializeError)?;
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// Structural validation plus the checks serde and validator cannot express
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        self.validate()?;
        self.default_maturity()?;
        if let Some((id, _)) = self
            .channels
            .iter()
            .find(|(_, channel)| matches!(channel, ChannelConfig::Unknown))
        {
            return Err(ConfigError::UnknownChannel { id: id.clone() });
        }
        Ok(())
    }

    pub fn default_maturity(&self) -> Result<Duration, ConfigError> {
        pager::error::parse_duration(&self.watch.default_maturity).map_err(|e| {
            ConfigError::InvalidDuration {
                field: "watch.default_maturity",
                reason: e.to_string(),
            }
        })
    }

    /// Engine tunables derived from the `watch` section
    pub fn engine_options(&self) -> Result<EngineOptions, ConfigError> {
        Ok(EngineOptions {
            default_maturity: self.default_maturity()?,
            wait_timeout: self.watch.wait_timeout,
            event_retention_cycles: self.watch.event_retention_cycles,
            ..EngineOptions::default()
        })
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/consul-pager/config.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./consul-pager.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/consul-pager/config.yaml"))
    }
}
