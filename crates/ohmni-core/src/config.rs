//! Bridge configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables (see [`env_vars`]). Every field has a default matching the
//! production deployment, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_HOST: &str = "OHMNI_MQTT_HOST";
    pub const MQTT_PORT: &str = "OHMNI_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "OHMNI_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "OHMNI_MQTT_PASSWORD";
    pub const MQTT_TLS: &str = "OHMNI_MQTT_TLS";
    pub const TELEMETRY_PATH: &str = "OHMNI_TELEMETRY_PATH";
    pub const LOG_JSON: &str = "OHMNI_LOG_JSON";
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client ID (auto-generated if not provided)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Use TLS with the platform root certificates
    #[serde(default = "default_true")]
    pub tls: bool,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    /// Capacity of the inbound delivery queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8883
}
fn default_true() -> bool {
    true
}
fn default_keep_alive() -> u64 {
    60
}
fn default_reconnect_interval() -> u64 {
    5
}
fn default_channel_capacity() -> usize {
    256
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            tls: true,
            keep_alive_secs: default_keep_alive(),
            reconnect_interval_secs: default_reconnect_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

/// Topic layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_data_suffix")]
    pub data_suffix: String,
    #[serde(default = "default_connect_suffix")]
    pub connect_suffix: String,
}

fn default_prefix() -> String {
    "iot".to_string()
}
fn default_data_suffix() -> String {
    "data".to_string()
}
fn default_connect_suffix() -> String {
    "connect".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            data_suffix: default_data_suffix(),
            connect_suffix: default_connect_suffix(),
        }
    }
}

/// Connect/disconnect signaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Default wait for an acknowledgement
    #[serde(default = "default_connect_timeout")]
    pub timeout_secs: u64,
    /// Payloads a device may answer with. Empty accepts any non-command payload.
    #[serde(default = "default_ack_tokens")]
    pub ack_tokens: Vec<String>,
    #[serde(default = "default_connect_command")]
    pub connect_command: String,
    #[serde(default = "default_disconnect_command")]
    pub disconnect_command: String,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_ack_tokens() -> Vec<String> {
    vec!["Conectado!".to_string()]
}
fn default_connect_command() -> String {
    "connect".to_string()
}
fn default_disconnect_command() -> String {
    "disconnect".to_string()
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_connect_timeout(),
            ack_tokens: default_ack_tokens(),
            connect_command: default_connect_command(),
            disconnect_command: default_disconnect_command(),
        }
    }
}

impl ConnectConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether `payload` is one of the bridge's own commands echoed back.
    pub fn is_command(&self, payload: &str) -> bool {
        payload == self.connect_command || payload == self.disconnect_command
    }

    /// Whether `payload` acknowledges a connect command.
    pub fn is_ack(&self, payload: &str) -> bool {
        if payload.is_empty() || self.is_command(payload) {
            return false;
        }
        self.ack_tokens.is_empty() || self.ack_tokens.iter().any(|t| t == payload)
    }
}

/// Liveness sweeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_inactivity_threshold")]
    pub inactivity_threshold_secs: u64,
}

/// Upper bound for liveness periods (one week).
pub const MAX_LIVENESS_SECS: u64 = 7 * 24 * 60 * 60;

fn default_sweep_interval() -> u64 {
    10
}
fn default_inactivity_threshold() -> u64 {
    15
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            inactivity_threshold_secs: default_inactivity_threshold(),
        }
    }
}

impl LivenessConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Saturates at [`MAX_LIVENESS_SECS`]; `validate` rejects larger values.
    pub fn inactivity_threshold(&self) -> chrono::Duration {
        let secs = self.inactivity_threshold_secs.min(MAX_LIVENESS_SECS);
        chrono::Duration::try_seconds(secs as i64).unwrap_or(chrono::Duration::MAX)
    }
}

/// Telemetry retention mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryMode {
    /// Most-recent-N samples per device, in memory
    #[default]
    Volatile,
    /// Append-only redb database
    Durable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub mode: TelemetryMode,
    /// Samples kept per device in volatile mode
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Database file in durable mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_capacity() -> usize {
    100
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            mode: TelemetryMode::Volatile,
            capacity: default_capacity(),
            path: None,
        }
    }
}

impl TelemetryConfig {
    pub fn volatile(capacity: usize) -> Self {
        Self {
            mode: TelemetryMode::Volatile,
            capacity,
            path: None,
        }
    }

    pub fn durable(path: impl Into<String>) -> Self {
        Self {
            mode: TelemetryMode::Durable,
            capacity: default_capacity(),
            path: Some(path.into()),
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load from `path` when given, then apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                let config = Self::from_toml_str(&text)?;
                tracing::debug!("Loaded configuration from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(env_vars::MQTT_HOST) {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup(env_vars::MQTT_PORT) {
            self.mqtt.port = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid {}: {}", env_vars::MQTT_PORT, port)))?;
        }
        if let Some(user) = lookup(env_vars::MQTT_USERNAME) {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = lookup(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(pass);
        }
        if let Some(tls) = lookup(env_vars::MQTT_TLS) {
            self.mqtt.tls = tls
                .parse()
                .map_err(|_| Error::Config(format!("invalid {}: {}", env_vars::MQTT_TLS, tls)))?;
        }
        if let Some(path) = lookup(env_vars::TELEMETRY_PATH) {
            self.telemetry = TelemetryConfig::durable(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.topics.prefix.is_empty() {
            return Err(Error::Config("topic prefix must not be empty".into()));
        }
        if self.connect.timeout_secs == 0 {
            return Err(Error::Config("connect timeout must be positive".into()));
        }
        if self.liveness.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep interval must be positive".into()));
        }
        if self.liveness.inactivity_threshold_secs == 0 {
            return Err(Error::Config("inactivity threshold must be positive".into()));
        }
        if self.liveness.sweep_interval_secs > MAX_LIVENESS_SECS
            || self.liveness.inactivity_threshold_secs > MAX_LIVENESS_SECS
        {
            return Err(Error::Config(format!(
                "liveness periods must not exceed {} seconds",
                MAX_LIVENESS_SECS
            )));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(Error::Config("channel capacity must be positive".into()));
        }
        match self.telemetry.mode {
            TelemetryMode::Volatile if self.telemetry.capacity == 0 => {
                Err(Error::Config("telemetry capacity must be positive".into()))
            }
            TelemetryMode::Durable
                if self.telemetry.path.as_deref().map_or(true, str::is_empty) =>
            {
                Err(Error::Config("durable telemetry requires a path".into()))
            }
            _ => Ok(()),
        }
    }
}
