//! Runtime settings for the relay.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `config.toml` (optional)
//! 3. Environment variables (`RELAY_*`)
//!
//! ```toml
//! devices_file = "config.csv"
//!
//! [api]
//! base_url = "https://api.saicloud.in"
//! endpoint = "/device_api/device_data/5"
//! timeout_secs = 10
//!
//! [mqtt]
//! host = "broker.example.com"
//! port = 1883
//! username = "relay"
//! password = "secret"
//!
//! [schedule]
//! device_delay_ms = 1000
//! cycle_delay_secs = 12
//! idle_backoff_secs = 12
//! ```
//!
//! Unlike the devices file, settings are read once at startup.

use crate::error::SettingsError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default settings file name.
pub const SETTINGS_FILE: &str = "config.toml";

/// Environment variable names.
pub mod env_vars {
    pub const API_BASE_URL: &str = "RELAY_API_BASE_URL";
    pub const API_ENDPOINT: &str = "RELAY_API_ENDPOINT";
    pub const MQTT_HOST: &str = "RELAY_MQTT_HOST";
    pub const MQTT_PORT: &str = "RELAY_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "RELAY_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "RELAY_MQTT_PASSWORD";
    pub const DEVICES_FILE: &str = "RELAY_DEVICES_FILE";
}

/// Telemetry API settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApiSettings {
    /// Scheme and host of the telemetry API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the device data endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Header carrying the device access token
    #[serde(default = "default_token_header")]
    pub token_header: String,
    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.saicloud.in".to_string()
}

fn default_endpoint() -> String {
    "/device_api/device_data/5".to_string()
}

fn default_token_header() -> String {
    "Access-Token".to_string()
}

fn default_api_timeout() -> u64 {
    10
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoint: default_endpoint(),
            token_header: default_token_header(),
            timeout_secs: default_api_timeout(),
        }
    }
}

impl ApiSettings {
    /// Full URL of the device data endpoint.
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }
}

/// MQTT broker settings.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct MqttSettings {
    /// Broker host
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Username (credentials are only sent when both are set)
    #[serde(default)]
    pub username: Option<String>,
    /// Password
    #[serde(default)]
    pub password: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Upper bound for connect + publish + disconnect, in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    /// Client ID prefix; a random suffix is added per connection
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_client_id_prefix() -> String {
    "telemetry-relay".to_string()
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            connection_timeout_secs: default_connection_timeout(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl MqttSettings {
    /// Username and password, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("client_id_prefix", &self.client_id_prefix)
            .finish()
    }
}

/// Fixed pacing of the supervisor loop.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    /// Pause between two devices in the same tick
    #[serde(default = "default_device_delay")]
    pub device_delay_ms: u64,
    /// Pause after a full pass before the next tick
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_secs: u64,
    /// Pause between retries while no configuration is loaded
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_secs: u64,
}

fn default_device_delay() -> u64 {
    1000
}

fn default_cycle_delay() -> u64 {
    12
}

fn default_idle_backoff() -> u64 {
    12
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            device_delay_ms: default_device_delay(),
            cycle_delay_secs: default_cycle_delay(),
            idle_backoff_secs: default_idle_backoff(),
        }
    }
}

impl Schedule {
    /// No pauses at all.
    pub fn immediate() -> Self {
        Self {
            device_delay_ms: 0,
            cycle_delay_secs: 0,
            idle_backoff_secs: 0,
        }
    }

    pub fn device_delay(&self) -> Duration {
        Duration::from_millis(self.device_delay_ms)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_secs(self.idle_backoff_secs)
    }
}

/// All runtime settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Devices file; relative paths are resolved against the root directory
    #[serde(default = "default_devices_file")]
    pub devices_file: PathBuf,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub schedule: Schedule,
}

fn default_devices_file() -> PathBuf {
    PathBuf::from("config.csv")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            devices_file: default_devices_file(),
            api: ApiSettings::default(),
            mqtt: MqttSettings::default(),
            schedule: Schedule::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, SettingsError> {
        toml::from_str(content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings from `path` if it exists, then apply environment
    /// overrides. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(content) => {
                info!(category = "config", "Loading settings from: {}", path.display());
                Self::from_toml(&content, path)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    category = "config",
                    "No settings file at {}, using defaults",
                    path.display()
                );
                Self::new()
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Override values from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_vars::API_BASE_URL) {
            self.api.base_url = v;
        }
        if let Some(v) = lookup(env_vars::API_ENDPOINT) {
            self.api.endpoint = v;
        }
        if let Some(v) = lookup(env_vars::MQTT_HOST) {
            self.mqtt.host = v;
        }
        if let Some(v) = lookup(env_vars::MQTT_PORT) {
            self.mqtt.port = v.parse().map_err(|_| SettingsError::InvalidEnv {
                name: env_vars::MQTT_PORT,
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup(env_vars::MQTT_USERNAME) {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = lookup(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = lookup(env_vars::DEVICES_FILE) {
            self.devices_file = PathBuf::from(v);
        }
        Ok(())
    }

    /// Devices file path, resolved against `root` when relative.
    pub fn devices_path(&self, root: &Path) -> PathBuf {
        if self.devices_file.is_absolute() {
            self.devices_file.clone()
        } else {
            root.join(&self.devices_file)
        }
    }
}
