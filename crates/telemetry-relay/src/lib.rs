//! Telemetry relay: cloud device readings to MQTT.
//!
//! Polls a telemetry HTTP API for each configured device, renames the raw
//! parameter keys to display names and publishes the result to the device's
//! MQTT topic.
//!
//! ## Architecture
//!
//! - **ConfigStore**: loads device configurations from a [`ConfigSource`] and
//!   reports a cheap fingerprint for change detection
//! - **TelemetryClient**: fetches raw readings for one device ([`TelemetrySource`])
//! - **map_reading**: turns a raw reading into an ordered `name:value` message
//! - **MqttPublisher**: delivers one message per short-lived connection
//!   ([`MessagePublisher`])
//! - **Supervisor**: hot-reloads the configuration and drives the per-device
//!   fetch -> map -> publish cycle
//!
//! The devices file can be edited while the relay runs; changes are picked up
//! on the next tick.

pub mod config_store;
pub mod device;
pub mod error;
pub mod fetcher;
pub mod mapper;
pub mod publisher;
pub mod settings;
pub mod supervisor;

pub use config_store::{
    parse_devices, ConfigSource, ConfigStore, FileConfigSource, MemoryConfigSource,
};
pub use device::{token_prefix, ConfigSnapshot, DeviceConfig, Fingerprint, ParameterMap};
pub use error::{ConfigLoadError, FetchError, PublishError, RowError, SettingsError};
pub use fetcher::{ParameterRecord, TelemetryClient, TelemetrySource};
pub use mapper::{map_reading, MappedMessage, RawReading, MISSING_VALUE};
pub use publisher::{MessagePublisher, MqttPublisher};
pub use settings::{ApiSettings, MqttSettings, Schedule, Settings, SETTINGS_FILE};
pub use supervisor::{
    DeviceOutcome, DeviceStatus, ReloadAction, StateKind, Supervisor, SupervisorState,
    TickReport,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
