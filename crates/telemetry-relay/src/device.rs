//! Device configuration model.
//!
//! A [`ConfigSnapshot`] is the unit the supervisor holds: the full list of
//! devices parsed from one read of the devices file, tagged with the
//! fingerprint of the source at the time it was read. Snapshots are replaced
//! wholesale on reload and never mutated.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of token characters that may appear in logs.
pub const TOKEN_PREFIX_LEN: usize = 8;

/// Ordered mapping from raw API parameter key to published display name.
///
/// Iteration order is declaration order. Re-declaring a raw key replaces its
/// display name but keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMap {
    entries: Vec<(String, String)>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a mapping.
    pub fn insert(&mut self, raw_key: impl Into<String>, display_name: impl Into<String>) {
        let raw_key = raw_key.into();
        let display_name = display_name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == raw_key) {
            Some(entry) => entry.1 = display_name,
            None => self.entries.push((raw_key, display_name)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, raw_key: impl Into<String>, display_name: impl Into<String>) -> Self {
        self.insert(raw_key, display_name);
        self
    }

    pub fn get(&self, raw_key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == raw_key)
            .map(|(_, name)| name.as_str())
    }

    /// `(raw_key, display_name)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, name)| (key.as_str(), name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One device to poll and where to publish its readings.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// API credential for this device. Only the prefix may be logged.
    pub access_token: String,
    /// MQTT topic the mapped message is published to
    pub mqtt_topic: String,
    /// Raw key -> display name, in publish order
    pub parameter_map: ParameterMap,
}

impl DeviceConfig {
    pub fn new(
        access_token: impl Into<String>,
        mqtt_topic: impl Into<String>,
        parameter_map: ParameterMap,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            mqtt_topic: mqtt_topic.into(),
            parameter_map,
        }
    }

    /// Log-safe identifier for this device.
    pub fn token_prefix(&self) -> String {
        token_prefix(&self.access_token)
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("access_token", &format_args!("{}...", self.token_prefix()))
            .field("mqtt_topic", &self.mqtt_topic)
            .field("parameter_map", &self.parameter_map)
            .finish()
    }
}

/// First [`TOKEN_PREFIX_LEN`] characters of a token.
pub fn token_prefix(token: &str) -> String {
    token.chars().take(TOKEN_PREFIX_LEN).collect()
}

/// Cheap comparable marker for the state of a configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u128);

impl Fingerprint {
    /// Fingerprint of a file from its modification time and length.
    pub fn from_file(modified: SystemTime, len: u64) -> Self {
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self((nanos << 64) ^ u128::from(len))
    }

    /// Fingerprint from a monotonically increasing revision number.
    pub fn from_revision(revision: u64) -> Self {
        Self(u128::from(revision))
    }
}

/// Devices parsed from one read of the configuration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    devices: Vec<DeviceConfig>,
    fingerprint: Fingerprint,
}

impl ConfigSnapshot {
    pub fn new(devices: Vec<DeviceConfig>, fingerprint: Fingerprint) -> Self {
        Self {
            devices,
            fingerprint,
        }
    }

    pub fn devices(&self) -> &[DeviceConfig] {
        &self.devices
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parameter_map_keeps_declaration_order() {
        let map = ParameterMap::new()
            .with("hum", "Humidity")
            .with("temp", "Temperature")
            .with("co2", "CO2");

        let keys: Vec<_> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["hum", "temp", "co2"]);
    }

    #[test]
    fn test_parameter_map_redeclare_keeps_position() {
        let map = ParameterMap::new()
            .with("temp", "Temp")
            .with("hum", "Humidity")
            .with("temp", "Temperature");

        assert_eq!(map.len(), 2);
        assert_eq!(
            map.iter().collect::<Vec<_>>(),
            vec![("temp", "Temperature"), ("hum", "Humidity")]
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let device = DeviceConfig::new(
            "357f30ce73e8aa0d6486",
            "devices/1",
            ParameterMap::new().with("temp", "Temperature"),
        );
        let debug = format!("{:?}", device);
        assert!(debug.contains("357f30ce..."));
        assert!(!debug.contains("73e8aa0d6486"));
    }

    #[test]
    fn test_token_prefix_short_token() {
        assert_eq!(token_prefix("abc"), "abc");
        assert_eq!(token_prefix("0123456789"), "01234567");
    }

    #[test]
    fn test_file_fingerprint_changes_with_mtime_and_len() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let t1 = t0 + Duration::from_millis(1);

        assert_eq!(Fingerprint::from_file(t0, 10), Fingerprint::from_file(t0, 10));
        assert_ne!(Fingerprint::from_file(t0, 10), Fingerprint::from_file(t1, 10));
        assert_ne!(Fingerprint::from_file(t0, 10), Fingerprint::from_file(t0, 11));
    }
}
