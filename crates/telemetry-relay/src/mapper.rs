//! Raw reading -> published message mapping.

use crate::device::ParameterMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Published in place of a value the API did not return.
pub const MISSING_VALUE: &str = "N/A";

/// Parameter values from a single fetch, keyed by raw parameter key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReading {
    values: HashMap<String, Value>,
}

impl RawReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value. A repeated key replaces the earlier value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered `(display_name, value)` pairs ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedMessage {
    pairs: Vec<(String, String)>,
}

impl MappedMessage {
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Wire form: `name:value` pairs joined with commas.
    pub fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MappedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", name, value)?;
        }
        Ok(())
    }
}

/// Map a reading through a device's parameter map.
///
/// Output order is the parameter map's order. Keys absent from the reading
/// get [`MISSING_VALUE`].
pub fn map_reading(raw: &RawReading, parameter_map: &ParameterMap) -> MappedMessage {
    let pairs = parameter_map
        .iter()
        .map(|(raw_key, display_name)| {
            let value = raw
                .get(raw_key)
                .map(render_value)
                .unwrap_or_else(|| MISSING_VALUE.to_string());
            (display_name.to_string(), value)
        })
        .collect();

    MappedMessage { pairs }
}

/// Strings are published bare, everything else as its JSON text.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_follows_map_order() {
        let map = ParameterMap::new()
            .with("a", "Alpha")
            .with("b", "Beta")
            .with("c", "Gamma");
        let raw = RawReading::new().with("c", "3").with("a", "1").with("b", "2");

        let message = map_reading(&raw, &map);
        let names: Vec<_> = message.pairs().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(message.to_payload(), "Alpha:1,Beta:2,Gamma:3");
    }

    #[test]
    fn test_missing_key_gets_sentinel() {
        let map = ParameterMap::new()
            .with("temp", "Temperature")
            .with("hum", "Humidity");
        let raw = RawReading::new().with("temp", "25.3");

        assert_eq!(
            map_reading(&raw, &map).to_payload(),
            "Temperature:25.3,Humidity:N/A"
        );
    }

    #[test]
    fn test_numbers_render_as_json_text() {
        let map = ParameterMap::new()
            .with("v", "Voltage")
            .with("on", "Relay")
            .with("n", "Count");
        let mut raw = RawReading::new();
        raw.insert("v", json!(230.5));
        raw.insert("on", json!(true));
        raw.insert("n", json!(7));

        assert_eq!(
            map_reading(&raw, &map).to_payload(),
            "Voltage:230.5,Relay:true,Count:7"
        );
    }

    #[test]
    fn test_extra_raw_keys_ignored() {
        let map = ParameterMap::new().with("temp", "Temperature");
        let raw = RawReading::new().with("temp", "20").with("unused", "x");
        assert_eq!(map_reading(&raw, &map).to_payload(), "Temperature:20");
    }

    #[test]
    fn test_empty_reading_is_all_sentinels() {
        let map = ParameterMap::new().with("a", "A").with("b", "B");
        assert_eq!(map_reading(&RawReading::new(), &map).to_payload(), "A:N/A,B:N/A");
    }
}
