//! Error types for each stage of the relay.
//!
//! None of these are fatal to a running relay. The supervisor decides how to
//! recover: a config load failure degrades to the no-config state, a fetch or
//! publish failure skips the device until the next tick.

use std::path::PathBuf;

/// Loading the devices file as a whole failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// Source does not exist
    #[error("Configuration source not found: {0}")]
    Missing(String),

    /// Source exists but could not be read
    #[error("Failed to read configuration source {source_name}: {reason}")]
    Unreadable { source_name: String, reason: String },

    /// Source was read but no row produced a usable device
    #[error("No valid device rows in {0}")]
    NoValidRows(String),
}

/// A single row of the devices file was rejected.
///
/// Row errors are logged and the row is skipped; they never fail a load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("too few columns (expected at least 2, got {0})")]
    TooFewFields(usize),

    #[error("empty access token")]
    EmptyToken,

    #[error("empty MQTT topic")]
    EmptyTopic,

    #[error("no valid parameter mappings")]
    NoMappings,
}

/// Fetching readings for one device failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Could not reach the API server
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Server answered with a non-success status
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON shape
    #[error("Malformed response body: {0}")]
    Body(String),

    /// Response had no `data` records
    #[error("No 'data' array or array is empty")]
    EmptyData,

    /// Any other transport error
    #[error("Request error: {0}")]
    Request(String),
}

impl FetchError {
    /// Short error class used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Connect(_) => "connect",
            FetchError::Status { .. } => "status",
            FetchError::Body(_) => "body",
            FetchError::EmptyData => "empty_data",
            FetchError::Request(_) => "request",
        }
    }
}

/// Publishing one message to the broker failed.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Could not connect to the broker
    #[error("Broker connection failed: {0}")]
    Connect(String),

    /// Broker refused the connection (bad credentials, not authorized, ...)
    #[error("Broker rejected connection: {0}")]
    Rejected(String),

    /// Connect + publish did not finish in time
    #[error("Publish timed out after {0}s")]
    Timeout(u64),

    /// Client side request could not be queued
    #[error("MQTT client error: {0}")]
    Client(String),
}

impl PublishError {
    /// Short error class used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Connect(_) => "connect",
            PublishError::Rejected(_) => "rejected",
            PublishError::Timeout(_) => "timeout",
            PublishError::Client(_) => "client",
        }
    }
}

/// Runtime settings could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kinds() {
        assert_eq!(FetchError::Timeout(10).kind(), "timeout");
        assert_eq!(
            FetchError::Status {
                status: 401,
                body: String::new()
            }
            .kind(),
            "status"
        );
        assert_eq!(FetchError::EmptyData.kind(), "empty_data");
    }

    #[test]
    fn test_status_error_display() {
        let error = FetchError::Status {
            status: 503,
            body: "unavailable".to_string(),
        };
        let msg = format!("{}", error);
        assert!(msg.contains("503"));
        assert!(msg.contains("unavailable"));
    }

    #[test]
    fn test_publish_error_display() {
        let error = PublishError::Rejected("BadUserNamePassword".to_string());
        assert_eq!(error.kind(), "rejected");
        assert!(format!("{}", error).contains("BadUserNamePassword"));
    }
}
