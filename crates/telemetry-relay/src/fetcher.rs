//! Device data fetching from the telemetry HTTP API.
//!
//! The API answers `GET <base_url><endpoint>` with the device selected by the
//! access token header:
//!
//! ```json
//! { "data": [ { "parameter_key": "temp", "parameter_value": "25.3" } ] }
//! ```
//!
//! Each request is bounded by the configured timeout. Every failure is
//! returned as a [`FetchError`]; nothing escapes this module as a panic.

use crate::device::{token_prefix, DeviceConfig};
use crate::error::FetchError;
use crate::mapper::RawReading;
use crate::settings::ApiSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest response text kept in a [`FetchError::Status`].
const MAX_ERROR_BODY: usize = 200;

/// Source of current parameter readings for a device.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self, device: &DeviceConfig) -> Result<RawReading, FetchError>;
}

/// One record of the `data` array.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub key: Option<String>,
    pub value: Option<Value>,
}

impl ParameterRecord {
    fn from_json(item: &Value) -> Self {
        let key = match item.get("parameter_key") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        let value = item
            .get("parameter_value")
            .filter(|v| !v.is_null())
            .cloned();
        Self { key, value }
    }

    /// Key and value, if both are present.
    pub fn complete(&self) -> Option<(&str, &Value)> {
        Some((self.key.as_deref()?, self.value.as_ref()?))
    }
}

/// Extract the `data` records from a response body.
pub fn parse_records(body: &Value) -> Result<Vec<ParameterRecord>, FetchError> {
    let data = match body.get("data") {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => return Err(FetchError::EmptyData),
        Some(other) => {
            return Err(FetchError::Body(format!(
                "'data' is not an array (found {})",
                json_type(other)
            )))
        }
    };
    if data.is_empty() {
        return Err(FetchError::EmptyData);
    }
    Ok(data.iter().map(ParameterRecord::from_json).collect())
}

/// Build a reading from a response body, skipping incomplete records.
pub fn reading_from_body(body: &Value) -> Result<RawReading, FetchError> {
    let mut reading = RawReading::new();
    for record in parse_records(body)? {
        match record.complete() {
            Some((key, value)) => reading.insert(key, value.clone()),
            None => debug!(?record, "Skipping incomplete parameter record"),
        }
    }
    Ok(reading)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// HTTP client for the telemetry API.
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    client: Client,
    settings: ApiSettings,
}

impl TelemetryClient {
    pub fn new(settings: ApiSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client, using defaults: {}", e);
                Client::default()
            });
        Self { client, settings }
    }

    pub fn url(&self) -> String {
        self.settings.url()
    }

    /// Fetch and decode the raw JSON body for a token.
    pub async fn fetch_body(&self, access_token: &str) -> Result<Value, FetchError> {
        let url = self.url();
        let prefix = token_prefix(access_token);
        info!(device = %prefix, url = %url, "Fetching device data");

        let response = self
            .client
            .get(&url)
            .header(self.settings.token_header.as_str(), access_token)
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate(&text, MAX_ERROR_BODY),
            });
        }

        let text = response.text().await.map_err(|e| self.classify(e))?;
        let body: Value = serde_json::from_str(&text).map_err(|e| {
            FetchError::Body(format!(
                "invalid JSON ({}): {}",
                e,
                truncate(&text, MAX_ERROR_BODY)
            ))
        })?;
        debug!(device = %prefix, body = %body, "Received device data");

        Ok(body)
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.settings.timeout_secs)
        } else if error.is_connect() {
            FetchError::Connect(error.to_string())
        } else if error.is_decode() || error.is_body() {
            FetchError::Body(error.to_string())
        } else {
            FetchError::Request(error.to_string())
        }
    }
}

#[async_trait]
impl TelemetrySource for TelemetryClient {
    async fn fetch(&self, device: &DeviceConfig) -> Result<RawReading, FetchError> {
        let body = self.fetch_body(&device.access_token).await?;
        let reading = reading_from_body(&body)?;
        if reading.is_empty() {
            warn!(
                device = %device.token_prefix(),
                "Response had no complete parameter records"
            );
        }
        Ok(reading)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
