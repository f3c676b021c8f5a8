//! Telemetry API client tests against a mock HTTP server.

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use telemetry_relay::{
    ApiSettings, DeviceConfig, FetchError, ParameterMap, TelemetryClient, TelemetrySource,
};

const ENDPOINT: &str = "/device_api/device_data/5";

fn settings_for(server: &MockServer, timeout_secs: u64) -> ApiSettings {
    ApiSettings {
        base_url: server.uri(),
        timeout_secs,
        ..ApiSettings::default()
    }
}

fn device(token: &str) -> DeviceConfig {
    DeviceConfig::new(
        token,
        "devices/1",
        ParameterMap::new()
            .with("temp", "Temperature")
            .with("hum", "Humidity"),
    )
}

#[tokio::test]
async fn test_fetch_success_sends_token_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(header("Access-Token", "tok123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"parameter_key": "temp", "parameter_value": "25.3"},
                {"parameter_key": "pressure", "parameter_value": 1013}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = TelemetryClient::new(settings_for(&server, 5));
    let reading = client.fetch(&device("tok123")).await.unwrap();

    assert_eq!(reading.len(), 2);
    assert_eq!(reading.get("temp"), Some(&json!("25.3")));
    assert_eq!(reading.get("pressure"), Some(&json!(1013)));
}

#[tokio::test]
async fn test_fetch_non_success_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid token"))
        .mount(&server)
        .await;

    let client = TelemetryClient::new(settings_for(&server, 5));
    let result = client.fetch(&device("badtoken")).await;

    match result {
        Err(FetchError::Status { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "Invalid token");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_malformed_json() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = TelemetryClient::new(settings_for(&server, 5));
    let result = client.fetch(&device("tok123")).await;

    assert!(
        matches!(result, Err(FetchError::Body(_))),
        "expected body error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_fetch_empty_data() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let client = TelemetryClient::new(settings_for(&server, 5));
    let result = client.fetch(&device("tok123")).await;

    assert!(matches!(result, Err(FetchError::EmptyData)));
}

#[tokio::test]
async fn test_fetch_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": [{"parameter_key": "a", "parameter_value": 1}]}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = TelemetryClient::new(settings_for(&server, 1));
    let result = client.fetch(&device("tok123")).await;

    match result {
        Err(e @ FetchError::Timeout(1)) => assert_eq!(e.kind(), "timeout"),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_connection_refused() {
    let settings = ApiSettings {
        base_url: "http://127.0.0.1:1".to_string(),
        timeout_secs: 5,
        ..ApiSettings::default()
    };

    let client = TelemetryClient::new(settings);
    let result = client.fetch(&device("tok123")).await;

    assert!(
        matches!(result, Err(FetchError::Connect(_))),
        "expected connect error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_fetch_body_returns_raw_json() {
    let server = MockServer::start().await;
    let body = json!({
        "status": "ok",
        "data": [{"parameter_key": "temp"}]
    });

    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let client = TelemetryClient::new(settings_for(&server, 5));
    let raw = client.fetch_body("tok123").await.unwrap();
    assert_eq!(raw, body);

    // The only record has no value, so the reading is empty but not an error
    let reading = client.fetch(&device("tok123")).await.unwrap();
    assert!(reading.is_empty());
}
