//! MQTT publisher against a minimal in-process broker.

use telemetry_relay::{MessagePublisher, MqttPublisher, MqttSettings, PublishError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const CONNECT: u8 = 0x10;
const PUBLISH: u8 = 0x30;
const DISCONNECT: u8 = 0xE0;

/// Read one MQTT control packet: fixed header byte and body.
async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        len |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

/// Accept one client, answer its CONNECT with `return_code`, and collect
/// QoS 0 publishes until it disconnects.
async fn start_broker(return_code: u8) -> (u16, JoinHandle<Vec<(String, String)>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();

        let (header, _) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header & 0xF0, CONNECT);
        stream
            .write_all(&[0x20, 0x02, 0x00, return_code])
            .await
            .unwrap();
        if return_code != 0 {
            return received;
        }

        while let Some((header, body)) = read_packet(&mut stream).await {
            match header & 0xF0 {
                PUBLISH => {
                    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
                    let payload = String::from_utf8(body[2 + topic_len..].to_vec()).unwrap();
                    received.push((topic, payload));
                }
                DISCONNECT => break,
                _ => {}
            }
        }
        received
    });

    (port, handle)
}

fn settings(port: u16) -> MqttSettings {
    MqttSettings {
        host: "127.0.0.1".to_string(),
        port,
        connection_timeout_secs: 5,
        ..MqttSettings::default()
    }
}

#[tokio::test]
async fn test_publish_delivers_message() {
    let (port, broker) = start_broker(0).await;

    let result = MqttPublisher::new(settings(port))
        .publish("devices/1", "Temperature:25.3,Humidity:N/A")
        .await;

    assert!(result.is_ok(), "publish failed: {:?}", result);
    let received = broker.await.unwrap();
    assert_eq!(
        received,
        vec![(
            "devices/1".to_string(),
            "Temperature:25.3,Humidity:N/A".to_string()
        )]
    );
}

#[tokio::test]
async fn test_refused_connection_is_rejected() {
    // CONNACK return code 5: not authorized
    let (port, broker) = start_broker(5).await;

    let result = MqttPublisher::new(settings(port))
        .publish("devices/1", "Temperature:25.3")
        .await;

    assert!(
        matches!(result, Err(PublishError::Rejected(_))),
        "unexpected result: {:?}",
        result
    );
    assert!(broker.await.unwrap().is_empty());
}
