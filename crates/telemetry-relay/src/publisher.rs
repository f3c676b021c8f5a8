//! MQTT publishing.
//!
//! Each publish opens its own connection, sends one QoS 0 message and
//! disconnects. Nothing is held open between ticks, so a broker restart
//! between cycles needs no reconnect handling.

use crate::error::PublishError;
use crate::settings::MqttSettings;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Destination for mapped messages.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

/// Publisher using a short-lived rumqttc connection per message.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    settings: MqttSettings,
}

impl MqttPublisher {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("{}-{}", self.settings.client_id_prefix, Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &self.settings.host, self.settings.port);
        options.set_keep_alive(Duration::from_secs(self.settings.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        if let Some((user, pass)) = self.settings.credentials() {
            options.set_credentials(user, pass);
        }
        options
    }

    async fn publish_once(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);

        // Requests are queued until the event loop connects and drains them
        // in order: publish first, then disconnect.
        client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| PublishError::Client(e.to_string()))?;
        client
            .disconnect()
            .await
            .map_err(|e| PublishError::Client(e.to_string()))?;

        let mut published = false;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(incoming)) => {
                    debug!(broker = %self.settings.broker_addr(), ?incoming, "MQTT incoming");
                }
                Ok(Event::Outgoing(Outgoing::Publish(_))) => published = true,
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(Event::Outgoing(_)) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(PublishError::Rejected(format!("{:?}", code)));
                }
                Err(e) => return Err(PublishError::Connect(e.to_string())),
            }
        }

        if published {
            Ok(())
        } else {
            Err(PublishError::Client(
                "disconnected before the message was sent".to_string(),
            ))
        }
    }
}

#[async_trait]
impl MessagePublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let timeout_secs = self.settings.connection_timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.publish_once(topic, payload),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(topic = %topic, payload = %payload, "Sent message");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PublishError::Timeout(timeout_secs)),
        }
    }
}
