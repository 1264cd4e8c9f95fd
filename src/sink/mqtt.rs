//! MQTT publisher for crossing events.
//!
//! Publishes the service-schema JSON to `<prefix>/<type>` with QoS 1. The
//! client's event loop runs on its own thread; `try_publish` keeps the
//! pipeline from ever blocking on the broker.

use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::thread::JoinHandle;
use std::time::Duration;

use super::EventSink;
use crate::CrossingEvent;

#[derive(Clone, Debug)]
pub struct MqttSinkConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttSinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "counterd".to_string(),
            topic_prefix: "counter".to_string(),
        }
    }
}

pub struct MqttSink {
    client: Client,
    topic_prefix: String,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub fn connect(config: &MqttSinkConfig) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, connection) = Client::new(options, 64);
        log::info!("MqttSink: publishing to {}:{} under {}/", config.host, config.port, config.topic_prefix);
        Ok(Self {
            client,
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
            connection_handle: Some(spawn_event_loop(connection)),
        })
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.client.disconnect().context("disconnect MQTT client")?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn spawn_event_loop(mut connection: Connection) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

impl EventSink for MqttSink {
    fn deliver(&mut self, event: CrossingEvent) -> Result<()> {
        let topic = format!("{}/{}", self.topic_prefix, event.kind.as_str());
        let payload = serde_json::to_vec(&event).context("serialize crossing event")?;
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .context("queue MQTT publish")?;
        Ok(())
    }
}
