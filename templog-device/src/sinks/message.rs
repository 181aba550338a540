//! MQTT reading publisher
//!
//! Connecting is the only step that can fail the device: the first CONNACK
//! must arrive within the configured timeout. After that a background task
//! drives the rumqttc event loop, tracks connection state and reconnects with
//! a fixed back-off. Publishing is fire-and-forget.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use templog_common::config::MqttConfig;
use templog_common::Reading;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ReadingPublisher;
use crate::error::{Error, Result};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CHANNEL_CAPACITY: usize = 10;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Broker message body: the reading plus the publish time
#[derive(Debug, Serialize)]
pub struct PublishedReading<'a> {
    pub source: &'a str,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub wind: Option<f64>,
    /// When the reading was captured
    pub captured_at: DateTime<Utc>,
    /// When the message was published
    pub timestamp: DateTime<Utc>,
}

impl<'a> PublishedReading<'a> {
    pub fn new(reading: &'a Reading, published_at: DateTime<Utc>) -> Self {
        Self {
            source: &reading.source,
            temperature: reading.temperature,
            pressure: reading.pressure,
            humidity: reading.humidity,
            wind: reading.wind,
            captured_at: reading.timestamp,
            timestamp: published_at,
        }
    }
}

pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// Connect to the broker and wait for the first CONNACK
    pub async fn connect(config: &MqttConfig, device_id: &str) -> Result<Self> {
        let (host, port) = config.broker_address()?;

        let mut options = MqttOptions::new(config.client_id_for(device_id), host.clone(), port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let timeout = Duration::from_secs(config.connect_timeout_seconds.max(1));
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| Error::Broker(format!("timed out connecting to {}:{}", host, port)))??;

        info!("MQTT connected to broker: {}:{}", host, port);

        let connected = Arc::new(AtomicBool::new(true));
        let driver = tokio::spawn(drive_event_loop(eventloop, connected.clone()));

        Ok(Self {
            client,
            connected,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Publisher whose event loop is never driven; it stays disconnected
    #[cfg(test)]
    pub(crate) fn offline(options: MqttOptions) -> (Self, EventLoop) {
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let publisher = Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
            driver: Mutex::new(None),
        };
        (publisher, eventloop)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_driver(&self) -> Option<JoinHandle<()>> {
        self.driver.lock().ok().and_then(|mut guard| guard.take())
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(Error::Broker(e.to_string())),
        }
    }
}

async fn drive_event_loop(mut eventloop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if !connected.swap(true, Ordering::SeqCst) {
                    info!("MQTT reconnected");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                debug!("MQTT disconnect sent, stopping event loop");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    error!("MQTT connection error: {}", e);
                } else {
                    debug!("MQTT reconnect failed: {}", e);
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl ReadingPublisher for MqttPublisher {
    fn publish(&self, reading: &Reading, topic: &str) -> Option<JoinHandle<()>> {
        if !self.is_connected() {
            debug!("MQTT not connected, dropping {} reading", reading.source);
            return None;
        }

        let payload = match serde_json::to_vec(&PublishedReading::new(reading, Utc::now())) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialise {} reading: {}", reading.source, e);
                return None;
            }
        };

        let client = self.client.clone();
        let topic = topic.to_string();
        let source = reading.source.clone();

        Some(tokio::spawn(async move {
            match client
                .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
                .await
            {
                Ok(()) => debug!("Published {} reading to {}", source, topic),
                Err(e) => warn!("MQTT publish to {} failed: {}", topic, e),
            }
        }))
    }

    async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect request failed: {}", e);
        }

        if let Some(mut driver) = self.take_driver() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut driver).await.is_err() {
                driver.abort();
            }
        }
        info!("MQTT connection closed");
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Some(driver) = self.take_driver() {
            driver.abort();
        }
    }
}
