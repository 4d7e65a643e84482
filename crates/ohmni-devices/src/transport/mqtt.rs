//! MQTT transport over `rumqttc`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ohmni_core::MqttConfig;

use super::{InboundMessage, PubSubTransport, QoS, TransportEvent};
use crate::error::TransportError;

/// Broker connection backed by a `rumqttc` client and a background event
/// loop task.
///
/// The event loop reconnects on its own: after any connection error it
/// reports [`TransportEvent::Disconnected`], sleeps the configured retry
/// interval and polls again, indefinitely.
pub struct MqttTransport {
    client: AsyncClient,
    broker_addr: String,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Create the client and spawn its event loop.
    ///
    /// Returns immediately; the link comes up asynchronously and is announced
    /// with [`TransportEvent::Connected`] on the returned receiver.
    pub fn connect(
        config: &MqttConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        if config.host.trim().is_empty() {
            return Err(TransportError::Connection("empty broker host".to_string()));
        }

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("ohmni-{}", Uuid::new_v4()));

        let mut mqttoptions = MqttOptions::new(&client_id, &config.host, config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        mqttoptions.set_clean_session(true);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            mqttoptions.set_credentials(user, pass);
        }

        if config.tls {
            mqttoptions.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, config.channel_capacity.max(10));
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));

        let transport = Self {
            client,
            broker_addr: config.broker_addr(),
            connected: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
        };

        info!(
            "Connecting to MQTT broker {} as {} (tls: {})",
            transport.broker_addr, client_id, config.tls
        );

        tokio::spawn(run_event_loop(
            eventloop,
            tx,
            transport.connected.clone(),
            transport.running.clone(),
            transport.broker_addr.clone(),
            config.reconnect_interval(),
        ));

        Ok((transport, rx))
    }

    pub fn broker_addr(&self) -> &str {
        &self.broker_addr
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    broker_addr: String,
    retry_interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received MQTT message on topic: {}, payload length: {}",
                    publish.topic,
                    publish.payload.len()
                );
                TransportEvent::Message(InboundMessage::new(
                    publish.topic,
                    publish.payload.to_vec(),
                ))
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT broker {} connection acknowledged", broker_addr);
                connected.store(true, Ordering::SeqCst);
                TransportEvent::Connected
            }
            Ok(_) => continue,
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let was_connected = connected.swap(false, Ordering::SeqCst);
                warn!(
                    "MQTT broker {} error: {}; retrying in {:?}",
                    broker_addr, e, retry_interval
                );
                if was_connected
                    && tx
                        .send(TransportEvent::Disconnected {
                            reason: e.to_string(),
                        })
                        .await
                        .is_err()
                {
                    break;
                }
                tokio::time::sleep(retry_interval).await;
                continue;
            }
        };

        if tx.send(event).await.is_err() {
            debug!("MQTT event receiver dropped, stopping event loop");
            break;
        }
    }

    connected.store(false, Ordering::SeqCst);
    info!("MQTT broker {} connection closed", broker_addr);
}

#[async_trait]
impl PubSubTransport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Publish(format!(
                "not connected to broker {}",
                self.broker_addr
            )));
        }
        self.client
            .publish(topic, qos.into(), false, payload.to_vec())
            .await
            .map_err(|e| {
                error!("Failed to publish to {}: {}", topic, e);
                TransportError::Publish(e.to_string())
            })
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.client
            .subscribe(pattern, qos.into())
            .await
            .map_err(|e| TransportError::Subscribe(format!("{}: {}", pattern, e)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.connected.store(false, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    fn name(&self) -> &str {
        "mqtt"
    }
}
