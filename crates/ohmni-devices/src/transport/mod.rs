//! Pub/sub transport abstraction.
//!
//! A transport hands outbound publishes to the bus and delivers everything
//! inbound (messages and link changes) through a single
//! `mpsc::Receiver<TransportEvent>` returned at construction. The bridge
//! consumes that receiver on its own task, so inbound delivery never runs
//! on the caller's context.

pub mod memory;
pub mod mqtt;

pub use memory::MemoryTransport;
pub use mqtt::MqttTransport;

use async_trait::async_trait;

use crate::error::TransportError;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as trimmed UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok().map(str::trim)
    }
}

/// Everything a transport delivers to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection (initial or after a reconnect).
    Connected,
    /// The link dropped; the transport keeps retrying on its own.
    Disconnected { reason: String },
    /// An inbound publish.
    Message(InboundMessage),
}

/// Outbound side of a pub/sub bus.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publish a payload. An error means the bus did not take the message.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError>;

    /// Subscribe to a topic pattern with `+`/`#` wildcards.
    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError>;

    /// Whether the broker link is currently up.
    fn is_connected(&self) -> bool;

    /// Stop the transport. Further publishes fail with [`TransportError::Closed`].
    async fn close(&self) -> Result<(), TransportError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
