//! In-process loopback transport.
//!
//! Plays the broker for tests and local runs: publishes are recorded and
//! echoed back to matching subscriptions, simulated devices can answer
//! commands, and link drops or publish failures can be injected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use ohmni_core::topic_matches;

use super::{InboundMessage, PubSubTransport, QoS, TransportEvent};
use crate::error::TransportError;

/// A simulated device reply to a specific command on a topic.
#[derive(Debug, Clone)]
struct Responder {
    trigger: String,
    reply: String,
    delay: Duration,
}

struct Inner {
    tx: mpsc::Sender<TransportEvent>,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<InboundMessage>>,
    responders: DashMap<String, Responder>,
    connected: AtomicBool,
    closed: AtomicBool,
    fail_publish: AtomicBool,
}

impl Inner {
    async fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .lock()
            .await
            .iter()
            .any(|pattern| topic_matches(pattern, topic))
    }

    /// Deliver to the bridge when a subscription matches.
    async fn route(&self, message: InboundMessage) -> bool {
        if !self.is_subscribed(&message.topic).await {
            debug!("No subscription for {}, message discarded", message.topic);
            return false;
        }
        self.tx.send(TransportEvent::Message(message)).await.is_ok()
    }
}

/// Loopback pub/sub transport. Cloning shares the same simulated broker.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Create a transport whose link is already up.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let transport = Self {
            inner: Arc::new(Inner {
                tx,
                subscriptions: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                responders: DashMap::new(),
                connected: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                fail_publish: AtomicBool::new(false),
            }),
        };
        (transport, rx)
    }

    /// Publish from the device side, as if a device sent it to the broker.
    /// Returns whether a subscription picked it up.
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.inner.route(InboundMessage::new(topic, payload)).await
    }

    /// Reply with `reply` on `topic` whenever the bridge publishes `trigger`
    /// there, after `delay`.
    pub fn respond_on(
        &self,
        topic: impl Into<String>,
        trigger: impl Into<String>,
        reply: impl Into<String>,
        delay: Duration,
    ) {
        self.inner.responders.insert(
            topic.into(),
            Responder {
                trigger: trigger.into(),
                reply: reply.into(),
                delay,
            },
        );
    }

    /// Stop answering on `topic`.
    pub fn clear_responder(&self, topic: &str) {
        self.inner.responders.remove(topic);
    }

    /// Make every following publish fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Simulate the broker dropping the link.
    pub async fn drop_link(&self, reason: &str) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.subscriptions.lock().await.clear();
        let _ = self
            .inner
            .tx
            .send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            })
            .await;
    }

    /// Simulate the link coming back. Subscriptions were lost with the drop.
    pub async fn restore_link(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        let _ = self.inner.tx.send(TransportEvent::Connected).await;
    }

    /// Every successful publish so far, in order.
    pub async fn published(&self) -> Vec<InboundMessage> {
        self.inner.published.lock().await.clone()
    }

    /// Payloads published on one topic, as text.
    pub async fn published_on(&self, topic: &str) -> Vec<String> {
        self.inner
            .published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().await.clone()
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: &[u8], _qos: QoS) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish("injected publish failure".to_string()));
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Publish("link is down".to_string()));
        }

        let message = InboundMessage::new(topic, payload);
        self.inner.published.lock().await.push(message.clone());

        let responder = self
            .inner
            .responders
            .get(topic)
            .filter(|r| message.text() == Some(r.trigger.as_str()))
            .map(|r| r.value().clone());

        // The bus echoes our own publish back when we subscribe to the topic.
        // Delivered off the caller's task so a full queue never blocks it.
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.route(message.clone()).await;
            if let Some(responder) = responder {
                if !responder.delay.is_zero() {
                    tokio::time::sleep(responder.delay).await;
                }
                inner
                    .route(InboundMessage::new(message.topic, responder.reply))
                    .await;
            }
        });

        Ok(())
    }

    async fn subscribe(&self, pattern: &str, _qos: QoS) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Subscribe("link is down".to_string()));
        }
        let mut subscriptions = self.inner.subscriptions.lock().await;
        if !subscriptions.iter().any(|p| p == pattern) {
            subscriptions.push(pattern.to_string());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && !self.inner.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
