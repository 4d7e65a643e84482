//! Inbound message routing.
//!
//! ```text
//! iot/<id>/data     ──→ parse ─→ telemetry store ─→ touch liveness ─→ persist
//! iot/<id>/connect  ──→ ack token?  ─→ touch liveness ─→ persist ─→ wake waiter
//!                   ──→ own command ─→ ignored (echo)
//! ```
//!
//! Telemetry is appended before liveness is refreshed, and the two stores
//! are never locked together.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use ohmni_core::{
    ConnectConfig, DeviceId, Error, Result, TelemetryPayload, TelemetrySample, TopicKind,
    TopicScheme,
};
use ohmni_storage::{ConnectionStateStore, TelemetryStore};

use crate::ack::AckRegistry;
use crate::persist::WriteThrough;
use crate::stats::BridgeStats;
use crate::transport::InboundMessage;

/// What the router did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// A telemetry sample was stored.
    Telemetry(TelemetrySample),
    /// A connect acknowledgement was accepted.
    Acknowledged {
        device_id: DeviceId,
        woke_waiter: bool,
    },
    /// The bridge's own command came back from the bus.
    CommandEcho,
    /// A connect-topic payload that is neither an ack nor a command.
    Unrecognized,
    /// Empty payload.
    Empty,
}

/// Dispatches inbound `(topic, payload)` pairs to the stores.
pub struct MessageRouter {
    scheme: TopicScheme,
    connect: ConnectConfig,
    state: Arc<ConnectionStateStore>,
    telemetry: Arc<dyn TelemetryStore>,
    acks: Arc<AckRegistry>,
    persist: WriteThrough,
    stats: Arc<BridgeStats>,
}

impl MessageRouter {
    pub fn new(
        scheme: TopicScheme,
        connect: ConnectConfig,
        state: Arc<ConnectionStateStore>,
        telemetry: Arc<dyn TelemetryStore>,
        acks: Arc<AckRegistry>,
        persist: WriteThrough,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            scheme,
            connect,
            state,
            telemetry,
            acks,
            persist,
            stats,
        }
    }

    /// Handle one message, containing every error. Never fails.
    pub async fn handle(&self, message: &InboundMessage) {
        match self.route(message).await {
            Ok(Routed::Unrecognized) => {
                self.stats.record_dropped();
                warn!(
                    "Unrecognized payload on {}: {:?}",
                    message.topic,
                    String::from_utf8_lossy(&message.payload)
                );
            }
            Ok(_) => {}
            Err(e) => {
                self.stats.record_dropped();
                warn!("Dropped message on {}: {}", message.topic, e);
            }
        }
    }

    /// Route one message and report the result.
    pub async fn route(&self, message: &InboundMessage) -> Result<Routed> {
        let (device_id, kind) = self.scheme.classify(&message.topic)?;

        let Some(text) = message.text() else {
            return match kind {
                TopicKind::Telemetry => Err(Error::InvalidPayload("payload is not UTF-8".into())),
                TopicKind::Connect => Ok(Routed::Unrecognized),
            };
        };
        if text.is_empty() {
            debug!("Ignoring empty payload on {}", message.topic);
            return Ok(Routed::Empty);
        }

        match kind {
            TopicKind::Connect => Ok(self.route_connect(device_id, text).await),
            TopicKind::Telemetry => self.route_telemetry(device_id, text).await,
        }
    }

    async fn route_connect(&self, device_id: DeviceId, text: &str) -> Routed {
        if self.connect.is_command(text) {
            debug!("Ignoring echo of own command {:?} for {}", text, device_id);
            self.stats.record_echo();
            return Routed::CommandEcho;
        }
        if !self.connect.is_ack(text) {
            return Routed::Unrecognized;
        }

        let status = self.state.touch(&device_id, Utc::now());
        self.persist.status(&status).await;
        let woke_waiter = self.acks.signal(device_id.as_str());
        self.stats.record_ack();
        debug!("Ack from {} (waiter woken: {})", device_id, woke_waiter);

        Routed::Acknowledged {
            device_id,
            woke_waiter,
        }
    }

    async fn route_telemetry(&self, device_id: DeviceId, text: &str) -> Result<Routed> {
        let payload = TelemetryPayload::parse(text.as_bytes())?;
        if let Some(claimed) = payload.id.as_deref() {
            if claimed != device_id.as_str() {
                debug!(
                    "Payload id {:?} differs from topic device {}, using topic",
                    claimed, device_id
                );
            }
        }

        let now = Utc::now();
        let sample = payload.into_sample(device_id.clone(), now);

        self.telemetry
            .append(sample.clone())
            .await
            .map_err(Error::from)?;
        let status = self.state.touch(&device_id, now);

        self.persist.status(&status).await;
        self.persist.sample(&sample).await;
        self.stats.record_telemetry();

        Ok(Routed::Telemetry(sample))
    }
}
