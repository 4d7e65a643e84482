//! Connect/disconnect orchestration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use ohmni_core::{ConnectConfig, ConnectOutcome, DeviceId, Error, Result, TopicScheme};
use ohmni_storage::ConnectionStateStore;

use crate::ack::{AckRegistry, AckWait};
use crate::persist::WriteThrough;
use crate::stats::BridgeStats;
use crate::transport::{PubSubTransport, QoS};

/// Runs the connect round-trip and the disconnect notice.
pub struct ConnectionOrchestrator {
    transport: Arc<dyn PubSubTransport>,
    scheme: TopicScheme,
    connect: ConnectConfig,
    state: Arc<ConnectionStateStore>,
    acks: Arc<AckRegistry>,
    persist: WriteThrough,
    stats: Arc<BridgeStats>,
}

impl ConnectionOrchestrator {
    pub fn new(
        transport: Arc<dyn PubSubTransport>,
        scheme: TopicScheme,
        connect: ConnectConfig,
        state: Arc<ConnectionStateStore>,
        acks: Arc<AckRegistry>,
        persist: WriteThrough,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            transport,
            scheme,
            connect,
            state,
            acks,
            persist,
            stats,
        }
    }

    /// Send a connect command and wait up to `timeout` for the device's ack.
    ///
    /// The device always starts from an unconfirmed status, even if it was
    /// connected before. The wait is registered before publishing so an
    /// immediate ack is never missed. Dropping the returned future releases
    /// the wait.
    pub async fn connect(&self, device_id: &DeviceId, timeout: Duration) -> ConnectOutcome {
        self.stats.record_connect_request();

        let status = self.state.reset(device_id);
        self.persist.status(&status).await;

        let waiter = self.acks.register(device_id);
        let topic = self.scheme.connect_topic(device_id.as_str());

        if let Err(e) = self
            .transport
            .publish(&topic, self.connect.connect_command.as_bytes(), QoS::AtLeastOnce)
            .await
        {
            warn!("Failed to send connect command to {}: {}", device_id, e);
            return ConnectOutcome::PublishFailed {
                reason: e.to_string(),
            };
        }
        debug!("Connect command sent to {}, waiting {:?}", topic, timeout);

        match waiter.wait(timeout).await {
            AckWait::Acknowledged => {
                info!("Device {} connected", device_id);
                ConnectOutcome::Connected
            }
            AckWait::TimedOut => {
                let status = self.state.mark_disconnected(device_id);
                self.persist.status(&status).await;
                info!("Device {} did not acknowledge within {:?}", device_id, timeout);
                ConnectOutcome::TimedOut
            }
            AckWait::Superseded => {
                debug!("Connect to {} superseded by a newer request", device_id);
                ConnectOutcome::Superseded
            }
        }
    }

    /// Mark a known device disconnected, then notify it.
    ///
    /// Unknown devices fail with [`Error::NotFound`]. A failed notice is
    /// reported as [`Error::Transport`] after the status has changed.
    pub async fn disconnect(&self, device_id: &DeviceId) -> Result<()> {
        let status = self
            .state
            .disconnect_existing(device_id.as_str())
            .ok_or_else(|| Error::NotFound(device_id.to_string()))?;
        self.persist.status(&status).await;

        let topic = self.scheme.connect_topic(device_id.as_str());
        self.transport
            .publish(
                &topic,
                self.connect.disconnect_command.as_bytes(),
                QoS::AtLeastOnce,
            )
            .await
            .map_err(|e| {
                warn!("Failed to send disconnect notice to {}: {}", device_id, e);
                Error::from(e)
            })?;

        info!("Device {} disconnected", device_id);
        Ok(())
    }
}
