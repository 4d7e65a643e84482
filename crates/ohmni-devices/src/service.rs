//! The device bridge facade.
//!
//! Owns the stores and background tasks and exposes the operations the HTTP
//! layer calls: status and telemetry queries plus connect/disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ohmni_core::{
    validate_device_id, BridgeConfig, ConnectOutcome, ConnectionStatus, DeviceId, Error, Result,
    TelemetrySample, TopicScheme,
};
use ohmni_storage::{open_telemetry_store, ConnectionStateStore, DeviceRepository, TelemetryStore};

use crate::ack::AckRegistry;
use crate::connector::ConnectionOrchestrator;
use crate::persist::WriteThrough;
use crate::router::MessageRouter;
use crate::stats::{BridgeStats, StatsSnapshot};
use crate::sweeper::LivenessSweeper;
use crate::transport::{PubSubTransport, QoS, TransportEvent};

/// Builder for [`DeviceBridge`].
pub struct DeviceBridgeBuilder {
    config: BridgeConfig,
    transport: Arc<dyn PubSubTransport>,
    telemetry: Option<Arc<dyn TelemetryStore>>,
    repository: Option<Arc<dyn DeviceRepository>>,
}

impl DeviceBridgeBuilder {
    /// Use this telemetry store instead of opening the configured one.
    pub fn telemetry_store(mut self, store: Arc<dyn TelemetryStore>) -> Self {
        self.telemetry = Some(store);
        self
    }

    /// Mirror status changes and samples into `repository`. When it is the
    /// same object as the telemetry store only status changes are mirrored.
    pub fn repository(mut self, repository: Arc<dyn DeviceRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn build(self) -> Result<DeviceBridge> {
        self.config.validate()?;

        let telemetry = match self.telemetry {
            Some(store) => store,
            None => open_telemetry_store(&self.config.telemetry)?,
        };

        let scheme = TopicScheme::new(&self.config.topics);
        let state = Arc::new(ConnectionStateStore::new());
        let acks = Arc::new(AckRegistry::new());
        let stats = Arc::new(BridgeStats::new());
        let persist = match self.repository {
            Some(repository) if same_store(&telemetry, &repository) => {
                debug!("Repository is the telemetry store, mirroring status only");
                WriteThrough::status_only(repository)
            }
            repository => WriteThrough::new(repository),
        };

        let router = Arc::new(MessageRouter::new(
            scheme.clone(),
            self.config.connect.clone(),
            state.clone(),
            telemetry.clone(),
            acks.clone(),
            persist.clone(),
            stats.clone(),
        ));
        let orchestrator = ConnectionOrchestrator::new(
            self.transport.clone(),
            scheme.clone(),
            self.config.connect.clone(),
            state.clone(),
            acks.clone(),
            persist.clone(),
            stats.clone(),
        );
        let sweeper = Arc::new(LivenessSweeper::new(
            &self.config.liveness,
            state.clone(),
            persist.clone(),
            stats.clone(),
        ));

        let (shutdown, _) = watch::channel(false);
        let (link, _) = watch::channel(self.transport.is_connected());

        Ok(DeviceBridge {
            config: self.config,
            scheme,
            transport: self.transport,
            state,
            telemetry,
            acks,
            persist,
            stats,
            router,
            orchestrator,
            sweeper,
            shutdown,
            link,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

fn same_store(telemetry: &Arc<dyn TelemetryStore>, repository: &Arc<dyn DeviceRepository>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(telemetry), Arc::as_ptr(repository))
}

/// IoT device connectivity bridge over a pub/sub bus.
pub struct DeviceBridge {
    config: BridgeConfig,
    scheme: TopicScheme,
    transport: Arc<dyn PubSubTransport>,
    state: Arc<ConnectionStateStore>,
    telemetry: Arc<dyn TelemetryStore>,
    acks: Arc<AckRegistry>,
    persist: WriteThrough,
    stats: Arc<BridgeStats>,
    router: Arc<MessageRouter>,
    orchestrator: ConnectionOrchestrator,
    sweeper: Arc<LivenessSweeper>,
    shutdown: watch::Sender<bool>,
    link: watch::Sender<bool>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceBridge {
    pub fn builder(config: BridgeConfig, transport: Arc<dyn PubSubTransport>) -> DeviceBridgeBuilder {
        DeviceBridgeBuilder {
            config,
            transport,
            telemetry: None,
            repository: None,
        }
    }

    /// Bridge with the configured telemetry store and no repository.
    pub fn new(config: BridgeConfig, transport: Arc<dyn PubSubTransport>) -> Result<Self> {
        Self::builder(config, transport).build()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start consuming transport events and sweeping liveness.
    ///
    /// Devices known to the repository are restored as disconnected.
    pub async fn start(&self, events: mpsc::Receiver<TransportEvent>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Config("bridge already started".to_string()));
        }

        self.restore_devices().await;

        if self.transport.is_connected() {
            subscribe_all(self.transport.as_ref(), &self.scheme).await;
        }

        let delivery = tokio::spawn(delivery_loop(
            events,
            self.router.clone(),
            self.transport.clone(),
            self.scheme.clone(),
            self.link.clone(),
            self.shutdown.subscribe(),
        ));
        let sweeper = self.sweeper.clone().spawn(self.shutdown.subscribe());

        self.tasks.lock().await.extend([delivery, sweeper]);

        info!(
            "Device bridge started (transport: {}, telemetry: {})",
            self.transport.name(),
            self.telemetry.kind()
        );
        Ok(())
    }

    async fn restore_devices(&self) {
        let Some(repository) = self.persist.repository() else {
            return;
        };
        match repository.list_devices().await {
            Ok(devices) => {
                let mut restored = 0;
                for mut status in devices {
                    status.connected = false;
                    if self.state.restore(status) {
                        restored += 1;
                    }
                }
                info!("Restored {} devices from repository", restored);
            }
            Err(e) => warn!("Failed to restore devices from repository: {}", e),
        }
    }

    /// Every device the bridge knows, ordered by id.
    pub fn list_devices(&self) -> Vec<ConnectionStatus> {
        self.state.list_all()
    }

    pub fn get_device_status(&self, device_id: &str) -> Result<ConnectionStatus> {
        self.state
            .get(device_id)
            .ok_or_else(|| Error::NotFound(device_id.to_string()))
    }

    /// Retained samples, oldest first.
    ///
    /// A device that is known but never reported yields an empty list; an
    /// unknown device is [`Error::NotFound`].
    pub async fn get_telemetry(&self, device_id: &str) -> Result<Vec<TelemetrySample>> {
        match self.telemetry.all(device_id).await? {
            Some(samples) => Ok(samples),
            None if self.state.contains(device_id) => Ok(Vec::new()),
            None => Err(Error::NotFound(device_id.to_string())),
        }
    }

    /// Most recent sample; [`Error::NoTelemetry`] for a known device without
    /// samples.
    pub async fn get_latest_telemetry(&self, device_id: &str) -> Result<TelemetrySample> {
        match self.telemetry.latest(device_id).await? {
            Some(sample) => Ok(sample),
            None if self.state.contains(device_id) => {
                Err(Error::NoTelemetry(device_id.to_string()))
            }
            None => Err(Error::NotFound(device_id.to_string())),
        }
    }

    /// Connect round-trip; `timeout` defaults to the configured one.
    pub async fn request_connect(
        &self,
        device_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ConnectOutcome> {
        validate_device_id(device_id)?;
        let timeout = timeout.unwrap_or_else(|| self.config.connect.timeout());
        Ok(self
            .orchestrator
            .connect(&DeviceId::from(device_id), timeout)
            .await)
    }

    pub async fn request_disconnect(&self, device_id: &str) -> Result<()> {
        validate_device_id(device_id).map_err(|_| Error::NotFound(device_id.to_string()))?;
        self.orchestrator
            .disconnect(&DeviceId::from(device_id))
            .await
    }

    /// Forget a device: status, retained telemetry, pending wait and the
    /// repository record. Returns whether anything was known about it.
    pub async fn remove_device(&self, device_id: &str) -> Result<bool> {
        let had_status = self.state.remove(device_id).is_some();
        let samples = self.telemetry.remove(device_id).await?;
        let had_wait = self.acks.cancel(device_id);
        self.persist.delete(device_id).await;

        let existed = had_status || samples > 0 || had_wait;
        if existed {
            info!("Removed device {} ({} samples)", device_id, samples);
        }
        Ok(existed)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn pending_connects(&self) -> usize {
        self.acks.pending_count()
    }

    /// Whether the broker link is up, as last reported by the transport.
    pub fn is_link_up(&self) -> bool {
        *self.link.borrow()
    }

    /// Wait until the broker link is up, at most `timeout`.
    pub async fn wait_for_link(&self, timeout: Duration) -> bool {
        let mut link = self.link.subscribe();
        tokio::time::timeout(timeout, link.wait_for(|up| *up))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Stop background tasks and close the transport.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.transport.close().await {
            warn!("Error closing transport: {}", e);
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Bridge task failed: {}", e);
            }
        }
        info!("Device bridge stopped");
    }
}

async fn subscribe_all(transport: &dyn PubSubTransport, scheme: &TopicScheme) {
    for pattern in scheme.subscriptions() {
        match transport.subscribe(&pattern, QoS::AtLeastOnce).await {
            Ok(()) => debug!("Subscribed to {}", pattern),
            Err(e) => warn!("Failed to subscribe to {}: {}", pattern, e),
        }
    }
}

/// Consume transport events in delivery order until shutdown.
async fn delivery_loop(
    mut events: mpsc::Receiver<TransportEvent>,
    router: Arc<MessageRouter>,
    transport: Arc<dyn PubSubTransport>,
    scheme: TopicScheme,
    link: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        match event {
            Some(TransportEvent::Message(message)) => router.handle(&message).await,
            Some(TransportEvent::Connected) => {
                info!("Broker link up, subscribing");
                link.send_replace(true);
                // Off the delivery task: a subscribe may wait on the same
                // client queue that feeds this loop.
                let transport = transport.clone();
                let scheme = scheme.clone();
                tokio::spawn(async move { subscribe_all(transport.as_ref(), &scheme).await });
            }
            Some(TransportEvent::Disconnected { reason }) => {
                warn!("Broker link down: {}", reason);
                link.send_replace(false);
            }
            None => {
                debug!("Transport event stream ended");
                break;
            }
        }
    }
    link.send_replace(false);
    debug!("Delivery loop stopped");
}
