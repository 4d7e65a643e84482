//! Liveness sweeper.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use ohmni_core::{ConnectionStatus, LivenessConfig};
use ohmni_storage::ConnectionStateStore;

use crate::persist::WriteThrough;
use crate::stats::BridgeStats;

/// Marks connected devices disconnected once they have been silent for
/// longer than the inactivity threshold.
pub struct LivenessSweeper {
    state: Arc<ConnectionStateStore>,
    interval: Duration,
    threshold: chrono::Duration,
    persist: WriteThrough,
    stats: Arc<BridgeStats>,
}

impl LivenessSweeper {
    pub fn new(
        config: &LivenessConfig,
        state: Arc<ConnectionStateStore>,
        persist: WriteThrough,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            state,
            interval: config.sweep_interval(),
            threshold: config.inactivity_threshold(),
            persist,
            stats,
        }
    }

    /// One sweep at `now`. Returns the devices that were expired.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Vec<ConnectionStatus> {
        let expired = self.state.expire_stale(now, self.threshold);
        for status in &expired {
            info!(
                "Device {} inactive since {:?}, marked disconnected",
                status.device_id, status.last_seen
            );
            self.persist.status(status).await;
        }
        if !expired.is_empty() {
            self.stats.record_expired(expired.len());
        }
        expired
    }

    /// Sweep every interval until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once(Utc::now()).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Liveness sweeper stopped");
        })
    }
}
