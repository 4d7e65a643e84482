//! Connection state store.
//!
//! Every mutation happens under the shard lock of the device's entry, so the
//! connected flag and `last_seen` always change together and readers never
//! see a half-applied update. No method holds more than one entry at a time.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use ohmni_core::{ConnectionStatus, DeviceId};

/// Device id → connection status.
#[derive(Debug, Default)]
pub struct ConnectionStateStore {
    statuses: DashMap<DeviceId, ConnectionStatus>,
}

impl ConnectionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one device's status.
    pub fn get(&self, device_id: &str) -> Option<ConnectionStatus> {
        self.statuses.get(device_id).map(|s| s.value().clone())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.statuses.contains_key(device_id)
    }

    /// Set the connected flag and advance `last_seen`.
    ///
    /// `last_seen` never moves backwards here; only [`reset`](Self::reset)
    /// clears it.
    pub fn set_connected(
        &self,
        device_id: &DeviceId,
        connected: bool,
        last_seen: DateTime<Utc>,
    ) -> ConnectionStatus {
        let mut entry = self
            .statuses
            .entry(device_id.clone())
            .or_insert_with(|| ConnectionStatus::unconfirmed(device_id.clone()));
        let status = entry.value_mut();
        status.connected = connected;
        status.last_seen = Some(match status.last_seen {
            Some(prev) if prev > last_seen => prev,
            _ => last_seen,
        });
        status.clone()
    }

    /// Record activity from the device: connected, seen at `at`.
    pub fn touch(&self, device_id: &DeviceId, at: DateTime<Utc>) -> ConnectionStatus {
        self.set_connected(device_id, true, at)
    }

    /// Start a connect attempt from a known unconfirmed state.
    pub fn reset(&self, device_id: &DeviceId) -> ConnectionStatus {
        let status = ConnectionStatus::unconfirmed(device_id.clone());
        self.statuses.insert(device_id.clone(), status.clone());
        status
    }

    /// Mark a device disconnected, keeping its `last_seen`.
    ///
    /// Creates the entry when missing. Idempotent.
    pub fn mark_disconnected(&self, device_id: &DeviceId) -> ConnectionStatus {
        let mut entry = self
            .statuses
            .entry(device_id.clone())
            .or_insert_with(|| ConnectionStatus::unconfirmed(device_id.clone()));
        entry.value_mut().connected = false;
        entry.value().clone()
    }

    /// Mark a known device disconnected. Returns `None` for unknown devices.
    pub fn disconnect_existing(&self, device_id: &str) -> Option<ConnectionStatus> {
        let mut status = self.statuses.get_mut(device_id)?;
        status.connected = false;
        Some(status.clone())
    }

    /// Compare-and-set for the sweeper: mark the device disconnected only if
    /// it is still connected and stale at `now`.
    pub fn expire_if_stale(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Option<ConnectionStatus> {
        let mut status = self.statuses.get_mut(device_id)?;
        if status.connected && status.is_stale(now, threshold) {
            status.connected = false;
            Some(status.clone())
        } else {
            None
        }
    }

    /// Mark every connected device silent for longer than `threshold`
    /// disconnected. Returns the statuses that changed.
    pub fn expire_stale(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<ConnectionStatus> {
        let candidates: Vec<DeviceId> = self
            .statuses
            .iter()
            .filter(|s| s.connected && s.is_stale(now, threshold))
            .map(|s| s.key().clone())
            .collect();

        candidates
            .iter()
            .filter_map(|id| self.expire_if_stale(id.as_str(), now, threshold))
            .collect()
    }

    /// All statuses, ordered by device id.
    pub fn list_all(&self) -> Vec<ConnectionStatus> {
        let mut all: Vec<ConnectionStatus> =
            self.statuses.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    /// Forget a device entirely.
    pub fn remove(&self, device_id: &str) -> Option<ConnectionStatus> {
        self.statuses.remove(device_id).map(|(_, s)| s)
    }

    /// Seed a status restored from persistence without touching existing
    /// entries.
    pub fn restore(&self, status: ConnectionStatus) -> bool {
        match self.statuses.entry(status.device_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(status);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
