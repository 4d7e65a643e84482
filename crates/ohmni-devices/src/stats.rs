//! Bridge counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counters updated by the router, orchestrator and sweeper.
#[derive(Debug, Default)]
pub struct BridgeStats {
    telemetry_routed: AtomicU64,
    acks_received: AtomicU64,
    messages_dropped: AtomicU64,
    commands_echoed: AtomicU64,
    connect_requests: AtomicU64,
    devices_expired: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub telemetry_routed: u64,
    pub acks_received: u64,
    pub messages_dropped: u64,
    pub commands_echoed: u64,
    pub connect_requests: u64,
    pub devices_expired: u64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_telemetry(&self) {
        self.telemetry_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_echo(&self) {
        self.commands_echoed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_request(&self) {
        self.connect_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: usize) {
        self.devices_expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            telemetry_routed: self.telemetry_routed.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            commands_echoed: self.commands_echoed.load(Ordering::Relaxed),
            connect_requests: self.connect_requests.load(Ordering::Relaxed),
            devices_expired: self.devices_expired.load(Ordering::Relaxed),
        }
    }
}
