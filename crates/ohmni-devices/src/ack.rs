//! Connect acknowledgement correlation.
//!
//! Each connect call registers its own one-shot wait under a fresh ticket.
//! Registering for a device that already has a wait replaces it: the old
//! sender is dropped and the earlier caller resolves as superseded. An
//! acknowledgement removes the entry and wakes exactly the current waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use ohmni_core::DeviceId;

struct PendingAck {
    ticket: u64,
    tx: oneshot::Sender<()>,
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckWait {
    Acknowledged,
    TimedOut,
    /// Replaced by a newer registration or cancelled.
    Superseded,
}

/// Pending connect waits keyed by device.
#[derive(Default)]
pub struct AckRegistry {
    waits: DashMap<DeviceId, PendingAck>,
    next_ticket: AtomicU64,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `device_id`, superseding any earlier one.
    pub fn register(&self, device_id: &DeviceId) -> AckWaiter<'_> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if let Some(previous) = self.waits.insert(device_id.clone(), PendingAck { ticket, tx }) {
            debug!(
                "Connect wait {} for {} superseded by {}",
                previous.ticket, device_id, ticket
            );
        }

        AckWaiter {
            registry: self,
            device_id: device_id.clone(),
            ticket,
            rx: Some(rx),
        }
    }

    /// Wake the waiter of `device_id`. Returns whether one was woken.
    pub fn signal(&self, device_id: &str) -> bool {
        match self.waits.remove(device_id) {
            Some((_, pending)) => pending.tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter of `device_id` without acknowledging it.
    pub fn cancel(&self, device_id: &str) -> bool {
        self.waits.remove(device_id).is_some()
    }

    pub fn is_pending(&self, device_id: &str) -> bool {
        self.waits.contains_key(device_id)
    }

    pub fn pending_count(&self) -> usize {
        self.waits.len()
    }

    fn release(&self, device_id: &DeviceId, ticket: u64) {
        self.waits.remove_if(device_id, |_, pending| pending.ticket == ticket);
    }
}

/// One caller's registration. Dropping it removes the registry entry if it
/// still belongs to this ticket, so a cancelled connect never leaks a wait.
pub struct AckWaiter<'a> {
    registry: &'a AckRegistry,
    device_id: DeviceId,
    ticket: u64,
    rx: Option<oneshot::Receiver<()>>,
}

impl AckWaiter<'_> {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Wait for the acknowledgement, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> AckWait {
        let Some(rx) = self.rx.take() else {
            return AckWait::Superseded;
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => AckWait::Acknowledged,
            Ok(Err(_)) => AckWait::Superseded,
            Err(_) => AckWait::TimedOut,
        }
    }
}

impl Drop for AckWaiter<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.device_id, self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(s: &str) -> DeviceId {
        DeviceId::from(s)
    }

    #[tokio::test]
    async fn test_signal_wakes_waiter() {
        let registry = Arc::new(AckRegistry::new());
        let waiter = registry.register(&id("dev1"));
        assert!(registry.is_pending("dev1"));

        assert!(registry.signal("dev1"));
        assert_eq!(waiter.wait(Duration::from_secs(1)).await, AckWait::Acknowledged);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_signal_without_waiter() {
        let registry = AckRegistry::new();
        assert!(!registry.signal("dev1"));
    }

    #[tokio::test]
    async fn test_timeout_releases_entry() {
        let registry = AckRegistry::new();
        let waiter = registry.register(&id("dev1"));
        assert_eq!(waiter.wait(Duration::from_millis(20)).await, AckWait::TimedOut);
        assert!(!registry.is_pending("dev1"));
    }

    #[tokio::test]
    async fn test_newer_registration_supersedes() {
        let registry = AckRegistry::new();
        let first = registry.register(&id("dev1"));
        let second = registry.register(&id("dev1"));
        assert_ne!(first.ticket(), second.ticket());

        assert_eq!(first.wait(Duration::from_secs(1)).await, AckWait::Superseded);
        // The old waiter's drop must not remove the newer entry.
        assert!(registry.is_pending("dev1"));

        assert!(registry.signal("dev1"));
        assert_eq!(second.wait(Duration::from_secs(1)).await, AckWait::Acknowledged);
    }

    #[tokio::test]
    async fn test_drop_without_wait_releases_entry() {
        let registry = AckRegistry::new();
        {
            let _waiter = registry.register(&id("dev1"));
            assert_eq!(registry.pending_count(), 1);
        }
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel() {
        let registry = AckRegistry::new();
        let waiter = registry.register(&id("dev1"));
        assert!(registry.cancel("dev1"));
        assert_eq!(waiter.wait(Duration::from_secs(1)).await, AckWait::Superseded);
    }

    #[tokio::test]
    async fn test_devices_are_independent() {
        let registry = AckRegistry::new();
        let a = registry.register(&id("a"));
        let b = registry.register(&id("b"));

        assert!(registry.signal("b"));
        assert_eq!(b.wait(Duration::from_secs(1)).await, AckWait::Acknowledged);
        assert_eq!(a.wait(Duration::from_millis(10)).await, AckWait::TimedOut);
    }
}
