//! Telemetry retention.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use ohmni_core::{DeviceId, TelemetrySample};

use crate::Result;

/// Retention strategy behind the bridge's telemetry queries.
///
/// Samples of one device are returned oldest to newest.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Store a sample under its device id.
    async fn append(&self, sample: TelemetrySample) -> Result<()>;

    /// Most recent sample of a device.
    async fn latest(&self, device_id: &str) -> Result<Option<TelemetrySample>>;

    /// Every retained sample of a device, or `None` when it never reported.
    async fn all(&self, device_id: &str) -> Result<Option<Vec<TelemetrySample>>>;

    /// Drop all samples of a device. Returns how many were removed.
    async fn remove(&self, device_id: &str) -> Result<usize>;

    /// Short name for logs.
    fn kind(&self) -> &'static str;
}

/// Volatile store keeping the most recent `capacity` samples per device.
#[derive(Debug)]
pub struct RingBufferStore {
    capacity: usize,
    buffers: DashMap<DeviceId, VecDeque<TelemetrySample>>,
}

impl RingBufferStore {
    /// Capacity is clamped to at least one sample.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of devices with at least one sample.
    pub fn device_count(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for RingBufferStore {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl TelemetryStore for RingBufferStore {
    async fn append(&self, sample: TelemetrySample) -> Result<()> {
        let mut buffer = self
            .buffers
            .entry(sample.device_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(sample);
        Ok(())
    }

    async fn latest(&self, device_id: &str) -> Result<Option<TelemetrySample>> {
        Ok(self
            .buffers
            .get(device_id)
            .and_then(|buffer| buffer.back().cloned()))
    }

    async fn all(&self, device_id: &str) -> Result<Option<Vec<TelemetrySample>>> {
        Ok(self
            .buffers
            .get(device_id)
            .map(|buffer| buffer.iter().cloned().collect()))
    }

    async fn remove(&self, device_id: &str) -> Result<usize> {
        Ok(self
            .buffers
            .remove(device_id)
            .map(|(_, buffer)| buffer.len())
            .unwrap_or(0))
    }

    fn kind(&self) -> &'static str {
        "ring_buffer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample(id: &str, current: f64) -> TelemetrySample {
        TelemetrySample::new(DeviceId::from(id), current, 220.0, Utc::now())
    }

    #[tokio::test]
    async fn test_append_and_latest() {
        let store = RingBufferStore::new(10);
        store.append(sample("dev1", 1.0)).await.unwrap();
        store.append(sample("dev1", 2.0)).await.unwrap();

        let latest = store.latest("dev1").await.unwrap().unwrap();
        assert_eq!(latest.current, 2.0);
        assert!(store.latest("dev2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evicts_oldest_at_capacity() {
        let store = RingBufferStore::new(3);
        for i in 0..5 {
            store.append(sample("dev1", i as f64)).await.unwrap();
        }

        let all = store.all("dev1").await.unwrap().unwrap();
        let currents: Vec<f64> = all.iter().map(|s| s.current).collect();
        assert_eq!(currents, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_zero_capacity_keeps_one() {
        let store = RingBufferStore::new(0);
        assert_eq!(store.capacity(), 1);
        store.append(sample("dev1", 1.0)).await.unwrap();
        store.append(sample("dev1", 2.0)).await.unwrap();
        assert_eq!(store.all("dev1").await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_devices_are_isolated() {
        let store = RingBufferStore::new(2);
        store.append(sample("a", 1.0)).await.unwrap();
        store.append(sample("a", 2.0)).await.unwrap();
        store.append(sample("a", 3.0)).await.unwrap();
        store.append(sample("b", 9.0)).await.unwrap();

        assert_eq!(store.all("a").await.unwrap().unwrap().len(), 2);
        assert_eq!(store.all("b").await.unwrap().unwrap().len(), 1);
        assert_eq!(store.device_count(), 2);
        assert!(store.all("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_order_is_arrival_order() {
        let store = RingBufferStore::new(10);
        let base = Utc::now();
        for i in 0..3 {
            let s = TelemetrySample::new(
                DeviceId::from("dev1"),
                i as f64,
                220.0,
                base + Duration::milliseconds(i),
            );
            store.append(s).await.unwrap();
        }
        let all = store.all("dev1").await.unwrap().unwrap();
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = RingBufferStore::new(10);
        store.append(sample("dev1", 1.0)).await.unwrap();
        store.append(sample("dev1", 2.0)).await.unwrap();
        assert_eq!(store.remove("dev1").await.unwrap(), 2);
        assert_eq!(store.remove("dev1").await.unwrap(), 0);
        assert!(store.all("dev1").await.unwrap().is_none());
    }
}
