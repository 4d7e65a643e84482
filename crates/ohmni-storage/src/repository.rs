//! Persistence contract for device state and samples.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ohmni_core::{ConnectionStatus, TelemetrySample};

use crate::Result;

/// Durable record of devices and their readings.
///
/// The bridge writes through this trait after updating its in-memory state;
/// a failing write is logged by the caller and never rolls the in-memory
/// state back.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Stored status of a device.
    async fn find_device(&self, device_id: &str) -> Result<Option<ConnectionStatus>>;

    /// Create or update a device record.
    async fn upsert_device(
        &self,
        device_id: &str,
        connected: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Append one reading.
    async fn insert_telemetry(&self, sample: &TelemetrySample) -> Result<()>;

    /// Most recent readings of a device, newest first.
    async fn query_telemetry(&self, device_id: &str, limit: usize)
        -> Result<Vec<TelemetrySample>>;

    /// Remove a device record and its readings. Returns whether it existed.
    async fn delete_device(&self, device_id: &str) -> Result<bool>;

    /// Every stored device, ordered by id.
    async fn list_devices(&self) -> Result<Vec<ConnectionStatus>>;
}
