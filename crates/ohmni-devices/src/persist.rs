//! Write-through to an optional device repository.

use std::sync::Arc;

use tracing::warn;

use ohmni_core::{ConnectionStatus, TelemetrySample};
use ohmni_storage::DeviceRepository;

/// Mirrors in-memory changes into a [`DeviceRepository`] when one is
/// attached. Failures are logged and swallowed; in-memory state stays
/// authoritative.
#[derive(Clone, Default)]
pub struct WriteThrough {
    repository: Option<Arc<dyn DeviceRepository>>,
    samples: bool,
}

impl WriteThrough {
    pub fn new(repository: Option<Arc<dyn DeviceRepository>>) -> Self {
        Self {
            repository,
            samples: true,
        }
    }

    /// Mirror status changes only. Used when the repository is also the
    /// telemetry store, so samples are already durable.
    pub fn status_only(repository: Arc<dyn DeviceRepository>) -> Self {
        Self {
            repository: Some(repository),
            samples: false,
        }
    }

    pub fn repository(&self) -> Option<&Arc<dyn DeviceRepository>> {
        self.repository.as_ref()
    }

    pub async fn status(&self, status: &ConnectionStatus) {
        let Some(repository) = &self.repository else {
            return;
        };
        if let Err(e) = repository
            .upsert_device(status.device_id.as_str(), status.connected, status.last_seen)
            .await
        {
            warn!("Failed to persist status of {}: {}", status.device_id, e);
        }
    }

    pub async fn sample(&self, sample: &TelemetrySample) {
        let Some(repository) = self.repository.as_ref().filter(|_| self.samples) else {
            return;
        };
        if let Err(e) = repository.insert_telemetry(sample).await {
            warn!("Failed to persist telemetry of {}: {}", sample.device_id, e);
        }
    }

    pub async fn delete(&self, device_id: &str) {
        let Some(repository) = &self.repository else {
            return;
        };
        if let Err(e) = repository.delete_device(device_id).await {
            warn!("Failed to delete persisted device {}: {}", device_id, e);
        }
    }
}
