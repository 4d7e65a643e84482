//! Storage layer for the Ohmni bridge.
//!
//! - [`ConnectionStateStore`]: per-device connection flag and last-seen time,
//!   safe under concurrent producers.
//! - [`TelemetryStore`]: telemetry retention, either the volatile
//!   [`RingBufferStore`] (most-recent-N per device) or the durable
//!   [`RedbStore`] (append-only).
//! - [`DeviceRepository`]: the narrow persistence contract the bridge writes
//!   device state and samples through.

pub mod backends;
pub mod error;
pub mod repository;
pub mod state;
pub mod telemetry;

pub use backends::redb::RedbStore;
pub use error::{Error, Result};
pub use repository::DeviceRepository;
pub use state::ConnectionStateStore;
pub use telemetry::{RingBufferStore, TelemetryStore};

use std::sync::Arc;

use ohmni_core::{TelemetryConfig, TelemetryMode};

/// Open the telemetry store selected by configuration.
pub fn open_telemetry_store(config: &TelemetryConfig) -> Result<Arc<dyn TelemetryStore>> {
    match config.mode {
        TelemetryMode::Volatile => Ok(Arc::new(RingBufferStore::new(config.capacity))),
        TelemetryMode::Durable => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| Error::InvalidInput("durable telemetry requires a path".into()))?;
            Ok(Arc::new(RedbStore::open(path)?))
        }
    }
}
