//! Core types for the Ohmni device connectivity bridge.
//!
//! This crate defines the vocabulary shared by the storage and device crates:
//! device identifiers, connection status, telemetry samples, the wire payload
//! devices publish, the topic scheme, configuration, and the error taxonomy.

pub mod config;
pub mod device;
pub mod error;
pub mod topics;

pub use config::{
    BridgeConfig, ConnectConfig, LivenessConfig, MqttConfig, TelemetryConfig, TelemetryMode,
    TopicConfig,
};
pub use device::{
    ConnectOutcome, ConnectionStatus, DeviceId, TelemetryPayload, TelemetrySample,
};
pub use error::{Error, Result};
pub use topics::{topic_matches, validate_device_id, TopicKind, TopicScheme};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

