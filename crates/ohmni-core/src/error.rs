//! Error types shared across the bridge.

use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error taxonomy.
///
/// Connect timeouts are not errors; they surface as
/// [`ConnectOutcome::TimedOut`](crate::ConnectOutcome::TimedOut).
#[derive(Debug, Error)]
pub enum Error {
    /// Publishing to, subscribing on, or connecting to the bus failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound topic did not carry a device id where one was expected.
    #[error("Malformed topic: {0}")]
    MalformedTopic(String),

    /// Inbound payload could not be parsed.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Device has never been seen by the bridge.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Device is known but has not reported any telemetry.
    #[error("No telemetry for device: {0}")]
    NoTelemetry(String),

    /// Storage/persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
