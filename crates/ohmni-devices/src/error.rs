//! Transport error types.

use thiserror::Error;

pub use ohmni_core::Error as BridgeError;

/// Errors raised by a pub/sub transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach or authenticate with the broker.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A publish could not be handed to the bus.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A subscription request was rejected.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// The transport has been shut down.
    #[error("Transport closed")]
    Closed,
}

impl From<TransportError> for BridgeError {
    fn from(e: TransportError) -> Self {
        BridgeError::Transport(e.to_string())
    }
}
