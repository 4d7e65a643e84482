//! Device connectivity for the Ohmni bridge.
//!
//! ```text
//! ┌──────────────┐  TransportEvent   ┌───────────────┐
//! │ PubSub       │ ────────────────→ │ MessageRouter │──→ stores, acks
//! │ transport    │ ←──────────────── │ Orchestrator  │←── DeviceBridge API
//! └──────────────┘  publish          └───────────────┘
//!                                    LivenessSweeper ──→ state store
//! ```

pub mod ack;
pub mod connector;
pub mod error;
pub mod persist;
pub mod router;
pub mod service;
pub mod stats;
pub mod sweeper;
pub mod transport;

pub use ack::{AckRegistry, AckWait, AckWaiter};
pub use connector::ConnectionOrchestrator;
pub use error::TransportError;
pub use persist::WriteThrough;
pub use router::{MessageRouter, Routed};
pub use service::{DeviceBridge, DeviceBridgeBuilder};
pub use stats::{BridgeStats, StatsSnapshot};
pub use sweeper::LivenessSweeper;
pub use transport::{
    InboundMessage, MemoryTransport, MqttTransport, PubSubTransport, QoS, TransportEvent,
};
