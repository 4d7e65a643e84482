//! Device-facing domain types.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque device identifier.
///
/// Always supplied by the device (through its topic), never generated by the
/// bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Last-known reachability of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Device identifier
    pub device_id: DeviceId,
    /// Whether the device is currently considered connected
    pub connected: bool,
    /// Last time a message was received from the device.
    /// `None` after a connect attempt reset the status.
    pub last_seen: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    /// A status that has not been confirmed by the device yet.
    pub fn unconfirmed(device_id: DeviceId) -> Self {
        Self {
            device_id,
            connected: false,
            last_seen: None,
        }
    }

    /// Whether the device has been silent for longer than `threshold` at `now`.
    ///
    /// A status without any `last_seen` is always stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.last_seen {
            Some(seen) => now - seen > threshold,
            None => true,
        }
    }
}

/// A single electrical reading reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: DeviceId,
    /// Current in amperes
    pub current: f64,
    /// Voltage in volts
    pub voltage: f64,
    /// Server-assigned arrival time
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn new(device_id: DeviceId, current: f64, voltage: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id,
            current,
            voltage,
            timestamp,
        }
    }
}

/// Telemetry payload as devices publish it on `iot/<id>/data`.
///
/// Field names follow the deployed firmware (`corrente`, `tensao`); the
/// English spellings are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "corrente", alias = "current")]
    pub current: f64,
    #[serde(rename = "tensao", alias = "voltage")]
    pub voltage: f64,
}

impl TelemetryPayload {
    /// Parse a raw payload, failing with [`Error::InvalidPayload`] when a
    /// required field is missing or not numeric.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// Turn the payload into a sample stamped at `timestamp`.
    pub fn into_sample(self, device_id: DeviceId, timestamp: DateTime<Utc>) -> TelemetrySample {
        TelemetrySample::new(device_id, self.current, self.voltage, timestamp)
    }
}

/// Result of a connect round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// The device acknowledged within the timeout
    Connected,
    /// No acknowledgement arrived within the timeout
    TimedOut,
    /// The connect command could not be handed to the bus
    PublishFailed { reason: String },
    /// A newer connect call for the same device replaced this one
    Superseded,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::TimedOut => write!(f, "timed out"),
            Self::PublishFailed { reason } => write!(f, "publish failed: {}", reason),
            Self::Superseded => write!(f, "superseded by a newer connect"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_names() {
        let payload =
            TelemetryPayload::parse(br#"{"id":"dev1","corrente":1.5,"tensao":220.0}"#).unwrap();
        assert_eq!(payload.id.as_deref(), Some("dev1"));
        assert_eq!(payload.current, 1.5);
        assert_eq!(payload.voltage, 220.0);
    }

    #[test]
    fn test_payload_english_aliases_and_integers() {
        let payload = TelemetryPayload::parse(br#"{"current":2,"voltage":127}"#).unwrap();
        assert!(payload.id.is_none());
        assert_eq!(payload.current, 2.0);
        assert_eq!(payload.voltage, 127.0);
    }

    #[test]
    fn test_payload_rejects_missing_or_non_numeric() {
        assert!(matches!(
            TelemetryPayload::parse(br#"{"id":"dev1","corrente":1.5}"#),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            TelemetryPayload::parse(br#"{"corrente":"1.5","tensao":220}"#),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            TelemetryPayload::parse(b"not json"),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_status_staleness() {
        let now = Utc::now();
        let threshold = Duration::seconds(15);
        let mut status = ConnectionStatus::unconfirmed(DeviceId::from("dev1"));
        assert!(status.is_stale(now, threshold));

        status.last_seen = Some(now - Duration::seconds(14));
        assert!(!status.is_stale(now, threshold));

        status.last_seen = Some(now - Duration::seconds(16));
        assert!(status.is_stale(now, threshold));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ConnectOutcome::PublishFailed {
            reason: "offline".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "publish_failed");
        assert_eq!(json["reason"], "offline");
    }
}
