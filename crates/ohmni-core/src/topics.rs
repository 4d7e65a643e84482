//! Topic scheme for device traffic.
//!
//! ```text
//! iot/<device_id>/data      device → bridge   telemetry JSON
//! iot/<device_id>/connect   bridge → device   "connect" / "disconnect"
//!                           device → bridge   acknowledgement token
//! ```

use crate::config::TopicConfig;
use crate::device::DeviceId;
use crate::error::{Error, Result};

/// What an inbound topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Telemetry,
    Connect,
}

/// Builds and parses topics for a given prefix.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    prefix: String,
    data_suffix: String,
    connect_suffix: String,
}

impl TopicScheme {
    pub fn new(config: &TopicConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            data_suffix: config.data_suffix.clone(),
            connect_suffix: config.connect_suffix.clone(),
        }
    }

    /// Telemetry topic of one device.
    pub fn data_topic(&self, device_id: &str) -> String {
        format!("{}/{}/{}", self.prefix, device_id, self.data_suffix)
    }

    /// Command/acknowledgement topic of one device.
    pub fn connect_topic(&self, device_id: &str) -> String {
        format!("{}/{}/{}", self.prefix, device_id, self.connect_suffix)
    }

    /// Subscription patterns the bridge needs: telemetry and connect signaling.
    pub fn subscriptions(&self) -> [String; 2] {
        [
            format!("{}/+/{}", self.prefix, self.data_suffix),
            format!("{}/+/{}", self.prefix, self.connect_suffix),
        ]
    }

    /// Extract the device id (the segment after the prefix) and the kind of
    /// an inbound topic.
    ///
    /// Topics ending in the connect suffix are connect signaling; everything
    /// else under the prefix is treated as telemetry.
    pub fn classify(&self, topic: &str) -> Result<(DeviceId, TopicKind)> {
        let malformed = || Error::MalformedTopic(topic.to_string());
        let rest = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(malformed)?;

        let (device, tail) = match rest.split_once('/') {
            Some((device, tail)) => (device, Some(tail)),
            None => (rest, None),
        };
        if device.is_empty() || device == "+" || device == "#" {
            return Err(malformed());
        }

        let kind = match tail.and_then(|tail| tail.rsplit('/').next()) {
            Some(last) if last == self.connect_suffix => TopicKind::Connect,
            _ => TopicKind::Telemetry,
        };

        Ok((DeviceId::from(device), kind))
    }
}

/// Check that a device id can be used as a single topic segment.
pub fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.is_empty() || device_id.contains(['/', '+', '#']) {
        return Err(Error::MalformedTopic(format!(
            "invalid device id for topic: {:?}",
            device_id
        )));
    }
    Ok(())
}

/// Match an MQTT topic against a subscription pattern with `+` and `#`
/// wildcards.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
