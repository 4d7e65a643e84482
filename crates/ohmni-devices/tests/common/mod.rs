//! Shared helpers for bridge integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ohmni_core::BridgeConfig;
use ohmni_devices::{DeviceBridge, MemoryTransport};

/// Default config with plain-text transport settings for tests.
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.mqtt.tls = false;
    config
}

/// A started bridge over a loopback transport.
pub async fn start_bridge(config: BridgeConfig) -> (Arc<DeviceBridge>, MemoryTransport) {
    let (transport, events) = MemoryTransport::new(4096);
    let bridge = Arc::new(DeviceBridge::new(config, Arc::new(transport.clone())).unwrap());
    bridge.start(events).await.unwrap();
    (bridge, transport)
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn telemetry_json(id: &str, current: f64, voltage: f64) -> String {
    serde_json::json!({ "id": id, "corrente": current, "tensao": voltage }).to_string()
}
