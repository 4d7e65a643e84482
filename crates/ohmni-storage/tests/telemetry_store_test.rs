//! Telemetry store selection and shared behavior across backends.

use std::sync::Arc;

use chrono::Utc;
use ohmni_core::{DeviceId, TelemetryConfig, TelemetrySample};
use ohmni_storage::{open_telemetry_store, Error, TelemetryStore};

fn sample(id: &str, current: f64) -> TelemetrySample {
    TelemetrySample::new(DeviceId::from(id), current, 220.0, Utc::now())
}

async fn exercise(store: Arc<dyn TelemetryStore>) {
    assert!(store.latest("dev1").await.unwrap().is_none());
    assert!(store.all("dev1").await.unwrap().is_none());

    store.append(sample("dev1", 1.0)).await.unwrap();
    store.append(sample("dev1", 2.0)).await.unwrap();

    let all = store.all("dev1").await.unwrap().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].current, 1.0);
    assert_eq!(store.latest("dev1").await.unwrap().unwrap().current, 2.0);

    assert_eq!(store.remove("dev1").await.unwrap(), 2);
    assert!(store.all("dev1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_volatile_store_from_config() {
    let store = open_telemetry_store(&TelemetryConfig::volatile(10)).unwrap();
    assert_eq!(store.kind(), "ring_buffer");
    exercise(store).await;
}

#[tokio::test]
async fn test_durable_store_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.redb");
    let store =
        open_telemetry_store(&TelemetryConfig::durable(path.to_string_lossy().to_string())).unwrap();
    assert_eq!(store.kind(), "redb");
    exercise(store).await;
}

#[tokio::test]
async fn test_durable_without_path_is_rejected() {
    let mut config = TelemetryConfig::durable("unused");
    config.path = None;
    assert!(matches!(
        open_telemetry_store(&config),
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_concurrent_appends_respect_capacity() {
    let store = open_telemetry_store(&TelemetryConfig::volatile(50)).unwrap();

    let mut handles = Vec::new();
    for task in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                store
                    .append(sample("shared", (task * 1000 + i) as f64))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.all("shared").await.unwrap().unwrap().len(), 50);
}
