//! End-to-end bridge behavior over the loopback transport.

mod common;

use std::time::{Duration, Instant};

use common::{eventually, start_bridge, telemetry_json, test_config};
use ohmni_core::{ConnectOutcome, Error};

#[tokio::test]
async fn test_telemetry_round_trip() {
    let (bridge, transport) = start_bridge(test_config()).await;

    assert!(
        transport
            .inject("iot/dev1/data", r#"{"id":"dev1","corrente":1.5,"tensao":220.0}"#)
            .await
    );
    eventually(|| bridge.stats().telemetry_routed == 1).await;

    let latest = bridge.get_latest_telemetry("dev1").await.unwrap();
    assert_eq!(latest.current, 1.5);
    assert_eq!(latest.voltage, 220.0);
    assert!(bridge.get_device_status("dev1").unwrap().connected);
    assert_eq!(bridge.list_devices().len(), 1);
}

#[tokio::test]
async fn test_unknown_device_is_not_found() {
    let (bridge, _transport) = start_bridge(test_config()).await;

    assert!(matches!(bridge.get_device_status("ghost"), Err(Error::NotFound(_))));
    assert!(matches!(bridge.get_telemetry("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(
        bridge.get_latest_telemetry("ghost").await,
        Err(Error::NotFound(_))
    ));
    assert!(bridge.list_devices().is_empty());
}

#[tokio::test]
async fn test_connect_acknowledged() {
    let (bridge, transport) = start_bridge(test_config()).await;
    transport.respond_on(
        "iot/dev1/connect",
        "connect",
        "Conectado!",
        Duration::from_millis(20),
    );

    let outcome = bridge
        .request_connect("dev1", Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(outcome, ConnectOutcome::Connected);
    assert!(bridge.get_device_status("dev1").unwrap().connected);
    assert_eq!(bridge.pending_connects(), 0);
    assert_eq!(transport.published_on("iot/dev1/connect").await, vec!["connect"]);

    // Our own command came back over the subscription and was ignored.
    eventually(|| bridge.stats().commands_echoed >= 1).await;
    assert_eq!(bridge.stats().acks_received, 1);
}

#[tokio::test]
async fn test_connect_times_out() {
    let (bridge, _transport) = start_bridge(test_config()).await;

    let timeout = Duration::from_millis(100);
    let started = Instant::now();
    let outcome = bridge.request_connect("dev2", Some(timeout)).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, ConnectOutcome::TimedOut);
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_millis(500));
    assert!(!bridge.get_device_status("dev2").unwrap().connected);
    assert_eq!(bridge.pending_connects(), 0);
}

#[tokio::test]
async fn test_connect_resets_previously_connected_device() {
    let (bridge, transport) = start_bridge(test_config()).await;
    transport
        .inject("iot/dev1/data", telemetry_json("dev1", 1.0, 127.0))
        .await;
    eventually(|| bridge.stats().telemetry_routed == 1).await;
    assert!(bridge.get_device_status("dev1").unwrap().connected);

    let outcome = bridge
        .request_connect("dev1", Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert_eq!(outcome, ConnectOutcome::TimedOut);
    let status = bridge.get_device_status("dev1").unwrap();
    assert!(!status.connected);
    assert!(status.last_seen.is_none());
}

#[tokio::test]
async fn test_connect_publish_failure() {
    let (bridge, transport) = start_bridge(test_config()).await;
    transport.set_fail_publish(true);

    let started = Instant::now();
    let outcome = bridge
        .request_connect("dev1", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(matches!(outcome, ConnectOutcome::PublishFailed { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(bridge.pending_connects(), 0);
    assert!(!bridge.get_device_status("dev1").unwrap().connected);
}

#[tokio::test]
async fn test_newer_connect_supersedes_older() {
    let (bridge, transport) = start_bridge(test_config()).await;

    let first = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .request_connect("dev1", Some(Duration::from_secs(5)))
                .await
                .unwrap()
        })
    };
    eventually(|| bridge.pending_connects() == 1).await;

    let second = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .request_connect("dev1", Some(Duration::from_secs(5)))
                .await
                .unwrap()
        })
    };

    assert_eq!(first.await.unwrap(), ConnectOutcome::Superseded);
    assert_eq!(bridge.pending_connects(), 1);

    transport.inject("iot/dev1/connect", "Conectado!").await;
    assert_eq!(second.await.unwrap(), ConnectOutcome::Connected);
    assert_eq!(bridge.pending_connects(), 0);
}

#[tokio::test]
async fn test_cancelled_connect_releases_wait() {
    let (bridge, _transport) = start_bridge(test_config()).await;

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        bridge.request_connect("dev1", Some(Duration::from_secs(10))),
    )
    .await;
    assert!(result.is_err());
    assert_eq!(bridge.pending_connects(), 0);
}

#[tokio::test]
async fn test_invalid_device_id_rejected() {
    let (bridge, transport) = start_bridge(test_config()).await;
    for id in ["", "a/b", "+", "#"] {
        assert!(matches!(
            bridge.request_connect(id, None).await,
            Err(Error::MalformedTopic(_))
        ));
    }
    assert!(transport.published().await.is_empty());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (bridge, transport) = start_bridge(test_config()).await;
    transport
        .inject("iot/dev1/data", telemetry_json("dev1", 1.0, 127.0))
        .await;
    eventually(|| bridge.stats().telemetry_routed == 1).await;

    bridge.request_disconnect("dev1").await.unwrap();
    assert!(!bridge.get_device_status("dev1").unwrap().connected);
    bridge.request_disconnect("dev1").await.unwrap();
    assert!(!bridge.get_device_status("dev1").unwrap().connected);

    assert_eq!(
        transport.published_on("iot/dev1/connect").await,
        vec!["disconnect", "disconnect"]
    );
}

#[tokio::test]
async fn test_disconnect_unknown_device() {
    let (bridge, transport) = start_bridge(test_config()).await;
    assert!(matches!(
        bridge.request_disconnect("ghost").await,
        Err(Error::NotFound(_))
    ));
    assert!(transport.published().await.is_empty());
}

#[tokio::test]
async fn test_disconnect_publish_failure_still_updates_state() {
    let (bridge, transport) = start_bridge(test_config()).await;
    transport
        .inject("iot/dev1/data", telemetry_json("dev1", 1.0, 127.0))
        .await;
    eventually(|| bridge.stats().telemetry_routed == 1).await;

    transport.set_fail_publish(true);
    assert!(matches!(
        bridge.request_disconnect("dev1").await,
        Err(Error::Transport(_))
    ));
    assert!(!bridge.get_device_status("dev1").unwrap().connected);
}

#[tokio::test]
async fn test_buffer_keeps_last_samples_in_arrival_order() {
    let mut config = test_config();
    config.telemetry.capacity = 3;
    let (bridge, transport) = start_bridge(config).await;

    for i in 0..5 {
        transport
            .inject("iot/dev1/data", telemetry_json("dev1", i as f64, 220.0))
            .await;
    }
    eventually(|| bridge.stats().telemetry_routed == 5).await;

    let currents: Vec<f64> = bridge
        .get_telemetry("dev1")
        .await
        .unwrap()
        .iter()
        .map(|s| s.current)
        .collect();
    assert_eq!(currents, vec![2.0, 3.0, 4.0]);
}

#[tokio::test]
async fn test_seen_device_without_telemetry() {
    let (bridge, _transport) = start_bridge(test_config()).await;
    bridge
        .request_connect("dev3", Some(Duration::from_millis(10)))
        .await
        .unwrap();

    assert!(bridge.get_telemetry("dev3").await.unwrap().is_empty());
    assert!(matches!(
        bridge.get_latest_telemetry("dev3").await,
        Err(Error::NoTelemetry(_))
    ));
}

#[tokio::test]
async fn test_bad_messages_do_not_stop_delivery() {
    let (bridge, transport) = start_bridge(test_config()).await;

    transport.inject("iot/dev1/data", "not json").await;
    transport.inject("iot/dev1/data", r#"{"corrente":1}"#).await;
    transport.inject("iot/dev1/connect", "hello?").await;
    transport
        .inject("iot/dev1/data", telemetry_json("dev1", 2.5, 110.0))
        .await;

    eventually(|| bridge.stats().telemetry_routed == 1).await;
    assert_eq!(bridge.stats().messages_dropped, 3);
    assert_eq!(
        bridge.get_latest_telemetry("dev1").await.unwrap().current,
        2.5
    );
}

#[tokio::test]
async fn test_english_field_names_accepted() {
    let (bridge, transport) = start_bridge(test_config()).await;
    transport
        .inject("iot/dev1/data", r#"{"current":3.0,"voltage":127}"#)
        .await;
    eventually(|| bridge.stats().telemetry_routed == 1).await;
    assert_eq!(
        bridge.get_latest_telemetry("dev1").await.unwrap().voltage,
        127.0
    );
}

#[tokio::test]
async fn test_resubscribes_after_reconnect() {
    let (bridge, transport) = start_bridge(test_config()).await;
    assert_eq!(transport.subscriptions().await.len(), 2);
    assert!(bridge.is_link_up());

    transport.drop_link("broker restarted").await;
    eventually(|| !bridge.is_link_up()).await;
    assert!(!transport.inject("iot/dev1/data", "{}").await);

    transport.restore_link().await;
    assert!(bridge.wait_for_link(Duration::from_secs(1)).await);
    let mut resubscribed = false;
    for _ in 0..200 {
        if transport.subscriptions().await.len() == 2 {
            resubscribed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(resubscribed);

    assert!(
        transport
            .inject("iot/dev1/data", telemetry_json("dev1", 1.0, 1.0))
            .await
    );
    eventually(|| bridge.stats().telemetry_routed == 1).await;
}

#[tokio::test]
async fn test_remove_device() {
    let (bridge, transport) = start_bridge(test_config()).await;
    transport
        .inject("iot/dev1/data", telemetry_json("dev1", 1.0, 1.0))
        .await;
    eventually(|| bridge.stats().telemetry_routed == 1).await;

    assert!(bridge.remove_device("dev1").await.unwrap());
    assert!(matches!(bridge.get_device_status("dev1"), Err(Error::NotFound(_))));
    assert!(matches!(bridge.get_telemetry("dev1").await, Err(Error::NotFound(_))));
    assert!(!bridge.remove_device("dev1").await.unwrap());
}

#[tokio::test]
async fn test_start_twice_fails_and_shutdown() {
    let (bridge, _transport) = start_bridge(test_config()).await;
    let (_other, events) = ohmni_devices::MemoryTransport::new(1);
    assert!(matches!(bridge.start(events).await, Err(Error::Config(_))));

    bridge.shutdown().await;
    assert!(!bridge.is_link_up());
    assert!(matches!(
        bridge
            .request_connect("dev1", Some(Duration::from_millis(10)))
            .await
            .unwrap(),
        ConnectOutcome::PublishFailed { .. }
    ));
}
