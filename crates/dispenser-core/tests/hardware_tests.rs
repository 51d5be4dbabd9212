//! Hardware integration tests for dispenser-core
//!
//! These tests require a powered dispenser in range and should be run with:
//! ```
//! cargo test --package dispenser-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `DISPENSER_DEVICE` to the identifier or name of the dispenser. Without
//! it, the first `ESP32_*` device found by a scan is used.
//!
//! None of these tests switch the pump on.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use dispenser_core::{
    BleRadio, ConnectionManager, ConnectionState, Granularity, HistoryOptions, LinkStatus,
    TelemetryMonitor, request_history,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

async fn manager() -> ConnectionManager {
    let radio = timeout(BLE_TIMEOUT, BleRadio::new())
        .await
        .expect("adapter timed out")
        .expect("no Bluetooth adapter");
    ConnectionManager::new(Arc::new(radio))
}

/// Device identifier from the environment, or the first one a scan finds.
async fn target(manager: &ConnectionManager) -> Option<String> {
    if let Some(device) = env::var("DISPENSER_DEVICE").ok().filter(|s| !s.is_empty()) {
        return Some(device);
    }

    manager.scan().await.expect("scan failed to start");
    let found = manager.wait_for_scan().await;
    found.first().map(|d| d.id.clone())
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_finds_dispensers() {
    let manager = manager().await;
    manager.scan().await.expect("scan failed to start");
    assert_eq!(manager.state(), ConnectionState::Scanning);

    let found = timeout(BLE_TIMEOUT, manager.wait_for_scan())
        .await
        .expect("scan window never closed");

    println!("Found {} dispenser(s)", found.len());
    for device in &found {
        println!("  {} ({:?} dBm)", device.display_name(), device.rssi);
        assert!(device.name.as_deref().unwrap_or("").starts_with("ESP32_"));
    }
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_disconnect() {
    let manager = manager().await;
    let Some(id) = target(&manager).await else {
        println!("No dispenser found, skipping");
        return;
    };

    let handle = timeout(BLE_TIMEOUT, manager.connect(&id))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    assert_eq!(manager.status().await, LinkStatus::Online);
    println!("Connected to {}", handle.label());

    manager.disconnect().await.expect("disconnect failed");
    assert!(!handle.is_active());
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_read_thresholds_and_mode() {
    let manager = manager().await;
    let Some(id) = target(&manager).await else {
        println!("No dispenser found, skipping");
        return;
    };
    let handle = manager.connect(&id).await.expect("connect failed");

    let thresholds = manager.read_thresholds().await.expect("threshold read failed");
    println!("Thresholds: max={:?} min={:?}", thresholds.max, thresholds.min);

    let monitor = TelemetryMonitor::new();
    monitor.attach(handle).await.expect("attach failed");
    println!("Mode: {:?}", monitor.snapshot().mode);

    manager.shutdown().await;
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_sensor_stream() {
    let manager = manager().await;
    let Some(id) = target(&manager).await else {
        println!("No dispenser found, skipping");
        return;
    };
    let handle = manager.connect(&id).await.expect("connect failed");

    let monitor = TelemetryMonitor::new();
    monitor.attach(handle).await.expect("attach failed");

    let mut snapshots = monitor.subscribe();
    let latest = match timeout(BLE_TIMEOUT, snapshots.wait_for(|s| s.latest.is_some())).await {
        Ok(Ok(snapshot)) => snapshot.latest.clone(),
        _ => None,
    };

    match latest {
        Some(value) => println!("Latest value: {value}"),
        None => println!("No notification within {:?}", BLE_TIMEOUT),
    }

    manager.disconnect().await.expect("disconnect failed");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_history_round_trip() {
    let manager = manager().await;
    let Some(id) = target(&manager).await else {
        println!("No dispenser found, skipping");
        return;
    };
    let handle = manager.connect(&id).await.expect("connect failed");

    for granularity in Granularity::ALL {
        let report = request_history(&handle, granularity, &HistoryOptions::default()).await;
        println!(
            "{}: {} buckets, total {}, peak {}, error {:?}",
            granularity,
            report.series.len(),
            report.stats.total,
            report.stats.peak,
            report.error
        );
        assert!(report.series.len() <= granularity.bucket_capacity());
    }

    manager.disconnect().await.expect("disconnect failed");
}
