//! Core BLE library for the smart water dispenser.
//!
//! This crate talks to a single ESP32-based water dispenser over Bluetooth
//! Low Energy and turns its raw sample history into bucketed summaries.
//!
//! # Features
//!
//! - **Discovery**: Scan for nearby dispensers within a bounded window
//! - **Connection management**: One selected device, with a session that
//!   ends every subscription when the device is released
//! - **Telemetry**: Follow the live sensor stream and the pump mode
//! - **History**: Request the sample history and aggregate it into daily,
//!   weekly or monthly buckets with summary statistics
//! - **Testing**: [`MockRadio`] and [`MockDevice`] stand in for real hardware
//!
//! # Platform Differences
//!
//! Device identifiers differ by platform: macOS exposes a CoreBluetooth UUID,
//! Linux and Windows expose the MAC address (`AA:BB:CC:DD:EE:FF`).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dispenser_core::{BleRadio, ConnectionManager, Granularity, HistoryOptions, request_history};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::new(Arc::new(BleRadio::new().await?));
//!
//!     manager.scan().await?;
//!     let found = manager.wait_for_scan().await;
//!     let Some(first) = found.first() else {
//!         return Ok(());
//!     };
//!
//!     let handle = manager.connect(&first.id).await?;
//!     let report = request_history(&handle, Granularity::Daily, &HistoryOptions::default()).await;
//!     println!("Total today: {}", report.stats.total);
//!
//!     manager.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod device;
pub mod error;
pub mod events;
pub mod handle;
pub mod history;
pub mod manager;
pub mod mock;
pub mod scan;
pub mod subscription;
pub mod telemetry;
pub mod traits;
pub mod util;

// Re-export the platform-agnostic crate so callers need only one dependency
pub use dispenser_types::{codec, types, uuids};
pub use dispenser_types::{
    Bucket, BucketSeries, CharacteristicAddress, Command, ConnectionState, DeviceMode,
    Granularity, LinkStatus, ParseError, SummaryStats, TelemetrySnapshot,
};

// Core exports
pub use aggregate::{aggregate, round1, summarize};
pub use device::{ConnectionConfig, Device};
pub use error::{DeviceNotFoundReason, Error, Result};
pub use events::{DeviceEvent, DeviceId, DisconnectReason, EventDispatcher, EventReceiver};
pub use handle::DeviceHandle;
pub use history::{HistoryOptions, HistoryReport, fetch_samples, request_history};
pub use manager::{ConnectionManager, ManagerConfig, Thresholds};
pub use mock::{MockDevice, MockDeviceBuilder, MockRadio};
pub use scan::{BleRadio, ScanOptions};
pub use subscription::{NotificationResult, Subscription};
pub use telemetry::TelemetryMonitor;
pub use traits::{DeviceChannel, DiscoveredDevice, Radio};
