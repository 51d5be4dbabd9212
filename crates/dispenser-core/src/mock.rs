//! Mock transport for testing.
//!
//! This module provides a [`MockDevice`] implementing [`DeviceChannel`] and a
//! [`MockRadio`] implementing [`Radio`], so the connection manager, the
//! telemetry monitor and the history aggregator can be tested without BLE
//! hardware.
//!
//! # Features
//!
//! - **Characteristic values**: preset what `read_once` returns
//! - **Notifications**: push sensor values or delivery errors to subscribers
//! - **Write log**: inspect every payload written
//! - **Failure injection**: fail reads, writes or connects
//! - **Latency simulation**: delay reads to exercise timeouts

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use dispenser_types::CharacteristicAddress;

use crate::error::{Error, Result};
use crate::subscription::{Subscription, track_token};
use crate::traits::{DeviceChannel, DiscoveredDevice, Radio};

/// Notification pushed by a test.
#[derive(Debug, Clone)]
enum MockNotification {
    Value(Bytes),
    Failure(String),
}

/// A mock dispenser for testing.
///
/// # Example
///
/// ```
/// use dispenser_core::{DeviceChannel, MockDevice};
/// use dispenser_types::uuids::MODE;
///
/// #[tokio::main]
/// async fn main() {
///     let device = MockDevice::new("ESP32_Test");
///     device.set_value(MODE, "AUTO").await;
///
///     let value = device.read_once(MODE).await.unwrap();
///     assert_eq!(value.as_deref(), Some(&b"AUTO"[..]));
/// }
/// ```
pub struct MockDevice {
    id: String,
    name: Option<String>,
    connected: AtomicBool,
    values: RwLock<HashMap<CharacteristicAddress, Bytes>>,
    writes: RwLock<Vec<(CharacteristicAddress, Bytes)>>,
    notifications: broadcast::Sender<(CharacteristicAddress, MockNotification)>,
    subscriptions: Mutex<Vec<CancellationToken>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_message: RwLock<String>,
    /// Simulated read latency in milliseconds (0 = no delay).
    read_latency_ms: AtomicU64,
    read_count: AtomicU32,
    disconnect_count: AtomicU32,
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockDevice {
    /// Create a connected mock device with a random identifier.
    pub fn new(name: &str) -> Self {
        MockDeviceBuilder::new().name(Some(name)).build()
    }

    /// Start building a mock device.
    pub fn builder() -> MockDeviceBuilder {
        MockDeviceBuilder::new()
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    // --- Test control methods ---

    /// Set the value returned by `read_once` for a characteristic.
    pub async fn set_value(&self, address: CharacteristicAddress, text: &str) {
        self.set_raw_value(address, Bytes::copy_from_slice(text.as_bytes()))
            .await;
    }

    /// Set a raw value returned by `read_once`.
    pub async fn set_raw_value(&self, address: CharacteristicAddress, value: Bytes) {
        self.values.write().await.insert(address, value);
    }

    /// Remove the value of a characteristic, so reads return `None`.
    pub async fn clear_value(&self, address: CharacteristicAddress) {
        self.values.write().await.remove(&address);
    }

    /// Push a text notification to subscribers of `address`.
    ///
    /// Returns the number of live subscriptions that will see it.
    pub fn notify(&self, address: CharacteristicAddress, text: &str) -> usize {
        self.notify_raw(address, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Push a raw notification payload.
    pub fn notify_raw(&self, address: CharacteristicAddress, payload: Bytes) -> usize {
        self.notifications
            .send((address, MockNotification::Value(payload)))
            .unwrap_or(0)
    }

    /// Push a delivery error to subscribers of `address`.
    pub fn notify_error(&self, address: CharacteristicAddress, message: &str) -> usize {
        self.notifications
            .send((address, MockNotification::Failure(message.to_string())))
            .unwrap_or(0)
    }

    /// Every write so far, oldest first.
    pub async fn writes(&self) -> Vec<(CharacteristicAddress, Bytes)> {
        self.writes.read().await.clone()
    }

    /// Written payloads decoded as text, oldest first.
    pub async fn written_text(&self) -> Vec<String> {
        self.writes
            .read()
            .await
            .iter()
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    /// Forget recorded writes.
    pub async fn clear_writes(&self) {
        self.writes.write().await.clear();
    }

    /// Make every read fail (or succeed again).
    pub async fn set_read_failure(&self, fail: bool, message: Option<&str>) {
        self.fail_reads.store(fail, Ordering::Relaxed);
        if let Some(msg) = message {
            *self.fail_message.write().await = msg.to_string();
        }
    }

    /// Make every write fail (or succeed again).
    pub async fn set_write_failure(&self, fail: bool, message: Option<&str>) {
        self.fail_writes.store(fail, Ordering::Relaxed);
        if let Some(msg) = message {
            *self.fail_message.write().await = msg.to_string();
        }
    }

    /// Set simulated read latency.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Force the link state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Synchronous connection check.
    pub fn is_connected_sync(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Number of `read_once` calls.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::Relaxed)
    }

    /// Number of live notification receivers.
    pub fn subscriber_count(&self) -> usize {
        self.notifications.receiver_count()
    }
}

#[async_trait]
impl DeviceChannel for MockDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn is_connected(&self) -> bool {
        self.is_connected_sync()
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        self.disconnect_count.fetch_add(1, Ordering::Relaxed);
        for token in self.subscriptions.lock().await.drain(..) {
            token.cancel();
        }
        Ok(())
    }

    async fn write(&self, address: CharacteristicAddress, payload: Bytes) -> Result<()> {
        self.check_connected()?;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::write_failed(
                address.characteristic.to_string(),
                self.fail_message.read().await.clone(),
            ));
        }
        self.writes.write().await.push((address, payload));
        Ok(())
    }

    async fn read_once(&self, address: CharacteristicAddress) -> Result<Option<Bytes>> {
        self.check_connected()?;
        self.read_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.read_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::Transport(self.fail_message.read().await.clone()));
        }

        Ok(self
            .values
            .read()
            .await
            .get(&address)
            .filter(|v| !v.is_empty())
            .cloned())
    }

    async fn subscribe(
        &self,
        address: CharacteristicAddress,
        cancel: CancellationToken,
    ) -> Result<Subscription> {
        self.check_connected()?;

        let rx = self.notifications.subscribe();
        let source = futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok((addr, notification)) if addr == address => {
                        let item = match notification {
                            MockNotification::Value(payload) => Ok(payload),
                            MockNotification::Failure(msg) => Err(Error::Transport(msg)),
                        };
                        return Some((item, rx));
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        track_token(&mut *self.subscriptions.lock().await, cancel.clone());
        Ok(Subscription::spawn(address, source, cancel))
    }
}

/// Builder for [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockDeviceBuilder {
    id: Option<String>,
    name: Option<String>,
    connected: bool,
    values: HashMap<CharacteristicAddress, Bytes>,
}

impl Default for MockDeviceBuilder {
    fn default() -> Self {
        Self {
            id: None,
            name: Some("ESP32_Mock".to_string()),
            connected: true,
            values: HashMap::new(),
        }
    }
}

impl MockDeviceBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identifier.
    #[must_use]
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Set the advertised name.
    #[must_use]
    pub fn name(mut self, name: Option<&str>) -> Self {
        self.name = name.map(str::to_string);
        self
    }

    /// Set the initial link state.
    #[must_use]
    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Preset a characteristic value.
    #[must_use]
    pub fn value(mut self, address: CharacteristicAddress, text: &str) -> Self {
        self.values
            .insert(address, Bytes::copy_from_slice(text.as_bytes()));
        self
    }

    /// Build the mock device.
    pub fn build(self) -> MockDevice {
        let (notifications, _) = broadcast::channel(64);
        MockDevice {
            id: self
                .id
                .unwrap_or_else(|| format!("MOCK-{:06X}", rand::random::<u32>() % 0xFFFFFF)),
            name: self.name,
            connected: AtomicBool::new(self.connected),
            values: RwLock::new(self.values),
            writes: RwLock::new(Vec::new()),
            notifications,
            subscriptions: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_message: RwLock::new("Mock failure".to_string()),
            read_latency_ms: AtomicU64::new(0),
            read_count: AtomicU32::new(0),
            disconnect_count: AtomicU32::new(0),
        }
    }
}

/// A mock radio for testing the connection manager.
///
/// Registered devices are advertised as soon as a scan starts and can be
/// connected to by identifier.
#[derive(Default)]
pub struct MockRadio {
    devices: RwLock<Vec<Arc<MockDevice>>>,
    extra_advertisements: RwLock<Vec<DiscoveredDevice>>,
    scan_sender: Mutex<Option<mpsc::Sender<DiscoveredDevice>>>,
    fail_connect: AtomicBool,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    scan_starts: AtomicU32,
    scan_stops: AtomicU32,
}

impl std::fmt::Debug for MockRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRadio")
            .field("scan_starts", &self.scan_starts.load(Ordering::Relaxed))
            .field("scan_stops", &self.scan_stops.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockRadio {
    /// Create an empty mock radio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connectable device.
    pub async fn add_device(&self, device: Arc<MockDevice>) {
        self.devices.write().await.push(device);
    }

    /// Register an advertisement that cannot be connected to.
    pub async fn add_advertisement(&self, advertisement: DiscoveredDevice) {
        self.extra_advertisements.write().await.push(advertisement);
    }

    /// Deliver an advertisement to the running scan, if any.
    pub async fn advertise(&self, advertisement: DiscoveredDevice) -> bool {
        match self.scan_sender.lock().await.as_ref() {
            Some(tx) => tx.send(advertisement).await.is_ok(),
            None => false,
        }
    }

    /// Make connects fail (or succeed again).
    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Set simulated connect latency.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of scans started.
    pub fn scan_starts(&self) -> u32 {
        self.scan_starts.load(Ordering::Relaxed)
    }

    /// Number of scans stopped.
    pub fn scan_stops(&self) -> u32 {
        self.scan_stops.load(Ordering::Relaxed)
    }

    /// Whether a scan is running.
    pub async fn is_scanning(&self) -> bool {
        self.scan_sender.lock().await.is_some()
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn start_scan(&self) -> Result<mpsc::Receiver<DiscoveredDevice>> {
        self.scan_starts.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(64);

        for device in self.devices.read().await.iter() {
            let _ = tx.try_send(DiscoveredDevice {
                id: device.id().to_string(),
                name: device.name().map(str::to_string),
                rssi: Some(-55),
            });
        }
        for advertisement in self.extra_advertisements.read().await.iter() {
            let _ = tx.try_send(advertisement.clone());
        }

        *self.scan_sender.lock().await = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scan_stops.fetch_add(1, Ordering::Relaxed);
        self.scan_sender.lock().await.take();
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn DeviceChannel>> {
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(Error::connection_failed(
                Some(id.to_string()),
                "mock connect failure",
            ));
        }

        let device = self
            .devices
            .read()
            .await
            .iter()
            .find(|d| d.id() == id)
            .cloned()
            .ok_or_else(|| Error::device_not_found(id))?;

        device.set_connected(true);
        Ok(device as Arc<dyn DeviceChannel>)
    }
}
