//! Device discovery and the btleplug-backed [`Radio`].
//!
//! Scanning is event driven: advertisements are forwarded as they arrive
//! and filtering by name prefix and de-duplication happen in the
//! [`crate::ConnectionManager`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use dispenser_types::uuids::DEVICE_NAME_PREFIX;

use crate::device::{ConnectionConfig, Device};
use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::traits::{DeviceChannel, DiscoveredDevice, Radio};
use crate::util::{create_identifier, format_peripheral_id};

/// Default length of a scan window.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer size for forwarded advertisements.
const ADVERTISEMENT_BUFFER: usize = 64;

/// Poll interval while waiting for a specific device to advertise.
const FIND_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Options for scanning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long a scan window stays open.
    pub duration: Duration,
    /// Only devices whose advertised name starts with this prefix are kept.
    pub name_prefix: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: DEFAULT_SCAN_TIMEOUT,
            name_prefix: DEVICE_NAME_PREFIX.to_string(),
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set scan duration in seconds.
    #[must_use]
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration = Duration::from_secs(secs);
        self
    }

    /// Set the name prefix filter.
    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Whether a discovered device passes the name filter.
    ///
    /// Devices without an advertised name never match.
    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        device
            .name
            .as_deref()
            .is_some_and(|name| name.starts_with(&self.name_prefix))
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Channels this radio has connected, keyed by peripheral.
///
/// Connecting again to a peripheral whose channel is still alive and linked
/// returns that channel. Two [`Device`]s on one peripheral would tear each
/// other's link down when either is dropped.
struct LiveLinks<K> {
    links: Mutex<HashMap<K, Weak<dyn DeviceChannel>>>,
}

impl<K: Eq + Hash> LiveLinks<K> {
    fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
        }
    }

    /// The live channel for `key`, if it is still connected.
    async fn get(&self, key: &K) -> Option<Arc<dyn DeviceChannel>> {
        let mut links = self.links.lock().await;
        links.retain(|_, link| link.strong_count() > 0);

        let channel = links.get(key)?.upgrade()?;
        if channel.is_connected().await {
            Some(channel)
        } else {
            links.remove(key);
            None
        }
    }

    async fn insert(&self, key: K, channel: &Arc<dyn DeviceChannel>) {
        self.links.lock().await.insert(key, Arc::downgrade(channel));
    }
}

/// [`Radio`] backed by a btleplug adapter.
pub struct BleRadio {
    adapter: Adapter,
    config: ConnectionConfig,
    find_timeout: Duration,
    scan_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    links: LiveLinks<PeripheralId>,
}

impl std::fmt::Debug for BleRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleRadio")
            .field("config", &self.config)
            .field("find_timeout", &self.find_timeout)
            .finish_non_exhaustive()
    }
}

impl BleRadio {
    /// Use the first available adapter.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            config: ConnectionConfig::default(),
            find_timeout: DEFAULT_SCAN_TIMEOUT,
            scan_task: Mutex::new(None),
            links: LiveLinks::new(),
        }
    }

    /// Set the connection timeouts used for new devices.
    #[must_use]
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// How long `connect` scans for a device it has not seen yet.
    #[must_use]
    pub fn find_timeout(mut self, timeout: Duration) -> Self {
        self.find_timeout = timeout;
        self
    }

    /// Find a peripheral, scanning for it if the adapter has not seen it.
    async fn find_peripheral(&self, identifier: &str) -> Result<Peripheral> {
        let identifier_lower = identifier.to_lowercase();

        if let Some(peripheral) =
            find_peripheral_by_identifier(&self.adapter, &identifier_lower).await?
        {
            debug!("Found device in cache (no scan needed)");
            return Ok(peripheral);
        }

        info!("Scanning for {} (up to {:?})", identifier, self.find_timeout);
        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = Instant::now() + self.find_timeout;
        let found = loop {
            if let Some(peripheral) =
                find_peripheral_by_identifier(&self.adapter, &identifier_lower).await?
            {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(FIND_POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        found.ok_or_else(|| {
            warn!("Device not found: {}", identifier);
            Error::device_not_found(identifier)
        })
    }
}

#[async_trait]
impl Radio for BleRadio {
    async fn start_scan(&self) -> Result<mpsc::Receiver<DiscoveredDevice>> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("BLE scan started");

        let (tx, rx) = mpsc::channel(ADVERTISEMENT_BUFFER);
        let adapter = self.adapter.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };

                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };

                match process_peripheral(&peripheral).await {
                    Ok(Some(device)) => {
                        if tx.send(device).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Error processing peripheral: {}", e),
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().await.replace(handle) {
            previous.abort();
        }

        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(handle) = self.scan_task.lock().await.take() {
            handle.abort();
        }
        self.adapter.stop_scan().await?;
        info!("BLE scan stopped");
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn connect(&self, id: &str) -> Result<Arc<dyn DeviceChannel>> {
        let peripheral = self.find_peripheral(id).await?;
        let key = peripheral.id();
        if let Some(channel) = self.links.get(&key).await {
            debug!("Reusing live connection to {}", channel.id());
            return Ok(channel);
        }

        let device =
            Device::from_peripheral_with_config(self.adapter.clone(), peripheral, self.config.clone())
                .await?;
        let channel = Arc::new(device) as Arc<dyn DeviceChannel>;
        self.links.insert(key, &channel).await;
        Ok(channel)
    }
}

/// Turn a peripheral into a discovery record.
async fn process_peripheral(peripheral: &Peripheral) -> Result<Option<DiscoveredDevice>> {
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    let id = create_identifier(&properties.address.to_string(), &peripheral.id());

    Ok(Some(DiscoveredDevice {
        id,
        name: properties.local_name,
        rssi: properties.rssi,
    }))
}

/// Search through known peripherals to find one matching the identifier.
async fn find_peripheral_by_identifier(
    adapter: &Adapter,
    identifier_lower: &str,
) -> Result<Option<Peripheral>> {
    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        if let Ok(Some(props)) = peripheral.properties().await {
            let address = props.address.to_string().to_lowercase();
            let peripheral_id = format_peripheral_id(&peripheral.id()).to_lowercase();

            // macOS exposes UUIDs instead of addresses
            if peripheral_id == identifier_lower {
                debug!("Matched by peripheral ID: {}", peripheral_id);
                return Ok(Some(peripheral));
            }

            if address != "00:00:00:00:00:00"
                && (address == identifier_lower
                    || address.replace(':', "") == identifier_lower.replace(':', ""))
            {
                debug!("Matched by address: {}", address);
                return Ok(Some(peripheral));
            }

            if let Some(name) = &props.local_name
                && name.to_lowercase() == identifier_lower
            {
                debug!("Matched by name: {}", name);
                return Ok(Some(peripheral));
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn discovered(name: Option<&str>) -> DiscoveredDevice {
        DiscoveredDevice {
            id: "AA:BB:CC:DD:EE:FF".to_string(),
            name: name.map(str::to_string),
            rssi: Some(-60),
        }
    }

    #[test]
    fn test_scan_options_defaults() {
        let options = ScanOptions::default();
        assert_eq!(options.duration, Duration::from_secs(10));
        assert_eq!(options.name_prefix, "ESP32_");
    }

    #[test]
    fn test_scan_options_builder() {
        let options = ScanOptions::new().duration_secs(3).name_prefix("TEST_");
        assert_eq!(options.duration, Duration::from_secs(3));
        assert_eq!(options.name_prefix, "TEST_");
    }

    #[test]
    fn test_prefix_filter() {
        let options = ScanOptions::default();
        assert!(options.matches(&discovered(Some("ESP32_Kitchen"))));
        assert!(!options.matches(&discovered(Some("esp32_kitchen"))));
        assert!(!options.matches(&discovered(Some("Headphones"))));
        assert!(!options.matches(&discovered(None)));
    }

    #[tokio::test]
    async fn test_live_links_reuse_connected_channel() {
        let links = LiveLinks::new();
        let channel: Arc<dyn DeviceChannel> = Arc::new(MockDevice::new("ESP32_Kitchen"));
        links.insert("AA", &channel).await;

        let reused = links.get(&"AA").await.unwrap();
        assert!(Arc::ptr_eq(&reused, &channel));
        assert!(links.get(&"BB").await.is_none());
    }

    #[tokio::test]
    async fn test_live_links_skip_disconnected_and_dropped() {
        let links = LiveLinks::new();
        let first: Arc<dyn DeviceChannel> = Arc::new(MockDevice::new("ESP32_Kitchen"));
        links.insert("AA", &first).await;
        first.disconnect().await.unwrap();
        assert!(links.get(&"AA").await.is_none());

        let second: Arc<dyn DeviceChannel> = Arc::new(MockDevice::new("ESP32_Kitchen"));
        links.insert("AA", &second).await;
        drop(second);
        assert!(links.get(&"AA").await.is_none());
        assert!(links.links.lock().await.is_empty());
    }
}
