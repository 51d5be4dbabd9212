//! Dispenser connection and attribute access over btleplug.
//!
//! [`Device`] is the [`DeviceChannel`] implementation backed by a real
//! Bluetooth peripheral.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dispenser_types::CharacteristicAddress;

use crate::error::{Error, Result};
use crate::subscription::{Subscription, track_token};
use crate::traits::DeviceChannel;
use crate::util::{create_identifier, format_peripheral_id};

/// A connected dispenser.
///
/// A `Device` represents an active BLE connection with its discovered
/// attributes. It is shared as `Arc<dyn DeviceChannel>` through a
/// [`crate::DeviceHandle`] and is not `Clone`.
///
/// # Cleanup
///
/// Call [`DeviceChannel::disconnect`] before dropping the device. Dropping a
/// still-connected device logs a warning and spawns a best-effort disconnect.
pub struct Device {
    /// Kept alive for the lifetime of the peripheral connection.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    name: Option<String>,
    /// MAC address on Linux/Windows, peripheral UUID on macOS.
    identifier: String,
    /// Characteristics by (service, characteristic) UUID.
    characteristics: HashMap<(Uuid, Uuid), Characteristic>,
    service_count: usize,
    /// Tokens of every subscription opened on this device.
    subscriptions: Mutex<Vec<CancellationToken>>,
    disconnected: AtomicBool,
    config: ConnectionConfig,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("identifier", &self.identifier)
            .field("characteristics", &self.characteristics.len())
            .finish_non_exhaustive()
    }
}

/// Default timeout for BLE characteristic read operations.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for BLE connection timeouts.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use dispenser_core::device::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .read_timeout(Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for BLE read operations.
    pub read_timeout: Duration,
    /// Timeout for BLE write operations.
    pub write_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

impl Device {
    /// Connect to an already-discovered peripheral and discover its services.
    #[tracing::instrument(level = "info", skip_all, fields(connect_timeout = ?config.connection_timeout))]
    pub async fn from_peripheral_with_config(
        adapter: Adapter,
        peripheral: Peripheral,
        config: ConnectionConfig,
    ) -> Result<Self> {
        info!("Connecting to device...");
        timeout(config.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to device", config.connection_timeout))??;
        info!("Connected!");

        info!("Discovering services...");
        timeout(config.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", config.discovery_timeout))??;

        let services = peripheral.services();
        debug!("Found {} services", services.len());

        let mut characteristics = HashMap::new();
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for char in &service.characteristics {
                debug!("    Characteristic: {}", char.uuid);
                characteristics.insert((service.uuid, char.uuid), char.clone());
            }
        }

        let properties = peripheral.properties().await?;
        let name = properties.as_ref().and_then(|p| p.local_name.clone());
        let identifier = properties
            .as_ref()
            .map(|p| create_identifier(&p.address.to_string(), &peripheral.id()))
            .unwrap_or_else(|| format_peripheral_id(&peripheral.id()));

        Ok(Self {
            adapter,
            peripheral,
            name,
            identifier,
            characteristics,
            service_count: services.len(),
            subscriptions: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
            config,
        })
    }

    /// Connection configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of characteristics discovered on the device.
    pub fn characteristic_count(&self) -> usize {
        self.characteristics.len()
    }

    fn find_characteristic(&self, address: CharacteristicAddress) -> Result<&Characteristic> {
        self.characteristics
            .get(&(address.service, address.characteristic))
            .ok_or_else(|| {
                Error::characteristic_not_found(
                    address.characteristic.to_string(),
                    self.service_count,
                )
            })
    }
}

#[async_trait]
impl DeviceChannel for Device {
    fn id(&self) -> &str {
        &self.identifier
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    #[tracing::instrument(level = "info", skip(self), fields(device = %self.identifier))]
    async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from device...");
        self.disconnected.store(true, Ordering::SeqCst);

        for token in self.subscriptions.lock().await.drain(..) {
            token.cancel();
        }

        self.peripheral.disconnect().await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, payload), fields(characteristic = address.label(), len = payload.len()))]
    async fn write(&self, address: CharacteristicAddress, payload: Bytes) -> Result<()> {
        let characteristic = self.find_characteristic(address)?;
        timeout(
            self.config.write_timeout,
            self.peripheral
                .write(characteristic, &payload, WriteType::WithResponse),
        )
        .await
        .map_err(|_| {
            Error::timeout(
                format!("write characteristic {}", address.characteristic),
                self.config.write_timeout,
            )
        })?
        .map_err(|e| Error::write_failed(address.characteristic.to_string(), e.to_string()))
    }

    #[tracing::instrument(level = "debug", skip(self), fields(characteristic = address.label()))]
    async fn read_once(&self, address: CharacteristicAddress) -> Result<Option<Bytes>> {
        let characteristic = self.find_characteristic(address)?;
        let data = timeout(self.config.read_timeout, self.peripheral.read(characteristic))
            .await
            .map_err(|_| {
                Error::timeout(
                    format!("read characteristic {}", address.characteristic),
                    self.config.read_timeout,
                )
            })??;

        if data.is_empty() {
            debug!("Characteristic value is empty");
            Ok(None)
        } else {
            Ok(Some(Bytes::from(data)))
        }
    }

    async fn subscribe(
        &self,
        address: CharacteristicAddress,
        cancel: CancellationToken,
    ) -> Result<Subscription> {
        let characteristic = self.find_characteristic(address)?.clone();

        self.peripheral.subscribe(&characteristic).await?;
        let notifications = self.peripheral.notifications().await?;

        let char_uuid = characteristic.uuid;
        let source = notifications
            .filter(move |n| futures::future::ready(n.uuid == char_uuid))
            .map(|n| Ok::<_, Error>(Bytes::from(n.value)));

        track_token(&mut *self.subscriptions.lock().await, cancel.clone());
        debug!(characteristic = address.label(), "Subscribed to notifications");

        Ok(Subscription::spawn(address, source, cancel))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            warn!(
                device_name = ?self.name,
                device = %self.identifier,
                "Device dropped without calling disconnect() - performing best-effort cleanup"
            );

            if let Ok(subscriptions) = self.subscriptions.try_lock() {
                for token in subscriptions.iter() {
                    token.cancel();
                }
            }

            let peripheral = self.peripheral.clone();
            let identifier = self.identifier.clone();

            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = peripheral.disconnect().await {
                        debug!(
                            device = %identifier,
                            error = %e,
                            "Best-effort disconnect failed (device may already be disconnected)"
                        );
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connection_timeout, Duration::from_secs(15));
        assert_eq!(config.discovery_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new()
            .connection_timeout(Duration::from_secs(20))
            .read_timeout(Duration::from_secs(3))
            .write_timeout(Duration::from_secs(4))
            .discovery_timeout(Duration::from_secs(5));
        assert_eq!(config.connection_timeout, Duration::from_secs(20));
        assert_eq!(config.read_timeout, Duration::from_secs(3));
        assert_eq!(config.write_timeout, Duration::from_secs(4));
        assert_eq!(config.discovery_timeout, Duration::from_secs(5));
    }
}
