//! Trait abstractions for the dispenser transport.
//!
//! [`DeviceChannel`] is the communication channel to one connected device and
//! [`Radio`] is the scanning and connecting side of the adapter. Both are
//! implemented by the btleplug-backed types and by the mocks in
//! [`crate::mock`], so the connection manager, telemetry monitor and history
//! aggregator can be exercised without hardware.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dispenser_types::CharacteristicAddress;

use crate::error::Result;
use crate::subscription::Subscription;

/// Communication channel to a single connected device.
///
/// # Example
///
/// ```ignore
/// use dispenser_core::{DeviceChannel, Result};
/// use dispenser_types::{codec, uuids::COMMAND_SINK};
///
/// async fn pump_on(channel: &dyn DeviceChannel) -> Result<()> {
///     channel.write(COMMAND_SINK, codec::encode_command("PUMP_ON")).await
/// }
/// ```
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    // --- Identity ---

    /// Stable identifier used to connect (address, or peripheral id on macOS).
    fn id(&self) -> &str;

    /// Advertised name, if any.
    fn name(&self) -> Option<&str>;

    // --- Connection ---

    /// Check if the link is up.
    async fn is_connected(&self) -> bool;

    /// Tear down the link and end every subscription opened on it.
    async fn disconnect(&self) -> Result<()>;

    // --- Attribute access ---

    /// Write a payload with response.
    async fn write(&self, address: CharacteristicAddress, payload: Bytes) -> Result<()>;

    /// Read a characteristic once.
    ///
    /// An empty value is reported as `Ok(None)`.
    async fn read_once(&self, address: CharacteristicAddress) -> Result<Option<Bytes>>;

    /// Subscribe to notifications on a characteristic.
    ///
    /// The returned subscription stops when `cancel` fires.
    async fn subscribe(
        &self,
        address: CharacteristicAddress,
        cancel: CancellationToken,
    ) -> Result<Subscription>;
}

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Connection identifier.
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// RSSI signal strength.
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Name if advertised, otherwise the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Scanning and connecting side of the Bluetooth adapter.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Start scanning. Every advertisement is delivered on the returned
    /// channel, unfiltered and possibly repeated, until [`Radio::stop_scan`].
    async fn start_scan(&self) -> Result<mpsc::Receiver<DiscoveredDevice>>;

    /// Stop a running scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a device and discover its attributes.
    async fn connect(&self, id: &str) -> Result<Arc<dyn DeviceChannel>>;
}
