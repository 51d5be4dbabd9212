//! Bluetooth UUIDs and attribute addresses for the dispenser firmware.
//!
//! The ESP32 firmware exposes everything under the standard Environmental
//! Sensing service. Characteristic numbers are fixed by the firmware and are
//! not discovered dynamically.

use core::fmt;

use uuid::{Uuid, uuid};

// --- Service UUIDs ---

/// Environmental Sensing service (0x181A).
pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid = uuid!("0000181a-0000-1000-8000-00805f9b34fb");

// --- Characteristic UUIDs ---

/// Live sensor stream (0x2A6E), notify.
pub const SENSOR_DATA: Uuid = uuid!("00002a6e-0000-1000-8000-00805f9b34fb");

/// Command sink (0x2A3D), write with response.
pub const COMMAND: Uuid = uuid!("00002a3d-0000-1000-8000-00805f9b34fb");

/// History buffer (0x2A3E), read after `GET_HISTORY_DATA`.
pub const HISTORY_DATA: Uuid = uuid!("00002a3e-0000-1000-8000-00805f9b34fb");

/// Maximum water level threshold (0x2A3F), read/write.
pub const MAX_THRESHOLD: Uuid = uuid!("00002a3f-0000-1000-8000-00805f9b34fb");

/// Minimum water level threshold (0x2A40), read/write.
pub const MIN_THRESHOLD: Uuid = uuid!("00002a40-0000-1000-8000-00805f9b34fb");

/// Operating mode state (0x2A41), read. Holds `AUTO` or `MANUAL`.
pub const MODE_STATE: Uuid = uuid!("00002a41-0000-1000-8000-00805f9b34fb");

/// Advertised name prefix of dispenser firmware builds.
pub const DEVICE_NAME_PREFIX: &str = "ESP32_";

/// A (service, characteristic) pair naming one attribute on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicAddress {
    /// Service the characteristic lives in.
    pub service: Uuid,
    /// The characteristic itself.
    pub characteristic: Uuid,
}

impl CharacteristicAddress {
    /// Build an address from a service and characteristic UUID.
    #[must_use]
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// Short human-readable name for logging.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self.characteristic {
            c if c == SENSOR_DATA => "sensor-stream",
            c if c == COMMAND => "command-sink",
            c if c == HISTORY_DATA => "history-buffer",
            c if c == MAX_THRESHOLD => "max-threshold",
            c if c == MIN_THRESHOLD => "min-threshold",
            c if c == MODE_STATE => "mode-state",
            _ => "unknown",
        }
    }
}

impl fmt::Display for CharacteristicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.label(), self.service, self.characteristic)
    }
}

/// Sensor notifications.
pub const SENSOR_STREAM: CharacteristicAddress =
    CharacteristicAddress::new(ENVIRONMENTAL_SENSING_SERVICE, SENSOR_DATA);

/// Plain-text command sink.
pub const COMMAND_SINK: CharacteristicAddress =
    CharacteristicAddress::new(ENVIRONMENTAL_SENSING_SERVICE, COMMAND);

/// Comma-separated history samples.
pub const HISTORY_BUFFER: CharacteristicAddress =
    CharacteristicAddress::new(ENVIRONMENTAL_SENSING_SERVICE, HISTORY_DATA);

/// Maximum level threshold.
pub const MAX_LEVEL: CharacteristicAddress =
    CharacteristicAddress::new(ENVIRONMENTAL_SENSING_SERVICE, MAX_THRESHOLD);

/// Minimum level threshold.
pub const MIN_LEVEL: CharacteristicAddress =
    CharacteristicAddress::new(ENVIRONMENTAL_SENSING_SERVICE, MIN_THRESHOLD);

/// Current operating mode.
pub const MODE: CharacteristicAddress =
    CharacteristicAddress::new(ENVIRONMENTAL_SENSING_SERVICE, MODE_STATE);
