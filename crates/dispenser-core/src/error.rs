//! Error types for dispenser-core.
//!
//! This module defines all error types that can occur when talking to the
//! dispenser over Bluetooth Low Energy.
//!
//! # Error Taxonomy
//!
//! | Error Type | Kind | Handled by |
//! |------------|------|------------|
//! | [`Error::NotConnected`] | No selected device | Monitor and aggregator fall back to defaults |
//! | [`Error::Bluetooth`] | Transport | Surfaced for user commands, tolerated for the history request |
//! | [`Error::Transport`] | Transport | Same as above |
//! | [`Error::WriteFailed`] | Transport | Same as above |
//! | [`Error::Timeout`] | Transport | Same as above |
//! | [`Error::ConnectionFailed`] | Connection | Manager returns to `Idle` |
//! | [`Error::DeviceNotFound`] | Connection | Manager returns to `Idle` |
//! | [`Error::CharacteristicNotFound`] | Firmware mismatch | Surfaced |
//! | [`Error::Decode`] | Payload | Monitor logs it, aggregator falls back |
//!
//! An empty characteristic value is not an error: reads return `Ok(None)`.
//!
//! There is no automatic retry. Every failure is reported once and left to
//! the caller.

use std::time::Duration;

use thiserror::Error;

use dispenser_types::ParseError;

/// Errors that can occur when communicating with the dispenser.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found during scan or connection.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while no device is selected or connected.
    #[error("Not connected to device")]
    NotConnected,

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] ParseError),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Connection failed.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// Description of the failure.
        reason: String,
    },

    /// Write operation failed.
    #[error("Write failed to characteristic {uuid}: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Transport-level failure not covered by a btleplug error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection manager is busy with another operation.
    #[error("Another operation is in progress: {operation}")]
    Busy {
        /// The operation in progress.
        operation: String,
    },
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified identifier not found.
    NotFound { identifier: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a connection failure.
    pub fn connection_failed(device_id: Option<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            device_id,
            reason: reason.into(),
        }
    }

    /// Create a busy error for the operation in progress.
    pub fn busy(operation: impl Into<String>) -> Self {
        Self::Busy {
            operation: operation.into(),
        }
    }

    /// Create a write failure for a characteristic.
    pub fn write_failed(uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            uuid: uuid.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is a transport-level failure (as opposed to a missing
    /// connection or a bad payload).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Bluetooth(_)
                | Error::Transport(_)
                | Error::WriteFailed { .. }
                | Error::Timeout { .. }
                | Error::CharacteristicNotFound { .. }
        )
    }
}

/// Result type alias using dispenser-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
