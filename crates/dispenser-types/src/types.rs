//! Core types for the water dispenser client.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::error::{ParseError, ParseResult};
use crate::uuid::{COMMAND_SINK, CharacteristicAddress, MAX_LEVEL, MIN_LEVEL};

/// Operating mode reported by the dispenser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceMode {
    /// Firmware controls the pump from the level thresholds.
    Auto,
    /// Pump is only driven by explicit commands.
    Manual,
}

impl DeviceMode {
    /// Interpret the mode characteristic's text.
    ///
    /// Only the exact token `AUTO` (surrounding whitespace ignored) means
    /// automatic; anything else is treated as manual.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        if token.trim() == "AUTO" {
            DeviceMode::Auto
        } else {
            DeviceMode::Manual
        }
    }

    /// Wire token for this mode.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            DeviceMode::Auto => "AUTO",
            DeviceMode::Manual => "MANUAL",
        }
    }

    /// The other mode.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            DeviceMode::Auto => DeviceMode::Manual,
            DeviceMode::Manual => DeviceMode::Auto,
        }
    }

    /// Command that switches the device into this mode.
    #[must_use]
    pub fn command(self) -> Command {
        match self {
            DeviceMode::Auto => Command::Auto,
            DeviceMode::Manual => Command::Manual,
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Auto => write!(f, "Auto"),
            DeviceMode::Manual => write!(f, "Manual"),
        }
    }
}

/// A plain-text command understood by the dispenser firmware.
///
/// `Display` produces the exact wire text; `FromStr` parses it back.
///
/// ```
/// use dispenser_types::Command;
///
/// assert_eq!(Command::SetMaxLevel(80).to_string(), "SET_MAX_LEVEL:80");
/// assert_eq!("PUMP_ON".parse::<Command>().unwrap(), Command::PumpOn);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum Command {
    /// Start the pump.
    PumpOn,
    /// Stop the pump.
    PumpOff,
    /// Set the maximum water level threshold.
    SetMaxLevel(u32),
    /// Set the minimum water level threshold.
    SetMinLevel(u32),
    /// Ask the firmware to publish its history buffer.
    GetHistoryData,
    /// Switch to automatic mode.
    Auto,
    /// Switch to manual mode.
    Manual,
}

impl Command {
    /// Characteristic this command is written to.
    ///
    /// Threshold commands go to their dedicated characteristics, everything
    /// else to the command sink.
    #[must_use]
    pub fn address(&self) -> CharacteristicAddress {
        match self {
            Command::SetMaxLevel(_) => MAX_LEVEL,
            Command::SetMinLevel(_) => MIN_LEVEL,
            _ => COMMAND_SINK,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::PumpOn => write!(f, "PUMP_ON"),
            Command::PumpOff => write!(f, "PUMP_OFF"),
            Command::SetMaxLevel(n) => write!(f, "SET_MAX_LEVEL:{n}"),
            Command::SetMinLevel(n) => write!(f, "SET_MIN_LEVEL:{n}"),
            Command::GetHistoryData => write!(f, "GET_HISTORY_DATA"),
            Command::Auto => write!(f, "AUTO"),
            Command::Manual => write!(f, "MANUAL"),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let s = s.trim();
        let level = |arg: &str| {
            arg.trim()
                .parse::<u32>()
                .map_err(|_| ParseError::InvalidValue(format!("level must be an integer: {arg}")))
        };

        match s {
            "PUMP_ON" => Ok(Command::PumpOn),
            "PUMP_OFF" => Ok(Command::PumpOff),
            "GET_HISTORY_DATA" => Ok(Command::GetHistoryData),
            "AUTO" => Ok(Command::Auto),
            "MANUAL" => Ok(Command::Manual),
            _ => {
                if let Some(arg) = s.strip_prefix("SET_MAX_LEVEL:") {
                    level(arg).map(Command::SetMaxLevel)
                } else if let Some(arg) = s.strip_prefix("SET_MIN_LEVEL:") {
                    level(arg).map(Command::SetMinLevel)
                } else {
                    Err(ParseError::UnknownCommand(s.to_string()))
                }
            }
        }
    }
}

/// Time resolution of a history view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Granularity {
    /// One bucket per hour over the last day.
    #[default]
    Daily,
    /// One bucket per day over the last week.
    Weekly,
    /// One bucket per week over the last month.
    Monthly,
}

impl Granularity {
    /// All granularities, finest first.
    pub const ALL: [Granularity; 3] = [Granularity::Daily, Granularity::Weekly, Granularity::Monthly];

    /// Number of raw (hourly) samples considered for this granularity.
    #[must_use]
    pub const fn sample_count(self) -> usize {
        match self {
            Granularity::Daily => 24,
            Granularity::Weekly => 168,
            Granularity::Monthly => 720,
        }
    }

    /// Raw samples per bucket.
    #[must_use]
    pub const fn window(self) -> usize {
        match self {
            Granularity::Daily => 1,
            Granularity::Weekly => 24,
            Granularity::Monthly => 168,
        }
    }

    /// Maximum number of buckets a series can hold.
    #[must_use]
    pub const fn bucket_capacity(self) -> usize {
        self.sample_count().div_ceil(self.window())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Daily => write!(f, "daily"),
            Granularity::Weekly => write!(f, "weekly"),
            Granularity::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for Granularity {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" | "d" => Ok(Granularity::Daily),
            "weekly" | "week" | "w" => Ok(Granularity::Weekly),
            "monthly" | "month" | "m" => Ok(Granularity::Monthly),
            other => Err(ParseError::InvalidValue(format!(
                "unknown granularity '{other}' (expected daily, weekly or monthly)"
            ))),
        }
    }
}

/// One labelled bucket of a history series.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bucket {
    /// Display label, possibly empty for sparse axes.
    pub label: String,
    /// Bucket value rounded to one decimal.
    pub value: f64,
}

impl Bucket {
    /// Create a bucket.
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Buckets ordered oldest to newest.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BucketSeries {
    /// Granularity the series was built for.
    pub granularity: Granularity,
    /// The buckets, oldest first.
    pub buckets: Vec<Bucket>,
}

impl BucketSeries {
    /// An empty series for the given granularity.
    #[must_use]
    pub fn empty(granularity: Granularity) -> Self {
        Self {
            granularity,
            buckets: Vec::new(),
        }
    }

    /// Number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the series has no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Bucket labels in order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.label.as_str())
    }

    /// Bucket values in order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.buckets.iter().map(|b| b.value)
    }
}

/// Totals computed over a bucket series.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SummaryStats {
    /// Sum of bucket values, one decimal.
    pub total: f64,
    /// Mean bucket value, one decimal.
    pub average: f64,
    /// Largest bucket value, one decimal.
    pub peak: f64,
    /// Date the stats were computed, `None` for the empty fallback.
    pub generated_at: Option<Date>,
}

impl SummaryStats {
    /// Whether these are the empty fallback stats.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generated_at.is_none()
    }
}

/// Connection manager lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// A scan window is open.
    Scanning,
    /// Connect and service discovery in progress.
    Connecting,
    /// A device is selected and connected.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Link status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LinkStatus {
    /// A device is connected.
    Online,
    /// No device is connected.
    #[default]
    Offline,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Online => write!(f, "Online"),
            LinkStatus::Offline => write!(f, "Offline"),
        }
    }
}

/// Label shown when no device is selected.
pub const NOT_CONNECTED_LABEL: &str = "Not connected";

/// Latest telemetry as seen by the client.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TelemetrySnapshot {
    /// Online while attached to a device.
    pub status: LinkStatus,
    /// Device name or identifier, or [`NOT_CONNECTED_LABEL`].
    pub device: String,
    /// Most recent decoded sensor notification.
    pub latest: Option<String>,
    /// Wall-clock time the latest value arrived.
    pub last_updated: Option<OffsetDateTime>,
    /// Mode read at attach time, updated by toggles.
    pub mode: Option<DeviceMode>,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            status: LinkStatus::Offline,
            device: NOT_CONNECTED_LABEL.to_string(),
            latest: None,
            last_updated: None,
            mode: None,
        }
    }
}

impl TelemetrySnapshot {
    /// Snapshot for a freshly attached device, before any notification.
    pub fn online(device: impl Into<String>, mode: DeviceMode) -> Self {
        Self {
            status: LinkStatus::Online,
            device: device.into(),
            latest: None,
            last_updated: None,
            mode: Some(mode),
        }
    }

    /// Latest value for display, `N/A` when nothing has arrived.
    #[must_use]
    pub fn latest_display(&self) -> &str {
        self.latest.as_deref().unwrap_or("N/A")
    }
}
