//! History request round trip.
//!
//! The dispenser keeps its history as a comma separated list of hourly
//! samples, oldest first. Fetching it is a request/response exchange:
//!
//! 1. `GET_HISTORY_DATA` is written to the command characteristic.
//! 2. The device gets a fixed settle delay to fill the history buffer.
//! 3. The history characteristic is read once and parsed.
//!
//! [`request_history`] never fails: whatever goes wrong, the caller gets a
//! complete [`HistoryReport`], either fully aggregated or the empty fallback
//! with a single error message. [`fetch_samples`] is the strict variant.

use std::time::Duration;

use serde::Serialize;
use time::{Date, OffsetDateTime};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use dispenser_types::codec::{decode_payload, parse_sample_list};
use dispenser_types::uuids::HISTORY_BUFFER;
use dispenser_types::{BucketSeries, Command, Granularity, SummaryStats};

use crate::aggregate::{aggregate, summarize};
use crate::error::{Error, Result};
use crate::handle::DeviceHandle;

/// Default wait between the request and the read.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Options for history requests.
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    /// How long the device gets to prepare the history buffer.
    /// Default: 500 ms.
    pub settle_delay: Duration,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl HistoryOptions {
    /// Create new history options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the settle delay.
    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Result of a history request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryReport {
    /// Requested granularity.
    pub granularity: Granularity,
    /// Buckets, oldest first.
    pub series: BucketSeries,
    /// Stats over `series`.
    pub stats: SummaryStats,
    /// User-facing message when the request failed.
    pub error: Option<String>,
}

impl HistoryReport {
    /// Aggregate samples into a report.
    pub fn from_samples(samples: &[f64], granularity: Granularity, today: Date) -> Self {
        let series = aggregate(samples, granularity);
        let stats = summarize(&series, today);
        Self {
            granularity,
            series,
            stats,
            error: None,
        }
    }

    /// Empty series and zeroed stats, optionally with an error message.
    pub fn empty(granularity: Granularity, error: Option<String>) -> Self {
        Self {
            granularity,
            series: BucketSeries::empty(granularity),
            stats: SummaryStats::default(),
            error,
        }
    }

    /// Whether the request failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Request history and read back the raw samples, oldest first.
///
/// Returns `Ok(None)` when the device has no history value. A failed
/// request write is logged and ignored, the read decides the outcome.
#[tracing::instrument(level = "debug", skip_all, fields(device = %handle.label()))]
pub async fn fetch_samples(
    handle: &DeviceHandle,
    options: &HistoryOptions,
) -> Result<Option<Vec<f64>>> {
    if !handle.is_active() {
        return Err(Error::NotConnected);
    }

    match handle.send(&Command::GetHistoryData).await {
        Ok(()) => debug!("History requested"),
        Err(Error::NotConnected) => return Err(Error::NotConnected),
        Err(e) => warn!("History request write failed, reading anyway: {}", e),
    }

    sleep(options.settle_delay).await;

    let Some(payload) = handle.channel().read_once(HISTORY_BUFFER).await? else {
        info!("No history available");
        return Ok(None);
    };

    // The read may have raced a disconnect
    if !handle.is_active() {
        return Err(Error::NotConnected);
    }

    let text = decode_payload(&payload)?;
    let samples = parse_sample_list(&text);
    debug!("Received {} history samples", samples.len());
    Ok(Some(samples))
}

/// Fetch history and aggregate it for `granularity`.
///
/// Never fails; see the module documentation.
pub async fn request_history(
    handle: &DeviceHandle,
    granularity: Granularity,
    options: &HistoryOptions,
) -> HistoryReport {
    match fetch_samples(handle, options).await {
        Ok(Some(samples)) => HistoryReport::from_samples(&samples, granularity, today()),
        Ok(None) => HistoryReport::empty(granularity, None),
        Err(e) => {
            warn!("History request failed: {}", e);
            HistoryReport::empty(granularity, Some(user_message(&e)))
        }
    }
}

fn user_message(error: &Error) -> String {
    match error {
        Error::NotConnected => "Not connected to a dispenser".to_string(),
        Error::Decode(e) => format!("History data could not be read: {e}"),
        other => format!("Failed to load history: {other}"),
    }
}

fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}
