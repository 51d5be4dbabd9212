//! Output formatting utilities for text and JSON output.

use std::path::Path;

use anyhow::Result;
use dispenser_core::{DiscoveredDevice, HistoryReport, TelemetrySnapshot, Thresholds};
use owo_colors::OwoColorize;
use serde::Serialize;
use time::macros::format_description;

use crate::cli::StyleMode;
use crate::config::Config;
use crate::style;

/// Formatting options for output.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
    /// Visual styling mode.
    pub style: StyleMode,
}

impl FormatOptions {
    pub fn new(no_color: bool, style: StyleMode) -> Self {
        // Plain mode automatically disables colors for pipe-friendliness
        Self {
            no_color: no_color || style == StyleMode::Plain,
            compact: false,
            style,
        }
    }

    /// Create with compact JSON option.
    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Check if plain styling is enabled (no decorations).
    pub fn is_plain(&self) -> bool {
        self.style == StyleMode::Plain
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }

    fn paint_name(&self, name: &str) -> String {
        if self.no_color {
            name.to_string()
        } else {
            format!("{}", name.cyan())
        }
    }
}

// ============================================================================
// Scan formatting
// ============================================================================

pub fn format_scan_json(devices: &[DiscoveredDevice], opts: &FormatOptions) -> Result<String> {
    #[derive(Serialize)]
    struct ScanResult<'a> {
        count: usize,
        devices: Vec<DeviceJson<'a>>,
    }

    #[derive(Serialize)]
    struct DeviceJson<'a> {
        name: Option<&'a str>,
        identifier: &'a str,
        rssi: Option<i16>,
    }

    let result = ScanResult {
        count: devices.len(),
        devices: devices
            .iter()
            .map(|d| DeviceJson {
                name: d.name.as_deref(),
                identifier: &d.id,
                rssi: d.rssi,
            })
            .collect(),
    };

    opts.as_json(&result)
}

#[must_use]
pub fn format_scan_text(devices: &[DiscoveredDevice], opts: &FormatOptions, show_tips: bool) -> String {
    use tabled::{Table, Tabled};

    if devices.is_empty() {
        return "No dispensers found.\n".to_string();
    }

    #[derive(Tabled)]
    struct DeviceRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Signal")]
        signal: String,
        #[tabled(rename = "Identifier")]
        identifier: String,
    }

    let rows: Vec<DeviceRow> = devices
        .iter()
        .map(|d| DeviceRow {
            name: opts.paint_name(d.name.as_deref().unwrap_or("Unknown")),
            signal: if opts.is_plain() {
                d.rssi.map(|r| r.to_string()).unwrap_or_else(|| "N/A".to_string())
            } else {
                style::format_signal_bar(d.rssi, opts.no_color)
            },
            identifier: d.id.clone(),
        })
        .collect();

    let count = if opts.no_color {
        devices.len().to_string()
    } else {
        format!("{}", devices.len().to_string().green().bold())
    };

    let mut table = Table::new(rows);
    style::apply_table_style(&mut table, opts.style);

    let mut output = format!("Found {} dispenser(s)\n\n{}\n", count, table);
    if show_tips && !opts.is_plain() {
        output.push_str(&format_scan_tips(opts.no_color));
    }
    output
}

/// Format helpful tips shown after scan results.
#[must_use]
pub fn format_scan_tips(no_color: bool) -> String {
    let tip_label = if no_color {
        "Tip:".to_string()
    } else {
        format!("{}", "Tip:".yellow().bold())
    };
    format!(
        "\n{} Use 'dispenser config set device <identifier>' to set a default dispenser\n",
        tip_label
    )
}

// ============================================================================
// History formatting
// ============================================================================

pub fn format_history_json(report: &HistoryReport, opts: &FormatOptions) -> Result<String> {
    opts.as_json(report)
}

#[must_use]
pub fn format_history_text(report: &HistoryReport, opts: &FormatOptions) -> String {
    use tabled::builder::Builder;

    let title = format!("{} history", capitalize(&report.granularity.to_string()));
    let mut output = format!("{}\n\n", style::format_title(&title, opts.no_color));

    if report.series.is_empty() {
        output.push_str("No history data available.\n");
        return output;
    }

    let peak = report.stats.peak;
    let mut builder = Builder::default();
    builder.push_record(["Period", "Value", ""]);
    for bucket in &report.series.buckets {
        let bar = style::value_bar(bucket.value, peak, opts.is_plain());
        let bar = if opts.no_color {
            bar
        } else {
            format!("{}", bar.blue())
        };
        builder.push_record([bucket.label.clone(), format!("{:.1}", bucket.value), bar]);
    }

    let mut table = builder.build();
    style::apply_table_style(&mut table, opts.style);
    output.push_str(&format!("{}\n\n", table));

    let stats = &report.stats;
    output.push_str(&format!(
        "Total: {:.1}   Average: {:.1}   Peak: {:.1}\n",
        stats.total, stats.average, stats.peak
    ));
    if let Some(date) = stats.generated_at
        && let Ok(date) = date.format(format_description!("[year]-[month]-[day]"))
    {
        output.push_str(&format!("Generated: {}\n", date));
    }
    output
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Telemetry formatting
// ============================================================================

/// One line per sensor value for `watch`.
#[must_use]
pub fn format_watch_line(snapshot: &TelemetrySnapshot, opts: &FormatOptions) -> String {
    let time = snapshot
        .last_updated
        .and_then(|t| t.format(format_description!("[hour]:[minute]:[second]")).ok())
        .unwrap_or_else(|| "--:--:--".to_string());
    let mode = snapshot
        .mode
        .map(|m| m.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let value = snapshot.latest_display();

    if opts.no_color {
        format!("[{}] {}  (mode: {})\n", time, value, mode)
    } else {
        format!(
            "[{}] {}  (mode: {})\n",
            time.dimmed(),
            value.bold(),
            mode.cyan()
        )
    }
}

/// One compact JSON object per sensor value for `watch`.
pub fn format_watch_json(snapshot: &TelemetrySnapshot) -> Result<String> {
    Ok(serde_json::to_string(snapshot)? + "\n")
}

// ============================================================================
// Threshold formatting
// ============================================================================

pub fn format_thresholds_json(thresholds: &Thresholds, opts: &FormatOptions) -> Result<String> {
    opts.as_json(thresholds)
}

#[must_use]
pub fn format_thresholds_text(thresholds: &Thresholds, opts: &FormatOptions) -> String {
    let show = |v: Option<u32>| v.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string());
    format!(
        "{}\n\nMaximum level: {}\nMinimum level: {}\n",
        style::format_title("Level thresholds", opts.no_color),
        show(thresholds.max),
        show(thresholds.min)
    )
}

// ============================================================================
// Config formatting
// ============================================================================

#[must_use]
pub fn format_config_text(config: &Config, path: &Path) -> String {
    let show = |v: Option<String>| v.unwrap_or_else(|| "(not set)".to_string());
    let last = config.last_device.as_ref().map(|id| match &config.last_device_name {
        Some(name) => format!("{} ({})", name, id),
        None => id.clone(),
    });

    format!(
        "Config file: {}\n\n\
         device       = {}\n\
         name_prefix  = {}\n\
         scan_timeout = {}s\n\
         settle_delay = {}ms\n\
         format       = {}\n\
         no_color     = {}\n\
         last_device  = {}\n",
        path.display(),
        show(config.device.clone()),
        config.name_prefix(),
        config.scan_timeout().as_secs(),
        config.settle_delay().as_millis(),
        show(config.format.clone()),
        config.no_color,
        show(last),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispenser_core::{DeviceMode, Granularity};
    use time::macros::{date, datetime};

    fn plain() -> FormatOptions {
        FormatOptions::new(true, StyleMode::Plain)
    }

    fn device(id: &str, name: Option<&str>) -> DiscoveredDevice {
        DiscoveredDevice {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi: Some(-58),
        }
    }

    #[test]
    fn test_plain_mode_disables_color() {
        let opts = FormatOptions::new(false, StyleMode::Plain);
        assert!(opts.no_color);
        assert!(!FormatOptions::new(false, StyleMode::Rich).no_color);
    }

    #[test]
    fn test_scan_text() {
        let devices = vec![device("AA:00", Some("ESP32_Kitchen"))];
        let text = format_scan_text(&devices, &plain(), false);
        assert!(text.contains("Found 1 dispenser(s)"));
        assert!(text.contains("ESP32_Kitchen"));
        assert!(text.contains("AA:00"));
        assert!(text.contains("-58"));
    }

    #[test]
    fn test_scan_text_empty() {
        assert_eq!(format_scan_text(&[], &plain(), true), "No dispensers found.\n");
    }

    #[test]
    fn test_scan_json() {
        let devices = vec![device("AA:00", Some("ESP32_Kitchen")), device("BB:00", None)];
        let json = format_scan_json(&devices, &plain().with_compact(true)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["count"], 2);
        assert_eq!(value["devices"][0]["name"], "ESP32_Kitchen");
        assert_eq!(value["devices"][1]["name"], serde_json::Value::Null);
        assert_eq!(value["devices"][1]["identifier"], "BB:00");
        assert!(!json.trim_end().contains('\n'));
    }

    #[test]
    fn test_history_text() {
        let report =
            HistoryReport::from_samples(&[2.0, 4.0], Granularity::Daily, date!(2024 - 05 - 01));
        let text = format_history_text(&report, &plain());

        assert!(text.starts_with("Daily history"));
        assert!(text.contains("22h"));
        assert!(text.contains("Total: 6.0   Average: 3.0   Peak: 4.0"));
        assert!(text.contains("Generated: 2024-05-01"));
        assert!(text.contains(&"#".repeat(style::BAR_WIDTH)));
    }

    #[test]
    fn test_history_text_empty() {
        let report = HistoryReport::empty(Granularity::Weekly, None);
        let text = format_history_text(&report, &plain());
        assert!(text.starts_with("Weekly history"));
        assert!(text.contains("No history data available."));
    }

    #[test]
    fn test_history_json_includes_error() {
        let report = HistoryReport::empty(Granularity::Monthly, Some("Not connected".into()));
        let json = format_history_json(&report, &plain()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["granularity"], "monthly");
        assert_eq!(value["error"], "Not connected");
        assert_eq!(value["stats"]["total"], 0.0);
        assert_eq!(value["series"]["buckets"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_watch_line() {
        let mut snapshot = TelemetrySnapshot::online("ESP32_Kitchen", DeviceMode::Auto);
        snapshot.latest = Some("42.5".to_string());
        snapshot.last_updated = Some(datetime!(2024-05-01 12:34:56 UTC));

        assert_eq!(
            format_watch_line(&snapshot, &plain()),
            "[12:34:56] 42.5  (mode: Auto)\n"
        );
    }

    #[test]
    fn test_watch_line_without_value() {
        let snapshot = TelemetrySnapshot::default();
        assert_eq!(
            format_watch_line(&snapshot, &plain()),
            "[--:--:--] N/A  (mode: Unknown)\n"
        );
    }

    #[test]
    fn test_watch_json_is_single_line() {
        let snapshot = TelemetrySnapshot::online("ESP32_Kitchen", DeviceMode::Manual);
        let json = format_watch_json(&snapshot).unwrap();
        assert_eq!(json.matches('\n').count(), 1);
        assert!(json.contains("ESP32_Kitchen"));
    }

    #[test]
    fn test_thresholds_text() {
        let text = format_thresholds_text(&Thresholds { max: Some(90), min: None }, &plain());
        assert!(text.contains("Maximum level: 90"));
        assert!(text.contains("Minimum level: N/A"));
    }

    #[test]
    fn test_config_text() {
        let config = Config {
            last_device: Some("AA:00".to_string()),
            last_device_name: Some("ESP32_Kitchen".to_string()),
            ..Default::default()
        };
        let text = format_config_text(&config, Path::new("/tmp/config.toml"));
        assert!(text.contains("device       = (not set)"));
        assert!(text.contains("name_prefix  = ESP32_"));
        assert!(text.contains("scan_timeout = 10s"));
        assert!(text.contains("last_device  = ESP32_Kitchen (AA:00)"));
    }
}
