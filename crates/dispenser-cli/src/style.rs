//! Visual styling utilities for the CLI.
//!
//! Spinners for long-running operations, status messages and table styles.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use crate::cli::StyleMode;

/// Standard spinner tick characters (Braille dots animation)
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Standard spinner tick interval
const SPINNER_TICK_MS: u64 = 80;

/// Width of the bars in history charts
pub const BAR_WIDTH: usize = 30;

/// Get the standard spinner style.
fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .expect("valid template")
        .tick_chars(SPINNER_TICK_CHARS)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

/// Create a spinner for scanning operations.
pub fn scanning_spinner(timeout_secs: u64) -> ProgressBar {
    spinner(format!("Scanning for dispensers... ({}s)", timeout_secs))
}

/// Create a spinner for connecting to a device.
pub fn connecting_spinner(device: &str) -> ProgressBar {
    spinner(format!("Connecting to {}...", device))
}

/// Create a spinner for generic operations.
pub fn operation_spinner(message: &str) -> ProgressBar {
    spinner(message.to_string())
}

/// Format a success message.
pub fn format_success(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[OK] {}", message)
    } else {
        format!("{} {}", "[OK]".green(), message)
    }
}

/// Format a title header.
pub fn format_title(title: &str, no_color: bool) -> String {
    let underline = "━".repeat(title.chars().count());
    if no_color {
        format!("{}\n{}", title, underline)
    } else {
        format!("{}\n{}", title.bold(), underline.dimmed())
    }
}

/// Format a signal strength bar from RSSI.
pub fn format_signal_bar(rssi: Option<i16>, no_color: bool) -> String {
    let Some(rssi) = rssi else {
        return "N/A".to_string();
    };

    let bars = match rssi {
        r if r >= -60 => 4,
        r if r >= -70 => 3,
        r if r >= -80 => 2,
        _ => 1,
    };
    let bar = format!("{}{} {} dBm", "▮".repeat(bars), "▯".repeat(4 - bars), rssi);

    if no_color {
        bar
    } else {
        match bars {
            4 | 3 => format!("{}", bar.green()),
            2 => format!("{}", bar.yellow()),
            _ => format!("{}", bar.red()),
        }
    }
}

/// Horizontal bar for a value relative to the series peak.
pub fn value_bar(value: f64, peak: f64, plain: bool) -> String {
    let filled = if peak > 0.0 && value > 0.0 {
        ((value / peak) * BAR_WIDTH as f64).round() as usize
    } else {
        0
    };
    let filled = filled.min(BAR_WIDTH);
    if plain {
        "#".repeat(filled)
    } else {
        "█".repeat(filled)
    }
}

/// Apply the table style for a styling mode.
pub fn apply_table_style(table: &mut tabled::Table, style: StyleMode) {
    use tabled::settings::Style;
    match style {
        StyleMode::Rich => {
            table.with(Style::rounded());
        }
        StyleMode::Minimal => {
            table.with(Style::psql());
        }
        StyleMode::Plain => {
            table.with(Style::blank());
        }
    }
}
