//! Command-line interface for the smart water dispenser.
//!
//! The `dispenser` binary talks to an ESP32-based water dispenser over
//! Bluetooth Low Energy using [`dispenser_core`].
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby dispensers |
//! | `watch` | Follow the live sensor stream |
//! | `history` | Show daily, weekly or monthly history |
//! | `pump` | Switch the pump on or off |
//! | `mode` | Set or toggle auto/manual mode |
//! | `threshold` | Set the maximum or minimum level |
//! | `thresholds` | Show the level thresholds |
//! | `config` | Manage CLI configuration |
//! | `completions` | Generate shell completions |
//!
//! # Output Formats
//!
//! - **Text** (default): Human-readable colored output
//! - **JSON**: Machine-readable JSON format (`--json` or `--format json`)
//!
//! # Configuration
//!
//! The CLI stores configuration in `~/.config/dispenser/config.toml` (or
//! platform equivalent). Use `--config` or `DISPENSER_CONFIG` to point at a
//! different file. Options include:
//!
//! - `device`: Default device identifier
//! - `name_prefix`: Advertised name prefix used when scanning
//! - `scan_timeout`: Scan window in seconds
//! - `settle_delay`: Wait between the history request and the read, in milliseconds
//! - `format`: Default output format
//! - `no_color`: Disable colored output
//!
//! # Environment Variables
//!
//! - `DISPENSER_DEVICE`: Default device (overridden by `--device` flag)
//! - `DISPENSER_CONFIG`: Configuration file path
//! - `NO_COLOR`: Disable colored output when set
//! - `RUST_LOG`: Log filter, e.g. `dispenser_core=debug`
//!
//! # Examples
//!
//! Scan for dispensers:
//! ```bash
//! dispenser scan
//! ```
//!
//! Weekly history as JSON:
//! ```bash
//! dispenser history weekly --device ESP32_Kitchen --json
//! ```
//!
//! Stop the pump at level 85:
//! ```bash
//! dispenser threshold max 85
//! ```

// Re-export core dependencies for convenience
pub use dispenser_core;
pub use dispenser_types;
