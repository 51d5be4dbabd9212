//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dispenser_core::history::DEFAULT_SETTLE_DELAY;
use dispenser_core::scan::DEFAULT_SCAN_TIMEOUT;
use dispenser_core::uuids::DEVICE_NAME_PREFIX;
use serde::{Deserialize, Serialize};

use crate::cli::ConfigKey;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Default device identifier
    #[serde(default)]
    pub device: Option<String>,

    /// Advertised name prefix used when scanning
    #[serde(default)]
    pub name_prefix: Option<String>,

    /// Scan window in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// History settle delay in milliseconds
    #[serde(default)]
    pub settle_delay: Option<u64>,

    /// Default output format
    #[serde(default)]
    pub format: Option<String>,

    /// Disable colored output
    #[serde(default)]
    pub no_color: bool,

    /// Last successfully connected device (auto-updated)
    #[serde(default)]
    pub last_device: Option<String>,

    /// Name of the last connected device (for display)
    #[serde(default)]
    pub last_device_name: Option<String>,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dispenser")
            .join("config.toml")
    }

    /// Load config from file, or return default if not found
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Name prefix, falling back to the dispenser default.
    pub fn name_prefix(&self) -> &str {
        self.name_prefix.as_deref().unwrap_or(DEVICE_NAME_PREFIX)
    }

    /// Scan window, falling back to the library default.
    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SCAN_TIMEOUT)
    }

    /// History settle delay, falling back to the library default.
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SETTLE_DELAY)
    }

    /// Set a key from its string form, validating the value.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            ConfigKey::Device => self.device = Some(non_empty(value)?),
            ConfigKey::NamePrefix => self.name_prefix = Some(value.to_string()),
            ConfigKey::ScanTimeout => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("'{}' is not a valid number of seconds", value))?;
                if secs == 0 {
                    bail!("Scan timeout must be at least 1 second");
                }
                self.scan_timeout = Some(secs);
            }
            ConfigKey::SettleDelay => {
                let millis: u64 = value.parse().with_context(|| {
                    format!("'{}' is not a valid number of milliseconds", value)
                })?;
                self.settle_delay = Some(millis);
            }
            ConfigKey::Format => match value.to_ascii_lowercase().as_str() {
                "text" | "json" => self.format = Some(value.to_ascii_lowercase()),
                _ => bail!("Invalid format '{}'. Valid values: text, json", value),
            },
            ConfigKey::NoColor => self.no_color = parse_bool(value)?,
        }
        Ok(())
    }

    /// Reset a key to its default.
    pub fn unset(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::Device => self.device = None,
            ConfigKey::NamePrefix => self.name_prefix = None,
            ConfigKey::ScanTimeout => self.scan_timeout = None,
            ConfigKey::SettleDelay => self.settle_delay = None,
            ConfigKey::Format => self.format = None,
            ConfigKey::NoColor => self.no_color = false,
        }
    }
}

fn non_empty(value: &str) -> Result<String> {
    if value.is_empty() {
        bail!("Value must not be empty");
    }
    Ok(value.to_string())
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!(
            "Invalid boolean value '{}'. Use: true/false, yes/no, on/off, 1/0",
            s
        ),
    }
}

/// Where a device identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSource {
    /// `--device` or `DISPENSER_DEVICE`
    Explicit,
    /// `device` in the config file
    Default,
    /// The last device connected to
    Last,
}

/// Resolve the device from arg or env var, then config, then the last device.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<(String, DeviceSource)> {
    device
        .filter(|d| !d.trim().is_empty())
        .map(|d| (d, DeviceSource::Explicit))
        .or_else(|| config.device.clone().map(|d| (d, DeviceSource::Default)))
        .or_else(|| config.last_device.clone().map(|d| (d, DeviceSource::Last)))
}

/// Print device source feedback (e.g., "Using last connected device: ...").
pub fn print_device_source_feedback(device: &str, source: DeviceSource, quiet: bool) {
    if quiet {
        return;
    }
    match source {
        DeviceSource::Default => eprintln!("Using default device: {}", device),
        DeviceSource::Last => eprintln!("Using last connected device: {}", device),
        DeviceSource::Explicit => {}
    }
}

/// Update the last connected device in config.
/// This is called after a successful connection.
pub fn update_last_device(path: &Path, identifier: &str, name: Option<&str>) -> Result<()> {
    let mut config = Config::load(path);
    config.last_device = Some(identifier.to_string());
    config.last_device_name = name.map(|n| n.to_string());
    config.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.name_prefix(), "ESP32_");
        assert_eq!(config.scan_timeout(), Duration::from_secs(10));
        assert_eq!(config.settle_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_resolve_device_prefers_arg() {
        let config = Config {
            device: Some("config-device".to_string()),
            ..Default::default()
        };
        let result = resolve_device(Some("arg-device".to_string()), &config);
        assert_eq!(result, Some(("arg-device".to_string(), DeviceSource::Explicit)));
    }

    #[test]
    fn test_resolve_device_falls_back_to_config() {
        let config = Config {
            device: Some("config-device".to_string()),
            last_device: Some("last-device".to_string()),
            ..Default::default()
        };
        let result = resolve_device(None, &config);
        assert_eq!(result, Some(("config-device".to_string(), DeviceSource::Default)));
    }

    #[test]
    fn test_resolve_device_falls_back_to_last() {
        let config = Config {
            last_device: Some("last-device".to_string()),
            ..Default::default()
        };
        let result = resolve_device(Some("  ".to_string()), &config);
        assert_eq!(result, Some(("last-device".to_string(), DeviceSource::Last)));
    }

    #[test]
    fn test_resolve_device_none_when_empty() {
        assert_eq!(resolve_device(None, &Config::default()), None);
    }

    #[test]
    fn test_set_and_unset() {
        let mut config = Config::default();
        config.set(ConfigKey::ScanTimeout, "5").unwrap();
        config.set(ConfigKey::SettleDelay, "750").unwrap();
        config.set(ConfigKey::Format, "JSON").unwrap();
        config.set(ConfigKey::NoColor, "yes").unwrap();
        config.set(ConfigKey::NamePrefix, "LAB_").unwrap();

        assert_eq!(config.scan_timeout(), Duration::from_secs(5));
        assert_eq!(config.settle_delay(), Duration::from_millis(750));
        assert_eq!(config.format.as_deref(), Some("json"));
        assert!(config.no_color);
        assert_eq!(config.name_prefix(), "LAB_");

        config.unset(ConfigKey::ScanTimeout);
        config.unset(ConfigKey::NoColor);
        assert_eq!(config.scan_timeout, None);
        assert!(!config.no_color);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set(ConfigKey::ScanTimeout, "soon").is_err());
        assert!(config.set(ConfigKey::ScanTimeout, "0").is_err());
        assert!(config.set(ConfigKey::Format, "csv").is_err());
        assert!(config.set(ConfigKey::NoColor, "maybe").is_err());
        assert!(config.set(ConfigKey::Device, " ").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            device: Some("AA:BB:CC:DD:EE:FF".to_string()),
            scan_timeout: Some(20),
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path), config);
    }

    #[test]
    fn test_load_missing_or_invalid_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Config::load(&path), Config::default());

        fs::write(&path, "scan_timeout = \"never\"").unwrap();
        assert_eq!(Config::load(&path), Config::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "device = \"ESP32_Kitchen\"\n").unwrap();

        let config = Config::load(&path);
        assert_eq!(config.device.as_deref(), Some("ESP32_Kitchen"));
        assert_eq!(config.name_prefix(), "ESP32_");
    }

    #[test]
    fn test_update_last_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        Config {
            device: Some("keep-me".to_string()),
            ..Default::default()
        }
        .save(&path)
        .unwrap();

        update_last_device(&path, "AA:00", Some("ESP32_Kitchen")).unwrap();

        let config = Config::load(&path);
        assert_eq!(config.device.as_deref(), Some("keep-me"));
        assert_eq!(config.last_device.as_deref(), Some("AA:00"));
        assert_eq!(config.last_device_name.as_deref(), Some("ESP32_Kitchen"));
    }
}
