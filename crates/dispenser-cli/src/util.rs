//! Utility functions for CLI operations.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dialoguer::{Select, theme::ColorfulTheme};
use dispenser_core::{
    BleRadio, ConnectionManager, DeviceHandle, DiscoveredDevice, ManagerConfig, ScanOptions,
};
use tracing::warn;

use crate::commands::CommandContext;
use crate::config::{Config, print_device_source_feedback, resolve_device, update_last_device};
use crate::style;

/// Manager settings from command flags, falling back to the config file.
pub fn manager_config(config: &Config, timeout: Option<u64>, prefix: Option<&str>) -> ManagerConfig {
    let duration = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.scan_timeout());
    let prefix = prefix.unwrap_or_else(|| config.name_prefix());

    ManagerConfig {
        scan_options: ScanOptions::new().duration(duration).name_prefix(prefix),
        ..Default::default()
    }
}

/// Create a connection manager on the first Bluetooth adapter.
pub async fn ble_manager(config: ManagerConfig) -> Result<ConnectionManager> {
    let radio = BleRadio::new()
        .await
        .context("Failed to access the Bluetooth adapter")?
        .find_timeout(config.scan_options.duration);
    Ok(ConnectionManager::with_config(Arc::new(radio), config))
}

/// Run one scan window, showing a spinner on a terminal.
pub async fn scan_with_progress(
    manager: &ConnectionManager,
    show_progress: bool,
) -> Result<Vec<DiscoveredDevice>> {
    let spinner = (show_progress && io::stderr().is_terminal())
        .then(|| style::scanning_spinner(manager.config().scan_options.duration.as_secs()));

    let result = match manager.scan().await {
        Ok(()) => Ok(manager.wait_for_scan().await),
        Err(e) => Err(e),
    };

    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }

    result.context("Failed to scan for dispensers")
}

/// Choose one of the scanned devices.
///
/// A single device is picked automatically. Several devices need a terminal
/// to prompt on.
pub fn pick_device(devices: &[DiscoveredDevice], interactive: bool) -> Result<usize> {
    match devices.len() {
        0 => bail!(
            "No dispensers found nearby.\n\
             Make sure the dispenser is powered on and in range."
        ),
        1 => Ok(0),
        _ if !interactive => {
            let list: Vec<String> = devices.iter().map(device_label).collect();
            bail!(
                "Found {} dispensers, pick one with --device:\n  {}",
                devices.len(),
                list.join("\n  ")
            )
        }
        _ => {
            let items: Vec<String> = devices.iter().map(device_label).collect();
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select a dispenser")
                .items(&items)
                .default(0)
                .interact()
                .context("Failed to get user selection")
        }
    }
}

fn device_label(device: &DiscoveredDevice) -> String {
    format!("{} ({})", device.name.as_deref().unwrap_or("Unknown"), device.id)
}

/// Get the device identifier, scanning and prompting if none is configured.
pub async fn require_device(
    manager: &ConnectionManager,
    device: Option<String>,
    config: &Config,
    quiet: bool,
) -> Result<String> {
    if let Some((identifier, source)) = resolve_device(device, config) {
        print_device_source_feedback(&identifier, source, quiet);
        return Ok(identifier);
    }

    if !quiet {
        eprintln!("No device specified. Scanning for nearby dispensers...");
    }

    let devices = scan_with_progress(manager, !quiet).await?;
    let interactive = io::stdin().is_terminal() && io::stderr().is_terminal();
    let index = pick_device(&devices, interactive)?;

    let chosen = &devices[index];
    if devices.len() == 1 && !quiet {
        eprintln!("Found 1 dispenser: {}", device_label(chosen));
    }
    Ok(chosen.id.clone())
}

/// Connect to a device, remembering it as the last device on success.
pub async fn connect(
    manager: &ConnectionManager,
    identifier: &str,
    show_progress: bool,
    config_path: &Path,
) -> Result<DeviceHandle> {
    let spinner = (show_progress && io::stderr().is_terminal())
        .then(|| style::connecting_spinner(identifier));

    let result = manager.connect(identifier).await;

    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }

    let handle = result.map_err(|e| {
        anyhow::anyhow!(
            "Failed to connect to {}\n\nCause: {}\n\nPossible causes:\n  \
             - Bluetooth may be disabled, check system settings\n  \
             - The dispenser may be out of range or connected to another host\n  \
             - The identifier may be wrong, run 'dispenser scan' to verify",
            identifier,
            e
        )
    })?;

    if let Err(e) = update_last_device(config_path, handle.id(), handle.name()) {
        warn!("Could not remember last device: {:#}", e);
    }

    Ok(handle)
}

/// Resolve, then connect to, the device a command operates on.
pub async fn open_device(
    manager: &ConnectionManager,
    device: Option<String>,
    ctx: &CommandContext<'_>,
) -> Result<DeviceHandle> {
    let identifier = require_device(manager, device, ctx.config, ctx.quiet).await?;
    connect(manager, &identifier, !ctx.quiet, ctx.config_path).await
}

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

/// Append output to file or write it to stdout, for streaming commands.
pub fn append_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispenser_core::{ConnectionState, MockDevice, MockRadio};

    fn discovered(id: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            id: id.to_string(),
            name: Some(format!("ESP32_{}", id)),
            rssi: Some(-60),
        }
    }

    async fn mock_manager(devices: &[&str]) -> ConnectionManager {
        let radio = Arc::new(MockRadio::new());
        for id in devices {
            let device = MockDevice::builder()
                .id(id)
                .name(Some(format!("ESP32_{}", id).as_str()))
                .build();
            radio.add_device(Arc::new(device)).await;
        }
        ConnectionManager::with_config(radio, manager_config(&Config::default(), Some(2), None))
    }

    #[test]
    fn test_manager_config_prefers_flags() {
        let config = Config {
            scan_timeout: Some(20),
            name_prefix: Some("LAB_".to_string()),
            ..Default::default()
        };

        let from_config = manager_config(&config, None, None);
        assert_eq!(from_config.scan_options.duration, Duration::from_secs(20));
        assert_eq!(from_config.scan_options.name_prefix, "LAB_");

        let from_flags = manager_config(&config, Some(3), Some("ESP32_"));
        assert_eq!(from_flags.scan_options.duration, Duration::from_secs(3));
        assert_eq!(from_flags.scan_options.name_prefix, "ESP32_");
    }

    #[test]
    fn test_pick_device() {
        assert!(pick_device(&[], false).is_err());
        assert_eq!(pick_device(&[discovered("A")], false).unwrap(), 0);

        let err = pick_device(&[discovered("A"), discovered("B")], false)
            .unwrap_err()
            .to_string();
        assert!(err.contains("Found 2 dispensers"));
        assert!(err.contains("ESP32_B (B)"));
    }

    #[tokio::test]
    async fn test_require_device_uses_explicit() {
        let manager = mock_manager(&[]).await;
        let id = require_device(&manager, Some("AA:00".to_string()), &Config::default(), true)
            .await
            .unwrap();
        assert_eq!(id, "AA:00");
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_require_device_scans_for_single_device() {
        let manager = mock_manager(&["KITCHEN"]).await;
        let id = require_device(&manager, None, &Config::default(), true)
            .await
            .unwrap();
        assert_eq!(id, "KITCHEN");
    }

    #[tokio::test(start_paused = true)]
    async fn test_require_device_fails_when_nothing_found() {
        let manager = mock_manager(&[]).await;
        let err = require_device(&manager, None, &Config::default(), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No dispensers found"));
    }

    #[tokio::test]
    async fn test_connect_remembers_last_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let manager = mock_manager(&["KITCHEN"]).await;

        let handle = connect(&manager, "KITCHEN", false, &path).await.unwrap();
        assert_eq!(handle.id(), "KITCHEN");

        let config = Config::load(&path);
        assert_eq!(config.last_device.as_deref(), Some("KITCHEN"));
        assert_eq!(config.last_device_name.as_deref(), Some("ESP32_KITCHEN"));
    }

    #[tokio::test]
    async fn test_connect_failure_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let manager = mock_manager(&[]).await;

        let err = connect(&manager, "MISSING", false, &path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to connect to MISSING"));
        assert!(!path.exists());
    }

    #[test]
    fn test_append_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        append_output(Some(&path), "one\n").unwrap();
        append_output(Some(&path), "two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
