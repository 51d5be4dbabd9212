//! Pump, mode and threshold commands.

use anyhow::{Context, Result};
use dispenser_core::{Command, ConnectionManager, DeviceMode, TelemetryMonitor};

use super::CommandContext;
use crate::cli::{ModeArg, OutputFormat, PumpState, ThresholdKind};
use crate::format::{format_thresholds_json, format_thresholds_text};
use crate::style;
use crate::util::{open_device, write_output};

pub async fn cmd_pump(
    manager: &ConnectionManager,
    device: Option<String>,
    state: PumpState,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    let command = match state {
        PumpState::On => Command::PumpOn,
        PumpState::Off => Command::PumpOff,
    };
    let message = match state {
        PumpState::On => "Pump switched on",
        PumpState::Off => "Pump switched off",
    };
    send(manager, device, command, message, ctx).await
}

pub async fn cmd_threshold(
    manager: &ConnectionManager,
    device: Option<String>,
    kind: ThresholdKind,
    value: u32,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    let (command, message) = match kind {
        ThresholdKind::Max => (
            Command::SetMaxLevel(value),
            format!("Maximum level set to {}", value),
        ),
        ThresholdKind::Min => (
            Command::SetMinLevel(value),
            format!("Minimum level set to {}", value),
        ),
    };
    send(manager, device, command, &message, ctx).await
}

pub async fn cmd_mode(
    manager: &ConnectionManager,
    device: Option<String>,
    mode: ModeArg,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    match mode.mode() {
        Some(mode) => {
            let message = format!("Mode set to {}", mode);
            send(manager, device, mode.command(), &message, ctx).await
        }
        None => toggle_mode(manager, device, ctx).await,
    }
}

/// Toggle needs the current mode, which the monitor reads on attach.
async fn toggle_mode(
    manager: &ConnectionManager,
    device: Option<String>,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    let handle = open_device(manager, device, ctx).await?;
    let monitor = TelemetryMonitor::new();

    let result: Result<DeviceMode> = async {
        monitor
            .attach(handle)
            .await
            .context("Failed to read the current mode")?;
        monitor.toggle_mode().await.context("Failed to switch mode")
    }
    .await;

    monitor.detach().await;
    manager.shutdown().await;

    let mode = result?;
    report(&format!("Mode switched to {}", mode), ctx)
}

pub async fn cmd_thresholds(
    manager: &ConnectionManager,
    device: Option<String>,
    format: OutputFormat,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    open_device(manager, device, ctx).await?;
    let result = manager.read_thresholds().await;
    manager.shutdown().await;

    let thresholds = result.context("Failed to read thresholds")?;
    let content = match format {
        OutputFormat::Json => format_thresholds_json(&thresholds, &ctx.opts)?,
        OutputFormat::Text => format_thresholds_text(&thresholds, &ctx.opts),
    };
    write_output(ctx.output, &content)
}

/// Connect, send one command and disconnect.
async fn send(
    manager: &ConnectionManager,
    device: Option<String>,
    command: Command,
    message: &str,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    open_device(manager, device, ctx).await?;
    let result = manager.send_command(command).await;
    manager.shutdown().await;

    result.with_context(|| format!("Failed to send {}", command))?;
    report(message, ctx)
}

fn report(message: &str, ctx: &CommandContext<'_>) -> Result<()> {
    if ctx.quiet {
        return Ok(());
    }
    let line = style::format_success(message, ctx.opts.no_color);
    write_output(ctx.output, &format!("{}\n", line))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dispenser_core::MockDevice;
    use dispenser_core::uuids::{COMMAND_SINK, MAX_LEVEL, MIN_LEVEL, MODE};

    use super::*;
    use crate::commands::testing::{manager_with, plain};
    use crate::config::Config;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
        config_path: std::path::PathBuf,
        output: std::path::PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                config_path: dir.path().join("config.toml"),
                output: dir.path().join("out.txt"),
                config: Config::default(),
                _dir: dir,
            }
        }

        fn ctx(&self) -> CommandContext<'_> {
            CommandContext {
                config: &self.config,
                config_path: &self.config_path,
                opts: plain(),
                output: Some(&self.output),
                quiet: false,
            }
        }

        fn output(&self) -> String {
            std::fs::read_to_string(&self.output).unwrap()
        }
    }

    fn dispenser() -> Arc<MockDevice> {
        Arc::new(
            MockDevice::builder()
                .id("AA:00")
                .name(Some("ESP32_Kitchen"))
                .build(),
        )
    }

    fn device_arg() -> Option<String> {
        Some("AA:00".to_string())
    }

    #[tokio::test]
    async fn test_pump_on() {
        let fixture = Fixture::new();
        let device = dispenser();
        let manager = manager_with(device.clone()).await;

        cmd_pump(&manager, device_arg(), PumpState::On, &fixture.ctx())
            .await
            .unwrap();

        let writes = device.writes().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, COMMAND_SINK);
        assert_eq!(&writes[0].1[..], b"PUMP_ON");
        assert_eq!(fixture.output(), "[OK] Pump switched on\n");
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_thresholds_route_to_their_characteristics() {
        let fixture = Fixture::new();
        let device = dispenser();
        let manager = manager_with(device.clone()).await;

        cmd_threshold(&manager, device_arg(), ThresholdKind::Max, 85, &fixture.ctx())
            .await
            .unwrap();
        cmd_threshold(&manager, device_arg(), ThresholdKind::Min, 20, &fixture.ctx())
            .await
            .unwrap();

        let writes = device.writes().await;
        assert_eq!(writes[0].0, MAX_LEVEL);
        assert_eq!(&writes[0].1[..], b"SET_MAX_LEVEL:85");
        assert_eq!(writes[1].0, MIN_LEVEL);
        assert_eq!(&writes[1].1[..], b"SET_MIN_LEVEL:20");
        assert_eq!(fixture.output(), "[OK] Minimum level set to 20\n");
    }

    #[tokio::test]
    async fn test_explicit_mode() {
        let fixture = Fixture::new();
        let device = dispenser();
        let manager = manager_with(device.clone()).await;

        cmd_mode(&manager, device_arg(), ModeArg::Auto, &fixture.ctx())
            .await
            .unwrap();

        assert_eq!(device.written_text().await, vec!["AUTO"]);
        assert_eq!(fixture.output(), "[OK] Mode set to Auto\n");
    }

    #[tokio::test]
    async fn test_toggle_mode_flips_device_mode() {
        let fixture = Fixture::new();
        let device = dispenser();
        device.set_value(MODE, "AUTO").await;
        let manager = manager_with(device.clone()).await;

        cmd_mode(&manager, device_arg(), ModeArg::Toggle, &fixture.ctx())
            .await
            .unwrap();

        assert_eq!(device.written_text().await, vec!["MANUAL"]);
        assert_eq!(fixture.output(), "[OK] Mode switched to Manual\n");
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let fixture = Fixture::new();
        let device = dispenser();
        device.set_write_failure(true, Some("gatt error")).await;
        let manager = manager_with(device.clone()).await;

        let err = cmd_pump(&manager, device_arg(), PumpState::Off, &fixture.ctx())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Failed to send PUMP_OFF"));
        assert!(!fixture.output.exists());
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_read_thresholds() {
        let fixture = Fixture::new();
        let device = dispenser();
        device.set_value(MAX_LEVEL, "90").await;
        let manager = manager_with(device).await;

        cmd_thresholds(&manager, device_arg(), OutputFormat::Text, &fixture.ctx())
            .await
            .unwrap();

        let text = fixture.output();
        assert!(text.contains("Maximum level: 90"));
        assert!(text.contains("Minimum level: N/A"));
    }
}
