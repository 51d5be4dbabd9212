//! Watch command implementation.
//!
//! Follows the sensor stream through a [`TelemetryMonitor`] and prints one
//! line per notification. The command ends on Ctrl+C, after `count` values,
//! or when the device goes away.

use anyhow::{Context, Result, bail};
use dispenser_core::{ConnectionManager, LinkStatus, TelemetryMonitor};
use owo_colors::OwoColorize;
use time::OffsetDateTime;

use super::CommandContext;
use crate::cli::OutputFormat;
use crate::format::{format_watch_json, format_watch_line};
use crate::util::{append_output, open_device};

/// Arguments for the watch command.
pub struct WatchArgs {
    pub device: Option<String>,
    pub count: u32,
    pub format: OutputFormat,
}

pub async fn cmd_watch(
    manager: &ConnectionManager,
    args: WatchArgs,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    let WatchArgs {
        device,
        count,
        format,
    } = args;

    let handle = open_device(manager, device, ctx).await?;
    let monitor = TelemetryMonitor::new();
    let mut snapshots = monitor.subscribe();

    if let Err(e) = monitor.attach(handle.clone()).await {
        manager.shutdown().await;
        return Err(e).context("Failed to follow the sensor stream");
    }

    if !ctx.quiet {
        let label = handle.label();
        let header = if ctx.opts.no_color {
            format!("Watching: {}", label)
        } else {
            format!("Watching: {}", label.green())
        };
        eprintln!("{}", header);
        if count > 0 {
            eprintln!("Count: {} | Press Ctrl+C to stop", count);
        } else {
            eprintln!("Press Ctrl+C to stop");
        }
        eprintln!("{}", "-".repeat(50));
    }

    let result = follow(&mut snapshots, count, format, ctx).await;

    monitor.detach().await;
    manager.shutdown().await;
    result
}

async fn follow(
    snapshots: &mut tokio::sync::watch::Receiver<dispenser_core::TelemetrySnapshot>,
    count: u32,
    format: OutputFormat,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    let mut shown: u32 = 0;
    let mut last_seen: Option<OffsetDateTime> = None;

    loop {
        if count > 0 && shown >= count {
            if !ctx.quiet {
                eprintln!("Completed {} readings.", shown);
            }
            return Ok(());
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !ctx.quiet {
                    eprintln!("\nShutting down...");
                }
                return Ok(());
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();

                if snapshot.status == LinkStatus::Offline {
                    bail!("Connection to the dispenser was lost");
                }
                // Mode changes also wake us; only new values are printed
                if snapshot.last_updated.is_none() || snapshot.last_updated == last_seen {
                    continue;
                }
                last_seen = snapshot.last_updated;

                let line = match format {
                    OutputFormat::Json => format_watch_json(&snapshot)?,
                    OutputFormat::Text => format_watch_line(&snapshot, &ctx.opts),
                };
                append_output(ctx.output, &line)?;
                shown += 1;
            }
        }
    }
}
