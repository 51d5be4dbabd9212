//! History command implementation.

use std::io::{self, IsTerminal};
use std::time::Duration;

use anyhow::{Result, bail};
use dispenser_core::{ConnectionManager, Granularity, HistoryOptions, request_history};

use super::CommandContext;
use crate::cli::OutputFormat;
use crate::format::{format_history_json, format_history_text};
use crate::style;
use crate::util::{open_device, write_output};

/// Arguments for the history command.
pub struct HistoryArgs {
    pub device: Option<String>,
    pub granularity: Granularity,
    pub settle_ms: Option<u64>,
    pub format: OutputFormat,
}

pub async fn cmd_history(
    manager: &ConnectionManager,
    args: HistoryArgs,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    let HistoryArgs {
        device,
        granularity,
        settle_ms,
        format,
    } = args;

    let handle = open_device(manager, device, ctx).await?;

    let settle_delay = settle_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| ctx.config.settle_delay());
    let options = HistoryOptions::new().settle_delay(settle_delay);

    let spinner = (!ctx.quiet && format == OutputFormat::Text && io::stderr().is_terminal())
        .then(|| style::operation_spinner(&format!("Loading {} history...", granularity)));

    let report = request_history(&handle, granularity, &options).await;

    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }
    manager.shutdown().await;

    let content = match format {
        OutputFormat::Json => format_history_json(&report, &ctx.opts)?,
        OutputFormat::Text => format_history_text(&report, &ctx.opts),
    };
    write_output(ctx.output, &content)?;

    // The report is still printed so scripts see the empty series
    if let Some(error) = report.error {
        bail!(error);
    }
    Ok(())
}
