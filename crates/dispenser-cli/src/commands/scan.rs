//! Scan command implementation.

use anyhow::Result;
use dispenser_core::ConnectionManager;

use super::CommandContext;
use crate::cli::OutputFormat;
use crate::format::{format_scan_json, format_scan_text};
use crate::util::{scan_with_progress, write_output};

pub async fn cmd_scan(
    manager: &ConnectionManager,
    format: OutputFormat,
    ctx: &CommandContext<'_>,
) -> Result<()> {
    // Spinner only for text output
    let show_progress = !ctx.quiet && format == OutputFormat::Text;
    let devices = scan_with_progress(manager, show_progress).await?;

    let content = match format {
        OutputFormat::Json => format_scan_json(&devices, &ctx.opts)?,
        OutputFormat::Text => format_scan_text(&devices, &ctx.opts, !ctx.quiet),
    };

    write_output(ctx.output, &content)
}
