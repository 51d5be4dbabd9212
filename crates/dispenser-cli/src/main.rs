use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod style;
mod util;

use cli::{Cli, Commands, DeviceArgs};
use commands::{
    CommandContext, HistoryArgs, WatchArgs, cmd_config, cmd_history, cmd_mode, cmd_pump,
    cmd_scan, cmd_threshold, cmd_thresholds, cmd_watch,
};
use config::Config;
use dispenser_core::ConnectionManager;
use format::FormatOptions;
use util::{ble_manager, manager_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "dispenser", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path);

    let opts = FormatOptions::new(cli.no_color || config.no_color, cli.style)
        .with_compact(cli.compact);
    let ctx = CommandContext {
        config: &config,
        config_path: &config_path,
        opts,
        output: cli.output.as_ref(),
        quiet: cli.quiet,
    };

    match &cli.command {
        Commands::Scan {
            timeout,
            prefix,
            format,
        } => {
            let manager = ble_manager(manager_config(&config, *timeout, prefix.as_deref())).await?;
            let format = cli.resolve_format(*format, config.format.as_deref());
            cmd_scan(&manager, format, &ctx).await
        }
        Commands::Watch {
            device,
            count,
            format,
        } => {
            let manager = device_manager(device, &config).await?;
            let args = WatchArgs {
                device: device.device.clone(),
                count: *count,
                format: cli.resolve_format(*format, config.format.as_deref()),
            };
            cmd_watch(&manager, args, &ctx).await
        }
        Commands::History {
            device,
            granularity,
            settle_ms,
            format,
        } => {
            let manager = device_manager(device, &config).await?;
            let args = HistoryArgs {
                device: device.device.clone(),
                granularity: *granularity,
                settle_ms: *settle_ms,
                format: cli.resolve_format(*format, config.format.as_deref()),
            };
            cmd_history(&manager, args, &ctx).await
        }
        Commands::Pump { device, state } => {
            let manager = device_manager(device, &config).await?;
            cmd_pump(&manager, device.device.clone(), *state, &ctx).await
        }
        Commands::Mode { device, mode } => {
            let manager = device_manager(device, &config).await?;
            cmd_mode(&manager, device.device.clone(), *mode, &ctx).await
        }
        Commands::Threshold {
            device,
            kind,
            value,
        } => {
            let manager = device_manager(device, &config).await?;
            cmd_threshold(&manager, device.device.clone(), *kind, *value, &ctx).await
        }
        Commands::Thresholds { device, format } => {
            let manager = device_manager(device, &config).await?;
            let format = cli.resolve_format(*format, config.format.as_deref());
            cmd_thresholds(&manager, device.device.clone(), format, &ctx).await
        }
        Commands::Config { action } => cmd_config(action, &ctx),
        // Already handled above
        Commands::Completions { .. } => Ok(()),
    }
}

async fn device_manager(args: &DeviceArgs, config: &Config) -> Result<ConnectionManager> {
    ble_manager(manager_config(config, args.timeout, None)).await
}
