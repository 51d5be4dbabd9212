//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dispenser_core::{DeviceMode, Granularity};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Visual styling mode for output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StyleMode {
    /// Standard styling with colors
    Minimal,
    /// Rounded tables and full formatting (default)
    #[default]
    Rich,
    /// Plain text with no decorations (for scripting)
    Plain,
}

/// Reusable device connection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Device identifier (MAC address, UUID or advertised name), or use DISPENSER_DEVICE env var
    #[arg(short, long, env = "DISPENSER_DEVICE")]
    pub device: Option<String>,

    /// How long to look for the device before giving up, in seconds
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,
}

#[derive(Parser)]
#[command(name = "dispenser")]
#[command(author, version, about = "CLI for the smart water dispenser", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Visual styling mode (minimal, rich, plain)
    #[arg(long, global = true, value_enum, default_value = "rich")]
    pub style: StyleMode,

    /// Use a different configuration file
    #[arg(long, global = true, env = "DISPENSER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Resolve the output format: `--json` wins, then the flag, then config.
    pub fn resolve_format(&self, flag: Option<OutputFormat>, config_format: Option<&str>) -> OutputFormat {
        if self.json {
            return OutputFormat::Json;
        }
        flag.or_else(|| config_format.and_then(|f| OutputFormat::from_str(f, true).ok()))
            .unwrap_or_default()
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby dispensers
    Scan {
        /// Scan window in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Only show devices whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Follow the live sensor stream
    Watch {
        #[command(flatten)]
        device: DeviceArgs,

        /// Number of values to show before exiting (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show aggregated dispensing history
    History {
        #[command(flatten)]
        device: DeviceArgs,

        /// Time resolution (daily, weekly, monthly)
        #[arg(default_value = "daily", value_parser = parse_granularity)]
        granularity: Granularity,

        /// Delay between the history request and the read, in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Switch the pump on or off
    Pump {
        #[command(flatten)]
        device: DeviceArgs,

        /// Pump state
        #[arg(value_enum)]
        state: PumpState,
    },

    /// Set or toggle the operating mode
    Mode {
        #[command(flatten)]
        device: DeviceArgs,

        /// Target mode
        #[arg(value_enum)]
        mode: ModeArg,
    },

    /// Set a level threshold
    Threshold {
        #[command(flatten)]
        device: DeviceArgs,

        /// Which threshold to set
        #[arg(value_enum)]
        kind: ThresholdKind,

        /// Level value
        value: u32,
    },

    /// Show the level thresholds
    Thresholds {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Pump states
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PumpState {
    On,
    Off,
}

/// Mode arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Automatic level control
    Auto,
    /// Manual pump control
    Manual,
    /// Flip the current mode
    Toggle,
}

impl ModeArg {
    /// The explicit mode, `None` for toggle.
    pub fn mode(self) -> Option<DeviceMode> {
        match self {
            ModeArg::Auto => Some(DeviceMode::Auto),
            ModeArg::Manual => Some(DeviceMode::Manual),
            ModeArg::Toggle => None,
        }
    }
}

/// Threshold kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ThresholdKind {
    /// Maximum level (pump stops)
    Max,
    /// Minimum level (pump starts)
    Min,
}

fn parse_granularity(s: &str) -> Result<Granularity, String> {
    s.parse::<Granularity>().map_err(|e| e.to_string())
}

/// Configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// Default device identifier
    Device,
    /// Device name prefix used when scanning
    NamePrefix,
    /// Scan window in seconds
    ScanTimeout,
    /// History settle delay in milliseconds
    SettleDelay,
    /// Default output format
    Format,
    /// Disable colored output
    NoColor,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        #[arg(value_enum)]
        key: ConfigKey,
        /// Configuration value
        value: String,
    },

    /// Unset (remove) a configuration value
    Unset {
        /// Configuration key to remove
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Show configuration file path
    Path,
}
