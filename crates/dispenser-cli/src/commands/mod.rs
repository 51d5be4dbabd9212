//! Command implementations for the CLI.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::format::FormatOptions;

mod config;
mod control;
mod history;
mod scan;
mod watch;

pub use config::cmd_config;
pub use control::{cmd_mode, cmd_pump, cmd_threshold, cmd_thresholds};
pub use history::{HistoryArgs, cmd_history};
pub use scan::cmd_scan;
pub use watch::{WatchArgs, cmd_watch};

/// Settings shared by every command.
pub struct CommandContext<'a> {
    pub config: &'a Config,
    pub config_path: &'a Path,
    pub opts: FormatOptions,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
}
