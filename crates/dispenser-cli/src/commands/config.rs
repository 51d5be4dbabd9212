//! Config command implementation.

use anyhow::Result;
use clap::ValueEnum;

use super::CommandContext;
use crate::cli::{ConfigAction, ConfigKey};
use crate::config::Config;
use crate::format::format_config_text;
use crate::style;
use crate::util::write_output;

pub fn cmd_config(action: &ConfigAction, ctx: &CommandContext<'_>) -> Result<()> {
    let path = ctx.config_path;
    match action {
        ConfigAction::Show => write_output(ctx.output, &format_config_text(ctx.config, path)),
        ConfigAction::Path => write_output(ctx.output, &format!("{}\n", path.display())),
        ConfigAction::Set { key, value } => {
            let mut config = Config::load(path);
            config.set(*key, value)?;
            config.save(path)?;
            confirm(&format!("Set {} = {}", key_name(*key), value.trim()), ctx)
        }
        ConfigAction::Unset { key } => {
            let mut config = Config::load(path);
            config.unset(*key);
            config.save(path)?;
            confirm(&format!("Unset {}", key_name(*key)), ctx)
        }
    }
}

fn key_name(key: ConfigKey) -> String {
    key.to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_else(|| format!("{:?}", key))
}

fn confirm(message: &str, ctx: &CommandContext<'_>) -> Result<()> {
    if ctx.quiet {
        return Ok(());
    }
    eprintln!("{}", style::format_success(message, ctx.opts.no_color));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::plain;

    #[test]
    fn test_key_name() {
        assert_eq!(key_name(ConfigKey::ScanTimeout), "scan-timeout");
        assert_eq!(key_name(ConfigKey::Device), "device");
    }

    #[test]
    fn test_set_unset_and_show() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let output = dir.path().join("out.txt");
        let config = Config::default();
        let ctx = CommandContext {
            config: &config,
            config_path: &path,
            opts: plain(),
            output: Some(&output),
            quiet: true,
        };

        cmd_config(
            &ConfigAction::Set {
                key: ConfigKey::Device,
                value: "ESP32_Kitchen".to_string(),
            },
            &ctx,
        )
        .unwrap();
        cmd_config(
            &ConfigAction::Set {
                key: ConfigKey::SettleDelay,
                value: "800".to_string(),
            },
            &ctx,
        )
        .unwrap();
        assert!(
            cmd_config(
                &ConfigAction::Set {
                    key: ConfigKey::ScanTimeout,
                    value: "never".to_string(),
                },
                &ctx,
            )
            .is_err()
        );

        let saved = Config::load(&path);
        assert_eq!(saved.device.as_deref(), Some("ESP32_Kitchen"));
        assert_eq!(saved.settle_delay, Some(800));
        assert_eq!(saved.scan_timeout, None);

        cmd_config(
            &ConfigAction::Unset {
                key: ConfigKey::Device,
            },
            &ctx,
        )
        .unwrap();
        assert_eq!(Config::load(&path).device, None);

        cmd_config(&ConfigAction::Path, &ctx).unwrap();
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            format!("{}\n", path.display())
        );

        cmd_config(&ConfigAction::Show, &ctx).unwrap();
        assert!(std::fs::read_to_string(&output).unwrap().contains("settle_delay = 500ms"));
    }
}
