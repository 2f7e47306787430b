use std::path::PathBuf;

use anyhow::{Context, Result};

/// `$XDG_CONFIG_HOME/traybar/config.json`, falling back to `~/.config`.
pub fn default_config_file() -> Result<PathBuf> {
    let config_dir = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var("HOME").context("Neither XDG_CONFIG_HOME nor HOME is set")?).join(".config"),
    };
    Ok(config_dir.join("traybar").join("config.json"))
}
