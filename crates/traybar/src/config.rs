use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tray_engine::Protocol;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Config {
    /// Theme to prefer when looking up named icons.
    pub icon_theme: Option<String>,
    #[default = 24]
    pub icon_size: i32,
    /// Serve `org.freedesktop.StatusNotifierWatcher`.
    #[default = true]
    pub standard_protocol: bool,
    /// Serve `org.kde.StatusNotifierWatcher`.
    #[default = true]
    pub legacy_protocol: bool,
}

impl Config {
    /// Read the configuration file. A missing file means the defaults.
    pub fn load(path: &Path) -> Result<Config> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No configuration at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let config: Config =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate().with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Check the settings that can't be expressed in the types. Has to run again after command line
    /// overrides are applied.
    pub fn validate(&self) -> Result<()> {
        if self.protocols().is_empty() {
            bail!("at least one of standard_protocol and legacy_protocol must be enabled");
        }
        if self.icon_size <= 0 {
            bail!("icon_size must be positive, got {}", self.icon_size);
        }
        Ok(())
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols = Vec::new();
        if self.standard_protocol {
            protocols.push(Protocol::Standard);
        }
        if self.legacy_protocol {
            protocols.push(Protocol::Legacy);
        }
        protocols
    }
}
