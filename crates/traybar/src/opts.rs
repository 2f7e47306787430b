use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq)]
pub struct Opt {
    pub log_debug: bool,
    pub config_path: Option<PathBuf>,
    pub icon_theme: Option<String>,
    pub icon_size: Option<i32>,
    pub action: Action,
}

#[derive(Parser, Debug, PartialEq)]
#[command(version, about)]
struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// Override the path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Icon theme to look icons up in before falling back to Hicolor
    #[arg(long, global = true)]
    icon_theme: Option<String>,

    /// Size in pixels icons are picked for
    #[arg(long, global = true)]
    icon_size: Option<i32>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Action {
    /// Run the system tray, printing the items every time they change.
    #[command(name = "daemon", alias = "d")]
    Daemon,

    /// Look up the file for an icon name.
    #[command(name = "resolve")]
    Resolve {
        /// Name of the icon, without extension
        name: String,

        /// Size to look the icon up at, overriding --icon-size
        #[arg(short, long)]
        size: Option<i32>,

        /// Theme to prefer, overriding --icon-theme
        #[arg(short, long)]
        theme: Option<String>,
    },

    /// List the icon themes that were found.
    #[command(name = "themes")]
    Themes,

    /// List the directories icon themes are searched in.
    #[command(name = "basedirs")]
    Basedirs,
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }

    /// Command line flags take precedence over the configuration file.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(theme) = &self.icon_theme {
            config.icon_theme = Some(theme.clone());
        }
        if let Some(size) = self.icon_size {
            config.icon_size = size;
        }
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { log_debug, config, icon_theme, icon_size, action } = other;
        Opt { log_debug, config_path: config, icon_theme, icon_size, action }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Opt {
        RawOpt::try_parse_from(std::iter::once("traybar").chain(args.iter().copied())).unwrap().into()
    }

    #[test]
    fn test_resolve_args() {
        let opt = parse(&["resolve", "firefox", "--size", "48", "--icon-theme", "Papirus"]);
        assert_eq!(opt.icon_theme.as_deref(), Some("Papirus"));
        assert_eq!(opt.action, Action::Resolve { name: "firefox".to_owned(), size: Some(48), theme: None });
    }

    #[test]
    fn test_flags_override_config() {
        let opt = parse(&["--icon-size", "32", "daemon"]);
        let mut config = Config { icon_theme: Some("Adwaita".to_owned()), ..Config::default() };
        opt.apply_to(&mut config);
        assert_eq!(config.icon_size, 32);
        assert_eq!(config.icon_theme.as_deref(), Some("Adwaita"));
    }

    #[test]
    fn test_overrides_are_validated() {
        let opt = parse(&["--icon-size", "0", "daemon"]);
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        opt.apply_to(&mut config);
        assert!(config.validate().is_err());

        let opt = parse(&["--icon-size=-8", "themes"]);
        let mut config = Config::default();
        opt.apply_to(&mut config);
        assert!(config.validate().is_err());
    }
}
