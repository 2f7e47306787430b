use anyhow::{Context, Result};
use icon_theme::{BaseDirs, IconThemes};

mod config;
mod daemon;
mod opts;
mod paths;
mod render;

fn main() {
    let opts: opts::Opt = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("traybar"), log_level_filter)
            .filter(Some("tray_engine"), log_level_filter)
            .filter(Some("icon_theme"), log_level_filter)
            .init();
    }

    if let Err(err) = run(opts) {
        eprintln!("Error: {:?}", err);
        std::process::exit(1);
    }
}

fn run(opts: opts::Opt) -> Result<()> {
    let config_file = match &opts.config_path {
        Some(path) => path.clone(),
        None => paths::default_config_file()?,
    };
    let mut config = config::Config::load(&config_file).context("Failed to load configuration")?;
    opts.apply_to(&mut config);
    config.validate()?;
    log::debug!("Using configuration {:?}", config);

    match opts.action {
        opts::Action::Daemon => daemon::run(config),
        opts::Action::Resolve { name, size, theme } => {
            let themes = IconThemes::load();
            let size = size.unwrap_or(config.icon_size);
            if size <= 0 {
                anyhow::bail!("Icon size must be positive, got {}", size);
            }
            let theme = theme.or(config.icon_theme);
            match themes.resolve(&name, size, theme.as_deref()) {
                Some(icon) => {
                    println!("{} ({}-{})", icon.path.display(), icon.min_size, icon.max_size);
                    Ok(())
                }
                None => anyhow::bail!("No icon named {:?} found at size {}", name, size),
            }
        }
        opts::Action::Themes => {
            let index = IconThemes::load().index();
            for theme in index.themes() {
                print!("{}\t{}", theme.name, theme.dir);
                if !theme.inherits.is_empty() {
                    print!("\tinherits {}", theme.inherits.join(","));
                }
                println!();
            }
            Ok(())
        }
        opts::Action::Basedirs => {
            for dir in BaseDirs::from_env().iter() {
                println!("{}", dir.display());
            }
            Ok(())
        }
    }
}
