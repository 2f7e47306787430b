use std::sync::Arc;

use anyhow::{Context, Result};
use icon_theme::IconThemes;
use tokio::signal::unix::{signal, SignalKind};
use tray_engine::TrayEngine;

use crate::{config::Config, render};

pub fn run(config: Config) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("traybar-worker")
        .enable_all()
        .build()
        .context("Failed to initialize tokio runtime")?;
    rt.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let themes = Arc::new(IconThemes::load());
    let mut reload = signal(SignalKind::user_defined1()).context("Failed to listen for SIGUSR1")?;

    let engine = match TrayEngine::start(&config.protocols()).await {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to start the system tray, it is disabled for this session: {}", e);
            tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
            return Ok(());
        }
    };
    let mut redraw = engine.redraw_requests();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                break;
            }
            _ = reload.recv() => {
                log::info!("Reloading icon themes");
                themes.refresh();
                print_tray(&engine, &themes, &config);
            }
            changed = redraw.changed() => {
                if changed.is_err() {
                    break;
                }
                print_tray(&engine, &themes, &config);
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn print_tray(engine: &TrayEngine, themes: &IconThemes, config: &Config) {
    let mut items = engine.snapshot();
    render::sort_by_category(&mut items);
    println!("--- {} items", items.len());
    for item in &items {
        let icon = render::item_icon(item, themes, config.icon_size, config.icon_theme.as_deref());
        println!("{}", render::describe(item, icon.as_ref()));
    }
}
