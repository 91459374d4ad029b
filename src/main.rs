//! Cinewin - Wayland windowing for a living-room media center
//!
//! Opens a fullscreen-first window on a Wayland compositor and drives it
//! the way a media center's main loop does, rendering frames in software.
//!
//! # Features
//! - xdg-shell, xdg-shell-unstable-v6 and wl_shell with automatic fallback
//! - webOS shell on webOS TVs
//! - HiDPI buffer scale negotiation
//! - Client-side decorations when windowed
//! - Frame pacing and latency measurement via presentation-time
//! - HDR metadata through color-management-v1
//! - TOML configuration

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod render;

use cinewin_core::config::Config;

/// Cinewin - Wayland windowing for a media center
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Run in debug mode with verbose logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Print default configuration to stdout
    #[arg(long)]
    print_default_config: bool,

    /// Start fullscreen regardless of the configuration
    #[arg(short, long)]
    fullscreen: bool,

    /// Use the webOS shell
    #[arg(long)]
    webos: bool,

    /// Exit after rendering this many frames
    #[arg(long)]
    frames: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the level flags.
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    info!("Cinewin v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.print_default_config {
        println!("{}", Config::default_config_string());
        return Ok(());
    }

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        },
        Err(e) if args.validate => return Err(e.into()),
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        },
    };

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    config.video_screen.fullscreen |= args.fullscreen;
    config.platform.webos |= args.webos;

    run(config, args.frames)
}

#[cfg(feature = "wayland")]
fn run(config: Config, frames: Option<u64>) -> Result<()> {
    let connection = cinewin_backend_wayland::connect()?;
    let mut app = app::App::new(connection, config)?;
    app.run(frames)
}

#[cfg(not(feature = "wayland"))]
fn run(_config: Config, _frames: Option<u64>) -> Result<()> {
    anyhow::bail!("Wayland backend not compiled in. Rebuild with --features wayland");
}
