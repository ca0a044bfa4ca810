//! spotify-widget - now-playing backend for Spotify
//!
//! Keeps an OAuth token pair alive without user interaction, polls the
//! current playback state and forwards simple control commands.

mod api;
mod app;
mod auth;
mod config;
mod display;
mod error;
mod models;
mod playback;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::playback::Command;

#[derive(Parser)]
#[command(name = "spotify-widget")]
#[command(about = "Now-playing widget backend for Spotify", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Spotify client ID (overrides config file)
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Spotify client secret (overrides config file)
    #[arg(long, global = true)]
    client_secret: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum VolumeDirection {
    Up,
    Down,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize with Spotify through the browser
    Authorize,

    /// Poll and display playback, reading commands from stdin
    Run {
        /// Poll less often
        #[arg(long)]
        low_power: bool,
    },

    /// Show current authentication status
    Status,

    /// Clear saved tokens
    Logout,

    /// Resume playback
    Play,

    /// Pause playback
    Pause,

    /// Skip to the next track
    Next,

    /// Go back to the previous track
    Previous,

    /// Change the volume of the active device
    Volume {
        direction: VolumeDirection,

        /// Step in percent (overrides config)
        #[arg(short, long)]
        step: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if cli.client_id.is_some() {
        config.client_id = cli.client_id;
    }
    if cli.client_secret.is_some() {
        config.client_secret = cli.client_secret;
    }

    match cli.command {
        Commands::Authorize => {
            tracing::info!("Starting authorization flow...");
            auth::authorize(&config).await?;
        }
        Commands::Run { low_power } => {
            config.low_power_mode |= low_power;
            app::run(&config).await?;
        }
        Commands::Status => {
            auth::status(&config).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout(&config).await?;
        }
        Commands::Play => app::control(&config, Command::Play).await?,
        Commands::Pause => app::control(&config, Command::Pause).await?,
        Commands::Next => app::control(&config, Command::Next).await?,
        Commands::Previous => app::control(&config, Command::Previous).await?,
        Commands::Volume { direction, step } => {
            if let Some(step) = step {
                config.volume_step = step;
            }
            let command = match direction {
                VolumeDirection::Up => Command::VolumeUp,
                VolumeDirection::Down => Command::VolumeDown,
            };
            app::control(&config, command).await?;
        }
    }

    Ok(())
}
