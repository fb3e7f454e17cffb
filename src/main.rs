// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use dmxplay::config;
use dmxplay::console::{self, Console};
use dmxplay::dmx::{self, manual::Manual};
use dmxplay::engine::Engine;
use dmxplay::media::Catalog;
use dmxplay::router::Router;
use dmxplay::{surface, verify};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Operator commands buffered between the console and the engine.
const COMMAND_QUEUE_SIZE: usize = 16;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=DMX controlled media player
After=network-online.target

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/dmxplay
ExecStart=/usr/local/bin/dmxplay start "$DMXPLAY_CONFIG"

[Install]
WantedBy=multi-user.target
Alias=dmxplay.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A DMX controlled media player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start will run the player with its configured source.
    Start {
        /// The path to the player config.
        player_path: String,
    },
    /// Lists the numbered media in the given folder.
    Media {
        /// The path to the media folder.
        path: String,
    },
    /// Verifies a player config and the media folders it uses.
    Verify {
        /// The path to the player config.
        player_path: String,
    },
    /// Lists the displays known to the configured surface.
    Displays {
        /// The path to the player config.
        player_path: String,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

/// Waits for ctrl-c, or for SIGTERM from a service manager.
async fn shutdown_signal() -> Result<(), io::Error> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Standard output belongs to the renderer stream.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { player_path } => {
            let config = config::Player::deserialize(&PathBuf::from(player_path))?;
            let engine = Engine::from_config(&config, surface::get(&config.surface())?)?;
            let router = Arc::new(Router::new(engine.clone()));
            let console = Console::new(
                router.clone(),
                Arc::new(Manual::new(config.universe())),
                dmx::get_listener(&config.listen(), config.universe()),
            );
            console.switch(config.source()).await;

            let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
            console::monitor_stdin(commands_tx)?;
            tokio::select! {
                _ = console.run(commands_rx) => {}
                result = shutdown_signal() => {
                    result?;
                    info!("Stopping.");
                }
            }

            router.unbind().await;
            engine.shutdown().await;
        }
        Commands::Media { path } => {
            let catalog = Catalog::try_scan(&PathBuf::from(&path))?;

            if catalog.is_empty() {
                println!("No media found in {}.", path);
                return Ok(());
            }

            print!("{}", catalog);
            for (selector, media) in catalog.duplicates() {
                println!(
                    "Selector {:03} is claimed by {} files, {} wins.",
                    selector,
                    media.len(),
                    media.first().map(|media| media.filename()).unwrap_or_default()
                );
            }
        }
        Commands::Verify { player_path } => {
            let config = config::Player::deserialize(&PathBuf::from(player_path))?;
            let report = verify::verify(&config);
            verify::print_report(&report, &config);
            if report.has_errors() {
                return Err("verification failed".into());
            }
        }
        Commands::Displays { player_path } => {
            let config = config::Player::deserialize(&PathBuf::from(player_path))?;
            let displays = config.surface().displays();

            if displays.is_empty() {
                println!("No displays found.");
                return Ok(());
            }

            println!("Displays:");
            for (i, display) in displays.iter().enumerate() {
                println!("{}. {}", i + 1, display);
            }
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
