//! # Zonesync Server
//!
//! Headless authoritative world server over TCP.
//!
//! ```bash
//! zonesync_server --port 7777 --catalog config/catalog.toml
//!
//! # Verbose protocol trace
//! RUST_LOG=zonesync_networking=debug zonesync_server
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zonesync_core::{Catalog, HeadlessSceneHost};
use zonesync_networking::{TcpTransport, World, WorldConfig, WorldEvent};
use zonesync_shared::DEFAULT_PORT;

const DEFAULT_CATALOG: &str = include_str!("../../../../config/catalog.toml");

struct Args {
    port: u16,
    config: Option<String>,
    catalog: Option<String>,
}

fn main() -> ExitCode {
    let Some(args) = parse_args() else {
        return ExitCode::SUCCESS;
    };
    init_tracing();

    let config = match &args.config {
        Some(path) => WorldConfig::from_toml_file(path),
        None => Ok(WorldConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid world configuration");
            return ExitCode::FAILURE;
        }
    };
    let catalog = match &args.catalog {
        Some(path) => Catalog::from_toml_file(path),
        None => Catalog::from_toml_str(DEFAULT_CATALOG),
    };
    let catalog = match catalog {
        Ok(catalog) => catalog,
        Err(err) => {
            tracing::error!(%err, "invalid catalog");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        port = args.port,
        zones = catalog.zone_count(),
        templates = catalog.template_count(),
        "starting zonesync server"
    );

    let poll_interval = config.poll_interval();
    let scene = Arc::new(HeadlessSceneHost::new());
    let world = match World::new(
        config,
        catalog,
        Arc::new(TcpTransport::new()),
        Arc::clone(&scene) as _,
    ) {
        Ok(world) => world,
        Err(err) => {
            tracing::error!(%err, "cannot create world");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = world.start_server(args.port) {
        tracing::error!(%err, "cannot start server");
        return ExitCode::FAILURE;
    }

    // Runs until the process is killed.
    loop {
        scene.run_deferred();
        for event in world.drain_events() {
            log_event(&event);
        }
        thread::sleep(poll_interval);
    }
}

fn log_event(event: &WorldEvent) {
    match event {
        WorldEvent::PlayerConnected { player_id } => {
            tracing::info!(player_id, "player connected");
        }
        WorldEvent::PlayerDisconnected { player_id } => {
            tracing::info!(player_id, "player disconnected");
        }
        WorldEvent::PlayerEnteredZone { zone_id, player_id } => {
            tracing::info!(zone_id, player_id, "player entered zone");
        }
        other => tracing::debug!(event = ?other, "world event"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// Returns `None` when only help was requested.
fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        port: DEFAULT_PORT,
        config: None,
        catalog: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--port" | "-p" => {
                if let Some(value) = value {
                    parsed.port = value.parse().unwrap_or(DEFAULT_PORT);
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if let Some(value) = value {
                    parsed.config = Some(value.clone());
                    i += 1;
                }
            }
            "--catalog" => {
                if let Some(value) = value {
                    parsed.catalog = Some(value.clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: zonesync_server [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --port <PORT>        TCP port to listen on (default: {DEFAULT_PORT})");
                println!("  -c, --config <FILE>      World configuration (TOML)");
                println!("      --catalog <FILE>     Zone and template catalog (TOML)");
                println!("  -h, --help               Show this help");
                return None;
            }
            other => eprintln!("ignoring unknown argument `{other}`"),
        }
        i += 1;
    }
    Some(parsed)
}
