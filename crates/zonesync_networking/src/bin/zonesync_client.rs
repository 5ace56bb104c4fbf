//! # Zonesync Client
//!
//! Connects to a server, optionally loads a zone, and drops a marker
//! entity into it once the zone is synced.
//!
//! ```bash
//! zonesync_client --address 127.0.0.1 --port 7777 --zone harbor
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zonesync_core::{Catalog, HeadlessSceneHost};
use zonesync_networking::{TcpTransport, World, WorldConfig, WorldEvent};
use zonesync_shared::{EntityInfo, ZoneId, DEFAULT_PORT};

const DEFAULT_CATALOG: &str = include_str!("../../../../config/catalog.toml");
const MARKER_TEMPLATE: &str = "marker";

struct Args {
    address: String,
    port: u16,
    zone: Option<String>,
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
    if let Err(err) = world.join_as_client(&args.address, args.port) {
        tracing::error!(%err, address = %args.address, port = args.port, "cannot join world");
        return ExitCode::FAILURE;
    }

    loop {
        scene.run_deferred();
        for event in world.drain_events() {
            match event {
                WorldEvent::JoinedWorld { player_id } => {
                    tracing::info!(player_id, "joined world");
                    if let Some(zone) = &args.zone {
                        if let Err(err) = world.load_zone_by_name(zone) {
                            tracing::error!(%err, zone = %zone, "zone request failed");
                        }
                    }
                }
                WorldEvent::ZoneLoaded { zone_id } => {
                    tracing::info!(zone_id, "zone loaded");
                    spawn_marker(&world, zone_id);
                }
                WorldEvent::EntityCreated { network_id, zone_id } => {
                    tracing::info!(network_id, zone_id, "entity mirrored");
                }
                WorldEvent::Disconnected => {
                    tracing::info!("server closed the connection");
                    return ExitCode::SUCCESS;
                }
                other => tracing::debug!(event = ?other, "world event"),
            }
        }
        thread::sleep(poll_interval);
    }
}

fn spawn_marker(world: &World, zone_id: ZoneId) {
    let Some(template_id) = world.catalog().template_id_by_name(MARKER_TEMPLATE) else {
        return;
    };
    let Some(player_id) = world.local_player_id() else {
        return;
    };
    let info = EntityInfo::new(template_id, zone_id)
        .with_name(format!("marker_{player_id}"))
        .with_owner(player_id);
    if let Err(err) = world.spawn_entity(info) {
        tracing::warn!(%err, "marker spawn failed");
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
        address: "127.0.0.1".to_string(),
        port: DEFAULT_PORT,
        zone: None,
        config: None,
        catalog: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--address" | "-a" => {
                if let Some(value) = value {
                    parsed.address = value.clone();
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if let Some(value) = value {
                    parsed.port = value.parse().unwrap_or(DEFAULT_PORT);
                    i += 1;
                }
            }
            "--zone" | "-z" => {
                if let Some(value) = value {
                    parsed.zone = Some(value.clone());
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
                println!("Usage: zonesync_client [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -a, --address <HOST>     Server address (default: 127.0.0.1)");
                println!("  -p, --port <PORT>        Server port (default: {DEFAULT_PORT})");
                println!("  -z, --zone <NAME>        Zone to load after joining");
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
