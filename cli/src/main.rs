//! E-mobility fleet service CLI
//!
//! Headless fleet coordination service suitable for deployment as a
//! systemd service, Docker container, or standalone process.
//!
//! ```sh
//! # Run with default config (~/.config/emobility-fleet/config.toml)
//! fleet-service --topology fleet.toml
//!
//! # Validate config and topology, print the status tree and exit
//! fleet-service --config /etc/emobility-fleet/config.toml --topology fleet.toml --check
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use emobility_fleet::config::AppConfig;
use emobility_fleet::infrastructure::topology::Topology;
use emobility_fleet::runtime::FleetRuntime;
use emobility_fleet::shared::listen_for_shutdown_signals;
use emobility_fleet::telemetry::init_tracing;
use emobility_fleet::Network;

/// E-mobility fleet coordination service.
#[derive(Parser, Debug)]
#[command(
    name = "fleet-service",
    version,
    about = "Coordination engine for EV charging fleets",
    long_about = "Keeps the status of a charging fleet consistent across operators, pools, \
                  stations and supply points, and dispatches reservations and remote \
                  start/stop commands.\n\n\
                  Default config: ~/.config/emobility-fleet/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the fleet topology file (TOML).
    #[arg(short, long)]
    topology: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate configuration and topology, print the status tree and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli
        .config
        .unwrap_or_else(emobility_fleet::default_config_path);

    let (mut config, load_error) = if config_path.exists() {
        match AppConfig::load(&config_path) {
            Ok(cfg) => (cfg, None),
            Err(e) => (AppConfig::default(), Some(e)),
        }
    } else {
        (AppConfig::default(), None)
    };

    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    init_tracing(&config.logging);

    match load_error {
        Some(e) if cli.check => {
            error!("Invalid configuration {}: {}", config_path.display(), e);
            return Err(e.into());
        }
        Some(e) => {
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
        }
        None if config_path.exists() => {
            info!("Configuration loaded from {}", config_path.display());
        }
        None => info!("No configuration at {}, using defaults", config_path.display()),
    }
    if let Some(ref level) = cli.log_level {
        info!("CLI override: log_level = {}", level);
    }

    // ── Topology ───────────────────────────────────────────────
    let topology = match cli.topology {
        Some(ref path) => {
            let topology = Topology::load(path).map_err(|e| {
                error!("Failed to load topology from {}: {}", path.display(), e);
                e
            })?;
            info!("Topology loaded from {}", path.display());
            Some(topology)
        }
        None => None,
    };

    // ── Start ──────────────────────────────────────────────────
    let runtime = FleetRuntime::start(config, topology.as_ref())?;

    if cli.check {
        println!("✅ Configuration is valid");
        println!("   Config file : {}", config_path.display());
        println!("   Network     : {}", runtime.network.id());
        println!("   Aggregation : {}", runtime.config.fleet.status_aggregation);
        println!("   Log level   : {}", runtime.config.logging.level);
        println!();
        print_status_tree(&runtime.network);
        runtime.shutdown().await;
        return Ok(());
    }

    let shutdown = runtime.shutdown_signal();
    tokio::spawn(listen_for_shutdown_signals(shutdown.clone()));

    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    shutdown.wait().await;
    runtime.shutdown().await;

    Ok(())
}

fn print_status_tree(network: &Network) {
    println!(
        "{} [{} / {}]",
        network.id(),
        network.status().value,
        network.admin_status().value
    );
    for operator in network.operators() {
        println!(
            "└─ {} [{} / {}]",
            operator.id(),
            operator.status().value,
            operator.admin_status().value
        );
        for pool in operator.pools() {
            println!(
                "   └─ {} [{} / {}]",
                pool.id(),
                pool.status().value,
                pool.admin_status().value
            );
            for station in pool.stations() {
                println!(
                    "      └─ {} [{} / {}]",
                    station.id(),
                    station.status().value,
                    station.admin_status().value
                );
                for sp in station.supply_points() {
                    println!(
                        "         └─ {} [{} / {}]",
                        sp.id(),
                        sp.status().value,
                        sp.admin_status().value
                    );
                }
            }
        }
    }
}
