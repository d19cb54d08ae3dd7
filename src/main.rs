//! Infinimap Tile Map Server
//!
//! Versioned infinite tile map served over HTTP, with on-demand generation
//! through an external image model.

use clap::{Arg, Command};
use infinimap::api::{start_server, AppState};
use infinimap::core::config::{Config, StorageBackend};
use infinimap::generation::{GenerationService, Generator};
use infinimap::pyramid::PyramidService;
use infinimap::storage::{FsTileStore, LockRegistry, MemTileStore, TileStore};
use infinimap::timeline::{TimelineService, TileService};
use infinimap::Result;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("infinimap")
        .version(infinimap::VERSION)
        .about("Versioned infinite tile map server.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("http-addr")
                .long("http-addr")
                .value_name("ADDR")
                .help("HTTP server bind address"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory path"),
        )
        .arg(
            Arg::new("storage-backend")
                .long("storage-backend")
                .value_name("TYPE")
                .help("Storage backend type (disk, memory)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .get_matches();

    // Load configuration
    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        Config::from_file(config_path)?
    } else {
        Config::load()?
    };

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    infinimap::init(&config)?;
    info!("Starting Infinimap v{}", infinimap::VERSION);

    match config.storage.backend {
        StorageBackend::Disk => {
            std::fs::create_dir_all(&config.storage.data_dir)?;
            let store = Arc::new(FsTileStore::new(config.storage.data_dir.clone()));
            info!("Storage initialized: disk at {}", config.storage.data_dir.display());
            run(config, store).await
        }
        StorageBackend::Memory => {
            let store = Arc::new(MemTileStore::new());
            info!("Storage initialized: memory");
            run(config, store).await
        }
    }
}

async fn run<S: TileStore>(config: Config, store: Arc<S>) -> Result<()> {
    let locks = Arc::new(LockRegistry::new());
    let tiles = TileService::new(store.clone(), locks.clone());
    let timeline = TimelineService::new(store, locks);
    let pyramid = PyramidService::new(tiles.clone(), config.pyramid.lazy_maps.clone());
    let generator = Arc::new(Generator::from_config(&config.generation)?);
    let generation = GenerationService::new(
        tiles.clone(),
        pyramid.clone(),
        generator,
        config.generation.clone(),
    );
    info!("Generation backend: {:?}", config.generation.backend);

    let addr = config.server.http_addr;
    let state = AppState {
        config: Arc::new(config),
        tiles,
        timeline,
        pyramid,
        generation,
    };

    start_server(addr, state).await?;
    info!("Shutdown complete");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(addr) = matches.get_one::<String>("http-addr") {
        config.server.http_addr = addr
            .parse()
            .map_err(|e| infinimap::Error::config(format!("Invalid HTTP address: {}", e)))?;
    }

    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config.storage.data_dir = dir.into();
    }

    if let Some(backend) = matches.get_one::<String>("storage-backend") {
        config.storage.backend = match backend.as_str() {
            "disk" => StorageBackend::Disk,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(infinimap::Error::config(format!(
                    "Invalid storage backend: {}. Valid options: disk, memory",
                    other
                )))
            }
        };
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    Ok(())
}
