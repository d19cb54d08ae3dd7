//! Infinimap - A Versioned Infinite Tile Map Server
//!
//! Infinimap serves an infinite tile-based raster map over HTTP. Tiles are
//! generated on demand by an external image model, cached as flat WebP
//! files, and versioned through a linear timeline of overlay nodes layered
//! over a shared baseline store.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod api;
pub mod generation;
pub mod pyramid;
pub mod storage;
pub mod timeline;

// Re-export commonly used items for convenience
pub use core::{Config, Error, Result};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing from the environment and the configured log level.
pub fn init(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Initializing {} v{}", NAME, VERSION);
    Ok(())
}
