//! Storage and persistence layer: tile byte/metadata stores, persisted
//! record types, and the advisory lock registry.

pub mod locks;
pub mod meta;
pub mod tile_store;

pub use locks::LockRegistry;
pub use meta::{Opinion, TileRecord, TileStatus};
pub use tile_store::{FsTileStore, MapId, MemTileStore, Namespace, TileKey, TileStore};
