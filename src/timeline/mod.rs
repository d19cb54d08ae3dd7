//! Timeline layer: the per-map manifest of overlay nodes, request contexts,
//! and the tile resolution engine that walks them.

pub mod context;
pub mod manifest;
pub mod tiles;

pub use context::TimelineContext;
pub use manifest::{
    clamp_index, DeleteOutcome, InsertOutcome, Manifest, TimelineNode, TimelineService,
    DEFAULT_TIMELINE_NODES, MANIFEST_VERSION, MIN_TIMELINE_NODES,
};
pub use tiles::{EffectiveMeta, TileService, WriteOpts};
