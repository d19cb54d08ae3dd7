//! Parent regeneration and upward propagation.
//!
//! After a leaf cell changes, every ancestor up to z=0 is recomposed so
//! zoomed-out views reflect the edit. Propagation runs level by level and
//! deduplicates shared parents, so a batch of sibling leaves composes each
//! ancestor exactly once.

use std::collections::BTreeSet;

use bytes::Bytes;
use tracing::debug;

use crate::core::coords::TileCoord;
use crate::core::error::{Error, Result};
use crate::pyramid::compose::compose_parent;
use crate::storage::meta::TileRecord;
use crate::storage::tile_store::{MapId, TileKey, TileStore};
use crate::timeline::context::TimelineContext;
use crate::timeline::tiles::{TileService, WriteOpts};

/// Pyramid maintenance over a tile service.
///
/// Maps listed in `lazy_maps` opt out of eager regeneration; their parents
/// are recomposed only when explicitly requested.
#[derive(Debug)]
pub struct PyramidService<S> {
    tiles: TileService<S>,
    lazy_maps: Vec<String>,
}

impl<S> Clone for PyramidService<S> {
    fn clone(&self) -> Self {
        Self {
            tiles: self.tiles.clone(),
            lazy_maps: self.lazy_maps.clone(),
        }
    }
}

impl<S: TileStore> PyramidService<S> {
    /// Create a service; `lazy_maps` comes from `pyramid.lazy_maps` config.
    pub fn new(tiles: TileService<S>, lazy_maps: Vec<String>) -> Self {
        Self { tiles, lazy_maps }
    }

    /// Whether leaf edits on this map trigger eager parent regeneration.
    pub fn eager(&self, map: &MapId) -> bool {
        !self.lazy_maps.iter().any(|m| m == map.as_str())
    }

    /// Recompose one baseline parent from its baseline children.
    ///
    /// Returns `None` without writing when no child has any bytes, so bulk
    /// imports do not mint empty parents over untouched regions.
    pub async fn generate_parent(
        &self,
        map: &MapId,
        parent: TileCoord,
    ) -> Result<Option<TileRecord>> {
        let children = parent
            .children()
            .ok_or_else(|| Error::invalid_argument("leaf tiles have no children"))?;

        let mut buffers: [Option<Bytes>; 4] = [None, None, None, None];
        for (slot, child) in buffers.iter_mut().zip(children) {
            let key = TileKey::baseline(map.clone(), child);
            *slot = self.tiles.store().read_tile(&key).await?;
        }
        if buffers.iter().all(Option::is_none) {
            return Ok(None);
        }

        let bytes = compose_parent(&buffers);
        let key = TileKey::baseline(map.clone(), parent);
        let record = self.tiles.write_ready(&key, &bytes, WriteOpts::default()).await?;
        Ok(Some(record))
    }

    /// Recompose one parent at the context's timeline node.
    ///
    /// Children are resolved through the timeline, so a parent reflects
    /// inherited content as well as the node's own edits. When every child
    /// resolves to nothing the parent is tombstoned at this node: the region
    /// was emptied here, and older parents must not show through.
    pub async fn generate_parent_at_node(
        &self,
        context: &TimelineContext,
        parent: TileCoord,
    ) -> Result<TileRecord> {
        let children = parent
            .children()
            .ok_or_else(|| Error::invalid_argument("leaf tiles have no children"))?;

        let mut buffers: [Option<Bytes>; 4] = [None, None, None, None];
        for (slot, child) in buffers.iter_mut().zip(children) {
            *slot = self.tiles.resolve_effective_buffer(context, child).await?;
        }

        let key = TileKey::new(context.map.clone(), context.node_namespace(), parent);
        if buffers.iter().all(Option::is_none) {
            return self.tiles.mark_tombstone(&key).await;
        }

        let bytes = compose_parent(&buffers);
        self.tiles.write_ready(&key, &bytes, WriteOpts::default()).await
    }

    /// Propagate a batch of leaf edits upward at the context's node,
    /// composing each shared ancestor once per level. No-op on lazy maps.
    pub async fn propagate(&self, context: &TimelineContext, leaves: &[TileCoord]) -> Result<()> {
        if !self.eager(&context.map) {
            debug!(map = %context.map, "eager regeneration disabled; skipping propagation");
            return Ok(());
        }
        let mut level: BTreeSet<TileCoord> = leaves.iter().filter_map(|c| c.parent()).collect();
        while !level.is_empty() {
            for &parent in &level {
                self.generate_parent_at_node(context, parent).await?;
            }
            level = level.iter().filter_map(|c| c.parent()).collect();
        }
        Ok(())
    }

    /// Baseline counterpart of [`propagate`](Self::propagate), for imports
    /// that write directly into the baseline store.
    pub async fn propagate_baseline(&self, map: &MapId, leaves: &[TileCoord]) -> Result<()> {
        if !self.eager(map) {
            debug!(map = %map, "eager regeneration disabled; skipping propagation");
            return Ok(());
        }
        let mut level: BTreeSet<TileCoord> = leaves.iter().filter_map(|c| c.parent()).collect();
        while !level.is_empty() {
            for &parent in &level {
                self.generate_parent(map, parent).await?;
            }
            level = level.iter().filter_map(|c| c.parent()).collect();
        }
        Ok(())
    }
}
