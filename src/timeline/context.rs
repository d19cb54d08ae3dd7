//! Timeline context: the resolved handle threaded through tile reads and
//! writes for one request.

use crate::core::error::{Error, Result};
use crate::storage::tile_store::{MapId, Namespace, TileStore};
use crate::timeline::manifest::{clamp_index, Manifest, TimelineNode, TimelineService};

/// A request's resolved position on a map's timeline.
///
/// `requested_index` is kept for diagnostics; `index` is the clamped 1-based
/// position that actually drives resolution.
#[derive(Debug, Clone)]
pub struct TimelineContext {
    /// Owning map.
    pub map: MapId,
    /// The raw index the client asked for, if any.
    pub requested_index: Option<i64>,
    /// Clamped 1-based timeline position.
    pub index: usize,
    /// The node at `index`.
    pub node: TimelineNode,
    /// Manifest snapshot the context was resolved against.
    pub manifest: Manifest,
}

impl TimelineContext {
    /// Overlay namespace of the context's own node.
    pub fn node_namespace(&self) -> Namespace {
        Namespace::node(self.node.id.clone())
    }

    /// Overlay namespace of the node at a 1-based position, if the position
    /// exists in this context's manifest snapshot.
    pub fn namespace_at(&self, position: usize) -> Option<Namespace> {
        self.manifest
            .node_at(position)
            .map(|node| Namespace::node(node.id.clone()))
    }
}

impl<S: TileStore> TimelineService<S> {
    /// Load the manifest (creating it on first access), clamp the requested
    /// position, and look up the addressed node.
    pub async fn resolve_context(
        &self,
        map: &MapId,
        requested_index: Option<i64>,
    ) -> Result<TimelineContext> {
        let manifest = self.get_or_create(map).await?;
        let index = clamp_index(requested_index, manifest.len());
        let node = manifest
            .node_at(index)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("timeline node at position {index}")))?;
        Ok(TimelineContext {
            map: map.clone(),
            requested_index,
            index,
            node,
            manifest,
        })
    }
}
