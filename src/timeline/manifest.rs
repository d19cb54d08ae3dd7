//! Timeline manifest: the ordered list of overlay nodes for a map.
//!
//! Nodes are addressed externally by 1-based position and internally by a
//! stable opaque id. The manifest is the source of truth for the node list;
//! overlay storage cleanup after a node deletion is best-effort.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::error::{Error, Result};
use crate::core::utils::now_ms;
use crate::storage::locks::LockRegistry;
use crate::storage::tile_store::{MapId, TileStore};

/// The manifest never shrinks below this many nodes.
pub const MIN_TIMELINE_NODES: usize = 1;

/// Node count of a freshly created manifest.
pub const DEFAULT_TIMELINE_NODES: usize = 1;

/// Persisted manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// One overlay slot in the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineNode {
    /// Stable opaque id; names the node's overlay storage.
    pub id: String,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: u64,
}

impl TimelineNode {
    fn fresh(now: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            created_at: now,
        }
    }
}

/// Per-map timeline manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version.
    pub version: u32,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: u64,
    /// Last mutation timestamp, epoch milliseconds.
    pub updated_at: u64,
    /// Timeline nodes in order.
    pub nodes: Vec<TimelineNode>,
}

impl Manifest {
    /// A fresh manifest with the default node count.
    pub fn with_default_nodes(now: u64) -> Self {
        Self {
            version: MANIFEST_VERSION,
            created_at: now,
            updated_at: now,
            nodes: (0..DEFAULT_TIMELINE_NODES)
                .map(|_| TimelineNode::fresh(now))
                .collect(),
        }
    }

    /// Number of timeline nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the node list is empty. Never true for a persisted manifest.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at a 1-based position.
    pub fn node_at(&self, index: usize) -> Option<&TimelineNode> {
        index.checked_sub(1).and_then(|i| self.nodes.get(i))
    }
}

/// Map any requested position into `[1, len]`.
///
/// Missing input defaults to 1; anything below clamps to 1, anything above
/// clamps to the last node. Resolution can therefore never index out of
/// range.
pub fn clamp_index(requested: Option<i64>, len: usize) -> usize {
    let len = len.max(MIN_TIMELINE_NODES);
    match requested {
        None => 1,
        Some(v) if v < 1 => 1,
        Some(v) if v as u64 >= len as u64 => len,
        Some(v) => v as usize,
    }
}

/// Result of inserting a node.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// The manifest after the insert.
    pub manifest: Manifest,
    /// 1-based position of the new node (`after_index + 1`).
    pub inserted_index: usize,
    /// The new node.
    pub node: TimelineNode,
}

/// Result of deleting a node.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    /// The manifest after the delete.
    pub manifest: Manifest,
    /// The removed node.
    pub removed: TimelineNode,
}

/// Manifest CRUD over a tile store, serialized by the per-map manifest lock.
#[derive(Debug)]
pub struct TimelineService<S> {
    store: Arc<S>,
    locks: Arc<LockRegistry>,
}

impl<S> Clone for TimelineService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: TileStore> TimelineService<S> {
    /// Create a service over shared storage and locks.
    pub fn new(store: Arc<S>, locks: Arc<LockRegistry>) -> Self {
        Self { store, locks }
    }

    /// Return the map's manifest, creating a default one atomically on first
    /// access. Concurrent first-accesses serialize on the manifest lock and
    /// observe a single manifest.
    pub async fn get_or_create(&self, map: &MapId) -> Result<Manifest> {
        if let Some(manifest) = self.store.read_manifest(map).await? {
            return Ok(manifest);
        }
        let _guard = self.locks.lock_manifest(map).await;
        self.load_or_default_locked(map).await
    }

    /// Create a new node spliced immediately after 1-based `after_index`.
    pub async fn insert_after(&self, map: &MapId, after_index: usize) -> Result<InsertOutcome> {
        let _guard = self.locks.lock_manifest(map).await;
        let mut manifest = self.load_or_default_locked(map).await?;

        if after_index < 1 || after_index > manifest.len() {
            return Err(Error::invalid_argument(format!(
                "insert position {} out of range 1..={}",
                after_index,
                manifest.len()
            )));
        }

        let now = now_ms();
        let node = TimelineNode::fresh(now);
        manifest.nodes.insert(after_index, node.clone());
        manifest.updated_at = now;
        self.store.write_manifest(map, &manifest).await?;

        info!(map = %map, node = %node.id, index = after_index + 1, "inserted timeline node");
        Ok(InsertOutcome {
            manifest,
            inserted_index: after_index + 1,
            node,
        })
    }

    /// Append a new node at the end of the timeline. The tail position is
    /// resolved under the manifest lock, so a concurrent insert or delete
    /// cannot turn the append into an out-of-range rejection.
    pub async fn append(&self, map: &MapId) -> Result<InsertOutcome> {
        let _guard = self.locks.lock_manifest(map).await;
        let mut manifest = self.load_or_default_locked(map).await?;

        let now = now_ms();
        let node = TimelineNode::fresh(now);
        manifest.nodes.push(node.clone());
        manifest.updated_at = now;
        self.store.write_manifest(map, &manifest).await?;

        let inserted_index = manifest.len();
        info!(map = %map, node = %node.id, index = inserted_index, "appended timeline node");
        Ok(InsertOutcome {
            manifest,
            inserted_index,
            node,
        })
    }

    /// Remove the node at 1-based `index` and recursively delete its overlay
    /// storage. The last remaining node can never be deleted.
    pub async fn delete_at(&self, map: &MapId, index: usize) -> Result<DeleteOutcome> {
        let _guard = self.locks.lock_manifest(map).await;
        let mut manifest = self.load_or_default_locked(map).await?;

        if index < 1 || index > manifest.len() {
            return Err(Error::invalid_argument(format!(
                "delete position {} out of range 1..={}",
                index,
                manifest.len()
            )));
        }
        if manifest.len() <= MIN_TIMELINE_NODES {
            return Err(Error::precondition_failed(
                "cannot delete the last timeline node",
            ));
        }

        let removed = manifest.nodes.remove(index - 1);
        manifest.updated_at = now_ms();
        self.store.write_manifest(map, &manifest).await?;

        // The manifest write is authoritative; storage cleanup is
        // best-effort and idempotent.
        if let Err(err) = self.store.delete_node_dir(map, &removed.id).await {
            warn!(map = %map, node = %removed.id, error = %err, "overlay cleanup failed");
        }

        info!(map = %map, node = %removed.id, index, "deleted timeline node");
        Ok(DeleteOutcome { manifest, removed })
    }

    /// Load the manifest, creating the default one if absent. The caller
    /// must hold the manifest lock.
    async fn load_or_default_locked(&self, map: &MapId) -> Result<Manifest> {
        if let Some(manifest) = self.store.read_manifest(map).await? {
            return Ok(manifest);
        }
        let manifest = Manifest::with_default_nodes(now_ms());
        self.store.write_manifest(map, &manifest).await?;
        info!(map = %map, nodes = manifest.len(), "created default timeline manifest");
        Ok(manifest)
    }
}
