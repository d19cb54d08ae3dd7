//! Timeline tile storage and resolution.
//!
//! Every timeline node can independently hide, replace, or inherit any cell.
//! Resolution walks node overlays from the requested position backward to
//! the baseline and returns the first definitive answer. Status resolution
//! and byte resolution intentionally diverge on PENDING: status reporting
//! stops there so in-flight generation is visible immediately, while byte
//! resolution skips it so the map keeps rendering the last good image
//! underneath.
//!
//! Writes serialize per cell on the advisory lock registry; reads take no
//! lock and tolerate transient inconsistency (the client polls).

use std::sync::Arc;

use bytes::Bytes;

use crate::core::coords::TileCoord;
use crate::core::error::Result;
use crate::core::hash::{content_hash, tile_byte_hash};
use crate::core::utils::now_ms;
use crate::storage::locks::LockRegistry;
use crate::storage::meta::{Opinion, TileRecord, TileStatus};
use crate::storage::tile_store::{TileKey, TileStore};
use crate::timeline::context::TimelineContext;

/// Optional inputs to [`TileService::write_ready`]. Omitted fields fall back
/// to the cell's prior values (or are computed).
#[derive(Debug, Clone, Default)]
pub struct WriteOpts {
    /// Precomputed content hash. Computed from seed/version/bytes if absent.
    pub hash: Option<String>,
    /// Generation seed. Falls back to the prior record's seed.
    pub seed: Option<u64>,
}

/// The effective status of a cell as seen from a timeline position.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveMeta {
    /// Resolved status.
    pub status: TileStatus,
    /// Content hash of the resolved tile, when one exists.
    pub hash: Option<String>,
    /// `updated_at` of the record that answered, if any record did.
    pub updated_at: Option<u64>,
    /// 1-based timeline position that answered; `None` for baseline answers.
    pub source_index: Option<usize>,
}

/// Per-cell tile storage operations and the resolution walks.
#[derive(Debug)]
pub struct TileService<S> {
    store: Arc<S>,
    locks: Arc<LockRegistry>,
}

impl<S> Clone for TileService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: TileStore> TileService<S> {
    /// Create a service over shared storage and locks.
    pub fn new(store: Arc<S>, locks: Arc<LockRegistry>) -> Self {
        Self { store, locks }
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Read a cell's raw record without resolution.
    pub async fn record(&self, key: &TileKey) -> Result<Option<TileRecord>> {
        self.store.read_record(key).await
    }

    /// Mark a cell as generating. Prior hash, seed, and content version are
    /// preserved so the previous content stays addressable while the job
    /// runs.
    pub async fn mark_pending(&self, key: &TileKey) -> Result<TileRecord> {
        let _guard = self.locks.lock_cell(key).await;
        let now = now_ms();
        let record = match self.store.read_record(key).await? {
            Some(mut prior) => {
                prior.status = TileStatus::Pending;
                prior.updated_at = now;
                prior
            }
            None => TileRecord::new(key.coord, TileStatus::Pending, now),
        };
        self.store.write_record(key, &record).await?;
        Ok(record)
    }

    /// Write tile bytes and mark the cell READY. Bytes land before metadata
    /// so a reader that sees the record can always find the file.
    pub async fn write_ready(
        &self,
        key: &TileKey,
        bytes: &[u8],
        opts: WriteOpts,
    ) -> Result<TileRecord> {
        let _guard = self.locks.lock_cell(key).await;
        let now = now_ms();
        let prior = self.store.read_record(key).await?;

        let content_ver = prior.as_ref().map_or(0, |p| p.content_ver) + 1;
        let seed = opts.seed.or_else(|| prior.as_ref().and_then(|p| p.seed));
        let hash = opts.hash.unwrap_or_else(|| {
            content_hash(seed.unwrap_or(0), content_ver, &tile_byte_hash(bytes))
        });

        let record = TileRecord {
            z: key.coord.z,
            x: key.coord.x,
            y: key.coord.y,
            status: TileStatus::Ready,
            hash: Some(hash),
            seed,
            content_ver,
            tombstone: false,
            created_at: prior.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };

        self.store.write_tile(key, bytes).await?;
        self.store.write_record(key, &record).await?;
        Ok(record)
    }

    /// Explicitly delete a cell at this namespace. The tombstone masks any
    /// older content during resolution.
    pub async fn mark_tombstone(&self, key: &TileKey) -> Result<TileRecord> {
        let _guard = self.locks.lock_cell(key).await;
        self.store.delete_tile(key).await?;

        let now = now_ms();
        let prior = self.store.read_record(key).await?;
        let record = TileRecord {
            z: key.coord.z,
            x: key.coord.x,
            y: key.coord.y,
            status: TileStatus::Empty,
            hash: None,
            seed: None,
            content_ver: prior.as_ref().map_or(0, |p| p.content_ver) + 1,
            tombstone: true,
            created_at: prior.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };
        self.store.write_record(key, &record).await?;
        Ok(record)
    }

    /// Roll a PENDING cell back to its prior non-pending state after a
    /// failed generation job: READY if servable bytes and a hash survive,
    /// otherwise EMPTY. No-op when the cell is not pending.
    pub async fn clear_pending(&self, key: &TileKey) -> Result<()> {
        let _guard = self.locks.lock_cell(key).await;
        let Some(mut record) = self.store.read_record(key).await? else {
            return Ok(());
        };
        if record.status != TileStatus::Pending {
            return Ok(());
        }
        let has_bytes = self.store.read_tile(key).await?.is_some();
        record.status = if record.hash.is_some() && has_bytes {
            TileStatus::Ready
        } else {
            TileStatus::Empty
        };
        record.updated_at = now_ms();
        self.store.write_record(key, &record).await
    }

    /// Resolve the effective status of a cell at the context's position.
    ///
    /// Walks node overlays from `context.index` down to 1; the first opinion
    /// wins. PENDING terminates the walk so in-flight generation is visible
    /// regardless of older history; a tombstone or EMPTY record masks
    /// everything before it. With no node opinion, the baseline answers,
    /// including a defensive probe for bytes whose metadata record is
    /// missing.
    pub async fn resolve_effective_meta(
        &self,
        context: &TimelineContext,
        coord: TileCoord,
    ) -> Result<EffectiveMeta> {
        for position in (1..=context.index).rev() {
            let Some(ns) = context.namespace_at(position) else {
                continue;
            };
            let key = TileKey::new(context.map.clone(), ns, coord);
            match Opinion::of(self.store.read_record(&key).await?) {
                Opinion::None => continue,
                Opinion::Pending(rec) => {
                    return Ok(EffectiveMeta {
                        status: TileStatus::Pending,
                        hash: rec.hash,
                        updated_at: Some(rec.updated_at),
                        source_index: Some(position),
                    })
                }
                Opinion::Cleared(rec) => {
                    return Ok(EffectiveMeta {
                        status: TileStatus::Empty,
                        hash: None,
                        updated_at: Some(rec.updated_at),
                        source_index: Some(position),
                    })
                }
                Opinion::Ready(rec) => {
                    return Ok(EffectiveMeta {
                        status: TileStatus::Ready,
                        hash: rec.hash,
                        updated_at: Some(rec.updated_at),
                        source_index: Some(position),
                    })
                }
            }
        }

        let key = TileKey::baseline(context.map.clone(), coord);
        match Opinion::of(self.store.read_record(&key).await?) {
            Opinion::Pending(rec) => Ok(EffectiveMeta {
                status: TileStatus::Pending,
                hash: rec.hash,
                updated_at: Some(rec.updated_at),
                source_index: None,
            }),
            Opinion::Ready(rec) => Ok(EffectiveMeta {
                status: TileStatus::Ready,
                hash: rec.hash,
                updated_at: Some(rec.updated_at),
                source_index: None,
            }),
            Opinion::None | Opinion::Cleared(_) => {
                // Metadata and bytes can be out of sync; bytes on disk still
                // count as servable content.
                match self.store.read_tile(&key).await? {
                    Some(bytes) => Ok(EffectiveMeta {
                        status: TileStatus::Ready,
                        hash: Some(tile_byte_hash(&bytes)),
                        updated_at: None,
                        source_index: None,
                    }),
                    None => Ok(EffectiveMeta {
                        status: TileStatus::Empty,
                        hash: None,
                        updated_at: None,
                        source_index: None,
                    }),
                }
            }
        }
    }

    /// Resolve the bytes to serve for a cell at the context's position.
    ///
    /// Same backward walk, with two deliberate differences: a PENDING
    /// overlay never terminates the walk (previously-READY content keeps
    /// rendering while a job is in flight, whether it survives in this
    /// overlay or an older one), and a READY overlay whose file is missing
    /// is skipped rather than failed (tolerates partial writes). A tombstone
    /// or EMPTY overlay returns `None` immediately; deletion is final.
    pub async fn resolve_effective_buffer(
        &self,
        context: &TimelineContext,
        coord: TileCoord,
    ) -> Result<Option<Bytes>> {
        for position in (1..=context.index).rev() {
            let Some(ns) = context.namespace_at(position) else {
                continue;
            };
            let key = TileKey::new(context.map.clone(), ns, coord);
            match Opinion::of(self.store.read_record(&key).await?) {
                Opinion::None => continue,
                Opinion::Cleared(_) => return Ok(None),
                Opinion::Ready(_) | Opinion::Pending(_) => {
                    if let Some(bytes) = self.store.read_tile(&key).await? {
                        return Ok(Some(bytes));
                    }
                    // Metadata ahead of bytes (or a pending first write);
                    // keep walking.
                }
            }
        }

        let key = TileKey::baseline(context.map.clone(), coord);
        self.store.read_tile(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tile_store::{MapId, MemTileStore, Namespace};
    use crate::timeline::manifest::TimelineService;

    struct Fixture {
        tiles: TileService<MemTileStore>,
        timeline: TimelineService<MemTileStore>,
        map: MapId,
    }

    impl Fixture {
        /// A map with `nodes` timeline nodes.
        async fn with_nodes(nodes: usize) -> Self {
            let store = Arc::new(MemTileStore::new());
            let locks = Arc::new(LockRegistry::new());
            let tiles = TileService::new(store.clone(), locks.clone());
            let timeline = TimelineService::new(store, locks);
            let map = MapId::new("resolution").unwrap();
            timeline.get_or_create(&map).await.unwrap();
            for _ in 1..nodes {
                timeline.insert_after(&map, 1).await.unwrap();
            }
            Self {
                tiles,
                timeline,
                map,
            }
        }

        async fn ctx(&self, index: i64) -> TimelineContext {
            self.timeline
                .resolve_context(&self.map, Some(index))
                .await
                .unwrap()
        }

        async fn node_key(&self, index: i64, coord: TileCoord) -> TileKey {
            let ctx = self.ctx(index).await;
            TileKey::new(self.map.clone(), ctx.node_namespace(), coord)
        }
    }

    fn coord() -> TileCoord {
        TileCoord::new(8, 5, 5).unwrap()
    }

    #[tokio::test]
    async fn test_fallback_ordering_across_nodes() {
        let fx = Fixture::with_nodes(3).await;
        let key = fx.node_key(1, coord()).await;
        fx.tiles
            .write_ready(&key, b"node-one", WriteOpts::default())
            .await
            .unwrap();

        // Nodes 2 and 3 have no opinion; they must resolve to node 1.
        for index in [1, 2, 3] {
            let ctx = fx.ctx(index).await;
            let meta = fx.tiles.resolve_effective_meta(&ctx, coord()).await.unwrap();
            assert_eq!(meta.status, TileStatus::Ready, "index {index}");
            assert_eq!(meta.source_index, Some(1), "index {index}");
            let bytes = fx
                .tiles
                .resolve_effective_buffer(&ctx, coord())
                .await
                .unwrap();
            assert_eq!(bytes.as_deref(), Some(b"node-one".as_slice()));
        }
    }

    #[tokio::test]
    async fn test_tombstone_finality() {
        let fx = Fixture::with_nodes(3).await;
        let ready_key = fx.node_key(1, coord()).await;
        fx.tiles
            .write_ready(&ready_key, b"old", WriteOpts::default())
            .await
            .unwrap();

        let tomb_key = fx.node_key(2, coord()).await;
        fx.tiles.mark_tombstone(&tomb_key).await.unwrap();

        for index in [2, 3] {
            let ctx = fx.ctx(index).await;
            let meta = fx.tiles.resolve_effective_meta(&ctx, coord()).await.unwrap();
            assert_eq!(meta.status, TileStatus::Empty);
            assert_eq!(meta.source_index, Some(2));
            assert!(fx
                .tiles
                .resolve_effective_buffer(&ctx, coord())
                .await
                .unwrap()
                .is_none());
        }

        // Node 1 still sees its own content.
        let ctx = fx.ctx(1).await;
        assert_eq!(
            fx.tiles
                .resolve_effective_buffer(&ctx, coord())
                .await
                .unwrap()
                .as_deref(),
            Some(b"old".as_slice())
        );
    }

    #[tokio::test]
    async fn test_pending_visibility_with_buffer_continuity() {
        let fx = Fixture::with_nodes(2).await;
        let ready_key = fx.node_key(1, coord()).await;
        fx.tiles
            .write_ready(&ready_key, b"good pixels", WriteOpts::default())
            .await
            .unwrap();

        let pending_key = fx.node_key(2, coord()).await;
        fx.tiles.mark_pending(&pending_key).await.unwrap();

        let ctx = fx.ctx(2).await;
        let meta = fx.tiles.resolve_effective_meta(&ctx, coord()).await.unwrap();
        assert_eq!(meta.status, TileStatus::Pending);
        assert_eq!(meta.source_index, Some(2));

        // The buffer walk skips the pending overlay and serves node 1.
        let bytes = fx
            .tiles
            .resolve_effective_buffer(&ctx, coord())
            .await
            .unwrap();
        assert_eq!(bytes.as_deref(), Some(b"good pixels".as_slice()));
    }

    #[tokio::test]
    async fn test_pending_keeps_serving_same_node_bytes() {
        let fx = Fixture::with_nodes(1).await;
        let key = fx.node_key(1, coord()).await;
        fx.tiles
            .write_ready(&key, b"last good", WriteOpts::default())
            .await
            .unwrap();
        fx.tiles.mark_pending(&key).await.unwrap();

        // Regenerating in place on a single-node timeline must not blank
        // the cell.
        let ctx = fx.ctx(1).await;
        let bytes = fx
            .tiles
            .resolve_effective_buffer(&ctx, coord())
            .await
            .unwrap();
        assert_eq!(bytes.as_deref(), Some(b"last good".as_slice()));
    }

    #[tokio::test]
    async fn test_content_version_monotonic_and_hash_changes() {
        let fx = Fixture::with_nodes(1).await;
        let key = fx.node_key(1, coord()).await;

        let first = fx
            .tiles
            .write_ready(&key, b"same bytes", WriteOpts::default())
            .await
            .unwrap();
        let second = fx
            .tiles
            .write_ready(&key, b"same bytes", WriteOpts::default())
            .await
            .unwrap();

        assert_eq!(first.content_ver, 1);
        assert_eq!(second.content_ver, 2);
        // Identical bytes, different cache key.
        assert_ne!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn test_mark_pending_preserves_prior_fields() {
        let fx = Fixture::with_nodes(1).await;
        let key = fx.node_key(1, coord()).await;
        let ready = fx
            .tiles
            .write_ready(&key, b"bytes", WriteOpts { hash: None, seed: Some(42) })
            .await
            .unwrap();

        let pending = fx.tiles.mark_pending(&key).await.unwrap();
        assert_eq!(pending.status, TileStatus::Pending);
        assert_eq!(pending.hash, ready.hash);
        assert_eq!(pending.seed, Some(42));
        assert_eq!(pending.content_ver, ready.content_ver);
    }

    #[tokio::test]
    async fn test_tombstone_clears_hash_and_bumps_version() {
        let fx = Fixture::with_nodes(1).await;
        let key = fx.node_key(1, coord()).await;
        fx.tiles
            .write_ready(&key, b"bytes", WriteOpts::default())
            .await
            .unwrap();

        let tomb = fx.tiles.mark_tombstone(&key).await.unwrap();
        assert_eq!(tomb.status, TileStatus::Empty);
        assert!(tomb.tombstone);
        assert_eq!(tomb.hash, None);
        assert_eq!(tomb.seed, None);
        assert_eq!(tomb.content_ver, 2);
        assert!(fx.tiles.store().read_tile(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_baseline_fallback_and_defensive_bytes_probe() {
        let fx = Fixture::with_nodes(2).await;
        let baseline = TileKey::baseline(fx.map.clone(), coord());

        // Bytes on disk with no metadata record still resolve READY.
        fx.tiles
            .store()
            .write_tile(&baseline, b"orphan bytes")
            .await
            .unwrap();

        let ctx = fx.ctx(2).await;
        let meta = fx.tiles.resolve_effective_meta(&ctx, coord()).await.unwrap();
        assert_eq!(meta.status, TileStatus::Ready);
        assert_eq!(meta.source_index, None);
        assert!(meta.hash.is_some());

        let bytes = fx
            .tiles
            .resolve_effective_buffer(&ctx, coord())
            .await
            .unwrap();
        assert_eq!(bytes.as_deref(), Some(b"orphan bytes".as_slice()));
    }

    #[tokio::test]
    async fn test_ready_overlay_with_missing_file_keeps_walking() {
        let fx = Fixture::with_nodes(2).await;
        let node1 = fx.node_key(1, coord()).await;
        fx.tiles
            .write_ready(&node1, b"deep content", WriteOpts::default())
            .await
            .unwrap();

        // Simulate a partial write at node 2: record says READY, no file.
        let node2 = fx.node_key(2, coord()).await;
        fx.tiles
            .write_ready(&node2, b"gone", WriteOpts::default())
            .await
            .unwrap();
        fx.tiles.store().delete_tile(&node2).await.unwrap();

        let ctx = fx.ctx(2).await;
        let bytes = fx
            .tiles
            .resolve_effective_buffer(&ctx, coord())
            .await
            .unwrap();
        assert_eq!(bytes.as_deref(), Some(b"deep content".as_slice()));
    }

    #[tokio::test]
    async fn test_clear_pending_restores_prior_ready() {
        let fx = Fixture::with_nodes(1).await;
        let key = fx.node_key(1, coord()).await;
        fx.tiles
            .write_ready(&key, b"bytes", WriteOpts::default())
            .await
            .unwrap();
        fx.tiles.mark_pending(&key).await.unwrap();

        fx.tiles.clear_pending(&key).await.unwrap();
        let record = fx.tiles.record(&key).await.unwrap().unwrap();
        assert_eq!(record.status, TileStatus::Ready);

        // A cell that never had content falls back to EMPTY.
        let fresh = TileKey::new(
            fx.map.clone(),
            Namespace::node("no-such-node"),
            coord(),
        );
        fx.tiles.mark_pending(&fresh).await.unwrap();
        fx.tiles.clear_pending(&fresh).await.unwrap();
        let record = fx.tiles.record(&fresh).await.unwrap().unwrap();
        assert_eq!(record.status, TileStatus::Empty);
    }
}
