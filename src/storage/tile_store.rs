//! Flat tile storage.
//!
//! Tiles are byte-addressed by `(map, namespace, z, x, y)`: one WebP image
//! file plus one JSON metadata record per cell, and one manifest JSON per
//! map. The namespace distinguishes the baseline store from each timeline
//! node's overlay. Two backends implement the same contract: a durable
//! filesystem store and an in-memory store used for tests and throwaway
//! instances.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::warn;

use crate::core::coords::TileCoord;
use crate::core::error::{Error, Result};
use crate::storage::meta::TileRecord;
use crate::timeline::manifest::Manifest;

/// Validated map identifier.
///
/// Restricting ids to a slug alphabet keeps them safe to embed in filesystem
/// paths and lock keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapId(String);

impl MapId {
    /// Maximum accepted id length.
    pub const MAX_LEN: usize = 64;

    /// Parse and validate a map id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= Self::MAX_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
            && id
                .bytes()
                .next()
                .is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        if !valid {
            return Err(Error::invalid_argument(format!("invalid map id: {id:?}")));
        }
        Ok(Self(id))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which tile store a key addresses: the timeline-independent baseline, or a
/// specific timeline node's overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// The "time index 0" store, conceptually before the first timeline node.
    Baseline,
    /// One timeline node's overlay, addressed by its stable id.
    Node(String),
}

impl Namespace {
    /// Overlay namespace for a node id.
    pub fn node(id: impl Into<String>) -> Self {
        Namespace::Node(id.into())
    }
}

/// Structured storage/lock key for a single cell.
///
/// Using a typed tuple instead of a concatenated string rules out collisions
/// from escaping edge cases and makes the locking discipline explicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Owning map.
    pub map: MapId,
    /// Baseline or node overlay.
    pub ns: Namespace,
    /// Cell coordinate.
    pub coord: TileCoord,
}

impl TileKey {
    /// Build a key.
    pub fn new(map: MapId, ns: Namespace, coord: TileCoord) -> Self {
        Self { map, ns, coord }
    }

    /// Baseline key for a cell.
    pub fn baseline(map: MapId, coord: TileCoord) -> Self {
        Self::new(map, Namespace::Baseline, coord)
    }
}

/// Byte/metadata storage contract shared by all backends.
///
/// Record reads are fail-open: a corrupt or unreadable metadata file is
/// logged and reported as "no record" so resolution never crashes on bad
/// state. Writes are atomic per file and propagate failures, since a write
/// that silently fails would corrupt the resolution chain.
pub trait TileStore: Send + Sync + 'static {
    /// Read the metadata record for a cell, if any.
    fn read_record(
        &self,
        key: &TileKey,
    ) -> impl Future<Output = Result<Option<TileRecord>>> + Send;

    /// Upsert the metadata record for a cell.
    fn write_record(
        &self,
        key: &TileKey,
        record: &TileRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read tile bytes for a cell, if present.
    fn read_tile(&self, key: &TileKey) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Write tile bytes for a cell.
    fn write_tile(&self, key: &TileKey, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Delete tile bytes for a cell. Missing files are not an error.
    fn delete_tile(&self, key: &TileKey) -> impl Future<Output = Result<()>> + Send;

    /// Read a map's timeline manifest, if one exists.
    fn read_manifest(&self, map: &MapId) -> impl Future<Output = Result<Option<Manifest>>> + Send;

    /// Persist a map's timeline manifest.
    fn write_manifest(
        &self,
        map: &MapId,
        manifest: &Manifest,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Recursively remove a node's overlay storage. Idempotent.
    fn delete_node_dir(
        &self,
        map: &MapId,
        node_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Filesystem-backed tile store.
///
/// Layout, one directory per namespace:
///
/// ```text
/// {root}/maps/{map}/timeline.json
/// {root}/maps/{map}/baseline/{z}_{x}_{y}.webp  + .json
/// {root}/maps/{map}/nodes/{node}/{z}_{x}_{y}.webp  + .json
/// ```
#[derive(Debug, Clone)]
pub struct FsTileStore {
    root: PathBuf,
}

impl FsTileStore {
    /// Create a store rooted at `root`. Directories are created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn map_dir(&self, map: &MapId) -> PathBuf {
        self.root.join("maps").join(map.as_str())
    }

    fn ns_dir(&self, map: &MapId, ns: &Namespace) -> PathBuf {
        let map_dir = self.map_dir(map);
        match ns {
            Namespace::Baseline => map_dir.join("baseline"),
            Namespace::Node(id) => map_dir.join("nodes").join(id),
        }
    }

    fn tile_path(&self, key: &TileKey) -> PathBuf {
        let c = key.coord;
        self.ns_dir(&key.map, &key.ns)
            .join(format!("{}_{}_{}.webp", c.z, c.x, c.y))
    }

    fn record_path(&self, key: &TileKey) -> PathBuf {
        let c = key.coord;
        self.ns_dir(&key.map, &key.ns)
            .join(format!("{}_{}_{}.json", c.z, c.x, c.y))
    }

    fn manifest_path(&self, map: &MapId) -> PathBuf {
        self.map_dir(map).join("timeline.json")
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write-then-rename so readers never observe a partial file.
    async fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await?;
        match tokio::fs::rename(&tmp, path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(err.into())
            }
        }
    }
}

impl TileStore for FsTileStore {
    async fn read_record(&self, key: &TileKey) -> Result<Option<TileRecord>> {
        let path = self.record_path(key);
        let data = match Self::read_optional(&path).await {
            Ok(data) => data,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "metadata read failed; treating as absent");
                return Ok(None);
            }
        };
        let Some(data) = data else { return Ok(None) };
        match serde_json::from_slice(&data) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt metadata; treating as absent");
                Ok(None)
            }
        }
    }

    async fn write_record(&self, key: &TileKey, record: &TileRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(record).map_err(crate::core::error::StorageError::Serde)?;
        Self::atomic_write(&self.record_path(key), &data).await
    }

    async fn read_tile(&self, key: &TileKey) -> Result<Option<Bytes>> {
        let path = self.tile_path(key);
        match Self::read_optional(&path).await {
            Ok(data) => Ok(data.map(Bytes::from)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "tile read failed; treating as absent");
                Ok(None)
            }
        }
    }

    async fn write_tile(&self, key: &TileKey, bytes: &[u8]) -> Result<()> {
        Self::atomic_write(&self.tile_path(key), bytes).await
    }

    async fn delete_tile(&self, key: &TileKey) -> Result<()> {
        match tokio::fs::remove_file(self.tile_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_manifest(&self, map: &MapId) -> Result<Option<Manifest>> {
        let Some(data) = Self::read_optional(&self.manifest_path(map)).await? else {
            return Ok(None);
        };
        // Unlike tile metadata, the manifest is the source of truth for the
        // node list; a corrupt manifest is a hard error, not an absence.
        let manifest =
            serde_json::from_slice(&data).map_err(crate::core::error::StorageError::Serde)?;
        Ok(Some(manifest))
    }

    async fn write_manifest(&self, map: &MapId, manifest: &Manifest) -> Result<()> {
        let data =
            serde_json::to_vec_pretty(manifest).map_err(crate::core::error::StorageError::Serde)?;
        Self::atomic_write(&self.manifest_path(map), &data).await
    }

    async fn delete_node_dir(&self, map: &MapId, node_id: &str) -> Result<()> {
        let dir = self.ns_dir(map, &Namespace::node(node_id));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory tile store backed by concurrent maps.
#[derive(Debug, Default)]
pub struct MemTileStore {
    records: DashMap<TileKey, TileRecord>,
    tiles: DashMap<TileKey, Bytes>,
    manifests: DashMap<String, Manifest>,
}

impl MemTileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileStore for MemTileStore {
    async fn read_record(&self, key: &TileKey) -> Result<Option<TileRecord>> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn write_record(&self, key: &TileKey, record: &TileRecord) -> Result<()> {
        self.records.insert(key.clone(), record.clone());
        Ok(())
    }

    async fn read_tile(&self, key: &TileKey) -> Result<Option<Bytes>> {
        Ok(self.tiles.get(key).map(|b| b.clone()))
    }

    async fn write_tile(&self, key: &TileKey, bytes: &[u8]) -> Result<()> {
        self.tiles.insert(key.clone(), Bytes::copy_from_slice(bytes));
        Ok(())
    }

    async fn delete_tile(&self, key: &TileKey) -> Result<()> {
        self.tiles.remove(key);
        Ok(())
    }

    async fn read_manifest(&self, map: &MapId) -> Result<Option<Manifest>> {
        Ok(self.manifests.get(map.as_str()).map(|m| m.clone()))
    }

    async fn write_manifest(&self, map: &MapId, manifest: &Manifest) -> Result<()> {
        self.manifests
            .insert(map.as_str().to_string(), manifest.clone());
        Ok(())
    }

    async fn delete_node_dir(&self, map: &MapId, node_id: &str) -> Result<()> {
        let matches = |key: &TileKey| {
            key.map.as_str() == map.as_str() && key.ns == Namespace::node(node_id)
        };
        self.records.retain(|key, _| !matches(key));
        self.tiles.retain(|key, _| !matches(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::now_ms;
    use crate::storage::meta::TileStatus;

    fn key(store_map: &str, ns: Namespace) -> TileKey {
        TileKey::new(
            MapId::new(store_map).unwrap(),
            ns,
            TileCoord::new(8, 3, 4).unwrap(),
        )
    }

    #[test]
    fn test_map_id_validation() {
        assert!(MapId::new("moon-map_01").is_ok());
        assert!(MapId::new("").is_err());
        assert!(MapId::new("UPPER").is_err());
        assert!(MapId::new("../escape").is_err());
        assert!(MapId::new("-leading-dash").is_err());
        assert!(MapId::new("a".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        let key = key("roundtrip", Namespace::Baseline);

        assert!(store.read_record(&key).await.unwrap().is_none());
        assert!(store.read_tile(&key).await.unwrap().is_none());

        let record = TileRecord::new(key.coord, TileStatus::Ready, now_ms());
        store.write_record(&key, &record).await.unwrap();
        store.write_tile(&key, b"webp bytes").await.unwrap();

        assert_eq!(store.read_record(&key).await.unwrap(), Some(record));
        assert_eq!(
            store.read_tile(&key).await.unwrap(),
            Some(Bytes::from_static(b"webp bytes"))
        );

        store.delete_tile(&key).await.unwrap();
        assert!(store.read_tile(&key).await.unwrap().is_none());
        // Deleting again is a no-op.
        store.delete_tile(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_corrupt_record_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        let key = key("corrupt", Namespace::Baseline);

        let path = store.record_path(&key);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, b"{not json").await.unwrap();

        assert!(store.read_record(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_store_node_dir_removal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        let map = MapId::new("nodes").unwrap();
        let overlay = key("nodes", Namespace::node("abc"));
        let baseline = key("nodes", Namespace::Baseline);

        store.write_tile(&overlay, b"overlay").await.unwrap();
        store.write_tile(&baseline, b"baseline").await.unwrap();

        store.delete_node_dir(&map, "abc").await.unwrap();
        assert!(store.read_tile(&overlay).await.unwrap().is_none());
        assert!(store.read_tile(&baseline).await.unwrap().is_some());
        // Idempotent.
        store.delete_node_dir(&map, "abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_mem_store_node_dir_removal_scoped_to_map() {
        let store = MemTileStore::new();
        let map_a = key("map-a", Namespace::node("n1"));
        let map_b = key("map-b", Namespace::node("n1"));
        store.write_tile(&map_a, b"a").await.unwrap();
        store.write_tile(&map_b, b"b").await.unwrap();

        store
            .delete_node_dir(&MapId::new("map-a").unwrap(), "n1")
            .await
            .unwrap();
        assert!(store.read_tile(&map_a).await.unwrap().is_none());
        assert!(store.read_tile(&map_b).await.unwrap().is_some());
    }
}
