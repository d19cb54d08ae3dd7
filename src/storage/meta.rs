//! Persisted tile metadata and the derived per-cell opinion.

use serde::{Deserialize, Serialize};

use crate::core::coords::TileCoord;

/// Servability of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileStatus {
    /// No content, and nothing is being generated.
    Empty,
    /// Generation in flight. Prior READY content, if any, stays servable.
    Pending,
    /// Content exists and is servable.
    Ready,
}

/// The metadata record persisted next to a tile's bytes, one JSON file per
/// `(namespace, z, x, y)`.
///
/// `content_ver` increments on every successful write and never decrements;
/// it feeds the content hash so the cache key changes even when regenerated
/// bytes are identical. `tombstone = true` means the owning timeline node
/// explicitly deletes this cell, which is distinct from the node simply
/// having no record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    /// Zoom level.
    pub z: u8,
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Servability of the cell.
    pub status: TileStatus,
    /// Content hash of the current bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Generation seed of the current bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Monotonically increasing write counter.
    #[serde(default)]
    pub content_ver: u64,
    /// Explicit deletion marker; blocks fallback to older history.
    #[serde(default)]
    pub tombstone: bool,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: u64,
    /// Last update timestamp, epoch milliseconds.
    pub updated_at: u64,
}

impl TileRecord {
    /// A fresh record for a cell with no prior history.
    pub fn new(coord: TileCoord, status: TileStatus, now: u64) -> Self {
        Self {
            z: coord.z,
            x: coord.x,
            y: coord.y,
            status,
            hash: None,
            seed: None,
            content_ver: 0,
            tombstone: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What a single overlay (or the baseline) says about a cell, as a tagged
/// variant instead of a status string plus a separate tombstone flag.
///
/// `Pending` is checked first so an in-flight regeneration is visible even on
/// a previously tombstoned cell. `Cleared` covers both an explicit tombstone
/// and a plain `Empty` record; the two stop resolution identically.
#[derive(Debug, Clone, PartialEq)]
pub enum Opinion {
    /// No record: this overlay has no opinion, fall through to older history.
    None,
    /// Generation in flight.
    Pending(TileRecord),
    /// Servable content.
    Ready(TileRecord),
    /// Explicitly empty or deleted; masks everything older.
    Cleared(TileRecord),
}

impl Opinion {
    /// Classify an optional record read from storage.
    pub fn of(record: Option<TileRecord>) -> Self {
        match record {
            None => Opinion::None,
            Some(rec) => match rec.status {
                TileStatus::Pending => Opinion::Pending(rec),
                TileStatus::Ready if !rec.tombstone => Opinion::Ready(rec),
                _ => Opinion::Cleared(rec),
            },
        }
    }
}
