//! Pyramid coordinate math.
//!
//! A tile lives at `(z, x, y)` where `z = 0` is the coarsest level and
//! `z = MAX_ZOOM` is the leaf level where generation happens. Every coarser
//! tile is derived from its four children.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{Error, Result};

/// Leaf zoom level. Tile generation is only permitted here; all coarser
/// levels are derived by downsampling.
pub const MAX_ZOOM: u8 = 8;

/// Tile edge length in pixels.
pub const TILE_SIZE: u32 = 256;

/// A pyramid cell coordinate.
///
/// The map is an infinite window anchored at `(0, 0)`; `x` and `y` are only
/// bounded by their type. Ordering is `(z, x, y)` lexicographic, which keeps
/// per-level batches deterministic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TileCoord {
    /// Zoom level, `0..=MAX_ZOOM`.
    pub z: u8,
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl TileCoord {
    /// Build a validated coordinate. Rejects zoom levels beyond [`MAX_ZOOM`]
    /// before any I/O happens.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self> {
        if z > MAX_ZOOM {
            return Err(Error::invalid_argument(format!(
                "zoom {z} exceeds maximum {MAX_ZOOM}"
            )));
        }
        Ok(Self { z, x, y })
    }

    /// Whether this cell sits at the leaf level.
    pub fn is_leaf(&self) -> bool {
        self.z == MAX_ZOOM
    }

    /// The enclosing cell one level coarser, or `None` at the root level.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.z == 0 {
            return None;
        }
        Some(TileCoord {
            z: self.z - 1,
            x: self.x >> 1,
            y: self.y >> 1,
        })
    }

    /// The 2x2 block one level finer, in NW, NE, SW, SE order.
    /// `None` at the leaf level, which has no children.
    pub fn children(&self) -> Option<[TileCoord; 4]> {
        if self.z >= MAX_ZOOM {
            return None;
        }
        let (z, x, y) = (self.z + 1, self.x << 1, self.y << 1);
        Some([
            TileCoord { z, x, y },
            TileCoord { z, x: x + 1, y },
            TileCoord { z, x, y: y + 1 },
            TileCoord { z, x: x + 1, y: y + 1 },
        ])
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_halves_coordinates() {
        let c = TileCoord::new(8, 11, 10).unwrap();
        assert_eq!(c.parent(), Some(TileCoord { z: 7, x: 5, y: 5 }));
        assert_eq!(TileCoord::new(0, 0, 0).unwrap().parent(), None);
    }

    #[test]
    fn test_children_order_is_nw_ne_sw_se() {
        let c = TileCoord::new(3, 2, 5).unwrap();
        let kids = c.children().unwrap();
        assert_eq!(kids[0], TileCoord { z: 4, x: 4, y: 10 });
        assert_eq!(kids[1], TileCoord { z: 4, x: 5, y: 10 });
        assert_eq!(kids[2], TileCoord { z: 4, x: 4, y: 11 });
        assert_eq!(kids[3], TileCoord { z: 4, x: 5, y: 11 });
    }

    #[test]
    fn test_children_roundtrip_through_parent() {
        let c = TileCoord::new(5, 9, 7).unwrap();
        for child in c.children().unwrap() {
            assert_eq!(child.parent(), Some(c));
        }
    }

    #[test]
    fn test_leaf_has_no_children() {
        assert!(TileCoord::new(MAX_ZOOM, 1, 1).unwrap().children().is_none());
    }

    #[test]
    fn test_zoom_bound_enforced() {
        assert!(TileCoord::new(MAX_ZOOM + 1, 0, 0).is_err());
    }
}
