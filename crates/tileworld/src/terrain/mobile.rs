use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coords::{ChunkCoord, TileCoord};
use crate::math::{Bounds2D, Vec2};

use super::chunk::DataChunk;

/// Persistent id of a mobile chunk, handed out by the world metadata counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MobileUid(pub u32);

impl fmt::Display for MobileUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chunk grid carried by a movable body.
///
/// Tiles are addressed in the chunk's local grid. Only the lower-left
/// `restricted_size` part of the grid is considered part of the object.
#[derive(Debug, Clone)]
pub struct MobileDataChunk {
    uid: MobileUid,
    pub chunk: DataChunk,
    pub position: Vec2,
    pub depth: f32,
    pub collider_offset: Vec2,
    pub collider_size: Vec2,
    restricted_size: (i32, i32),
    pub velocity: Vec2,
    pub active: bool,
}

impl MobileDataChunk {
    pub fn new(uid: MobileUid, chunk_size: usize) -> Self {
        let mut chunk = DataChunk::new(chunk_size);
        chunk.init(ChunkCoord::default());
        let side = chunk.size() as i32;
        Self {
            uid,
            chunk,
            position: Vec2::ZERO,
            depth: 0.0,
            collider_offset: Vec2::ZERO,
            collider_size: Vec2::new(side as f32, side as f32),
            restricted_size: (side, side),
            velocity: Vec2::ZERO,
            active: true,
        }
    }

    pub fn uid(&self) -> MobileUid {
        self.uid
    }

    pub fn restricted_size(&self) -> (i32, i32) {
        self.restricted_size
    }

    /// Clamps to `1..=chunk_size` per axis and resizes the collider to match.
    pub fn set_restricted_size(&mut self, width: i32, height: i32) {
        let side = self.chunk.size() as i32;
        self.restricted_size = (width.clamp(1, side), height.clamp(1, side));
        self.collider_size = Vec2::new(
            self.restricted_size.0 as f32,
            self.restricted_size.1 as f32,
        );
        self.collider_offset = self.collider_size * 0.5;
    }

    /// Restores header fields exactly as read from disk.
    pub(crate) fn apply_header(&mut self, header: MobileHeader) {
        self.position = Vec2::new(header.position[0], header.position[1]);
        self.depth = header.position[2];
        self.collider_offset = header.collider_offset;
        self.collider_size = header.collider_size;
        let side = self.chunk.size() as i32;
        self.restricted_size = (
            header.restricted_size.0.clamp(1, side),
            header.restricted_size.1.clamp(1, side),
        );
        self.velocity = header.velocity;
    }

    pub(crate) fn header(&self) -> MobileHeader {
        MobileHeader {
            position: [self.position.x, self.position.y, self.depth],
            collider_offset: self.collider_offset,
            collider_size: self.collider_size,
            restricted_size: self.restricted_size,
            velocity: self.velocity,
        }
    }

    /// Grid cell of a local tile. Tiles outside the restricted size have
    /// none.
    pub fn cell(&self, tile: TileCoord) -> Option<(usize, usize)> {
        let (width, height) = self.restricted_size;
        if tile.x < 0 || tile.y < 0 || tile.x >= width || tile.y >= height {
            return None;
        }
        Some((tile.x as usize, tile.y as usize))
    }

    /// World rectangle spanned by the restricted grid.
    pub fn world_bounds(&self) -> Bounds2D {
        let size = Vec2::new(self.restricted_size.0 as f32, self.restricted_size.1 as f32);
        Bounds2D::new(self.position, self.position + size)
    }

    /// Strict containment, matching how tiles are picked with the cursor.
    pub fn contains_point(&self, point: Vec2) -> bool {
        self.world_bounds().contains_point(point)
    }
}

/// Fixed-size prefix of a mobile chunk file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MobileHeader {
    pub position: [f32; 3],
    pub collider_offset: Vec2,
    pub collider_size: Vec2,
    pub restricted_size: (i32, i32),
    pub velocity: Vec2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_size_is_clamped_to_grid() {
        let mut mobile = MobileDataChunk::new(MobileUid(3), 8);
        mobile.set_restricted_size(20, 0);
        assert_eq!(mobile.restricted_size(), (8, 1));
        assert_eq!(mobile.collider_size, Vec2::new(8.0, 1.0));
    }

    #[test]
    fn cells_stop_at_restricted_size() {
        let mut mobile = MobileDataChunk::new(MobileUid(2), 16);
        mobile.set_restricted_size(4, 2);
        assert_eq!(mobile.cell(TileCoord::new(3, 1)), Some((3, 1)));
        assert_eq!(mobile.cell(TileCoord::new(4, 0)), None);
        assert_eq!(mobile.cell(TileCoord::new(0, 2)), None);
        assert_eq!(mobile.cell(TileCoord::new(-1, 0)), None);
    }

    #[test]
    fn containment_uses_restricted_rectangle() {
        let mut mobile = MobileDataChunk::new(MobileUid(0), 16);
        mobile.set_restricted_size(3, 2);
        mobile.position = Vec2::new(10.0, 5.0);
        assert!(mobile.contains_point(Vec2::new(12.5, 6.0)));
        assert!(!mobile.contains_point(Vec2::new(13.5, 6.0)));
        assert!(!mobile.contains_point(Vec2::new(10.0, 6.0)));
    }
}
