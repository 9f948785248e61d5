use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// 64-bit key used by the loaded-chunk map.
    pub fn hash_key(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.y as u32 as u64)
    }

    pub fn from_hash_key(key: u64) -> Self {
        Self::new((key >> 32) as u32 as i32, key as u32 as i32)
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

impl RegionCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Spatial addressing shared by storage, regions and physics.
///
/// Tile coordinates are world units floored. Chunk and region coordinates use
/// Euclidean division so negative positions land in the chunk below/left of
/// the origin: tile (-1, -1) is in chunk (-1, -1), never (0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    chunk_size: i32,
    chunks_per_region_side: i32,
}

impl GridLayout {
    pub fn new(chunk_size: usize, chunks_per_region_side: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1) as i32,
            chunks_per_region_side: chunks_per_region_side.max(1) as i32,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    pub fn chunks_per_region_side(&self) -> usize {
        self.chunks_per_region_side as usize
    }

    pub fn tile_to_chunk(&self, tile: TileCoord) -> ChunkCoord {
        ChunkCoord::new(
            tile.x.div_euclid(self.chunk_size),
            tile.y.div_euclid(self.chunk_size),
        )
    }

    pub fn chunk_to_region(&self, chunk: ChunkCoord) -> RegionCoord {
        RegionCoord::new(
            chunk.x.div_euclid(self.chunks_per_region_side),
            chunk.y.div_euclid(self.chunks_per_region_side),
        )
    }

    pub fn tile_to_region(&self, tile: TileCoord) -> RegionCoord {
        self.chunk_to_region(self.tile_to_chunk(tile))
    }

    /// Position of `tile` inside its chunk, each component in `0..chunk_size`.
    pub fn local_in_chunk(&self, tile: TileCoord) -> (usize, usize) {
        (
            tile.x.rem_euclid(self.chunk_size) as usize,
            tile.y.rem_euclid(self.chunk_size) as usize,
        )
    }

    pub fn chunk_origin_tile(&self, chunk: ChunkCoord) -> TileCoord {
        TileCoord::new(chunk.x * self.chunk_size, chunk.y * self.chunk_size)
    }

    pub fn region_origin_chunk(&self, region: RegionCoord) -> ChunkCoord {
        ChunkCoord::new(
            region.x * self.chunks_per_region_side,
            region.y * self.chunks_per_region_side,
        )
    }

    /// Chunks covered by `region`, x outer, y inner.
    pub fn region_chunks(&self, region: RegionCoord) -> impl Iterator<Item = ChunkCoord> {
        let origin = self.region_origin_chunk(region);
        let side = self.chunks_per_region_side;
        (0..side).flat_map(move |x| (0..side).map(move |y| origin.offset(x, y)))
    }

    pub fn world_to_tile(&self, world: Vec2) -> TileCoord {
        let (x, y) = world.floor_to_i32();
        TileCoord::new(x, y)
    }

    pub fn tile_to_world(&self, tile: TileCoord) -> Vec2 {
        Vec2::new(tile.x as f32, tile.y as f32)
    }

    pub fn world_to_chunk(&self, world: Vec2) -> ChunkCoord {
        self.tile_to_chunk(self.world_to_tile(world))
    }

    pub fn world_to_region(&self, world: Vec2) -> RegionCoord {
        self.tile_to_region(self.world_to_tile(world))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout::new(16, 4)
    }

    #[test]
    fn negative_tile_maps_to_negative_chunk_and_region() {
        let layout = layout();
        let chunk = layout.tile_to_chunk(TileCoord::new(-1, -1));
        assert_eq!(chunk, ChunkCoord::new(-1, -1));
        assert_eq!(layout.chunk_to_region(chunk), RegionCoord::new(-1, -1));
        assert_eq!(layout.local_in_chunk(TileCoord::new(-1, -1)), (15, 15));
    }

    #[test]
    fn chunk_boundaries_are_half_open() {
        let layout = layout();
        assert_eq!(layout.tile_to_chunk(TileCoord::new(15, 0)), ChunkCoord::new(0, 0));
        assert_eq!(layout.tile_to_chunk(TileCoord::new(16, 0)), ChunkCoord::new(1, 0));
        assert_eq!(layout.tile_to_chunk(TileCoord::new(-16, -17)), ChunkCoord::new(-1, -2));
        assert_eq!(layout.chunk_to_region(ChunkCoord::new(3, 4)), RegionCoord::new(0, 1));
        assert_eq!(layout.chunk_to_region(ChunkCoord::new(-4, -5)), RegionCoord::new(-1, -2));
    }

    #[test]
    fn world_positions_floor_before_chunking() {
        let layout = layout();
        assert_eq!(layout.world_to_tile(Vec2::new(-0.25, 3.9)), TileCoord::new(-1, 3));
        assert_eq!(layout.world_to_chunk(Vec2::new(-0.25, 3.9)), ChunkCoord::new(-1, 0));
        assert_eq!(layout.world_to_region(Vec2::new(64.0, -0.1)), RegionCoord::new(1, -1));
    }

    #[test]
    fn hash_key_roundtrips_negative_coords() {
        let coord = ChunkCoord::new(-7, 123);
        assert_eq!(ChunkCoord::from_hash_key(coord.hash_key()), coord);
        assert_ne!(
            ChunkCoord::new(1, 0).hash_key(),
            ChunkCoord::new(0, 1).hash_key()
        );
    }

    #[test]
    fn region_chunks_cover_whole_block() {
        let layout = layout();
        let chunks: Vec<_> = layout.region_chunks(RegionCoord::new(-1, 0)).collect();
        assert_eq!(chunks.len(), 16);
        assert!(chunks.contains(&ChunkCoord::new(-4, 0)));
        assert!(chunks.contains(&ChunkCoord::new(-1, 3)));
        assert!(chunks
            .iter()
            .all(|chunk| layout.chunk_to_region(*chunk) == RegionCoord::new(-1, 0)));
    }
}
