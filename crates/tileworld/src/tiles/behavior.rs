use std::fmt;

use crate::coords::TileCoord;
use crate::math::{Bounds2D, Vec2};
use crate::terrain::TerrainLayer;

use super::registry::GlobalId;

/// Grid view handed to tile callbacks. Coordinates are world tiles for the
/// static terrain and local grid cells for a mobile chunk.
pub trait TileGridAccess {
    fn global_id_at(&self, tile: TileCoord, layer: TerrainLayer) -> Option<GlobalId>;
    fn bitmask_at(&self, tile: TileCoord, layer: TerrainLayer) -> Option<u16>;
    fn set_bitmask_at(&mut self, tile: TileCoord, layer: TerrainLayer, bitmask: u16) -> bool;
}

/// Per-tile-type behaviour, looked up once per global id in the registry.
pub trait TileBehavior: Send + Sync + fmt::Debug {
    fn on_placed(&self, _grid: &mut dyn TileGridAccess, _tile: TileCoord, _layer: TerrainLayer) {}

    fn on_breaked(&self, _grid: &mut dyn TileGridAccess, _tile: TileCoord, _layer: TerrainLayer) {
    }

    fn on_tile_refreshed(
        &self,
        _grid: &mut dyn TileGridAccess,
        _tile: TileCoord,
        _layer: TerrainLayer,
    ) {
    }

    /// Boxes in tile-local space (the tile covers `0..1` on both axes).
    fn collision_boxes(&self, _bitmask: u16) -> &[Bounds2D] {
        &[]
    }

    fn is_fluid(&self) -> bool {
        false
    }
}

pub fn full_tile_box() -> Bounds2D {
    Bounds2D::new(Vec2::ZERO, Vec2::ONE)
}

#[derive(Debug, Clone)]
pub struct SolidTile {
    boxes: Vec<Bounds2D>,
}

impl SolidTile {
    pub fn full() -> Self {
        Self {
            boxes: vec![full_tile_box()],
        }
    }

    pub fn with_boxes(boxes: Vec<Bounds2D>) -> Self {
        Self { boxes }
    }
}

impl TileBehavior for SolidTile {
    fn collision_boxes(&self, _bitmask: u16) -> &[Bounds2D] {
        &self.boxes
    }
}

/// Purely visual tile without collision.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecorTile;

impl TileBehavior for DecorTile {}

/// Non-solid tile that counts towards a body's submerged volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct FluidTile;

impl TileBehavior for FluidTile {
    fn is_fluid(&self) -> bool {
        true
    }
}

pub mod blob {
    pub const TOP_LEFT: u16 = 1;
    pub const TOP: u16 = 2;
    pub const TOP_RIGHT: u16 = 4;
    pub const LEFT: u16 = 8;
    pub const RIGHT: u16 = 16;
    pub const BOTTOM_LEFT: u16 = 32;
    pub const BOTTOM: u16 = 64;
    pub const BOTTOM_RIGHT: u16 = 128;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectRule {
    /// Connect only to tiles with the same global id.
    #[default]
    SameTile,
    /// Connect to any non-air tile.
    AnyTile,
}

/// Autotiled tile using the 47-blob bitmask.
///
/// A corner bit is only set when both edges next to it connect, which keeps
/// the number of distinct masks at 47.
#[derive(Debug, Clone)]
pub struct ConnectedTile {
    boxes: Vec<Bounds2D>,
    top_boxes: Option<Vec<Bounds2D>>,
    rule: ConnectRule,
}

impl ConnectedTile {
    pub fn new() -> Self {
        Self {
            boxes: vec![full_tile_box()],
            top_boxes: None,
            rule: ConnectRule::SameTile,
        }
    }

    pub fn with_rule(mut self, rule: ConnectRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_boxes(mut self, boxes: Vec<Bounds2D>) -> Self {
        self.boxes = boxes;
        self
    }

    /// Boxes used on exposed tops, e.g. a thin walkable surface.
    pub fn with_top_boxes(mut self, boxes: Vec<Bounds2D>) -> Self {
        self.top_boxes = Some(boxes);
        self
    }

    fn connects(
        &self,
        grid: &dyn TileGridAccess,
        own: GlobalId,
        tile: TileCoord,
        layer: TerrainLayer,
    ) -> bool {
        match grid.global_id_at(tile, layer) {
            Some(other) if !other.is_air() => match self.rule {
                ConnectRule::SameTile => other == own,
                ConnectRule::AnyTile => true,
            },
            _ => false,
        }
    }

    pub fn compute_bitmask(
        &self,
        grid: &dyn TileGridAccess,
        tile: TileCoord,
        layer: TerrainLayer,
    ) -> u16 {
        let Some(own) = grid.global_id_at(tile, layer) else {
            return 0;
        };
        let at = |dx: i32, dy: i32| self.connects(grid, own, tile.offset(dx, dy), layer);

        let top = at(0, 1);
        let left = at(-1, 0);
        let right = at(1, 0);
        let bottom = at(0, -1);

        let mut mask = 0;
        if top {
            mask |= blob::TOP;
        }
        if left {
            mask |= blob::LEFT;
        }
        if right {
            mask |= blob::RIGHT;
        }
        if bottom {
            mask |= blob::BOTTOM;
        }
        if top && left && at(-1, 1) {
            mask |= blob::TOP_LEFT;
        }
        if top && right && at(1, 1) {
            mask |= blob::TOP_RIGHT;
        }
        if bottom && left && at(-1, -1) {
            mask |= blob::BOTTOM_LEFT;
        }
        if bottom && right && at(1, -1) {
            mask |= blob::BOTTOM_RIGHT;
        }
        mask
    }

    fn uses_top_boxes(bitmask: u16) -> bool {
        if bitmask & blob::TOP == 0 {
            return true;
        }
        let side = bitmask & (blob::LEFT | blob::RIGHT) != 0;
        let open_corners = bitmask & (blob::TOP_LEFT | blob::TOP_RIGHT) == 0;
        side && open_corners
    }
}

impl Default for ConnectedTile {
    fn default() -> Self {
        Self::new()
    }
}

impl TileBehavior for ConnectedTile {
    fn on_tile_refreshed(&self, grid: &mut dyn TileGridAccess, tile: TileCoord, layer: TerrainLayer) {
        let mask = self.compute_bitmask(grid, tile, layer);
        grid.set_bitmask_at(tile, layer, mask);
    }

    fn collision_boxes(&self, bitmask: u16) -> &[Bounds2D] {
        match &self.top_boxes {
            Some(top) if Self::uses_top_boxes(bitmask) => top,
            _ => &self.boxes,
        }
    }
}
