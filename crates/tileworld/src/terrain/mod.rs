use thiserror::Error;

use crate::coords::{ChunkCoord, TileCoord};
use crate::tiles::GlobalId;

mod chunk;
mod collision;
mod layer;
mod manager;
mod mobile;

pub use chunk::{DataChunk, LayerGrid};
pub use layer::TerrainLayer;
pub use manager::TerrainManager;
pub(crate) use mobile::MobileHeader;
pub use mobile::{MobileDataChunk, MobileUid};

/// Notifications for whoever builds visuals from terrain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainEvent {
    ChunkLoaded(ChunkCoord),
    ChunkRebuild(ChunkCoord),
    ChunkUnloaded(ChunkCoord),
    MobileChunkLoaded(MobileUid),
    MobileChunkRebuild(MobileUid),
    MobileChunkUnloaded(MobileUid),
}

/// Which grid a tile coordinate refers to: world tiles of the static
/// terrain, or local cells of one mobile chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileSpace {
    #[default]
    World,
    Mobile(MobileUid),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TerrainError {
    #[error("chunk {chunk} is not loaded")]
    ChunkNotLoaded { chunk: ChunkCoord },
    #[error("chunk {chunk} is already loaded")]
    ChunkAlreadyLoaded { chunk: ChunkCoord },
    #[error("mobile chunk {uid} is not loaded")]
    MobileChunkNotLoaded { uid: MobileUid },
    #[error("mobile chunk {uid} is already loaded")]
    MobileChunkAlreadyLoaded { uid: MobileUid },
    #[error("tile {tile} is outside the grid of mobile chunk {uid}")]
    OutsideMobileGrid { uid: MobileUid, tile: TileCoord },
    #[error("global id {id} is not registered")]
    UnknownTile { id: GlobalId },
}
