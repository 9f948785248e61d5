mod behavior;
mod registry;

pub use behavior::{
    blob, full_tile_box, ConnectRule, ConnectedTile, DecorTile, FluidTile, SolidTile, TileBehavior,
    TileGridAccess,
};
pub use registry::{GlobalId, RegistryError, TileRegistry, TileRegistryBuilder, TileString};
