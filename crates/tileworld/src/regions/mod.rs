//! Region-level membership: which chunk every mobile chunk and entity lives
//! in, so whole neighbourhoods can be loaded and unloaded together.

use thiserror::Error;

use crate::coords::{ChunkCoord, RegionCoord};
use crate::entity::EntityUid;
use crate::terrain::MobileUid;

mod manager;
mod region;

pub use manager::{EntityRegionManager, OutOfBoundsSweep, RegionLoadReport, RegionUnloadReport};
pub use region::{EntityRegion, SubRegion};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MembershipError {
    #[error("region {region} is not loaded")]
    RegionNotLoaded { region: RegionCoord },
    #[error("region {region} is already loaded")]
    RegionAlreadyLoaded { region: RegionCoord },
    #[error("mobile chunk {uid} is already listed in chunk {chunk}")]
    MobileChunkAlreadyListed { uid: MobileUid, chunk: ChunkCoord },
    #[error("mobile chunk {uid} is not listed in any loaded region")]
    MobileChunkNotListed { uid: MobileUid },
    #[error("entity {uid} is already listed in chunk {chunk}")]
    EntityAlreadyListed { uid: EntityUid, chunk: ChunkCoord },
    #[error("entity {uid} is not listed in any loaded region")]
    EntityNotListed { uid: EntityUid },
}
