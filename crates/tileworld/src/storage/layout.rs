use std::path::{Path, PathBuf};

use crate::config::SaveScope;
use crate::coords::{ChunkCoord, RegionCoord};
use crate::entity::EntityUid;
use crate::terrain::MobileUid;

pub const SAVES_FOLDER: &str = "saves";
pub const PLAY_FOLDER: &str = "play";
pub const WORLD_METADATA_FILE: &str = "world.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCategory {
    Chunk,
    MobileChunk,
    Entity,
    Region,
}

impl DataCategory {
    pub fn folder(self) -> &'static str {
        match self {
            DataCategory::Chunk => "chunk_data",
            DataCategory::MobileChunk => "mobile_chunk_data",
            DataCategory::Entity => "entity_data",
            DataCategory::Region => "region_data",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DataCategory::Chunk => "cdat",
            DataCategory::MobileChunk => "mdat",
            DataCategory::Entity => "edat",
            DataCategory::Region => "rdat",
        }
    }
}

/// Path composition for one save and dimension:
/// `<root>/saves/<save>/<dimension>/<category>/<key>.<ext>`, or
/// `<root>/saves/<save>/play/<dimension>/...` for the play scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveLayout {
    root: PathBuf,
    save_name: String,
    dimension: String,
}

impl SaveLayout {
    pub fn new(root: impl Into<PathBuf>, save_name: &str, dimension: &str) -> Self {
        Self {
            root: root.into(),
            save_name: save_name.to_string(),
            dimension: dimension.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save_dir(&self) -> PathBuf {
        self.root.join(SAVES_FOLDER).join(&self.save_name)
    }

    pub fn play_dir(&self) -> PathBuf {
        self.save_dir().join(PLAY_FOLDER)
    }

    pub fn dimension_dir(&self, scope: SaveScope) -> PathBuf {
        match scope {
            SaveScope::Canonical => self.save_dir().join(&self.dimension),
            SaveScope::Play => self.play_dir().join(&self.dimension),
        }
    }

    pub fn category_dir(&self, scope: SaveScope, category: DataCategory) -> PathBuf {
        self.dimension_dir(scope).join(category.folder())
    }

    fn file(&self, scope: SaveScope, category: DataCategory, key: &str) -> PathBuf {
        self.category_dir(scope, category)
            .join(format!("{key}.{}", category.extension()))
    }

    pub fn chunk_path(&self, scope: SaveScope, coord: ChunkCoord) -> PathBuf {
        self.file(scope, DataCategory::Chunk, &format!("{}_{}", coord.x, coord.y))
    }

    pub fn mobile_chunk_path(&self, scope: SaveScope, uid: MobileUid) -> PathBuf {
        self.file(scope, DataCategory::MobileChunk, &uid.to_string())
    }

    pub fn entity_path(&self, scope: SaveScope, uid: EntityUid) -> PathBuf {
        self.file(scope, DataCategory::Entity, &uid.to_string())
    }

    pub fn region_path(&self, scope: SaveScope, region: RegionCoord) -> PathBuf {
        self.file(scope, DataCategory::Region, &format!("{}_{}", region.x, region.y))
    }

    pub fn world_metadata_path(&self, scope: SaveScope) -> PathBuf {
        self.dimension_dir(scope).join(WORLD_METADATA_FILE)
    }
}
