use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod arena;
pub mod config;
pub mod coords;
pub mod entity;
pub mod math;
pub mod physics;
pub mod regions;
pub mod storage;
pub mod terrain;
pub mod tiles;
pub mod world;

pub use config::{ConfigError, DataLoadMode, DataSaveMode, SaveScope, WorldConfig};
pub use coords::{ChunkCoord, GridLayout, RegionCoord, TileCoord};
pub use entity::{EntityAssetId, EntityData, EntityPayload, EntityUid, LoadBox};
pub use math::{Bounds2D, Vec2};
pub use physics::{
    Axis, BodyId, BodyShape, CollisionQuery, ContactFlags, ForceGenerator, PhysicsSettings,
    PhysicsWorld, RigidBody,
};
pub use regions::{EntityRegionManager, MembershipError};
pub use storage::{LoadOutcome, PersistenceManager, SaveLayout, SaveQueue, StorageError};
pub use terrain::{
    DataChunk, MobileDataChunk, MobileUid, TerrainError, TerrainEvent, TerrainLayer,
    TerrainManager, TileSpace,
};
pub use tiles::{GlobalId, TileBehavior, TileRegistry, TileString};
pub use world::{FocusChange, World, WorldError, WorldObject};

pub const ROOT_ENV_VAR: &str = "TILEWORLD_ROOT";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current executable path: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("current executable path has no parent directory: {0}")]
    ExeHasNoParent(PathBuf),
    #[error("failed to create save directory at {path}: {source}")]
    CreateSaveDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "Could not detect project root by walking upward from executable directory: {start_dir}\n\
Expected a directory containing Cargo.toml and crates/.\n\
Set {env_var} explicitly, for example:\n\
Bash/zsh: export {env_var}=\"/path/to/data\""
    )]
    RootNotFound {
        start_dir: PathBuf,
        env_var: &'static str,
    },
}

/// Directory holding the `saves/` folder.
///
/// `TILEWORLD_ROOT` is used as-is and created if missing. Without it the
/// project root found by walking up from the executable is used.
pub fn resolve_data_root() -> Result<PathBuf, StartupError> {
    let root = match env::var(ROOT_ENV_VAR) {
        Ok(value) => PathBuf::from(value),
        Err(env::VarError::NotPresent) => find_project_root()?,
        Err(source) => {
            return Err(StartupError::EnvVar {
                var: ROOT_ENV_VAR,
                source,
            })
        }
    };
    fs::create_dir_all(&root).map_err(|source| StartupError::CreateSaveDir {
        path: root.clone(),
        source,
    })?;
    Ok(normalize_path(&root))
}

fn find_project_root() -> Result<PathBuf, StartupError> {
    let exe = env::current_exe().map_err(StartupError::CurrentExe)?;
    let exe_dir = exe
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| StartupError::ExeHasNoParent(exe.clone()))?;

    for candidate in exe_dir.ancestors() {
        if is_repo_marker(candidate) {
            return Ok(normalize_path(candidate));
        }
    }

    Err(StartupError::RootNotFound {
        start_dir: normalize_path(&exe_dir),
        env_var: ROOT_ENV_VAR,
    })
}

fn is_repo_marker(path: &Path) -> bool {
    path.join("Cargo.toml").is_file() && path.join("crates").is_dir()
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_marker_requires_cargo_toml() {
        let cwd = env::current_dir().expect("cwd");
        assert!(!is_repo_marker(&cwd.join("definitely_not_a_marker")));
    }

    #[test]
    fn save_files_sit_one_saves_folder_below_the_root() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let data = dir.path().join("data");
        env::set_var(ROOT_ENV_VAR, &data);
        let root = resolve_data_root();
        env::remove_var(ROOT_ENV_VAR);
        let root = root.expect("root");

        assert_eq!(root, fs::canonicalize(&data).expect("created"));
        let layout = storage::SaveLayout::new(&root, "alpha", "overworld");
        assert_eq!(layout.save_dir(), root.join("saves").join("alpha"));
    }

    #[test]
    fn repo_marker_accepts_workspace_layout() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        fs::write(dir.path().join("Cargo.toml"), "[workspace]\n").expect("write");
        assert!(!is_repo_marker(dir.path()));
        fs::create_dir(dir.path().join("crates")).expect("mkdir");
        assert!(is_repo_marker(dir.path()));
    }
}
