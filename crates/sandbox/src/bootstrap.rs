use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tileworld::tiles::{ConnectedTile, DecorTile, FluidTile, SolidTile};
use tileworld::{GlobalId, TileRegistry, WorldConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub(crate) const CONFIG_ENV_VAR: &str = "TILEWORLD_CONFIG";

pub(crate) type BootstrapResult<T> = Result<T, String>;

/// Scripted session run by the sandbox.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct SessionScript {
    pub(crate) frames: u32,
    pub(crate) frame_dt: f64,
    /// Focus start in world units.
    pub(crate) spawn: [f32; 2],
    /// Focus movement per second, world units.
    pub(crate) walk_speed: [f32; 2],
    /// Wipe the play-test copy before starting.
    pub(crate) clear_play_folder: bool,
}

impl Default for SessionScript {
    fn default() -> Self {
        Self {
            frames: 600,
            frame_dt: 1.0 / 60.0,
            spawn: [8.0, 12.0],
            walk_speed: [6.0, 0.0],
            clear_play_folder: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct SandboxConfig {
    pub(crate) world: WorldConfig,
    pub(crate) session: SessionScript,
}

/// Tile ids the scripted session places.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Palette {
    pub(crate) stone: GlobalId,
    pub(crate) dirt: GlobalId,
    pub(crate) water: GlobalId,
    pub(crate) grass: GlobalId,
}

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

/// Reads the file named by `TILEWORLD_CONFIG`, or the defaults when unset.
pub(crate) fn load_config_from_env() -> BootstrapResult<SandboxConfig> {
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(raw_path) => load_config(Path::new(&raw_path)),
        Err(std::env::VarError::NotPresent) => {
            info!("sandbox_config_defaults");
            Ok(SandboxConfig::default())
        }
        Err(error) => Err(format!("read {CONFIG_ENV_VAR}: {error}")),
    }
}

pub(crate) fn load_config(path: &Path) -> BootstrapResult<SandboxConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("read config '{}': {error}", path.display()))?;
    let config = parse_config_json(&raw)?;
    config
        .world
        .validate()
        .map_err(|error| format!("config '{}': {error}", path.display()))?;
    if !(config.session.frame_dt.is_finite() && config.session.frame_dt > 0.0) {
        return Err(format!(
            "config '{}': session.frame_dt must be > 0",
            path.display()
        ));
    }
    info!(path = %path.display(), "sandbox_config_loaded");
    Ok(config)
}

fn parse_config_json(raw: &str) -> BootstrapResult<SandboxConfig> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    match serde_path_to_error::deserialize::<_, SandboxConfig>(&mut deserializer) {
        Ok(config) => Ok(config),
        Err(error) => {
            let path = error.path().to_string();
            let source = error.into_inner();
            if path.is_empty() || path == "." {
                Err(format!("parse config json: {source}"))
            } else {
                Err(format!("parse config json at {path}: {source}"))
            }
        }
    }
}

fn registered(
    raw: &str,
    result: Result<GlobalId, tileworld::tiles::RegistryError>,
) -> BootstrapResult<GlobalId> {
    result.map_err(|error| format!("register {raw}: {error}"))
}

pub(crate) fn build_registry() -> BootstrapResult<(Arc<TileRegistry>, Palette)> {
    let mut builder = TileRegistry::builder();
    let stone = registered(
        "core:stone",
        builder.register_named("core:stone", SolidTile::full()),
    )?;
    let dirt = registered(
        "core:dirt",
        builder.register_named("core:dirt", ConnectedTile::new()),
    )?;
    let water = registered("core:water", builder.register_named("core:water", FluidTile))?;
    let grass = registered("core:grass", builder.register_named("core:grass", DecorTile))?;
    let registry = builder.build();
    info!(tiles = registry.len(), "tile_registry_built");
    Ok((
        Arc::new(registry),
        Palette {
            stone,
            dirt,
            water,
            grass,
        },
    ))
}

pub(crate) fn resolve_root() -> BootstrapResult<PathBuf> {
    tileworld::resolve_data_root().map_err(|error| error.to_string())
}
