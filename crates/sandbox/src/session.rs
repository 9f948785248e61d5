use std::path::Path;

use tileworld::{
    EntityAssetId, EntityPayload, ForceGenerator, GlobalId, RigidBody, TerrainLayer,
    TileCoord, TileSpace, Vec2, World,
};
use tracing::{info, warn};

use crate::bootstrap::{build_registry, BootstrapResult, Palette, SandboxConfig};

const CRATE_ASSET: EntityAssetId = EntityAssetId(1);
const FLOOR_DEPTH: i32 = 6;
const FLOOR_HALF_WIDTH: i32 = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SessionSummary {
    pub(crate) frames: u32,
    pub(crate) physics_steps: u32,
    pub(crate) chunks_loaded: usize,
    pub(crate) chunks_unloaded: usize,
    pub(crate) terrain_events: usize,
    pub(crate) entities_at_start: usize,
    pub(crate) built_landmarks: bool,
}

fn world_err(context: &str, error: impl std::fmt::Display) -> String {
    format!("{context}: {error}")
}

/// Opens the configured world under `root`, builds a small scene on first
/// run, walks the focus point for the scripted number of frames and shuts
/// the world down again.
pub(crate) fn run_session(root: &Path, config: &SandboxConfig) -> BootstrapResult<SessionSummary> {
    let (registry, palette) = build_registry()?;
    let script = &config.session;
    let mut world = World::open(root, config.world.clone(), registry)
        .map_err(|error| world_err("open world", error))?;
    if script.clear_play_folder {
        world
            .clear_play_folder()
            .map_err(|error| world_err("clear play folder", error))?;
    }

    let mut focus = Vec2::new(script.spawn[0], script.spawn[1]);
    let mut summary = SessionSummary::default();
    let change = world
        .load_around(focus)
        .map_err(|error| world_err("initial load", error))?;
    summary.chunks_loaded += change.loaded.len();
    summary.entities_at_start = world.entity_count();

    let floor = TileCoord::new(focus.x.floor() as i32, focus.y.floor() as i32 - FLOOR_DEPTH);
    let floor_is_empty = world.terrain().global_id(floor, TerrainLayer::Ground) == Some(GlobalId(0));
    if floor_is_empty && summary.entities_at_start == 0 {
        build_landmarks(&mut world, palette, focus, floor)?;
        summary.built_landmarks = true;
    }
    attach_gravity(&mut world)?;

    let walk = Vec2::new(script.walk_speed[0], script.walk_speed[1]);
    let mut focus_chunk = world.terrain().layout().world_to_chunk(focus);
    for _ in 0..script.frames {
        focus += walk * script.frame_dt as f32;
        let chunk = world.terrain().layout().world_to_chunk(focus);
        if chunk != focus_chunk {
            focus_chunk = chunk;
            let change = world
                .load_around(focus)
                .map_err(|error| world_err("focus load", error))?;
            summary.chunks_loaded += change.loaded.len();
            summary.chunks_unloaded += change.unloaded.len();
        }
        summary.physics_steps += world
            .update(script.frame_dt)
            .map_err(|error| world_err("update", error))?;
        world.terrain_mut().flush_rebuilds();
        summary.terrain_events += world.terrain_mut().drain_events().len();
        summary.frames += 1;
    }

    world
        .shutdown()
        .map_err(|error| world_err("shutdown", error))?;
    info!(
        frames = summary.frames,
        physics_steps = summary.physics_steps,
        chunks_loaded = summary.chunks_loaded,
        chunks_unloaded = summary.chunks_unloaded,
        terrain_events = summary.terrain_events,
        "session_finished"
    );
    Ok(summary)
}

fn build_landmarks(
    world: &mut World,
    palette: Palette,
    focus: Vec2,
    floor: TileCoord,
) -> BootstrapResult<()> {
    let mut placements = Vec::new();
    for dx in -FLOOR_HALF_WIDTH..=FLOOR_HALF_WIDTH {
        let tile = floor.offset(dx, 0);
        placements.push((TerrainLayer::Ground, palette.dirt, tile));
        placements.push((TerrainLayer::Ground, palette.stone, tile.offset(0, -1)));
    }
    for dx in 8..12 {
        placements.push((TerrainLayer::Decoration, palette.water, floor.offset(dx, 1)));
    }
    for dx in [-9, -4, 3] {
        placements.push((TerrainLayer::Decoration, palette.grass, floor.offset(dx, 1)));
    }
    let terrain = world.terrain_mut();
    for (layer, id, at) in placements {
        if let Err(error) = terrain.set_global_id(at, layer, id) {
            warn!(tile = %at, layer = %layer, error = %error, "landmark_tile_skipped");
        }
    }

    let crate_uid = world
        .spawn_entity(
            CRATE_ASSET,
            focus + Vec2::new(0.0, 4.0),
            EntityPayload::new("crate").with_field("contents", "rope"),
        )
        .map_err(|error| world_err("spawn crate", error))?;

    let raft = world
        .create_mobile_chunk((4, 1), focus + Vec2::new(-6.0, 2.0))
        .map_err(|error| world_err("create raft", error))?;
    for x in 0..4 {
        world
            .terrain_mut()
            .set_global_id_in(
                TileSpace::Mobile(raft),
                TileCoord::new(x, 0),
                TerrainLayer::Ground,
                palette.stone,
            )
            .map_err(|error| world_err("raft tile", error))?;
    }
    info!(
        crate_uid = %crate_uid,
        raft = %raft,
        floor = %floor,
        "landmarks_built"
    );
    Ok(())
}

/// Bodies are not persisted; every session gives crates and mobile chunks
/// gravity again.
fn attach_gravity(world: &mut World) -> BootstrapResult<()> {
    let gravity = world.physics().settings().gravity;
    for uid in world.entity_uids() {
        let is_crate = world
            .entity(uid)
            .is_some_and(|entity| entity.asset == CRATE_ASSET);
        if is_crate && world.entity_body(uid).is_none() {
            let mut body = RigidBody::boxed(Vec2::ZERO, Vec2::ONE);
            body.apply_generic_gravity_on_load = true;
            body.floor_friction = 0.5;
            world
                .attach_entity_body(uid, body)
                .map_err(|error| world_err("attach crate body", error))?;
        }
    }
    for uid in world.terrain().mobile_chunk_uids() {
        let Some(id) = world.mobile_chunk_body(uid) else {
            continue;
        };
        if let Some(body) = world.physics_mut().body_mut(id) {
            if body.forces.is_empty() {
                body.forces.push(ForceGenerator::new(gravity));
            }
        }
    }
    Ok(())
}
