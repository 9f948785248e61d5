use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DataLoadMode, DataSaveMode, SaveScope, WorldConfig};
use crate::coords::{ChunkCoord, RegionCoord};
use crate::entity::{EntityAssetId, EntityData, EntityPayload, EntityUid};
use crate::math::Vec2;
use crate::physics::{BodyId, BodyShape, PhysicsWorld, RigidBody};
use crate::regions::{EntityRegionManager, MembershipError};
use crate::storage::{
    EntityRef, LoadOutcome, PersistenceManager, SaveJob, SaveLayout, SaveQueue, SaveReceipt,
    SaveTarget, StorageError, WorldMetadata,
};
use crate::terrain::{MobileDataChunk, MobileUid, TerrainError, TerrainManager};
use crate::tiles::TileRegistry;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Terrain(#[from] TerrainError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error("entity {uid} is not loaded")]
    EntityNotLoaded { uid: EntityUid },
}

/// Anything that is listed in a region and may own a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorldObject {
    MobileChunk(MobileUid),
    Entity(EntityUid),
}

/// Bodies of out-of-bounds objects are taken out of the simulation and kept
/// here until their chunks load again.
#[derive(Debug)]
enum BodyBinding {
    Active(BodyId),
    Parked(RigidBody),
}

/// Chunks touched by one [`World::load_around`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusChange {
    pub loaded: Vec<ChunkCoord>,
    pub unloaded: Vec<ChunkCoord>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StepPlan {
    steps_to_run: u32,
    remaining_accumulator: f64,
    dropped_backlog: f64,
}

fn plan_physics_steps(mut accumulator: f64, fixed_dt: f64, max_steps: u32) -> StepPlan {
    let mut steps_to_run = 0u32;
    while accumulator >= fixed_dt && steps_to_run < max_steps {
        accumulator -= fixed_dt;
        steps_to_run += 1;
    }
    if accumulator >= fixed_dt {
        StepPlan {
            steps_to_run,
            remaining_accumulator: 0.0,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            steps_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: 0.0,
        }
    }
}

/// Owns every loaded piece of one save/dimension and runs the protocols
/// that span several managers: a chunk load pulls in its region and the
/// region's residents, an unload saves through the background queue, and
/// bodies moved by physics are re-filed in the region of their new chunk.
pub struct World {
    config: WorldConfig,
    persistence: PersistenceManager,
    terrain: TerrainManager,
    regions: EntityRegionManager,
    physics: PhysicsWorld,
    save_queue: SaveQueue,
    metadata: WorldMetadata,
    entities: BTreeMap<EntityUid, EntityData>,
    bodies: BTreeMap<WorldObject, BodyBinding>,
    clock: f64,
    physics_accumulator: f64,
}

impl World {
    /// Validates `config` and opens the save under `root`. Nothing is loaded
    /// until the first [`World::load_chunk`] or [`World::load_around`].
    pub fn open(
        root: &Path,
        config: WorldConfig,
        registry: Arc<TileRegistry>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let layout = config.layout();
        let save_layout = SaveLayout::new(root, &config.save_name, &config.dimension);
        let persistence = PersistenceManager::new(save_layout, Arc::clone(&registry)).with_modes(
            config.scope,
            config.load_mode,
            config.save_mode,
        );
        let metadata = persistence.load_world_metadata()?;
        info!(
            save = %config.save_name,
            dimension = %config.dimension,
            next_mobile_uid = metadata.next_mobile_uid,
            next_entity_uid = metadata.next_entity_uid,
            "world_opened"
        );
        Ok(Self {
            terrain: TerrainManager::new(layout, registry, config.refresh_radius),
            regions: EntityRegionManager::new(
                layout,
                config.autosave_interval_secs,
                config.out_of_bounds_refresh_secs,
            ),
            physics: PhysicsWorld::new(config.physics.clone()),
            save_queue: SaveQueue::new(),
            persistence,
            metadata,
            entities: BTreeMap::new(),
            bodies: BTreeMap::new(),
            clock: 0.0,
            physics_accumulator: 0.0,
            config,
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn terrain(&self) -> &TerrainManager {
        &self.terrain
    }

    pub fn terrain_mut(&mut self) -> &mut TerrainManager {
        &mut self.terrain
    }

    pub fn regions(&self) -> &EntityRegionManager {
        &self.regions
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.physics
    }

    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    pub fn metadata(&self) -> WorldMetadata {
        self.metadata
    }

    /// Session time in seconds, advanced by [`World::update`].
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn set_data_modes(&mut self, scope: SaveScope, load_mode: DataLoadMode, save_mode: DataSaveMode) {
        self.persistence.set_modes(scope, load_mode, save_mode);
    }

    /// Queued saves are written first so none lands in the cleared folder
    /// afterwards.
    pub fn clear_play_folder(&mut self) -> Result<bool, WorldError> {
        self.flush_saves();
        Ok(self.persistence.clear_play_folder()?)
    }

    // ---- frame ----

    /// Advances the session clock by `dt` seconds: collects finished saves,
    /// runs due fixed physics steps, sweeps out-of-bounds objects and
    /// autosaves. Returns the number of physics steps run.
    pub fn update(&mut self, dt: f64) -> Result<u32, WorldError> {
        self.clock += dt;
        self.process_save_receipts();

        let fixed_dt = f64::from(self.physics.settings().fixed_dt);
        let plan = plan_physics_steps(
            self.physics_accumulator + dt,
            fixed_dt,
            self.config.max_physics_steps_per_update,
        );
        for _ in 0..plan.steps_to_run {
            self.step_physics();
        }
        self.physics_accumulator = plan.remaining_accumulator;
        if plan.dropped_backlog > 0.0 {
            warn!(
                dropped_backlog = plan.dropped_backlog,
                max_steps = self.config.max_physics_steps_per_update,
                "physics_clamp_triggered"
            );
        }

        if self.regions.tick_out_of_bounds(dt) {
            self.reactivate_in_bounds();
        }
        self.autosave()?;
        Ok(plan.steps_to_run)
    }

    /// One fixed physics step, then moved objects are re-filed in the
    /// region of their new chunk. Objects that left the loaded chunks are
    /// deactivated.
    pub fn step_physics(&mut self) {
        let tracked: Vec<(WorldObject, BodyId, Vec2)> = self
            .bodies
            .iter()
            .filter_map(|(object, binding)| match binding {
                BodyBinding::Active(id) => {
                    let body = self.physics.body(*id)?;
                    Some((*object, *id, body.position))
                }
                BodyBinding::Parked(_) => None,
            })
            .collect();

        self.physics.step(&self.terrain);

        for (object, id, previous) in tracked {
            let Some((position, velocity)) = self
                .physics
                .body(id)
                .map(|body| (body.position, body.velocity))
            else {
                continue;
            };
            let moved = match object {
                WorldObject::MobileChunk(uid) => {
                    if let Some(mobile) = self.terrain.mobile_chunk_mut(uid) {
                        mobile.position = position;
                        mobile.velocity = velocity;
                    }
                    self.regions.move_mobile_chunk(uid, previous, position)
                }
                WorldObject::Entity(uid) => match self.entities.get_mut(&uid) {
                    Some(entity) => {
                        entity.position = position;
                        let entity_ref = EntityRef {
                            uid,
                            asset: entity.asset,
                        };
                        self.regions.move_entity(entity_ref, previous, position)
                    }
                    None => continue,
                },
            };
            if moved.is_err() || !self.is_in_loaded_chunks(object) {
                self.deactivate(object);
            }
        }
    }

    // ---- chunks ----

    /// Loads `coord` from disk (empty when no file exists), then its region
    /// and the region's residents if the region was not loaded yet. Returns
    /// false when the chunk was already loaded.
    pub fn load_chunk(&mut self, coord: ChunkCoord) -> Result<bool, WorldError> {
        if self.terrain.is_chunk_loaded(coord) {
            return Ok(false);
        }
        self.settle_pending(SaveTarget::Chunk(coord));
        let loaded = {
            let chunk = self.terrain.get_new_data_chunk(coord)?;
            self.persistence.load_chunk(coord, chunk)
        };
        match loaded {
            Ok(LoadOutcome::Corrupt { reason }) => {
                warn!(chunk = %coord, reason = %reason, "chunk_regenerated_empty");
            }
            Ok(_) => {}
            Err(error) => {
                if let Some(handle) = self.terrain.detach_chunk(coord) {
                    self.terrain.release_slot(handle);
                }
                return Err(error.into());
            }
        }
        self.terrain.activate_chunk(coord);
        debug!(chunk = %coord, "chunk_loaded");

        if let Some(region) = self.regions.region_needed_for_chunk(coord) {
            self.load_region(region)?;
        }
        Ok(true)
    }

    /// Removes `coord` from the loaded set and queues its save. The chunk's
    /// slot is only reused after the write is reported done. Unloads the
    /// region too once none of its chunks are left.
    /// A chunk whose save cannot be encoded stays loaded and the error is
    /// returned.
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> Result<bool, WorldError> {
        let job = match self.terrain.chunk_mut(coord) {
            Some(chunk) => self.persistence.prepare_chunk_save(chunk)?,
            None => return Ok(false),
        };
        let Some(handle) = self.terrain.detach_chunk(coord) else {
            return Ok(false);
        };
        match job {
            Some(job) => {
                let ticket = self.save_queue.enqueue(job);
                self.terrain.pin_until_saved(ticket, handle);
            }
            None => {
                self.terrain.release_slot(handle);
            }
        }
        debug!(chunk = %coord, "chunk_unloaded");

        let terrain = &self.terrain;
        let region = self
            .regions
            .region_to_unload_at_chunk(coord, |chunk| terrain.is_chunk_loaded(chunk));
        if let Some(region) = region {
            self.unload_region(region)?;
        }
        self.deactivate_out_of_bounds();
        Ok(true)
    }

    /// Keeps the chunks within `load_radius` of `focus` loaded and unloads
    /// the rest.
    pub fn load_around(&mut self, focus: Vec2) -> Result<FocusChange, WorldError> {
        let center = self.terrain.layout().world_to_chunk(focus);
        let [radius_x, radius_y] = self.config.load_radius;
        let mut wanted = Vec::new();
        for x in center.x - radius_x..=center.x + radius_x {
            for y in center.y - radius_y..=center.y + radius_y {
                wanted.push(ChunkCoord::new(x, y));
            }
        }
        let keep: HashSet<ChunkCoord> = wanted.iter().copied().collect();

        let mut change = FocusChange::default();
        for coord in self.terrain.loaded_chunk_coords() {
            if !keep.contains(&coord) && self.unload_chunk(coord)? {
                change.unloaded.push(coord);
            }
        }
        for coord in wanted {
            if self.load_chunk(coord)? {
                change.loaded.push(coord);
            }
        }
        if !change.loaded.is_empty() || !change.unloaded.is_empty() {
            info!(
                focus_chunk = %center,
                loaded = change.loaded.len(),
                unloaded = change.unloaded.len(),
                "focus_chunks_updated"
            );
        }
        Ok(change)
    }

    // ---- regions ----

    fn load_region(&mut self, region: RegionCoord) -> Result<(), WorldError> {
        self.settle_pending(SaveTarget::Region(region));
        let document = match self.persistence.load_region(region)? {
            LoadOutcome::Loaded(document) => Some(document),
            LoadOutcome::NotFound => None,
            LoadOutcome::Corrupt { reason } => {
                warn!(region = %region, reason = %reason, "region_membership_lost");
                None
            }
        };
        let report = self.regions.load_region(region, document, self.clock)?;
        for uid in report.mobile_chunks {
            self.load_mobile_chunk(uid)?;
        }
        for entity in report.entities {
            self.load_entity(entity)?;
        }
        Ok(())
    }

    fn unload_region(&mut self, region: RegionCoord) -> Result<(), WorldError> {
        let Some(report) = self.regions.unload_region(region) else {
            return Ok(());
        };
        let job = self.persistence.prepare_region_save(&report.document)?;
        self.enqueue(job);
        for uid in report.mobile_chunks {
            self.unload_mobile_chunk(uid)?;
        }
        for uid in report.entities {
            self.unload_entity(uid)?;
        }
        Ok(())
    }

    // ---- mobile chunks ----

    fn allocate_mobile_uid(&mut self) -> Result<MobileUid, WorldError> {
        let uid = MobileUid(self.metadata.next_mobile_uid);
        self.metadata.next_mobile_uid += 1;
        self.persistence.save_world_metadata(&self.metadata)?;
        Ok(uid)
    }

    /// Creates an empty mobile chunk with a fresh UID and a body sized to
    /// its restricted grid.
    pub fn create_mobile_chunk(
        &mut self,
        restricted_size: (i32, i32),
        position: Vec2,
    ) -> Result<MobileUid, WorldError> {
        let uid = self.allocate_mobile_uid()?;
        let mobile = self.terrain.create_mobile_chunk(uid, restricted_size, position)?;
        let body = Self::mobile_body(mobile);
        self.attach_body(WorldObject::MobileChunk(uid), body);
        self.file_new_object(WorldObject::MobileChunk(uid), position);
        Ok(uid)
    }

    fn mobile_body(mobile: &MobileDataChunk) -> RigidBody {
        let mut body = RigidBody::new(
            mobile.position,
            BodyShape::Complex {
                size: mobile.collider_size,
            },
        );
        body.velocity = mobile.velocity;
        body
    }

    /// Loads a stored mobile chunk. A missing or corrupt file drops it.
    pub fn load_mobile_chunk(&mut self, uid: MobileUid) -> Result<bool, WorldError> {
        if let Some(position) = self.terrain.mobile_chunk(uid).map(|mobile| mobile.position) {
            self.file_new_object(WorldObject::MobileChunk(uid), position);
            return Ok(true);
        }
        self.settle_pending(SaveTarget::MobileChunk(uid));
        let mut mobile = MobileDataChunk::new(uid, self.terrain.layout().chunk_size());
        match self.persistence.load_mobile_chunk(uid, &mut mobile)? {
            LoadOutcome::Loaded(_) => {}
            LoadOutcome::NotFound => {
                warn!(uid = %uid, "mobile_chunk_file_missing_dropped");
                return Ok(false);
            }
            LoadOutcome::Corrupt { .. } => return Ok(false),
        }
        let position = mobile.position;
        let body = Self::mobile_body(&mobile);
        self.terrain.insert_mobile_chunk(mobile)?;
        self.attach_body(WorldObject::MobileChunk(uid), body);
        self.file_new_object(WorldObject::MobileChunk(uid), position);
        Ok(true)
    }

    fn unload_mobile_chunk(&mut self, uid: MobileUid) -> Result<(), WorldError> {
        self.detach_body(WorldObject::MobileChunk(uid));
        if let Some(mut mobile) = self.terrain.remove_mobile_chunk(uid) {
            let job = self.persistence.prepare_mobile_chunk_save(&mut mobile)?;
            self.enqueue(job);
        }
        Ok(())
    }

    /// Removes a mobile chunk for good, file included.
    pub fn destroy_mobile_chunk(&mut self, uid: MobileUid) -> Result<bool, WorldError> {
        if self.terrain.remove_mobile_chunk(uid).is_none() {
            return Ok(false);
        }
        self.detach_body(WorldObject::MobileChunk(uid));
        // Unlisted chunks are already logged by the region manager.
        let _ = self.regions.remove_mobile_chunk(uid);
        self.settle_pending(SaveTarget::MobileChunk(uid));
        self.persistence.delete_mobile_chunk(uid)?;
        info!(uid = %uid, "mobile_chunk_destroyed");
        Ok(true)
    }

    pub fn mobile_chunk_body(&self, uid: MobileUid) -> Option<BodyId> {
        self.active_body(WorldObject::MobileChunk(uid))
    }

    // ---- entities ----

    fn allocate_entity_uid(&mut self) -> Result<EntityUid, WorldError> {
        let uid = EntityUid(self.metadata.next_entity_uid);
        self.metadata.next_entity_uid += 1;
        self.persistence.save_world_metadata(&self.metadata)?;
        Ok(uid)
    }

    pub fn spawn_entity(
        &mut self,
        asset: EntityAssetId,
        position: Vec2,
        payload: EntityPayload,
    ) -> Result<EntityUid, WorldError> {
        let uid = self.allocate_entity_uid()?;
        let mut entity = EntityData::new(uid, asset, position);
        entity.payload = payload;
        entity.last_autosave = self.clock;
        self.entities.insert(uid, entity);
        self.file_new_object(WorldObject::Entity(uid), position);
        debug!(uid = %uid, asset = asset.0, "entity_spawned");
        Ok(uid)
    }

    /// Loads a stored entity listed in a region. A missing or corrupt file
    /// drops it.
    pub fn load_entity(&mut self, entity: EntityRef) -> Result<bool, WorldError> {
        if let Some(position) = self.entities.get(&entity.uid).map(|loaded| loaded.position) {
            self.file_new_object(WorldObject::Entity(entity.uid), position);
            return Ok(true);
        }
        self.settle_pending(SaveTarget::Entity(entity.uid));
        let mut data = match self.persistence.load_entity(entity.uid)? {
            LoadOutcome::Loaded(data) => data,
            LoadOutcome::NotFound => {
                warn!(uid = %entity.uid, "entity_file_missing_dropped");
                return Ok(false);
            }
            LoadOutcome::Corrupt { .. } => return Ok(false),
        };
        if data.asset != entity.asset {
            warn!(
                uid = %entity.uid,
                listed = entity.asset.0,
                stored = data.asset.0,
                "entity_asset_mismatch_using_stored"
            );
        }
        data.last_autosave = self.clock;
        let position = data.position;
        self.entities.insert(entity.uid, data);
        self.file_new_object(WorldObject::Entity(entity.uid), position);
        Ok(true)
    }

    fn unload_entity(&mut self, uid: EntityUid) -> Result<(), WorldError> {
        self.detach_body(WorldObject::Entity(uid));
        if let Some(entity) = self.entities.remove(&uid) {
            let job = self.persistence.prepare_entity_save(&entity)?;
            self.enqueue(job);
        }
        Ok(())
    }

    pub fn destroy_entity(&mut self, uid: EntityUid) -> Result<bool, WorldError> {
        if self.entities.remove(&uid).is_none() {
            return Ok(false);
        }
        self.detach_body(WorldObject::Entity(uid));
        // Unlisted entities are already logged by the region manager.
        let _ = self.regions.remove_entity(uid);
        self.settle_pending(SaveTarget::Entity(uid));
        self.persistence.delete_entity(uid)?;
        info!(uid = %uid, "entity_destroyed");
        Ok(true)
    }

    pub fn entity(&self, uid: EntityUid) -> Option<&EntityData> {
        self.entities.get(&uid)
    }

    /// Gameplay-side edits. Position changes of entities with a body are
    /// overwritten by the next physics step.
    pub fn entity_mut(&mut self, uid: EntityUid) -> Option<&mut EntityData> {
        self.entities.get_mut(&uid)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity_uids(&self) -> Vec<EntityUid> {
        self.entities.keys().copied().collect()
    }

    /// Gives a loaded entity a body placed at the entity's position,
    /// replacing any body it had.
    pub fn attach_entity_body(&mut self, uid: EntityUid, mut body: RigidBody) -> Result<(), WorldError> {
        let Some(entity) = self.entities.get(&uid) else {
            return Err(WorldError::EntityNotLoaded { uid });
        };
        body.position = entity.position;
        let object = WorldObject::Entity(uid);
        self.detach_body(object);
        self.attach_body(object, body);
        if self.regions.out_of_bounds_entities().contains(&uid) {
            self.park_body(object);
        }
        Ok(())
    }

    pub fn entity_body(&self, uid: EntityUid) -> Option<BodyId> {
        self.active_body(WorldObject::Entity(uid))
    }

    // ---- bodies and activity ----

    fn attach_body(&mut self, object: WorldObject, body: RigidBody) {
        let id = self.physics.add_body(body);
        self.bodies.insert(object, BodyBinding::Active(id));
    }

    fn detach_body(&mut self, object: WorldObject) -> Option<RigidBody> {
        match self.bodies.remove(&object)? {
            BodyBinding::Active(id) => self.physics.remove_body(id),
            BodyBinding::Parked(body) => Some(body),
        }
    }

    fn active_body(&self, object: WorldObject) -> Option<BodyId> {
        match self.bodies.get(&object)? {
            BodyBinding::Active(id) => Some(*id),
            BodyBinding::Parked(_) => None,
        }
    }

    fn park_body(&mut self, object: WorldObject) {
        let Some(binding) = self.bodies.get_mut(&object) else {
            return;
        };
        if let BodyBinding::Active(id) = *binding {
            if let Some(body) = self.physics.remove_body(id) {
                *binding = BodyBinding::Parked(body);
            }
        }
    }

    fn unpark_body(&mut self, object: WorldObject) {
        match self.bodies.remove(&object) {
            Some(BodyBinding::Parked(body)) => self.attach_body(object, body),
            Some(active) => {
                self.bodies.insert(object, active);
            }
            None => {}
        }
    }

    fn is_in_loaded_chunks(&self, object: WorldObject) -> bool {
        match object {
            WorldObject::MobileChunk(uid) => self.terrain.is_mobile_chunk_in_loaded_chunks(uid),
            WorldObject::Entity(uid) => self
                .entities
                .get(&uid)
                .is_some_and(|entity| self.terrain.is_entity_in_loaded_chunks(entity)),
        }
    }

    /// Lists a freshly loaded or created object in its region and
    /// deactivates it if it cannot be listed or sits outside loaded chunks.
    fn file_new_object(&mut self, object: WorldObject, position: Vec2) {
        let listed = match object {
            WorldObject::MobileChunk(uid) => self.regions.add_mobile_chunk(uid, position),
            WorldObject::Entity(uid) => match self.entities.get(&uid) {
                Some(entity) => self.regions.add_entity(
                    EntityRef {
                        uid,
                        asset: entity.asset,
                    },
                    position,
                ),
                None => return,
            },
        };
        let listed = matches!(
            listed,
            Ok(()) | Err(MembershipError::MobileChunkAlreadyListed { .. })
                | Err(MembershipError::EntityAlreadyListed { .. })
        );
        if !listed || !self.is_in_loaded_chunks(object) {
            self.deactivate(object);
        }
    }

    fn deactivate(&mut self, object: WorldObject) {
        match object {
            WorldObject::MobileChunk(uid) => {
                if let Some(mobile) = self.terrain.mobile_chunk_mut(uid) {
                    mobile.active = false;
                }
                self.regions.mark_mobile_chunk_out_of_bounds(uid);
            }
            WorldObject::Entity(uid) => self.regions.mark_entity_out_of_bounds(uid),
        }
        self.park_body(object);
        debug!(object = ?object, "object_deactivated_out_of_bounds");
    }

    fn deactivate_out_of_bounds(&mut self) {
        let mut leaving = Vec::new();
        for uid in self.terrain.mobile_chunk_uids() {
            let active = self.terrain.mobile_chunk(uid).is_some_and(|mobile| mobile.active);
            if active && !self.terrain.is_mobile_chunk_in_loaded_chunks(uid) {
                leaving.push(WorldObject::MobileChunk(uid));
            }
        }
        let parked = self.regions.out_of_bounds_entities();
        for (uid, entity) in &self.entities {
            if !parked.contains(uid) && !self.terrain.is_entity_in_loaded_chunks(entity) {
                leaving.push(WorldObject::Entity(*uid));
            }
        }
        for object in leaving {
            self.deactivate(object);
        }
    }

    /// Reactivates out-of-bounds objects whose chunks are loaded again and
    /// lists any that lost their region entry while away.
    fn reactivate_in_bounds(&mut self) {
        let terrain = &self.terrain;
        let entities = &self.entities;
        let sweep = self.regions.sweep_out_of_bounds(
            |uid| terrain.mobile_chunk(uid).is_some() && terrain.is_mobile_chunk_in_loaded_chunks(uid),
            |uid| {
                entities
                    .get(&uid)
                    .is_some_and(|entity| terrain.is_entity_in_loaded_chunks(entity))
            },
        );
        for uid in sweep.mobile_chunks {
            let Some(mobile) = self.terrain.mobile_chunk_mut(uid) else {
                continue;
            };
            mobile.active = true;
            let position = mobile.position;
            if self.regions.mobile_chunk_location(uid).is_none() {
                let _ = self.regions.add_mobile_chunk(uid, position);
            }
            self.unpark_body(WorldObject::MobileChunk(uid));
        }
        for uid in sweep.entities {
            let Some(entity) = self.entities.get(&uid) else {
                continue;
            };
            let entity_ref = EntityRef {
                uid,
                asset: entity.asset,
            };
            let position = entity.position;
            if self.regions.entity_location(uid).is_none() {
                let _ = self.regions.add_entity(entity_ref, position);
            }
            self.unpark_body(WorldObject::Entity(uid));
        }
    }

    // ---- saving ----

    fn enqueue(&mut self, job: Option<SaveJob>) {
        if let Some(job) = job {
            self.save_queue.enqueue(job);
        }
    }

    /// Releases chunk slots whose saves finished. Returns the receipts.
    pub fn process_save_receipts(&mut self) -> Vec<SaveReceipt> {
        let receipts = self.save_queue.try_completed();
        for receipt in &receipts {
            self.terrain.release_saved(receipt.ticket);
        }
        receipts
    }

    /// Blocks until every queued save is written and releases their slots.
    pub fn flush_saves(&mut self) -> Vec<SaveReceipt> {
        let receipts = self.save_queue.wait_all();
        for receipt in &receipts {
            self.terrain.release_saved(receipt.ticket);
        }
        receipts
    }

    /// Waits for queued writes of `target` so a following read or delete
    /// sees the newest file.
    fn settle_pending(&mut self, target: SaveTarget) {
        for receipt in self.save_queue.wait_for(target) {
            self.terrain.release_saved(receipt.ticket);
        }
    }

    pub fn saves_in_flight(&self) -> usize {
        self.save_queue.in_flight()
    }

    /// Saves regions not saved within the autosave interval together with
    /// their loaded chunks and mobile chunks, then every entity whose own
    /// last save is older than the interval. Returns the number of files
    /// queued.
    pub fn autosave(&mut self) -> Result<usize, WorldError> {
        let now = self.clock;
        let layout = self.terrain.layout();
        let mut queued = 0;
        for document in self.regions.due_for_autosave(now) {
            for chunk in layout.region_chunks(document.region) {
                queued += self.save_loaded_chunk(chunk)?;
            }
            let residents: Vec<MobileUid> = document
                .sub_regions
                .iter()
                .flat_map(|sub| sub.mobile_chunks.iter().copied())
                .collect();
            for uid in residents {
                queued += self.save_loaded_mobile_chunk(uid)?;
            }
            let job = self.persistence.prepare_region_save(&document)?;
            queued += usize::from(job.is_some());
            self.enqueue(job);
        }

        let interval = self.config.autosave_interval_secs;
        let due: Vec<EntityUid> = self
            .entities
            .values()
            .filter(|entity| now - entity.last_autosave > interval)
            .map(|entity| entity.uid)
            .collect();
        for uid in due {
            queued += self.save_loaded_entity(uid)?;
        }
        if queued > 0 {
            debug!(queued, "autosave_queued");
        }
        Ok(queued)
    }

    fn save_loaded_chunk(&mut self, coord: ChunkCoord) -> Result<usize, WorldError> {
        let job = match self.terrain.chunk_mut(coord) {
            Some(chunk) => self.persistence.prepare_chunk_save(chunk)?,
            None => None,
        };
        let queued = usize::from(job.is_some());
        self.enqueue(job);
        Ok(queued)
    }

    fn save_loaded_mobile_chunk(&mut self, uid: MobileUid) -> Result<usize, WorldError> {
        let job = match self.terrain.mobile_chunk_mut(uid) {
            Some(mobile) => self.persistence.prepare_mobile_chunk_save(mobile)?,
            None => None,
        };
        let queued = usize::from(job.is_some());
        self.enqueue(job);
        Ok(queued)
    }

    fn save_loaded_entity(&mut self, uid: EntityUid) -> Result<usize, WorldError> {
        let now = self.clock;
        let job = match self.entities.get_mut(&uid) {
            Some(entity) => {
                entity.last_autosave = now;
                self.persistence.prepare_entity_save(entity)?
            }
            None => None,
        };
        let queued = usize::from(job.is_some());
        self.enqueue(job);
        Ok(queued)
    }

    /// Saves every loaded entity and the membership of every loaded region,
    /// and waits for the writes.
    pub fn complete_entity_save(&mut self) -> Result<usize, WorldError> {
        let mut queued = 0;
        let uids: Vec<EntityUid> = self.entities.keys().copied().collect();
        for uid in uids {
            queued += self.save_loaded_entity(uid)?;
        }
        for document in self.regions.all_documents(self.clock) {
            let job = self.persistence.prepare_region_save(&document)?;
            queued += usize::from(job.is_some());
            self.enqueue(job);
        }
        self.flush_saves();
        info!(files = queued, "complete_entity_save_finished");
        Ok(queued)
    }

    /// Saves everything loaded plus the world metadata and waits for the
    /// writes.
    pub fn complete_save(&mut self) -> Result<usize, WorldError> {
        let mut queued = 0;
        for coord in self.terrain.loaded_chunk_coords() {
            queued += self.save_loaded_chunk(coord)?;
        }
        for uid in self.terrain.mobile_chunk_uids() {
            queued += self.save_loaded_mobile_chunk(uid)?;
        }
        queued += self.complete_entity_save()?;
        self.persistence.save_world_metadata(&self.metadata)?;
        self.flush_saves();
        info!(files = queued, "complete_save_finished");
        Ok(queued)
    }

    /// Unloads every chunk, which saves all residents through their
    /// regions, and waits for the writes.
    pub fn shutdown(mut self) -> Result<(), WorldError> {
        for coord in self.terrain.loaded_chunk_coords() {
            self.unload_chunk(coord)?;
        }
        let uids: Vec<MobileUid> = self.terrain.mobile_chunk_uids();
        for uid in uids {
            self.unload_mobile_chunk(uid)?;
        }
        let entities: Vec<EntityUid> = self.entities.keys().copied().collect();
        for uid in entities {
            self.unload_entity(uid)?;
        }
        self.persistence.save_world_metadata(&self.metadata)?;
        let receipts = self.flush_saves();
        let failed = receipts.iter().filter(|receipt| receipt.result.is_err()).count();
        info!(written = receipts.len() - failed, failed, "world_shutdown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::coords::TileCoord;
    use crate::physics::ForceGenerator;
    use crate::terrain::TerrainLayer;
    use crate::tiles::{GlobalId, SolidTile, TileString};

    fn registry() -> (Arc<TileRegistry>, GlobalId) {
        let mut builder = TileRegistry::builder();
        let stone = builder
            .register(TileString::new("core", "stone"), SolidTile::full())
            .expect("register");
        (Arc::new(builder.build()), stone)
    }

    fn open(dir: &TempDir) -> (World, GlobalId) {
        let (registry, stone) = registry();
        let config = WorldConfig {
            save_name: "test".to_string(),
            load_radius: [1, 1],
            ..WorldConfig::default()
        };
        (World::open(dir.path(), config, registry).expect("open"), stone)
    }

    #[test]
    fn plan_physics_steps_drops_backlog_past_cap() {
        let plan = plan_physics_steps(0.05, 0.02, 5);
        assert_eq!(plan.steps_to_run, 2);
        assert!((plan.remaining_accumulator - 0.01).abs() < 1e-9);

        let plan = plan_physics_steps(0.2, 0.02, 3);
        assert_eq!(plan.steps_to_run, 3);
        assert_eq!(plan.remaining_accumulator, 0.0);
        assert!((plan.dropped_backlog - 0.14).abs() < 1e-9);
    }

    #[test]
    fn chunk_load_pulls_in_region() {
        let dir = TempDir::new().expect("tempdir");
        let (mut world, _) = open(&dir);
        assert!(world.load_chunk(ChunkCoord::new(5, -1)).expect("load"));
        assert!(!world.load_chunk(ChunkCoord::new(5, -1)).expect("reload"));
        assert!(world.regions().is_region_loaded(RegionCoord::new(1, -1)));

        world.unload_chunk(ChunkCoord::new(5, -1)).expect("unload");
        assert!(!world.regions().is_region_loaded(RegionCoord::new(1, -1)));
        world.flush_saves();
        assert_eq!(world.terrain().pinned_slot_count(), 0);
    }

    #[test]
    fn mobile_chunk_survives_region_unload() {
        let dir = TempDir::new().expect("tempdir");
        let (mut world, stone) = open(&dir);
        world.load_around(Vec2::new(8.0, 8.0)).expect("focus");
        let uid = world
            .create_mobile_chunk((3, 2), Vec2::new(4.0, 4.0))
            .expect("create");
        world
            .terrain_mut()
            .set_global_id(TileCoord::new(0, 0), TerrainLayer::Ground, stone)
            .expect("world tile");
        assert!(world.mobile_chunk_body(uid).is_some());

        let far = Vec2::new(500.0, 500.0);
        world.load_around(far).expect("move focus");
        assert!(world.terrain().mobile_chunk(uid).is_none());
        world.flush_saves();

        world.load_around(Vec2::new(8.0, 8.0)).expect("return");
        let mobile = world.terrain().mobile_chunk(uid).expect("reloaded");
        assert_eq!(mobile.restricted_size(), (3, 2));
        assert_eq!(
            world.regions().mobile_chunk_location(uid),
            Some(ChunkCoord::new(0, 0))
        );
        assert_eq!(
            world.terrain().global_id(TileCoord::new(0, 0), TerrainLayer::Ground),
            Some(stone)
        );
    }

    fn queue_backlog(world: &mut World, dir: &TempDir, jobs: u64) {
        for i in 0..jobs {
            world.save_queue.enqueue(SaveJob {
                target: SaveTarget::Entity(EntityUid(10_000 + i)),
                path: dir.path().join("backlog").join(format!("{i}.bin")),
                bytes: vec![0; 4096],
            });
        }
    }

    #[test]
    fn returning_before_saves_finish_reloads_latest_state() {
        let dir = TempDir::new().expect("tempdir");
        let (mut world, stone) = open(&dir);
        let home = Vec2::new(8.0, 8.0);
        world.load_around(home).expect("focus");
        let mobile = world
            .create_mobile_chunk((3, 2), Vec2::new(4.0, 4.0))
            .expect("create");
        let crate_uid = world
            .spawn_entity(
                EntityAssetId(1),
                Vec2::new(6.0, 6.0),
                EntityPayload::new("crate").with_field("contents", "rope"),
            )
            .expect("spawn");
        world
            .terrain_mut()
            .set_global_id(TileCoord::new(3, 3), TerrainLayer::Ground, stone)
            .expect("world tile");

        queue_backlog(&mut world, &dir, 300);
        world.load_around(Vec2::new(500.0, 500.0)).expect("leave");
        world.load_around(home).expect("return");

        let reloaded = world.terrain().mobile_chunk(mobile).expect("mobile reloaded");
        assert_eq!(reloaded.restricted_size(), (3, 2));
        let entity = world.entity(crate_uid).expect("entity reloaded");
        assert_eq!(entity.payload.kind, "crate");
        assert_eq!(
            world.terrain().global_id(TileCoord::new(3, 3), TerrainLayer::Ground),
            Some(stone)
        );
        world.flush_saves();
        assert_eq!(world.terrain().pinned_slot_count(), 0);
    }

    #[test]
    fn destroyed_entity_file_is_not_rewritten_by_queued_save() {
        let dir = TempDir::new().expect("tempdir");
        let (mut world, _) = open(&dir);
        world.load_chunk(ChunkCoord::new(0, 0)).expect("load");
        let uid = world
            .spawn_entity(EntityAssetId(1), Vec2::new(2.0, 2.0), EntityPayload::new("crate"))
            .expect("spawn");
        let path = world
            .persistence()
            .layout()
            .entity_path(world.persistence().scope(), uid);

        queue_backlog(&mut world, &dir, 300);
        world.save_queue.enqueue(SaveJob {
            target: SaveTarget::Entity(uid),
            path: path.clone(),
            bytes: b"{}".to_vec(),
        });
        assert!(world.destroy_entity(uid).expect("destroy"));
        world.flush_saves();
        assert!(!path.exists());
    }

    #[test]
    fn entity_leaving_loaded_chunks_is_parked_and_reactivated() {
        let dir = TempDir::new().expect("tempdir");
        let (mut world, _) = open(&dir);
        world.load_chunk(ChunkCoord::new(0, 0)).expect("load");
        let uid = world
            .spawn_entity(EntityAssetId(1), Vec2::new(8.0, 8.0), EntityPayload::new("crate"))
            .expect("spawn");
        let body = RigidBody::boxed(Vec2::ZERO, Vec2::ONE)
            .with_force(ForceGenerator::new(Vec2::new(400.0, 0.0)));
        world.attach_entity_body(uid, body).expect("body");

        for _ in 0..40 {
            world.step_physics();
        }
        assert!(world.entity_body(uid).is_none());
        assert_eq!(world.regions().out_of_bounds_entities(), &[uid]);

        let x = world.entity(uid).expect("entity").position.x;
        let chunk = world.terrain().layout().world_to_chunk(Vec2::new(x, 8.0));
        world.load_chunk(chunk).expect("load ahead");
        world.load_chunk(chunk.offset(-1, 0)).expect("load seam");
        world.update(1.0).expect("update");
        assert!(world.regions().out_of_bounds_entities().is_empty());
    }

    #[test]
    fn uid_counters_persist() {
        let dir = TempDir::new().expect("tempdir");
        let (mut world, _) = open(&dir);
        world.load_chunk(ChunkCoord::new(0, 0)).expect("load");
        world
            .spawn_entity(EntityAssetId(2), Vec2::new(1.0, 1.0), EntityPayload::new("lamp"))
            .expect("spawn");
        world
            .create_mobile_chunk((2, 2), Vec2::new(2.0, 2.0))
            .expect("create");
        world.shutdown().expect("shutdown");

        let (world, _) = open(&dir);
        assert_eq!(world.metadata().next_entity_uid, 1);
        assert_eq!(world.metadata().next_mobile_uid, 1);
    }
}
