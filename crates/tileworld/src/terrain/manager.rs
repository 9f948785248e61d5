use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::arena::{SlotArena, SlotHandle};
use crate::coords::{ChunkCoord, GridLayout, TileCoord};
use crate::entity::EntityData;
use crate::math::{Bounds2D, Vec2};
use crate::storage::SaveTicket;
use crate::tiles::{GlobalId, TileGridAccess, TileRegistry};

use super::chunk::DataChunk;
use super::layer::TerrainLayer;
use super::mobile::{MobileDataChunk, MobileUid};
use super::{TerrainError, TerrainEvent, TileSpace};

/// Runtime owner of loaded terrain.
///
/// Static chunks live in a slot arena and are found through the 64-bit hash
/// of their coordinates. An unloaded chunk leaves the lookup map at once but
/// its slot stays pinned until the save queue reports its file written.
pub struct TerrainManager {
    layout: GridLayout,
    registry: Arc<TileRegistry>,
    refresh_radius: i32,
    chunks: HashMap<u64, SlotHandle>,
    arena: SlotArena<DataChunk>,
    pinned: HashMap<SaveTicket, SlotHandle>,
    rebuild_keys: HashSet<u64>,
    rebuild_order: Vec<ChunkCoord>,
    mobile_chunks: BTreeMap<MobileUid, MobileDataChunk>,
    mobile_rebuilds: Vec<MobileUid>,
    events: Vec<TerrainEvent>,
}

impl TerrainManager {
    pub fn new(layout: GridLayout, registry: Arc<TileRegistry>, refresh_radius: i32) -> Self {
        Self {
            layout,
            registry,
            refresh_radius: refresh_radius.max(1),
            chunks: HashMap::new(),
            arena: SlotArena::new(),
            pinned: HashMap::new(),
            rebuild_keys: HashSet::new(),
            rebuild_order: Vec::new(),
            mobile_chunks: BTreeMap::new(),
            mobile_rebuilds: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn registry(&self) -> &Arc<TileRegistry> {
        &self.registry
    }

    // ---- static chunks ----

    /// Takes a recycled (or new) chunk, clears it and registers it at
    /// `coord`. The caller fills it, then calls [`Self::activate_chunk`].
    pub fn get_new_data_chunk(&mut self, coord: ChunkCoord) -> Result<&mut DataChunk, TerrainError> {
        let key = coord.hash_key();
        if self.chunks.contains_key(&key) {
            return Err(TerrainError::ChunkAlreadyLoaded { chunk: coord });
        }
        let size = self.layout.chunk_size();
        let handle = self
            .arena
            .allocate(|| DataChunk::new(size), |chunk| chunk.init(coord));
        self.chunks.insert(key, handle);
        self.arena
            .get_mut(handle)
            .ok_or(TerrainError::ChunkNotLoaded { chunk: coord })
    }

    /// Announces a filled chunk and refreshes the tiles along its seams so
    /// connected tiles on both sides pick up their new neighbours.
    pub fn activate_chunk(&mut self, coord: ChunkCoord) {
        if !self.is_chunk_loaded(coord) {
            return;
        }
        self.events.push(TerrainEvent::ChunkLoaded(coord));
        self.refresh_chunk_seams(coord);
    }

    fn refresh_chunk_seams(&mut self, coord: ChunkCoord) {
        let origin = self.layout.chunk_origin_tile(coord);
        let size = self.layout.chunk_size() as i32;
        let on_seam = |v: i32| v <= 0 || v >= size - 1;
        for layer in TerrainLayer::ALL {
            for x in -1..=size {
                for y in -1..=size {
                    if on_seam(x) || on_seam(y) {
                        self.refresh_tile_at(TileSpace::World, origin.offset(x, y), layer);
                    }
                }
            }
        }
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&DataChunk> {
        let handle = self.chunks.get(&coord.hash_key())?;
        self.arena.get(*handle)
    }

    pub fn chunk_mut(&mut self, coord: ChunkCoord) -> Option<&mut DataChunk> {
        let handle = self.chunks.get(&coord.hash_key())?;
        self.arena.get_mut(*handle)
    }

    pub fn is_chunk_loaded(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord.hash_key())
    }

    pub fn loaded_chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Loaded chunk coordinates sorted by x then y.
    pub fn loaded_chunk_coords(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self
            .chunks
            .keys()
            .map(|key| ChunkCoord::from_hash_key(*key))
            .collect();
        coords.sort_by_key(|coord| (coord.x, coord.y));
        coords
    }

    /// Removes `coord` from the loaded set. The slot stays allocated until
    /// [`Self::release_slot`] or [`Self::release_saved`].
    pub fn detach_chunk(&mut self, coord: ChunkCoord) -> Option<SlotHandle> {
        let key = coord.hash_key();
        let handle = self.chunks.remove(&key)?;
        if self.rebuild_keys.remove(&key) {
            self.rebuild_order.retain(|queued| *queued != coord);
        }
        self.events.push(TerrainEvent::ChunkUnloaded(coord));
        Some(handle)
    }

    pub fn pin_until_saved(&mut self, ticket: SaveTicket, handle: SlotHandle) {
        self.pinned.insert(ticket, handle);
    }

    /// Frees the slot pinned by `ticket`. Unknown tickets are ignored.
    pub fn release_saved(&mut self, ticket: SaveTicket) -> bool {
        match self.pinned.remove(&ticket) {
            Some(handle) => self.arena.release(handle),
            None => false,
        }
    }

    pub fn release_slot(&mut self, handle: SlotHandle) -> bool {
        self.arena.release(handle)
    }

    pub fn pinned_slot_count(&self) -> usize {
        self.pinned.len()
    }

    pub fn chunk_slot_capacity(&self) -> usize {
        self.arena.capacity()
    }

    // ---- tiles ----

    pub fn global_id_in(&self, space: TileSpace, tile: TileCoord, layer: TerrainLayer) -> Option<GlobalId> {
        match space {
            TileSpace::World => {
                let chunk = self.chunk(self.layout.tile_to_chunk(tile))?;
                let (x, y) = self.layout.local_in_chunk(tile);
                chunk.global_id(x, y, layer)
            }
            TileSpace::Mobile(uid) => {
                let mobile = self.mobile_chunks.get(&uid)?;
                let (x, y) = mobile.cell(tile)?;
                mobile.chunk.global_id(x, y, layer)
            }
        }
    }

    pub fn bitmask_in(&self, space: TileSpace, tile: TileCoord, layer: TerrainLayer) -> Option<u16> {
        match space {
            TileSpace::World => {
                let chunk = self.chunk(self.layout.tile_to_chunk(tile))?;
                let (x, y) = self.layout.local_in_chunk(tile);
                chunk.bitmask(x, y, layer)
            }
            TileSpace::Mobile(uid) => {
                let mobile = self.mobile_chunks.get(&uid)?;
                let (x, y) = mobile.cell(tile)?;
                mobile.chunk.bitmask(x, y, layer)
            }
        }
    }

    pub fn set_bitmask_in(
        &mut self,
        space: TileSpace,
        tile: TileCoord,
        layer: TerrainLayer,
        bitmask: u16,
    ) -> bool {
        match space {
            TileSpace::World => {
                let (x, y) = self.layout.local_in_chunk(tile);
                match self.chunk_mut(self.layout.tile_to_chunk(tile)) {
                    Some(chunk) => chunk.set_bitmask(x, y, layer, bitmask),
                    None => false,
                }
            }
            TileSpace::Mobile(uid) => {
                let Some(mobile) = self.mobile_chunks.get_mut(&uid) else {
                    return false;
                };
                let Some((x, y)) = mobile.cell(tile) else {
                    return false;
                };
                mobile.chunk.set_bitmask(x, y, layer, bitmask)
            }
        }
    }

    fn write_global_id(
        &mut self,
        space: TileSpace,
        tile: TileCoord,
        layer: TerrainLayer,
        id: GlobalId,
    ) -> bool {
        match space {
            TileSpace::World => {
                let (x, y) = self.layout.local_in_chunk(tile);
                match self.chunk_mut(self.layout.tile_to_chunk(tile)) {
                    Some(chunk) => chunk.set_global_id(x, y, layer, id),
                    None => false,
                }
            }
            TileSpace::Mobile(uid) => {
                let Some(mobile) = self.mobile_chunks.get_mut(&uid) else {
                    return false;
                };
                let Some((x, y)) = mobile.cell(tile) else {
                    return false;
                };
                mobile.chunk.set_global_id(x, y, layer, id)
            }
        }
    }

    pub fn global_id(&self, tile: TileCoord, layer: TerrainLayer) -> Option<GlobalId> {
        self.global_id_in(TileSpace::World, tile, layer)
    }

    pub fn bitmask(&self, tile: TileCoord, layer: TerrainLayer) -> Option<u16> {
        self.bitmask_in(TileSpace::World, tile, layer)
    }

    pub fn global_id_and_bitmask(&self, tile: TileCoord, layer: TerrainLayer) -> Option<(GlobalId, u16)> {
        let chunk = self.chunk(self.layout.tile_to_chunk(tile))?;
        let (x, y) = self.layout.local_in_chunk(tile);
        Some((chunk.global_id(x, y, layer)?, chunk.bitmask(x, y, layer)?))
    }

    pub fn set_bitmask(&mut self, tile: TileCoord, layer: TerrainLayer, bitmask: u16) -> bool {
        self.set_bitmask_in(TileSpace::World, tile, layer, bitmask)
    }

    pub fn set_global_id(
        &mut self,
        tile: TileCoord,
        layer: TerrainLayer,
        id: GlobalId,
    ) -> Result<(), TerrainError> {
        self.set_global_id_in(TileSpace::World, tile, layer, id)
    }

    fn missing_tile_error(&self, space: TileSpace, tile: TileCoord) -> TerrainError {
        match space {
            TileSpace::World => TerrainError::ChunkNotLoaded {
                chunk: self.layout.tile_to_chunk(tile),
            },
            TileSpace::Mobile(uid) if self.mobile_chunks.contains_key(&uid) => {
                TerrainError::OutsideMobileGrid { uid, tile }
            }
            TileSpace::Mobile(uid) => TerrainError::MobileChunkNotLoaded { uid },
        }
    }

    fn edit_target(&mut self, space: TileSpace) -> TileEditTarget<'_> {
        TileEditTarget {
            terrain: self,
            space,
        }
    }

    /// Replaces a tile: the old tile's `on_breaked`, the write, the new
    /// tile's `on_placed`, then a refresh of the surrounding square.
    pub fn set_global_id_in(
        &mut self,
        space: TileSpace,
        tile: TileCoord,
        layer: TerrainLayer,
        id: GlobalId,
    ) -> Result<(), TerrainError> {
        let old = self
            .global_id_in(space, tile, layer)
            .ok_or_else(|| self.missing_tile_error(space, tile))?;
        let registry = Arc::clone(&self.registry);
        let placed = if id.is_air() {
            None
        } else {
            Some(registry.behavior(id).ok_or(TerrainError::UnknownTile { id })?)
        };

        if let Some(broken) = registry.behavior(old) {
            broken.on_breaked(&mut self.edit_target(space), tile, layer);
        }
        self.write_global_id(space, tile, layer, id);
        if let Some(placed) = placed {
            placed.on_placed(&mut self.edit_target(space), tile, layer);
        }
        self.refresh_tiles_around(space, tile, layer, self.refresh_radius);
        Ok(())
    }

    /// Refreshes the `radius`-wide square centred on `tile`. Even widths
    /// round down, so 3 covers the tile and its 8 neighbours.
    pub fn refresh_tiles_around(
        &mut self,
        space: TileSpace,
        tile: TileCoord,
        layer: TerrainLayer,
        radius: i32,
    ) {
        let reach = (radius.max(1) - 1) / 2;
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                self.refresh_tile_at(space, tile.offset(dx, dy), layer);
            }
        }
    }

    /// Runs the tile's refresh callback and queues a rebuild of whatever
    /// holds it. Returns false when the tile is not addressable.
    pub fn refresh_tile_at(&mut self, space: TileSpace, tile: TileCoord, layer: TerrainLayer) -> bool {
        let Some(id) = self.global_id_in(space, tile, layer) else {
            return false;
        };
        let registry = Arc::clone(&self.registry);
        if let Some(behavior) = registry.behavior(id) {
            behavior.on_tile_refreshed(&mut self.edit_target(space), tile, layer);
        }
        match space {
            TileSpace::World => self.queue_chunk_rebuild(self.layout.tile_to_chunk(tile)),
            TileSpace::Mobile(uid) => self.queue_mobile_rebuild(uid),
        }
        true
    }

    pub fn queue_chunk_rebuild(&mut self, coord: ChunkCoord) {
        let key = coord.hash_key();
        if self.chunks.contains_key(&key) && self.rebuild_keys.insert(key) {
            self.rebuild_order.push(coord);
        }
    }

    pub fn queue_mobile_rebuild(&mut self, uid: MobileUid) {
        if !self.mobile_rebuilds.contains(&uid) {
            self.mobile_rebuilds.push(uid);
        }
    }

    /// Turns queued rebuilds into events, once per chunk per flush.
    pub fn flush_rebuilds(&mut self) {
        self.rebuild_keys.clear();
        for coord in std::mem::take(&mut self.rebuild_order) {
            self.events.push(TerrainEvent::ChunkRebuild(coord));
        }
        for uid in std::mem::take(&mut self.mobile_rebuilds) {
            if self.mobile_chunks.contains_key(&uid) {
                self.events.push(TerrainEvent::MobileChunkRebuild(uid));
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<TerrainEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- mobile chunks ----

    pub fn create_mobile_chunk(
        &mut self,
        uid: MobileUid,
        restricted_size: (i32, i32),
        position: Vec2,
    ) -> Result<&mut MobileDataChunk, TerrainError> {
        if self.mobile_chunks.contains_key(&uid) {
            return Err(TerrainError::MobileChunkAlreadyLoaded { uid });
        }
        let mut mobile = MobileDataChunk::new(uid, self.layout.chunk_size());
        mobile.set_restricted_size(restricted_size.0, restricted_size.1);
        mobile.position = position;
        self.events.push(TerrainEvent::MobileChunkLoaded(uid));
        debug!(uid = %uid, x = position.x, y = position.y, "mobile_chunk_created");
        Ok(self.mobile_chunks.entry(uid).or_insert(mobile))
    }

    /// Registers a mobile chunk read from disk and refreshes its tiles.
    pub fn insert_mobile_chunk(&mut self, mobile: MobileDataChunk) -> Result<(), TerrainError> {
        let uid = mobile.uid();
        if self.mobile_chunks.contains_key(&uid) {
            return Err(TerrainError::MobileChunkAlreadyLoaded { uid });
        }
        let (width, height) = mobile.restricted_size();
        self.mobile_chunks.insert(uid, mobile);
        for layer in TerrainLayer::ALL {
            for x in 0..width {
                for y in 0..height {
                    self.refresh_tile_at(TileSpace::Mobile(uid), TileCoord::new(x, y), layer);
                }
            }
        }
        self.events.push(TerrainEvent::MobileChunkLoaded(uid));
        Ok(())
    }

    pub fn mobile_chunk(&self, uid: MobileUid) -> Option<&MobileDataChunk> {
        self.mobile_chunks.get(&uid)
    }

    pub fn mobile_chunk_mut(&mut self, uid: MobileUid) -> Option<&mut MobileDataChunk> {
        self.mobile_chunks.get_mut(&uid)
    }

    pub fn remove_mobile_chunk(&mut self, uid: MobileUid) -> Option<MobileDataChunk> {
        let mobile = self.mobile_chunks.remove(&uid)?;
        self.mobile_rebuilds.retain(|queued| *queued != uid);
        self.events.push(TerrainEvent::MobileChunkUnloaded(uid));
        Some(mobile)
    }

    pub fn mobile_chunk_uids(&self) -> Vec<MobileUid> {
        self.mobile_chunks.keys().copied().collect()
    }

    pub fn mobile_chunks_mut(&mut self) -> impl Iterator<Item = &mut MobileDataChunk> {
        self.mobile_chunks.values_mut()
    }

    /// Lowest-uid active mobile chunk whose restricted rectangle strictly
    /// contains `point`.
    pub fn mobile_chunk_at_position(&self, point: Vec2) -> Option<MobileUid> {
        self.mobile_chunks
            .values()
            .find(|mobile| mobile.active && mobile.contains_point(point))
            .map(MobileDataChunk::uid)
    }

    pub fn is_bounds_in_loaded_chunks(&self, bounds: &Bounds2D) -> bool {
        let min = self.layout.world_to_chunk(bounds.min);
        let max = self.layout.world_to_chunk(bounds.max);
        (min.x..=max.x).all(|x| (min.y..=max.y).all(|y| self.is_chunk_loaded(ChunkCoord::new(x, y))))
    }

    pub fn is_mobile_chunk_in_loaded_chunks(&self, uid: MobileUid) -> bool {
        match self.mobile_chunks.get(&uid) {
            Some(mobile) => self.is_bounds_in_loaded_chunks(&Bounds2D::new(
                mobile.position,
                mobile.position + mobile.collider_size,
            )),
            None => {
                warn!(uid = %uid, "mobile_chunk_bounds_check_on_unloaded_chunk");
                false
            }
        }
    }

    pub fn is_entity_in_loaded_chunks(&self, entity: &EntityData) -> bool {
        self.is_bounds_in_loaded_chunks(&entity.load_bounds())
    }
}

/// Adapter passed to tile callbacks while the manager is mid-edit.
struct TileEditTarget<'a> {
    terrain: &'a mut TerrainManager,
    space: TileSpace,
}

impl TileGridAccess for TileEditTarget<'_> {
    fn global_id_at(&self, tile: TileCoord, layer: TerrainLayer) -> Option<GlobalId> {
        self.terrain.global_id_in(self.space, tile, layer)
    }

    fn bitmask_at(&self, tile: TileCoord, layer: TerrainLayer) -> Option<u16> {
        self.terrain.bitmask_in(self.space, tile, layer)
    }

    fn set_bitmask_at(&mut self, tile: TileCoord, layer: TerrainLayer, bitmask: u16) -> bool {
        self.terrain.set_bitmask_in(self.space, tile, layer, bitmask)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::tiles::{blob, ConnectedTile, SolidTile, TileBehavior};

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl TileBehavior for Recorder {
        fn on_placed(&self, _grid: &mut dyn TileGridAccess, tile: TileCoord, _layer: TerrainLayer) {
            self.calls.lock().expect("lock").push(format!("placed {tile}"));
        }

        fn on_breaked(&self, _grid: &mut dyn TileGridAccess, tile: TileCoord, _layer: TerrainLayer) {
            self.calls.lock().expect("lock").push(format!("breaked {tile}"));
        }
    }

    struct Fixture {
        terrain: TerrainManager,
        dirt: GlobalId,
        stone: GlobalId,
        calls: Arc<Mutex<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut builder = TileRegistry::builder();
        let dirt = builder
            .register_named("core:dirt", ConnectedTile::new())
            .expect("dirt");
        let stone = builder
            .register_named(
                "core:stone",
                Recorder {
                    calls: Arc::clone(&calls),
                },
            )
            .expect("stone");
        let terrain = TerrainManager::new(GridLayout::new(16, 4), Arc::new(builder.build()), 3);
        Fixture {
            terrain,
            dirt,
            stone,
            calls,
        }
    }

    fn load(terrain: &mut TerrainManager, coord: ChunkCoord) {
        terrain.get_new_data_chunk(coord).expect("new chunk");
        terrain.activate_chunk(coord);
    }

    #[test]
    fn setting_a_tile_requires_a_loaded_chunk() {
        let mut fx = fixture();
        assert_eq!(
            fx.terrain
                .set_global_id(TileCoord::new(-1, -1), TerrainLayer::Ground, fx.dirt),
            Err(TerrainError::ChunkNotLoaded {
                chunk: ChunkCoord::new(-1, -1)
            })
        );
        load(&mut fx.terrain, ChunkCoord::new(-1, -1));
        fx.terrain
            .set_global_id(TileCoord::new(-1, -1), TerrainLayer::Ground, fx.dirt)
            .expect("set");
        assert_eq!(
            fx.terrain.global_id(TileCoord::new(-1, -1), TerrainLayer::Ground),
            Some(fx.dirt)
        );
        let chunk = fx.terrain.chunk(ChunkCoord::new(-1, -1)).expect("chunk");
        assert_eq!(chunk.global_id(15, 15, TerrainLayer::Ground), Some(fx.dirt));
    }

    #[test]
    fn placing_connected_tiles_updates_neighbour_bitmasks() {
        let mut fx = fixture();
        load(&mut fx.terrain, ChunkCoord::new(0, 0));
        let left = TileCoord::new(4, 4);
        let right = TileCoord::new(5, 4);
        fx.terrain
            .set_global_id(left, TerrainLayer::Ground, fx.dirt)
            .expect("left");
        assert_eq!(fx.terrain.bitmask(left, TerrainLayer::Ground), Some(0));

        fx.terrain
            .set_global_id(right, TerrainLayer::Ground, fx.dirt)
            .expect("right");
        assert_eq!(fx.terrain.bitmask(left, TerrainLayer::Ground), Some(blob::RIGHT));
        assert_eq!(fx.terrain.bitmask(right, TerrainLayer::Ground), Some(blob::LEFT));
    }

    #[test]
    fn neighbour_refresh_crosses_chunk_seams() {
        let mut fx = fixture();
        load(&mut fx.terrain, ChunkCoord::new(0, 0));
        load(&mut fx.terrain, ChunkCoord::new(1, 0));
        fx.terrain.flush_rebuilds();
        fx.terrain.drain_events();

        fx.terrain
            .set_global_id(TileCoord::new(15, 3), TerrainLayer::Ground, fx.dirt)
            .expect("edge");
        fx.terrain
            .set_global_id(TileCoord::new(16, 3), TerrainLayer::Ground, fx.dirt)
            .expect("other side");
        assert_eq!(
            fx.terrain.bitmask(TileCoord::new(15, 3), TerrainLayer::Ground),
            Some(blob::RIGHT)
        );

        fx.terrain.flush_rebuilds();
        let events = fx.terrain.drain_events();
        assert_eq!(
            events,
            vec![
                TerrainEvent::ChunkRebuild(ChunkCoord::new(0, 0)),
                TerrainEvent::ChunkRebuild(ChunkCoord::new(1, 0)),
            ]
        );
    }

    #[test]
    fn callbacks_run_break_then_place() {
        let mut fx = fixture();
        load(&mut fx.terrain, ChunkCoord::new(0, 0));
        let tile = TileCoord::new(2, 2);
        fx.terrain
            .set_global_id(tile, TerrainLayer::Ground, fx.stone)
            .expect("place");
        fx.terrain
            .set_global_id(tile, TerrainLayer::Ground, GlobalId::AIR)
            .expect("break");
        assert_eq!(
            *fx.calls.lock().expect("lock"),
            vec!["placed (2, 2)".to_string(), "breaked (2, 2)".to_string()]
        );
        assert!(matches!(
            fx.terrain.set_global_id(tile, TerrainLayer::Ground, GlobalId(99)),
            Err(TerrainError::UnknownTile { .. })
        ));
    }

    #[test]
    fn unloaded_slot_is_pinned_until_its_save_completes() {
        let mut fx = fixture();
        load(&mut fx.terrain, ChunkCoord::new(0, 0));
        let handle = fx
            .terrain
            .detach_chunk(ChunkCoord::new(0, 0))
            .expect("detach");
        assert!(!fx.terrain.is_chunk_loaded(ChunkCoord::new(0, 0)));

        let mut queue = crate::storage::SaveQueue::new();
        let temp = tempfile::TempDir::new().expect("temp");
        let ticket = queue.enqueue(crate::storage::SaveJob {
            target: crate::storage::SaveTarget::Chunk(ChunkCoord::new(0, 0)),
            path: temp.path().join("0_0.cdat"),
            bytes: vec![0],
        });
        fx.terrain.pin_until_saved(ticket, handle);

        // A pinned slot is not handed out again.
        load(&mut fx.terrain, ChunkCoord::new(5, 5));
        assert_eq!(fx.terrain.chunk_slot_capacity(), 2);

        for receipt in queue.wait_all() {
            assert!(fx.terrain.release_saved(receipt.ticket));
        }
        assert_eq!(fx.terrain.pinned_slot_count(), 0);
        load(&mut fx.terrain, ChunkCoord::new(6, 6));
        assert_eq!(fx.terrain.chunk_slot_capacity(), 2);
    }

    #[test]
    fn mobile_override_edits_local_grid() {
        let mut fx = fixture();
        let uid = MobileUid(1);
        fx.terrain
            .create_mobile_chunk(uid, (4, 4), Vec2::new(100.0, 50.0))
            .expect("mobile");
        fx.terrain.drain_events();

        let space = TileSpace::Mobile(uid);
        fx.terrain
            .set_global_id_in(space, TileCoord::new(0, 0), TerrainLayer::Ground, fx.dirt)
            .expect("set");
        fx.terrain
            .set_global_id_in(space, TileCoord::new(0, 1), TerrainLayer::Ground, fx.dirt)
            .expect("set");
        assert_eq!(
            fx.terrain
                .bitmask_in(space, TileCoord::new(0, 0), TerrainLayer::Ground),
            Some(blob::TOP)
        );
        assert!(matches!(
            fx.terrain
                .set_global_id_in(space, TileCoord::new(-1, 0), TerrainLayer::Ground, fx.dirt),
            Err(TerrainError::OutsideMobileGrid { .. })
        ));
        assert!(matches!(
            fx.terrain
                .set_global_id_in(space, TileCoord::new(4, 0), TerrainLayer::Ground, fx.dirt),
            Err(TerrainError::OutsideMobileGrid { .. })
        ));
        assert_eq!(
            fx.terrain
                .global_id_in(space, TileCoord::new(2, 9), TerrainLayer::Ground),
            None
        );

        fx.terrain.flush_rebuilds();
        assert_eq!(
            fx.terrain.drain_events(),
            vec![TerrainEvent::MobileChunkRebuild(uid)]
        );
        assert_eq!(
            fx.terrain.mobile_chunk_at_position(Vec2::new(101.0, 51.0)),
            Some(uid)
        );
        assert_eq!(fx.terrain.mobile_chunk_at_position(Vec2::new(99.0, 51.0)), None);
    }

    #[test]
    fn loaded_chunk_checks_cover_whole_bounds() {
        let mut fx = fixture();
        load(&mut fx.terrain, ChunkCoord::new(0, 0));
        let inside = Bounds2D::new(Vec2::new(1.0, 1.0), Vec2::new(3.0, 3.0));
        let straddling = Bounds2D::new(Vec2::new(14.0, 1.0), Vec2::new(17.0, 3.0));
        assert!(fx.terrain.is_bounds_in_loaded_chunks(&inside));
        assert!(!fx.terrain.is_bounds_in_loaded_chunks(&straddling));

        let uid = MobileUid(3);
        fx.terrain
            .create_mobile_chunk(uid, (2, 2), Vec2::new(2.0, 2.0))
            .expect("mobile");
        assert!(fx.terrain.is_mobile_chunk_in_loaded_chunks(uid));
        assert!(!fx.terrain.is_mobile_chunk_in_loaded_chunks(MobileUid(4)));
    }

    #[test]
    fn stone_is_solid_in_registry() {
        let mut builder = TileRegistry::builder();
        builder
            .register_named("core:stone", SolidTile::full())
            .expect("stone");
        let registry = builder.build();
        let id = registry.global_id_by_name("core:stone").expect("id");
        assert_eq!(
            registry.behavior(id).expect("behavior").collision_boxes(0).len(),
            1
        );
    }
}
