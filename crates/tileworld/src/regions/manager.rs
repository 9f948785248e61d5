use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::arena::{SlotArena, SlotHandle};
use crate::coords::{ChunkCoord, GridLayout, RegionCoord};
use crate::entity::EntityUid;
use crate::math::Vec2;
use crate::storage::{EntityRef, RegionDocument};
use crate::terrain::MobileUid;

use super::region::EntityRegion;
use super::MembershipError;

/// Residents a freshly loaded region listed. Their entries were removed from
/// the table; each one re-adds itself once it is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionLoadReport {
    pub region: RegionCoord,
    pub mobile_chunks: Vec<MobileUid>,
    pub entities: Vec<EntityRef>,
    /// Stored sub-regions that did not belong to the region.
    pub skipped_sub_regions: usize,
}

/// A region leaving memory: the table to save and the residents to unload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionUnloadReport {
    pub document: RegionDocument,
    pub mobile_chunks: Vec<MobileUid>,
    pub entities: Vec<EntityUid>,
}

/// Objects reactivated by an out-of-bounds sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutOfBoundsSweep {
    pub mobile_chunks: Vec<MobileUid>,
    pub entities: Vec<EntityUid>,
}

/// Tracks which chunk every mobile chunk and entity belongs to, one region
/// at a time.
///
/// A UID is listed in at most one sub-region of the loaded regions; the
/// reverse indexes enforce that on every add and move.
#[derive(Debug)]
pub struct EntityRegionManager {
    layout: GridLayout,
    regions: HashMap<RegionCoord, SlotHandle>,
    arena: SlotArena<EntityRegion>,
    mobile_index: HashMap<MobileUid, ChunkCoord>,
    entity_index: HashMap<EntityUid, ChunkCoord>,
    out_of_bounds_mobile: Vec<MobileUid>,
    out_of_bounds_entities: Vec<EntityUid>,
    out_of_bounds_timer: f64,
    out_of_bounds_interval: f64,
    autosave_interval: f64,
}

impl EntityRegionManager {
    pub fn new(layout: GridLayout, autosave_interval: f64, out_of_bounds_interval: f64) -> Self {
        Self {
            layout,
            regions: HashMap::new(),
            arena: SlotArena::new(),
            mobile_index: HashMap::new(),
            entity_index: HashMap::new(),
            out_of_bounds_mobile: Vec::new(),
            out_of_bounds_entities: Vec::new(),
            out_of_bounds_timer: 0.0,
            out_of_bounds_interval,
            autosave_interval,
        }
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn is_region_loaded(&self, region: RegionCoord) -> bool {
        self.regions.contains_key(&region)
    }

    pub fn loaded_region_count(&self) -> usize {
        self.regions.len()
    }

    /// Loaded regions sorted by x then y.
    pub fn loaded_regions(&self) -> Vec<RegionCoord> {
        let mut regions: Vec<RegionCoord> = self.regions.keys().copied().collect();
        regions.sort_by_key(|region| (region.x, region.y));
        regions
    }

    pub fn region(&self, region: RegionCoord) -> Option<&EntityRegion> {
        let handle = self.regions.get(&region)?;
        self.arena.get(*handle)
    }

    fn region_mut(&mut self, region: RegionCoord) -> Option<&mut EntityRegion> {
        let handle = self.regions.get(&region)?;
        self.arena.get_mut(*handle)
    }

    /// Region that must be loaded before `chunk` can be, if it is not yet.
    pub fn region_needed_for_chunk(&self, chunk: ChunkCoord) -> Option<RegionCoord> {
        let region = self.layout.chunk_to_region(chunk);
        (!self.is_region_loaded(region)).then_some(region)
    }

    /// Makes `region` resident, filled from `document` when one was stored.
    pub fn load_region(
        &mut self,
        region: RegionCoord,
        document: Option<RegionDocument>,
        now: f64,
    ) -> Result<RegionLoadReport, MembershipError> {
        if self.is_region_loaded(region) {
            return Err(MembershipError::RegionAlreadyLoaded { region });
        }
        let side = self.layout.chunks_per_region_side();
        let layout = self.layout;
        let handle = self
            .arena
            .allocate(|| EntityRegion::new(side), |slot| slot.init(&layout, region, now));
        self.regions.insert(region, handle);

        let mut report = RegionLoadReport {
            region,
            ..RegionLoadReport::default()
        };
        if let Some(slot) = self.arena.get_mut(handle) {
            if let Some(document) = document {
                report.skipped_sub_regions = slot.apply_document(document);
            }
            let (mobile_chunks, entities) = slot.drain_residents();
            report.mobile_chunks = mobile_chunks;
            report.entities = entities;
        }
        if report.skipped_sub_regions > 0 {
            warn!(
                region = %region,
                skipped = report.skipped_sub_regions,
                "region_document_foreign_sub_regions_skipped"
            );
        }
        info!(
            region = %region,
            mobile_chunks = report.mobile_chunks.len(),
            entities = report.entities.len(),
            "region_loaded"
        );
        Ok(report)
    }

    /// Region of `chunk` if it is loaded and none of its chunks still are.
    pub fn region_to_unload_at_chunk(
        &self,
        chunk: ChunkCoord,
        is_chunk_loaded: impl Fn(ChunkCoord) -> bool,
    ) -> Option<RegionCoord> {
        let region = self.layout.chunk_to_region(chunk);
        if !self.is_region_loaded(region) {
            return None;
        }
        let any_loaded = self.layout.region_chunks(region).any(is_chunk_loaded);
        (!any_loaded).then_some(region)
    }

    pub fn unload_region(&mut self, region: RegionCoord) -> Option<RegionUnloadReport> {
        let handle = self.regions.remove(&region)?;
        let slot = self.arena.get(handle)?;
        let document = slot.to_document();
        let mut report = RegionUnloadReport {
            document,
            mobile_chunks: Vec::new(),
            entities: Vec::new(),
        };
        for sub in slot.sub_regions() {
            report.mobile_chunks.extend_from_slice(sub.mobile_chunks());
            report
                .entities
                .extend(sub.entities().iter().map(|entity| entity.uid));
        }
        self.arena.release(handle);

        for uid in &report.mobile_chunks {
            self.mobile_index.remove(uid);
        }
        for uid in &report.entities {
            self.entity_index.remove(uid);
        }
        self.out_of_bounds_mobile
            .retain(|uid| !report.mobile_chunks.contains(uid));
        self.out_of_bounds_entities
            .retain(|uid| !report.entities.contains(uid));
        info!(
            region = %region,
            mobile_chunks = report.mobile_chunks.len(),
            entities = report.entities.len(),
            "region_unloaded"
        );
        Some(report)
    }

    pub fn region_document(&self, region: RegionCoord) -> Option<RegionDocument> {
        self.region(region).map(EntityRegion::to_document)
    }

    // ---- membership ----

    fn locate(&self, position: Vec2) -> Result<(RegionCoord, ChunkCoord), MembershipError> {
        let chunk = self.layout.world_to_chunk(position);
        let region = self.layout.chunk_to_region(chunk);
        if !self.is_region_loaded(region) {
            return Err(MembershipError::RegionNotLoaded { region });
        }
        Ok((region, chunk))
    }

    fn rejected(error: MembershipError) -> MembershipError {
        warn!(error = %error, "region_membership_rejected");
        error
    }

    pub fn mobile_chunk_location(&self, uid: MobileUid) -> Option<ChunkCoord> {
        self.mobile_index.get(&uid).copied()
    }

    pub fn entity_location(&self, uid: EntityUid) -> Option<ChunkCoord> {
        self.entity_index.get(&uid).copied()
    }

    pub fn add_mobile_chunk(&mut self, uid: MobileUid, position: Vec2) -> Result<(), MembershipError> {
        let (region, chunk) = self.locate(position).map_err(Self::rejected)?;
        if let Some(listed) = self.mobile_chunk_location(uid) {
            return Err(Self::rejected(MembershipError::MobileChunkAlreadyListed {
                uid,
                chunk: listed,
            }));
        }
        self.insert_mobile(region, chunk, uid);
        Ok(())
    }

    pub fn add_entity(&mut self, entity: EntityRef, position: Vec2) -> Result<(), MembershipError> {
        let (region, chunk) = self.locate(position).map_err(Self::rejected)?;
        if let Some(listed) = self.entity_location(entity.uid) {
            return Err(Self::rejected(MembershipError::EntityAlreadyListed {
                uid: entity.uid,
                chunk: listed,
            }));
        }
        self.insert_entity(region, chunk, entity);
        Ok(())
    }

    pub fn remove_mobile_chunk(&mut self, uid: MobileUid) -> Result<(), MembershipError> {
        let Some(chunk) = self.mobile_index.remove(&uid) else {
            return Err(Self::rejected(MembershipError::MobileChunkNotListed { uid }));
        };
        let region = self.layout.chunk_to_region(chunk);
        if let Some(sub) = self
            .region_mut(region)
            .and_then(|slot| slot.sub_region_mut(chunk))
        {
            sub.mobile_chunks.retain(|listed| *listed != uid);
        }
        self.out_of_bounds_mobile.retain(|listed| *listed != uid);
        Ok(())
    }

    pub fn remove_entity(&mut self, uid: EntityUid) -> Result<(), MembershipError> {
        let Some(chunk) = self.entity_index.remove(&uid) else {
            return Err(Self::rejected(MembershipError::EntityNotListed { uid }));
        };
        let region = self.layout.chunk_to_region(chunk);
        if let Some(sub) = self
            .region_mut(region)
            .and_then(|slot| slot.sub_region_mut(chunk))
        {
            sub.entities.retain(|listed| listed.uid != uid);
        }
        self.out_of_bounds_entities.retain(|listed| *listed != uid);
        Ok(())
    }

    /// Re-files a mobile chunk that moved from `previous` to `position`.
    /// Fails without touching membership when either region is not loaded.
    pub fn move_mobile_chunk(
        &mut self,
        uid: MobileUid,
        previous: Vec2,
        position: Vec2,
    ) -> Result<(), MembershipError> {
        let (_, previous_chunk) = self.locate(previous).map_err(Self::rejected)?;
        let (region, chunk) = self.locate(position).map_err(Self::rejected)?;
        match self.mobile_chunk_location(uid) {
            Some(listed) if listed == chunk => return Ok(()),
            Some(listed) => {
                if listed != previous_chunk {
                    debug!(uid = %uid, listed = %listed, previous = %previous_chunk, "mobile_chunk_moved_from_unexpected_chunk");
                }
                self.remove_mobile_chunk(uid)?;
            }
            None => {
                warn!(uid = %uid, previous = %previous_chunk, "mobile_chunk_moved_while_unlisted");
            }
        }
        self.insert_mobile(region, chunk, uid);
        Ok(())
    }

    pub fn move_entity(
        &mut self,
        entity: EntityRef,
        previous: Vec2,
        position: Vec2,
    ) -> Result<(), MembershipError> {
        let (_, previous_chunk) = self.locate(previous).map_err(Self::rejected)?;
        let (region, chunk) = self.locate(position).map_err(Self::rejected)?;
        match self.entity_location(entity.uid) {
            Some(listed) if listed == chunk => return Ok(()),
            Some(listed) => {
                if listed != previous_chunk {
                    debug!(uid = %entity.uid, listed = %listed, previous = %previous_chunk, "entity_moved_from_unexpected_chunk");
                }
                self.remove_entity(entity.uid)?;
            }
            None => {
                warn!(uid = %entity.uid, previous = %previous_chunk, "entity_moved_while_unlisted");
            }
        }
        self.insert_entity(region, chunk, entity);
        Ok(())
    }

    fn insert_mobile(&mut self, region: RegionCoord, chunk: ChunkCoord, uid: MobileUid) {
        if let Some(sub) = self
            .region_mut(region)
            .and_then(|slot| slot.sub_region_mut(chunk))
        {
            sub.mobile_chunks.push(uid);
            self.mobile_index.insert(uid, chunk);
        }
    }

    fn insert_entity(&mut self, region: RegionCoord, chunk: ChunkCoord, entity: EntityRef) {
        if let Some(sub) = self
            .region_mut(region)
            .and_then(|slot| slot.sub_region_mut(chunk))
        {
            if !sub.contains_entity(entity.uid) {
                sub.entities.push(entity);
            }
            self.entity_index.insert(entity.uid, chunk);
        }
    }

    pub fn mobile_chunk_count(&self) -> usize {
        self.mobile_index.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entity_index.len()
    }

    // ---- out of bounds ----

    /// Lists a mobile chunk as deactivated until its chunks are loaded.
    pub fn mark_mobile_chunk_out_of_bounds(&mut self, uid: MobileUid) {
        if !self.out_of_bounds_mobile.contains(&uid) {
            self.out_of_bounds_mobile.push(uid);
        }
    }

    pub fn mark_entity_out_of_bounds(&mut self, uid: EntityUid) {
        if !self.out_of_bounds_entities.contains(&uid) {
            self.out_of_bounds_entities.push(uid);
        }
    }

    pub fn out_of_bounds_mobile_chunks(&self) -> &[MobileUid] {
        &self.out_of_bounds_mobile
    }

    pub fn out_of_bounds_entities(&self) -> &[EntityUid] {
        &self.out_of_bounds_entities
    }

    /// Advances the sweep timer; true once per elapsed interval.
    pub fn tick_out_of_bounds(&mut self, dt: f64) -> bool {
        self.out_of_bounds_timer += dt;
        if self.out_of_bounds_timer >= self.out_of_bounds_interval {
            self.out_of_bounds_timer = 0.0;
            return true;
        }
        false
    }

    /// Drops every listed object whose chunks are loaded again and returns
    /// them for reactivation.
    pub fn sweep_out_of_bounds(
        &mut self,
        mobile_in_bounds: impl Fn(MobileUid) -> bool,
        entity_in_bounds: impl Fn(EntityUid) -> bool,
    ) -> OutOfBoundsSweep {
        let mut sweep = OutOfBoundsSweep::default();
        self.out_of_bounds_mobile.retain(|uid| {
            let back = mobile_in_bounds(*uid);
            if back {
                sweep.mobile_chunks.push(*uid);
            }
            !back
        });
        self.out_of_bounds_entities.retain(|uid| {
            let back = entity_in_bounds(*uid);
            if back {
                sweep.entities.push(*uid);
            }
            !back
        });
        sweep
    }

    // ---- saving ----

    /// Tables of regions not saved for longer than the autosave interval.
    /// Their save time is reset to `now`.
    pub fn due_for_autosave(&mut self, now: f64) -> Vec<RegionDocument> {
        let interval = self.autosave_interval;
        let mut due = Vec::new();
        for region in self.loaded_regions() {
            if let Some(slot) = self.region_mut(region) {
                if now - slot.last_autosave > interval {
                    slot.last_autosave = now;
                    due.push(slot.to_document());
                }
            }
        }
        due
    }

    pub fn all_documents(&mut self, now: f64) -> Vec<RegionDocument> {
        let mut documents = Vec::new();
        for region in self.loaded_regions() {
            if let Some(slot) = self.region_mut(region) {
                slot.last_autosave = now;
                documents.push(slot.to_document());
            }
        }
        documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityAssetId;
    use crate::storage::SubRegionDocument;
    use crate::storage::documents::REGION_FORMAT_VERSION;

    fn manager() -> EntityRegionManager {
        EntityRegionManager::new(GridLayout::new(16, 4), 10.0, 0.2)
    }

    fn entity(uid: u64) -> EntityRef {
        EntityRef {
            uid: EntityUid(uid),
            asset: EntityAssetId(1),
        }
    }

    #[test]
    fn add_requires_loaded_region() {
        let mut regions = manager();
        assert_eq!(
            regions.add_mobile_chunk(MobileUid(1), Vec2::new(5.0, 5.0)),
            Err(MembershipError::RegionNotLoaded {
                region: RegionCoord::new(0, 0)
            })
        );
        regions
            .load_region(RegionCoord::new(0, 0), None, 0.0)
            .expect("load");
        regions
            .add_mobile_chunk(MobileUid(1), Vec2::new(5.0, 5.0))
            .expect("add");
        assert!(matches!(
            regions.add_mobile_chunk(MobileUid(1), Vec2::new(20.0, 5.0)),
            Err(MembershipError::MobileChunkAlreadyListed { .. })
        ));
        assert_eq!(regions.mobile_chunk_count(), 1);
    }

    #[test]
    fn add_move_remove_restores_counts() {
        let mut regions = manager();
        regions
            .load_region(RegionCoord::new(0, 0), None, 0.0)
            .expect("load");
        let start = Vec2::new(1.0, 1.0);
        let end = Vec2::new(40.0, 1.0);
        regions.add_entity(entity(4), start).expect("add");
        regions.move_entity(entity(4), start, end).expect("move");
        assert_eq!(regions.entity_location(EntityUid(4)), Some(ChunkCoord::new(2, 0)));
        let region = regions.region(RegionCoord::new(0, 0)).expect("region");
        assert_eq!(region.entity_count(), 1);
        assert!(region
            .sub_region(ChunkCoord::new(0, 0))
            .expect("sub")
            .entities()
            .is_empty());

        regions.remove_entity(EntityUid(4)).expect("remove");
        assert_eq!(regions.entity_count(), 0);
        assert_eq!(
            regions.region(RegionCoord::new(0, 0)).expect("region").entity_count(),
            0
        );
        assert_eq!(
            regions.remove_entity(EntityUid(4)),
            Err(MembershipError::EntityNotListed { uid: EntityUid(4) })
        );
    }

    #[test]
    fn move_into_unloaded_region_keeps_membership() {
        let mut regions = manager();
        regions
            .load_region(RegionCoord::new(0, 0), None, 0.0)
            .expect("load");
        let start = Vec2::new(1.0, 1.0);
        regions
            .add_mobile_chunk(MobileUid(2), start)
            .expect("add");
        assert_eq!(
            regions.move_mobile_chunk(MobileUid(2), start, Vec2::new(-1.0, 1.0)),
            Err(MembershipError::RegionNotLoaded {
                region: RegionCoord::new(-1, 0)
            })
        );
        assert_eq!(
            regions.mobile_chunk_location(MobileUid(2)),
            Some(ChunkCoord::new(0, 0))
        );
    }

    #[test]
    fn loading_drains_listed_residents() {
        let mut regions = manager();
        let document = RegionDocument {
            format_version: REGION_FORMAT_VERSION,
            region: RegionCoord::new(1, 0),
            sub_regions: vec![
                SubRegionDocument {
                    chunk: ChunkCoord::new(5, 1),
                    mobile_chunks: vec![MobileUid(8)],
                    entities: vec![entity(3)],
                },
                SubRegionDocument {
                    chunk: ChunkCoord::new(0, 0),
                    mobile_chunks: vec![MobileUid(9)],
                    entities: Vec::new(),
                },
            ],
        };
        let report = regions
            .load_region(RegionCoord::new(1, 0), Some(document), 0.0)
            .expect("load");
        assert_eq!(report.mobile_chunks, vec![MobileUid(8)]);
        assert_eq!(report.entities, vec![entity(3)]);
        assert_eq!(report.skipped_sub_regions, 1);
        assert_eq!(
            regions
                .region(RegionCoord::new(1, 0))
                .expect("region")
                .mobile_chunk_count(),
            0
        );
        assert!(matches!(
            regions.load_region(RegionCoord::new(1, 0), None, 0.0),
            Err(MembershipError::RegionAlreadyLoaded { .. })
        ));
    }

    #[test]
    fn unload_reports_residents_and_only_when_chunks_are_gone() {
        let mut regions = manager();
        regions
            .load_region(RegionCoord::new(0, 0), None, 0.0)
            .expect("load");
        regions
            .add_mobile_chunk(MobileUid(1), Vec2::new(3.0, 3.0))
            .expect("add");
        regions.add_entity(entity(2), Vec2::new(20.0, 3.0)).expect("add");

        let loaded = ChunkCoord::new(1, 0);
        assert_eq!(
            regions.region_to_unload_at_chunk(ChunkCoord::new(0, 0), |chunk| chunk == loaded),
            None
        );
        let region = regions
            .region_to_unload_at_chunk(ChunkCoord::new(0, 0), |_| false)
            .expect("unloadable");

        let report = regions.unload_region(region).expect("unload");
        assert_eq!(report.mobile_chunks, vec![MobileUid(1)]);
        assert_eq!(report.entities, vec![EntityUid(2)]);
        assert_eq!(report.document.sub_regions.len(), 2);
        assert_eq!(regions.mobile_chunk_count(), 0);
        assert!(!regions.is_region_loaded(region));
    }

    #[test]
    fn out_of_bounds_sweep_reactivates_in_bounds_objects() {
        let mut regions = manager();
        regions.mark_mobile_chunk_out_of_bounds(MobileUid(1));
        regions.mark_mobile_chunk_out_of_bounds(MobileUid(1));
        regions.mark_entity_out_of_bounds(EntityUid(5));
        regions.mark_entity_out_of_bounds(EntityUid(6));
        assert!(!regions.tick_out_of_bounds(0.1));
        assert!(regions.tick_out_of_bounds(0.1));

        let sweep = regions.sweep_out_of_bounds(|_| true, |uid| uid == EntityUid(6));
        assert_eq!(sweep.mobile_chunks, vec![MobileUid(1)]);
        assert_eq!(sweep.entities, vec![EntityUid(6)]);
        assert_eq!(regions.out_of_bounds_entities(), &[EntityUid(5)]);
        assert!(regions.out_of_bounds_mobile_chunks().is_empty());
    }

    #[test]
    fn autosave_sweep_respects_interval() {
        let mut regions = manager();
        regions
            .load_region(RegionCoord::new(0, 0), None, 0.0)
            .expect("load");
        regions
            .load_region(RegionCoord::new(1, 0), None, 5.0)
            .expect("load");
        let due = regions.due_for_autosave(12.0);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].region, RegionCoord::new(0, 0));
        assert!(regions.due_for_autosave(12.5).is_empty());
        assert_eq!(regions.all_documents(13.0).len(), 2);
    }
}
