use crate::coords::{ChunkCoord, GridLayout, RegionCoord};
use crate::entity::EntityUid;
use crate::storage::{EntityRef, RegionDocument, SubRegionDocument};
use crate::storage::documents::REGION_FORMAT_VERSION;
use crate::terrain::MobileUid;

/// Residents listed for one chunk of a region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubRegion {
    chunk: ChunkCoord,
    pub(crate) mobile_chunks: Vec<MobileUid>,
    pub(crate) entities: Vec<EntityRef>,
}

impl SubRegion {
    pub fn chunk(&self) -> ChunkCoord {
        self.chunk
    }

    pub fn mobile_chunks(&self) -> &[MobileUid] {
        &self.mobile_chunks
    }

    pub fn entities(&self) -> &[EntityRef] {
        &self.entities
    }

    pub fn is_empty(&self) -> bool {
        self.mobile_chunks.is_empty() && self.entities.is_empty()
    }

    pub(crate) fn contains_entity(&self, uid: EntityUid) -> bool {
        self.entities.iter().any(|entity| entity.uid == uid)
    }

    fn clear(&mut self) {
        self.mobile_chunks.clear();
        self.entities.clear();
    }
}

/// Membership table of `side × side` chunks. Sub-regions are stored x outer,
/// y inner.
#[derive(Debug, Clone)]
pub struct EntityRegion {
    coord: RegionCoord,
    side: usize,
    sub_regions: Vec<SubRegion>,
    /// Session time of the last membership save, in seconds.
    pub last_autosave: f64,
}

impl EntityRegion {
    pub(crate) fn new(side: usize) -> Self {
        Self {
            coord: RegionCoord::default(),
            side,
            sub_regions: vec![SubRegion::default(); side * side],
            last_autosave: 0.0,
        }
    }

    /// Clears every sub-region and rebinds them to the chunks of `coord`.
    pub(crate) fn init(&mut self, layout: &GridLayout, coord: RegionCoord, now: f64) {
        self.coord = coord;
        self.last_autosave = now;
        for (sub, chunk) in self.sub_regions.iter_mut().zip(layout.region_chunks(coord)) {
            sub.clear();
            sub.chunk = chunk;
        }
    }

    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    pub fn sub_regions(&self) -> &[SubRegion] {
        &self.sub_regions
    }

    fn slot(&self, chunk: ChunkCoord) -> Option<usize> {
        let origin_x = self.coord.x * self.side as i32;
        let origin_y = self.coord.y * self.side as i32;
        let local_x = usize::try_from(chunk.x - origin_x).ok()?;
        let local_y = usize::try_from(chunk.y - origin_y).ok()?;
        (local_x < self.side && local_y < self.side).then_some(local_x * self.side + local_y)
    }

    pub fn sub_region(&self, chunk: ChunkCoord) -> Option<&SubRegion> {
        self.slot(chunk).map(|slot| &self.sub_regions[slot])
    }

    pub(crate) fn sub_region_mut(&mut self, chunk: ChunkCoord) -> Option<&mut SubRegion> {
        self.slot(chunk).map(move |slot| &mut self.sub_regions[slot])
    }

    pub fn mobile_chunk_count(&self) -> usize {
        self.sub_regions.iter().map(|sub| sub.mobile_chunks.len()).sum()
    }

    pub fn entity_count(&self) -> usize {
        self.sub_regions.iter().map(|sub| sub.entities.len()).sum()
    }

    /// Fills the sub-regions from a stored table. Entries for chunks outside
    /// this region are skipped and counted.
    pub(crate) fn apply_document(&mut self, document: RegionDocument) -> usize {
        let mut skipped = 0;
        for stored in document.sub_regions {
            match self.sub_region_mut(stored.chunk) {
                Some(sub) => {
                    sub.mobile_chunks = stored.mobile_chunks;
                    sub.entities = stored.entities;
                }
                None => skipped += 1,
            }
        }
        skipped
    }

    /// Only non-empty sub-regions are written.
    pub fn to_document(&self) -> RegionDocument {
        RegionDocument {
            format_version: REGION_FORMAT_VERSION,
            region: self.coord,
            sub_regions: self
                .sub_regions
                .iter()
                .filter(|sub| !sub.is_empty())
                .map(|sub| SubRegionDocument {
                    chunk: sub.chunk,
                    mobile_chunks: sub.mobile_chunks.clone(),
                    entities: sub.entities.clone(),
                })
                .collect(),
        }
    }

    /// Empties every sub-region and returns what was listed.
    pub(crate) fn drain_residents(&mut self) -> (Vec<MobileUid>, Vec<EntityRef>) {
        let mut mobile_chunks = Vec::new();
        let mut entities = Vec::new();
        for sub in &mut self.sub_regions {
            mobile_chunks.append(&mut sub.mobile_chunks);
            entities.append(&mut sub.entities);
        }
        (mobile_chunks, entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityAssetId;

    #[test]
    fn negative_region_maps_chunks_to_slots() {
        let layout = GridLayout::new(16, 4);
        let mut region = EntityRegion::new(4);
        region.init(&layout, RegionCoord::new(-1, -1), 0.0);
        assert!(region.sub_region(ChunkCoord::new(-1, -1)).is_some());
        assert!(region.sub_region(ChunkCoord::new(-4, -4)).is_some());
        assert!(region.sub_region(ChunkCoord::new(0, -1)).is_none());
        assert_eq!(
            region.sub_region(ChunkCoord::new(-2, -3)).expect("sub").chunk(),
            ChunkCoord::new(-2, -3)
        );
    }

    #[test]
    fn document_keeps_only_occupied_chunks() {
        let layout = GridLayout::new(16, 4);
        let mut region = EntityRegion::new(4);
        region.init(&layout, RegionCoord::new(0, 0), 0.0);
        let sub = region.sub_region_mut(ChunkCoord::new(1, 2)).expect("sub");
        sub.mobile_chunks.push(MobileUid(3));
        sub.entities.push(EntityRef {
            uid: EntityUid(9),
            asset: EntityAssetId(2),
        });

        let document = region.to_document();
        assert_eq!(document.sub_regions.len(), 1);
        assert_eq!(document.sub_regions[0].chunk, ChunkCoord::new(1, 2));

        let mut reloaded = EntityRegion::new(4);
        reloaded.init(&layout, RegionCoord::new(0, 0), 0.0);
        assert_eq!(reloaded.apply_document(document), 0);
        assert_eq!(reloaded.mobile_chunk_count(), 1);
        assert_eq!(reloaded.entity_count(), 1);

        let (mobile, entities) = reloaded.drain_residents();
        assert_eq!(mobile, vec![MobileUid(3)]);
        assert_eq!(entities.len(), 1);
        assert_eq!(reloaded.entity_count(), 0);
    }
}
