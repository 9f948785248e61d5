use crate::coords::ChunkCoord;
use crate::tiles::GlobalId;

use super::layer::TerrainLayer;

/// One layer of a chunk: ids and bitmasks stored x outer, y inner.
#[derive(Debug, Clone)]
pub struct LayerGrid {
    ids: Vec<GlobalId>,
    bitmasks: Vec<u16>,
    edited: bool,
}

impl LayerGrid {
    fn new(cell_count: usize) -> Self {
        Self {
            ids: vec![GlobalId::AIR; cell_count],
            bitmasks: vec![0; cell_count],
            edited: false,
        }
    }

    fn clear(&mut self) {
        self.ids.fill(GlobalId::AIR);
        self.bitmasks.fill(0);
        self.edited = false;
    }

    pub fn ids(&self) -> &[GlobalId] {
        &self.ids
    }

    pub fn bitmasks(&self) -> &[u16] {
        &self.bitmasks
    }

    pub fn is_edited(&self) -> bool {
        self.edited
    }
}

/// Square tile grid for every [`TerrainLayer`].
///
/// Chunks are recycled through the terrain arena, so `init` is the only place
/// contents are reset. A released chunk still holds its old tiles until it is
/// handed out again.
#[derive(Debug, Clone)]
pub struct DataChunk {
    coord: ChunkCoord,
    size: usize,
    layers: [LayerGrid; TerrainLayer::COUNT],
    palette: Vec<GlobalId>,
}

impl DataChunk {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let cells = size * size;
        Self {
            coord: ChunkCoord::default(),
            size,
            layers: std::array::from_fn(|_| LayerGrid::new(cells)),
            palette: Vec::new(),
        }
    }

    pub fn init(&mut self, coord: ChunkCoord) {
        self.coord = coord;
        for layer in &mut self.layers {
            layer.clear();
        }
        self.palette.clear();
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cell_count(&self) -> usize {
        self.size * self.size
    }

    pub fn layer(&self, layer: TerrainLayer) -> &LayerGrid {
        &self.layers[layer.index()]
    }

    fn cell(&self, x: usize, y: usize) -> Option<usize> {
        (x < self.size && y < self.size).then_some(x * self.size + y)
    }

    pub fn global_id(&self, x: usize, y: usize, layer: TerrainLayer) -> Option<GlobalId> {
        let cell = self.cell(x, y)?;
        Some(self.layers[layer.index()].ids[cell])
    }

    pub fn bitmask(&self, x: usize, y: usize, layer: TerrainLayer) -> Option<u16> {
        let cell = self.cell(x, y)?;
        Some(self.layers[layer.index()].bitmasks[cell])
    }

    /// Returns false when `(x, y)` is outside the grid.
    pub fn set_global_id(&mut self, x: usize, y: usize, layer: TerrainLayer, id: GlobalId) -> bool {
        let Some(cell) = self.cell(x, y) else {
            return false;
        };
        let grid = &mut self.layers[layer.index()];
        grid.ids[cell] = id;
        grid.edited = true;
        true
    }

    pub fn set_bitmask(&mut self, x: usize, y: usize, layer: TerrainLayer, bitmask: u16) -> bool {
        let Some(cell) = self.cell(x, y) else {
            return false;
        };
        let grid = &mut self.layers[layer.index()];
        grid.bitmasks[cell] = bitmask;
        grid.edited = true;
        true
    }

    pub fn is_layer_edited(&self, layer: TerrainLayer) -> bool {
        self.layers[layer.index()].edited
    }

    pub fn edited_layers(&self) -> impl Iterator<Item = TerrainLayer> + '_ {
        TerrainLayer::ALL
            .into_iter()
            .filter(|layer| self.is_layer_edited(*layer))
    }

    pub fn clear_layer(&mut self, layer: TerrainLayer) {
        self.layers[layer.index()].clear();
    }

    /// Overwrites a whole layer from decoded data and marks it edited.
    pub(crate) fn fill_layer(&mut self, layer: TerrainLayer, ids: &[GlobalId], bitmasks: &[u16]) {
        let grid = &mut self.layers[layer.index()];
        grid.ids.copy_from_slice(ids);
        grid.bitmasks.copy_from_slice(bitmasks);
        grid.edited = true;
    }

    /// Palette order from the last load or save; seeds the next encode.
    pub fn palette(&self) -> &[GlobalId] {
        &self.palette
    }

    pub(crate) fn set_palette(&mut self, palette: Vec<GlobalId>) {
        self.palette = palette;
    }

    /// Every `(x, y)` local position, x outer, y inner.
    pub fn positions(&self) -> impl Iterator<Item = (usize, usize)> {
        let size = self.size;
        (0..size).flat_map(move |x| (0..size).map(move |y| (x, y)))
    }
}
