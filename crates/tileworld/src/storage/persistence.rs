use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{DataLoadMode, DataSaveMode, SaveScope};
use crate::coords::{ChunkCoord, RegionCoord};
use crate::entity::{EntityData, EntityUid};
use crate::terrain::{DataChunk, MobileDataChunk, MobileUid};
use crate::tiles::TileRegistry;

use super::atomic_io::{read_if_exists, remove_dir_if_exists, remove_if_exists, write_bytes_atomic};
use super::chunk_format::{
    decode_chunk, decode_mobile_chunk, deflate, encode_chunk, encode_mobile_chunk, inflate,
    DecodeReport,
};
use super::documents::{
    decode_document, encode_document, parse_json, DocumentError, EntityDocument, RegionDocument,
    WorldMetadata,
};
use super::layout::SaveLayout;
use super::save_queue::{SaveJob, SaveTarget};
use super::{LoadOutcome, StorageError};

/// Reads and writes every save file of one save/dimension pair.
///
/// Writes go to the active scope unless the save mode is read-only, in which
/// case they are skipped. Which folders loads look at is decided by the load
/// mode; a corrupt file is deleted from the folder it was read from.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    layout: SaveLayout,
    registry: Arc<TileRegistry>,
    scope: SaveScope,
    load_mode: DataLoadMode,
    save_mode: DataSaveMode,
}

impl PersistenceManager {
    pub fn new(layout: SaveLayout, registry: Arc<TileRegistry>) -> Self {
        Self {
            layout,
            registry,
            scope: SaveScope::Canonical,
            load_mode: DataLoadMode::Default,
            save_mode: DataSaveMode::Default,
        }
    }

    pub fn with_modes(
        mut self,
        scope: SaveScope,
        load_mode: DataLoadMode,
        save_mode: DataSaveMode,
    ) -> Self {
        self.set_modes(scope, load_mode, save_mode);
        self
    }

    pub fn set_modes(&mut self, scope: SaveScope, load_mode: DataLoadMode, save_mode: DataSaveMode) {
        self.scope = scope;
        self.load_mode = load_mode;
        self.save_mode = save_mode;
        info!(
            scope = ?scope,
            load_mode = ?load_mode,
            save_mode = ?save_mode,
            "data_modes_changed"
        );
    }

    pub fn layout(&self) -> &SaveLayout {
        &self.layout
    }

    pub fn registry(&self) -> &Arc<TileRegistry> {
        &self.registry
    }

    pub fn scope(&self) -> SaveScope {
        self.scope
    }

    pub fn load_mode(&self) -> DataLoadMode {
        self.load_mode
    }

    pub fn save_mode(&self) -> DataSaveMode {
        self.save_mode
    }

    pub fn writes_enabled(&self) -> bool {
        self.save_mode == DataSaveMode::Default
    }

    /// Folders a load looks in, in order.
    fn read_scopes(&self) -> &'static [SaveScope] {
        match (self.load_mode, self.scope) {
            (DataLoadMode::Readonly, _) => &[SaveScope::Canonical],
            (_, SaveScope::Canonical) => &[SaveScope::Canonical],
            (DataLoadMode::Default, SaveScope::Play) => &[SaveScope::Play],
            (DataLoadMode::DefaultElseReadonly, SaveScope::Play) => {
                &[SaveScope::Play, SaveScope::Canonical]
            }
        }
    }

    /// First existing file among the allowed folders.
    fn read_first(
        &self,
        path_for: impl Fn(SaveScope) -> PathBuf,
    ) -> Result<Option<(PathBuf, Vec<u8>)>, StorageError> {
        for scope in self.read_scopes() {
            let path = path_for(*scope);
            if let Some(bytes) = read_if_exists(&path).map_err(|source| StorageError::io(&path, source))? {
                return Ok(Some((path, bytes)));
            }
        }
        Ok(None)
    }

    fn discard_corrupt<T>(&self, path: &Path, reason: String) -> Result<LoadOutcome<T>, StorageError> {
        warn!(path = %path.display(), reason = %reason, "save_file_corrupt_deleted");
        remove_if_exists(path).map_err(|source| StorageError::io(path, source))?;
        Ok(LoadOutcome::Corrupt { reason })
    }

    /// Only errors caused by the stored bytes discard the file.
    fn document_outcome<T>(
        &self,
        path: &Path,
        loaded: Result<T, DocumentError>,
    ) -> Result<LoadOutcome<T>, StorageError> {
        match loaded {
            Ok(value) => Ok(LoadOutcome::Loaded(value)),
            Err(error) if error.is_corruption() => self.discard_corrupt(path, error.to_string()),
            Err(source) => Err(StorageError::Document {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn write(&self, job: SaveJob) -> Result<bool, StorageError> {
        if !self.writes_enabled() {
            return Ok(false);
        }
        job.write()?;
        Ok(true)
    }

    /// Encodes `chunk` into a write job for the active scope, or `None` when
    /// saving is disabled. The palette order used is stored on the chunk.
    pub fn prepare_chunk_save(&self, chunk: &mut DataChunk) -> Result<Option<SaveJob>, StorageError> {
        if !self.writes_enabled() {
            return Ok(None);
        }
        let path = self.layout.chunk_path(self.scope, chunk.coord());
        let encoded = encode_chunk(chunk, &self.registry).map_err(|source| StorageError::Encode {
            path: path.clone(),
            source,
        })?;
        let bytes = deflate(&encoded.payload).map_err(|source| StorageError::io(&path, source))?;
        chunk.set_palette(encoded.palette);
        Ok(Some(SaveJob {
            target: SaveTarget::Chunk(chunk.coord()),
            path,
            bytes,
        }))
    }

    pub fn save_chunk(&self, chunk: &mut DataChunk) -> Result<bool, StorageError> {
        match self.prepare_chunk_save(chunk)? {
            Some(job) => {
                job.write()?;
                debug!(chunk = %chunk.coord(), "chunk_saved");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fills `chunk` from disk. `chunk` must already be `init`ed at `coord`.
    pub fn load_chunk(
        &self,
        coord: ChunkCoord,
        chunk: &mut DataChunk,
    ) -> Result<LoadOutcome<DecodeReport>, StorageError> {
        let Some((path, bytes)) = self.read_first(|scope| self.layout.chunk_path(scope, coord))? else {
            return Ok(LoadOutcome::NotFound);
        };
        let decoded = inflate(&bytes).and_then(|payload| decode_chunk(&payload, chunk, &self.registry));
        match decoded {
            Ok(report) => {
                if report.unresolved_entries > 0 {
                    warn!(
                        chunk = %coord,
                        unresolved = report.unresolved_entries,
                        "chunk_palette_unresolved_tiles_cleared"
                    );
                }
                Ok(LoadOutcome::Loaded(report))
            }
            Err(error) => {
                chunk.init(coord);
                self.discard_corrupt(&path, error.to_string())
            }
        }
    }

    pub fn prepare_mobile_chunk_save(
        &self,
        mobile: &mut MobileDataChunk,
    ) -> Result<Option<SaveJob>, StorageError> {
        if !self.writes_enabled() {
            return Ok(None);
        }
        let path = self.layout.mobile_chunk_path(self.scope, mobile.uid());
        let encoded =
            encode_mobile_chunk(mobile, &self.registry).map_err(|source| StorageError::Encode {
                path: path.clone(),
                source,
            })?;
        let bytes = deflate(&encoded.payload).map_err(|source| StorageError::io(&path, source))?;
        mobile.chunk.set_palette(encoded.palette);
        Ok(Some(SaveJob {
            target: SaveTarget::MobileChunk(mobile.uid()),
            path,
            bytes,
        }))
    }

    pub fn save_mobile_chunk(&self, mobile: &mut MobileDataChunk) -> Result<bool, StorageError> {
        match self.prepare_mobile_chunk_save(mobile)? {
            Some(job) => {
                job.write()?;
                debug!(uid = %mobile.uid(), "mobile_chunk_saved");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn load_mobile_chunk(
        &self,
        uid: MobileUid,
        mobile: &mut MobileDataChunk,
    ) -> Result<LoadOutcome<DecodeReport>, StorageError> {
        let Some((path, bytes)) =
            self.read_first(|scope| self.layout.mobile_chunk_path(scope, uid))?
        else {
            return Ok(LoadOutcome::NotFound);
        };
        let decoded =
            inflate(&bytes).and_then(|payload| decode_mobile_chunk(&payload, mobile, &self.registry));
        match decoded {
            Ok(report) => Ok(LoadOutcome::Loaded(report)),
            Err(error) => self.discard_corrupt(&path, error.to_string()),
        }
    }

    pub fn delete_mobile_chunk(&self, uid: MobileUid) -> Result<bool, StorageError> {
        if !self.writes_enabled() {
            return Ok(false);
        }
        let path = self.layout.mobile_chunk_path(self.scope, uid);
        remove_if_exists(&path).map_err(|source| StorageError::io(&path, source))
    }

    pub fn prepare_entity_save(&self, entity: &EntityData) -> Result<Option<SaveJob>, StorageError> {
        if !self.writes_enabled() {
            return Ok(None);
        }
        let path = self.layout.entity_path(self.scope, entity.uid);
        let bytes = encode_document(&EntityDocument::from_entity(entity)).map_err(|source| {
            StorageError::Document {
                path: path.clone(),
                source,
            }
        })?;
        Ok(Some(SaveJob {
            target: SaveTarget::Entity(entity.uid),
            path,
            bytes,
        }))
    }

    pub fn save_entity(&self, entity: &EntityData) -> Result<bool, StorageError> {
        match self.prepare_entity_save(entity)? {
            Some(job) => self.write(job),
            None => Ok(false),
        }
    }

    pub fn load_entity(&self, uid: EntityUid) -> Result<LoadOutcome<EntityData>, StorageError> {
        let Some((path, bytes)) = self.read_first(|scope| self.layout.entity_path(scope, uid))? else {
            return Ok(LoadOutcome::NotFound);
        };
        let loaded = decode_document::<EntityDocument>(&bytes)
            .and_then(|document| document.into_entity(uid));
        self.document_outcome(&path, loaded)
    }

    pub fn delete_entity(&self, uid: EntityUid) -> Result<bool, StorageError> {
        if !self.writes_enabled() {
            return Ok(false);
        }
        let path = self.layout.entity_path(self.scope, uid);
        remove_if_exists(&path).map_err(|source| StorageError::io(&path, source))
    }

    pub fn prepare_region_save(
        &self,
        document: &RegionDocument,
    ) -> Result<Option<SaveJob>, StorageError> {
        if !self.writes_enabled() {
            return Ok(None);
        }
        let path = self.layout.region_path(self.scope, document.region);
        let bytes = encode_document(document).map_err(|source| StorageError::Document {
            path: path.clone(),
            source,
        })?;
        Ok(Some(SaveJob {
            target: SaveTarget::Region(document.region),
            path,
            bytes,
        }))
    }

    pub fn save_region(&self, document: &RegionDocument) -> Result<bool, StorageError> {
        match self.prepare_region_save(document)? {
            Some(job) => self.write(job),
            None => Ok(false),
        }
    }

    pub fn load_region(
        &self,
        region: RegionCoord,
    ) -> Result<LoadOutcome<RegionDocument>, StorageError> {
        let Some((path, bytes)) = self.read_first(|scope| self.layout.region_path(scope, region))?
        else {
            return Ok(LoadOutcome::NotFound);
        };
        let loaded = decode_document::<RegionDocument>(&bytes).and_then(|document| {
            document.validate(region)?;
            Ok(document)
        });
        self.document_outcome(&path, loaded)
    }

    /// UID counters for the save. Missing or unreadable metadata yields the
    /// defaults; an unreadable file is logged and left for the next save to
    /// overwrite.
    pub fn load_world_metadata(&self) -> Result<WorldMetadata, StorageError> {
        let Some((path, bytes)) = self.read_first(|scope| self.layout.world_metadata_path(scope))?
        else {
            return Ok(WorldMetadata::default());
        };
        let parsed = parse_json::<WorldMetadata>(&bytes).and_then(|metadata| {
            metadata.validate()?;
            Ok(metadata)
        });
        match parsed {
            Ok(metadata) => Ok(metadata),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "world_metadata_unreadable");
                Ok(WorldMetadata::default())
            }
        }
    }

    pub fn save_world_metadata(&self, metadata: &WorldMetadata) -> Result<bool, StorageError> {
        if !self.writes_enabled() {
            return Ok(false);
        }
        let path = self.layout.world_metadata_path(self.scope);
        let json = serde_json::to_vec_pretty(metadata).map_err(|source| StorageError::Document {
            path: path.clone(),
            source: DocumentError::Encode(source),
        })?;
        write_bytes_atomic(&path, &json).map_err(|source| StorageError::io(&path, source))?;
        Ok(true)
    }

    /// Deletes the play-test copy of the whole save.
    pub fn clear_play_folder(&self) -> Result<bool, StorageError> {
        let path = self.layout.play_dir();
        let removed = remove_dir_if_exists(&path).map_err(|source| StorageError::io(&path, source))?;
        if removed {
            info!(path = %path.display(), "play_folder_cleared");
        }
        Ok(removed)
    }
}
