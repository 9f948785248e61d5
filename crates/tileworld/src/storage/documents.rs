//! JSON documents stored as raw DEFLATE streams: entities, region
//! membership tables and world metadata.

use std::fmt::Display;
use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coords::{ChunkCoord, RegionCoord};
use crate::entity::{EntityAssetId, EntityData, EntityPayload, EntityUid, LoadBox};
use crate::math::Vec2;
use crate::terrain::MobileUid;

use super::chunk_format::{deflate, inflate, ChunkFormatError};

pub const ENTITY_FORMAT_VERSION: u32 = 1;
pub const REGION_FORMAT_VERSION: u32 = 1;
pub const WORLD_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid DEFLATE stream: {0}")]
    Deflate(#[source] io::Error),
    #[error("parse json{}: {message}", at_path(.path))]
    Json { path: String, message: String },
    #[error("validation failed at {path}: {message}")]
    Invalid { path: &'static str, message: String },
    #[error("encode json: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("compress document: {0}")]
    Compress(#[source] io::Error),
}

fn at_path(path: &str) -> String {
    if path.is_empty() || path == "." {
        String::new()
    } else {
        format!(" at {path}")
    }
}

impl DocumentError {
    /// Errors that mean the stored bytes are bad, as opposed to a failure
    /// while producing new bytes.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DocumentError::Deflate(_) | DocumentError::Json { .. } | DocumentError::Invalid { .. }
        )
    }

    fn expected_actual(path: &'static str, expected: impl Display, actual: impl Display) -> Self {
        DocumentError::Invalid {
            path,
            message: format!("expected {expected}, got {actual}"),
        }
    }
}

pub(crate) fn encode_document<T: Serialize>(document: &T) -> Result<Vec<u8>, DocumentError> {
    let json = serde_json::to_vec(document).map_err(DocumentError::Encode)?;
    deflate(&json).map_err(DocumentError::Compress)
}

pub(crate) fn decode_document<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DocumentError> {
    let json = inflate(bytes).map_err(|error| match error {
        ChunkFormatError::Deflate { source } => DocumentError::Deflate(source),
        other => DocumentError::Deflate(io::Error::new(io::ErrorKind::InvalidData, other)),
    })?;
    parse_json(&json)
}

pub(crate) fn parse_json<T: DeserializeOwned>(json: &[u8]) -> Result<T, DocumentError> {
    let mut deserializer = serde_json::Deserializer::from_slice(json);
    serde_path_to_error::deserialize::<_, T>(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        DocumentError::Json {
            path,
            message: error.into_inner().to_string(),
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDocument {
    pub format_version: u32,
    pub uid: EntityUid,
    pub asset: EntityAssetId,
    pub position: Vec2,
    pub load_box: LoadBox,
    pub payload: EntityPayload,
}

impl EntityDocument {
    pub fn from_entity(entity: &EntityData) -> Self {
        Self {
            format_version: ENTITY_FORMAT_VERSION,
            uid: entity.uid,
            asset: entity.asset,
            position: entity.position,
            load_box: entity.load_box,
            payload: entity.payload.clone(),
        }
    }

    pub fn into_entity(self, expected_uid: EntityUid) -> Result<EntityData, DocumentError> {
        if self.format_version != ENTITY_FORMAT_VERSION {
            return Err(DocumentError::expected_actual(
                "format_version",
                ENTITY_FORMAT_VERSION,
                self.format_version,
            ));
        }
        if self.uid != expected_uid {
            return Err(DocumentError::expected_actual("uid", expected_uid, self.uid));
        }
        if !self.position.is_finite() {
            return Err(DocumentError::expected_actual(
                "position",
                "finite coordinates",
                format!("{:?}", self.position),
            ));
        }
        Ok(EntityData {
            uid: self.uid,
            asset: self.asset,
            position: self.position,
            load_box: self.load_box,
            payload: self.payload,
            last_autosave: 0.0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub uid: EntityUid,
    pub asset: EntityAssetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRegionDocument {
    pub chunk: ChunkCoord,
    #[serde(default)]
    pub mobile_chunks: Vec<MobileUid>,
    #[serde(default)]
    pub entities: Vec<EntityRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDocument {
    pub format_version: u32,
    pub region: RegionCoord,
    #[serde(default)]
    pub sub_regions: Vec<SubRegionDocument>,
}

impl RegionDocument {
    pub fn validate(&self, expected: RegionCoord) -> Result<(), DocumentError> {
        if self.format_version != REGION_FORMAT_VERSION {
            return Err(DocumentError::expected_actual(
                "format_version",
                REGION_FORMAT_VERSION,
                self.format_version,
            ));
        }
        if self.region != expected {
            return Err(DocumentError::expected_actual("region", expected, self.region));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMetadata {
    pub format_version: u32,
    pub next_mobile_uid: u32,
    pub next_entity_uid: u64,
}

impl Default for WorldMetadata {
    fn default() -> Self {
        Self {
            format_version: WORLD_FORMAT_VERSION,
            next_mobile_uid: 0,
            next_entity_uid: 0,
        }
    }
}

impl WorldMetadata {
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.format_version != WORLD_FORMAT_VERSION {
            return Err(DocumentError::expected_actual(
                "format_version",
                WORLD_FORMAT_VERSION,
                self.format_version,
            ));
        }
        Ok(())
    }
}
