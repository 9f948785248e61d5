use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::storage::palette::encoded_len;

use super::behavior::TileBehavior;

/// Session-local tile type id. `GlobalId::AIR` (0) is the empty tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u32);

impl GlobalId {
    pub const AIR: GlobalId = GlobalId(0);

    pub fn is_air(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable, human-readable tile identity written to disk as `namespace:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileString {
    pub namespace: String,
    pub id: String,
}

impl TileString {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for TileString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

impl FromStr for TileString {
    type Err = RegistryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.split_once(':') {
            Some((namespace, id)) if !namespace.is_empty() && !id.is_empty() => {
                Ok(Self::new(namespace, id))
            }
            _ => Err(RegistryError::MalformedTileString {
                raw: raw.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tile string '{raw}' must look like 'namespace:id'")]
    MalformedTileString { raw: String },
    #[error("tile '{tile}' is registered twice")]
    Duplicate { tile: TileString },
    #[error("tile '{tile}' cannot be stored: {reason}")]
    NotEncodable { tile: TileString, reason: String },
    #[error("registry is full: at most {max} tile types")]
    Full { max: u32 },
}

struct TileEntry {
    tile: TileString,
    behavior: Box<dyn TileBehavior>,
}

/// Lookup tables between tile strings, global ids and tile behaviours.
///
/// Ids are dense and assigned in registration order starting at 1, so they
/// only mean something inside the session that built the registry.
pub struct TileRegistry {
    entries: Vec<TileEntry>,
    ids_by_tile: HashMap<TileString, GlobalId>,
}

impl fmt::Debug for TileRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileRegistry")
            .field("tile_count", &self.entries.len())
            .finish()
    }
}

impl TileRegistry {
    pub fn builder() -> TileRegistryBuilder {
        TileRegistryBuilder::default()
    }

    pub fn global_id(&self, tile: &TileString) -> Option<GlobalId> {
        self.ids_by_tile.get(tile).copied()
    }

    pub fn global_id_by_name(&self, raw: &str) -> Option<GlobalId> {
        let tile = raw.parse::<TileString>().ok()?;
        self.global_id(&tile)
    }

    pub fn tile_string(&self, id: GlobalId) -> Option<&TileString> {
        self.entry(id).map(|entry| &entry.tile)
    }

    pub fn behavior(&self, id: GlobalId) -> Option<&dyn TileBehavior> {
        self.entry(id).map(|entry| entry.behavior.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: GlobalId) -> Option<&TileEntry> {
        if id.is_air() {
            return None;
        }
        self.entries.get(id.0 as usize - 1)
    }
}

#[derive(Default)]
pub struct TileRegistryBuilder {
    entries: Vec<TileEntry>,
    ids_by_tile: HashMap<TileString, GlobalId>,
}

impl TileRegistryBuilder {
    pub fn register(
        &mut self,
        tile: TileString,
        behavior: impl TileBehavior + 'static,
    ) -> Result<GlobalId, RegistryError> {
        if self.ids_by_tile.contains_key(&tile) {
            return Err(RegistryError::Duplicate { tile });
        }
        if let Err(error) = encoded_len(&tile) {
            return Err(RegistryError::NotEncodable {
                reason: error.to_string(),
                tile,
            });
        }
        if self.entries.len() >= u32::MAX as usize - 1 {
            return Err(RegistryError::Full { max: u32::MAX - 1 });
        }

        let id = GlobalId(self.entries.len() as u32 + 1);
        self.ids_by_tile.insert(tile.clone(), id);
        self.entries.push(TileEntry {
            tile,
            behavior: Box::new(behavior),
        });
        Ok(id)
    }

    pub fn register_named(
        &mut self,
        raw: &str,
        behavior: impl TileBehavior + 'static,
    ) -> Result<GlobalId, RegistryError> {
        self.register(raw.parse()?, behavior)
    }

    pub fn build(self) -> TileRegistry {
        TileRegistry {
            entries: self.entries,
            ids_by_tile: self.ids_by_tile,
        }
    }
}
