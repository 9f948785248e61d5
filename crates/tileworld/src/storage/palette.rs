//! Per-chunk tile palette and the 6-bit tile string alphabet.
//!
//! A palette entry on disk is `len: u8` followed by `len` symbol bytes, one
//! per character of `namespace:id`. The symbol byte is the character's index
//! in [`ALPHABET`].

use std::collections::HashMap;

use thiserror::Error;

use crate::tiles::{GlobalId, TileRegistry, TileString};

pub const ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_:";

/// Most entries a palette can hold; index 0 is reserved for air.
pub const MAX_PALETTE_LEN: usize = 255;

const SEPARATOR: u8 = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaletteError {
    #[error("tile '{tile}' contains '{character}', which is outside the palette alphabet")]
    InvalidCharacter { tile: String, character: char },
    #[error("tile '{tile}' encodes to {len} symbols, more than 255")]
    TooLong { tile: String, len: usize },
    #[error("chunk uses {distinct} distinct tile types, palette holds at most 255")]
    Overflow { distinct: usize },
    #[error("palette symbol {byte} is outside the alphabet")]
    InvalidSymbol { byte: u8 },
    #[error("palette entry has no ':' separator followed by an id")]
    MissingSeparator,
    #[error("tile index {index} is past the end of a {len}-entry palette")]
    IndexOutOfRange { index: u8, len: usize },
}

fn symbol_of(character: char) -> Option<u8> {
    let byte = u8::try_from(character).ok()?;
    ALPHABET
        .iter()
        .position(|symbol| *symbol == byte)
        .map(|index| index as u8)
}

/// Number of symbols `tile` encodes to, or why it cannot be encoded.
pub fn encoded_len(tile: &TileString) -> Result<u8, PaletteError> {
    let rendered = tile.to_string();
    if let Some(character) = rendered.chars().find(|c| symbol_of(*c).is_none()) {
        return Err(PaletteError::InvalidCharacter {
            tile: rendered,
            character,
        });
    }
    u8::try_from(rendered.len()).map_err(|_| PaletteError::TooLong {
        len: rendered.len(),
        tile: rendered,
    })
}

/// Appends the length-prefixed record for `tile`.
pub fn encode_tile_string(tile: &TileString, out: &mut Vec<u8>) -> Result<(), PaletteError> {
    let len = encoded_len(tile)?;
    out.push(len);
    for character in tile.to_string().chars() {
        let symbol = symbol_of(character).ok_or_else(|| PaletteError::InvalidCharacter {
            tile: tile.to_string(),
            character,
        })?;
        out.push(symbol);
    }
    Ok(())
}

/// Decodes the symbol bytes of one record (without its length prefix).
///
/// The namespace ends at the first separator; the id is everything after it
/// and must not be empty.
pub fn decode_tile_string(symbols: &[u8]) -> Result<TileString, PaletteError> {
    let mut namespace = String::new();
    let mut id = String::new();
    let mut seen_separator = false;
    for &byte in symbols {
        let symbol = *ALPHABET
            .get(byte as usize)
            .ok_or(PaletteError::InvalidSymbol { byte })?;
        if !seen_separator && byte == SEPARATOR {
            seen_separator = true;
        } else if seen_separator {
            id.push(symbol as char);
        } else {
            namespace.push(symbol as char);
        }
    }
    if !seen_separator || id.is_empty() {
        return Err(PaletteError::MissingSeparator);
    }
    Ok(TileString::new(namespace, id))
}

/// Palette used while encoding a chunk.
#[derive(Debug, Clone, Default)]
pub struct Palette {
    entries: Vec<GlobalId>,
    indices: HashMap<GlobalId, u8>,
}

impl Palette {
    /// Collects the non-air ids used by `layers`.
    ///
    /// Ids from `seed` that are still in use keep their relative order at the
    /// front, so unchanged chunks encode with the same indices as last time.
    /// New ids follow in the order they are first met.
    pub fn build<'a>(
        seed: &[GlobalId],
        layers: impl IntoIterator<Item = &'a [GlobalId]>,
    ) -> Result<Self, PaletteError> {
        let mut in_use = Vec::<GlobalId>::new();
        let mut seen = HashMap::<GlobalId, ()>::new();
        for ids in layers {
            for id in ids {
                if !id.is_air() && seen.insert(*id, ()).is_none() {
                    in_use.push(*id);
                }
            }
        }
        if in_use.len() > MAX_PALETTE_LEN {
            return Err(PaletteError::Overflow {
                distinct: in_use.len(),
            });
        }

        let mut palette = Palette::default();
        for id in seed.iter().filter(|id| seen.contains_key(id)) {
            palette.push(*id);
        }
        for id in in_use {
            palette.push(id);
        }
        Ok(palette)
    }

    fn push(&mut self, id: GlobalId) {
        if self.indices.contains_key(&id) {
            return;
        }
        self.entries.push(id);
        self.indices.insert(id, self.entries.len() as u8);
    }

    pub fn entries(&self) -> &[GlobalId] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// On-disk index for `id`: 0 for air, `1..=len` for palette entries.
    pub fn tile_index(&self, id: GlobalId) -> Option<u8> {
        if id.is_air() {
            return Some(0);
        }
        self.indices.get(&id).copied()
    }
}

/// Palette read back from disk, before compaction.
#[derive(Debug, Clone, Default)]
pub struct DecodedPalette {
    entries: Vec<Option<GlobalId>>,
}

impl DecodedPalette {
    /// Resolves decoded tile strings; unknown strings become `None`.
    pub fn resolve(registry: &TileRegistry, tiles: &[TileString]) -> Self {
        Self {
            entries: tiles.iter().map(|tile| registry.global_id(tile)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_none()).count()
    }

    /// Maps an on-disk index to a global id. Unresolved entries read as air;
    /// an index past the end is an error.
    pub fn global_id(&self, index: u8) -> Result<GlobalId, PaletteError> {
        if index == 0 {
            return Ok(GlobalId::AIR);
        }
        self.entries
            .get(index as usize - 1)
            .map(|entry| entry.unwrap_or(GlobalId::AIR))
            .ok_or(PaletteError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    /// Drops unresolved entries, keeping the order of the others.
    pub fn compact(self) -> Vec<GlobalId> {
        self.entries.into_iter().flatten().collect()
    }
}
