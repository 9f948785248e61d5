//! Binary layout of chunk files.
//!
//! ```text
//! palette_count: u8, palette_count x { len: u8, symbols: [u8; len] }
//! layer_count: u8, layer_count x {
//!     name: varint len + utf8,
//!     size^2 x tile index: u8,
//!     size^2 x bitmask: u16 le,
//! }
//! ```
//! Grids are written x outer, y inner. Mobile chunk files carry a fixed
//! header in front of the palette. Whole files are raw DEFLATE streams.

use std::io::{self, Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::math::Vec2;
use crate::terrain::{DataChunk, MobileDataChunk, MobileHeader, TerrainLayer};
use crate::tiles::{GlobalId, TileRegistry};

use super::palette::{
    decode_tile_string, encode_tile_string, DecodedPalette, Palette, PaletteError,
};

const MOBILE_HEADER_LEN: usize = 4 * 11;

#[derive(Debug, Error)]
pub enum ChunkFormatError {
    #[error(transparent)]
    Palette(#[from] PaletteError),
    #[error("global id {id} is not in the tile registry")]
    UnregisteredTile { id: GlobalId },
    #[error("unexpected end of data while reading {what}")]
    Truncated { what: &'static str },
    #[error("unknown layer '{name}'")]
    UnknownLayer { name: String },
    #[error("layer '{layer}' appears twice")]
    DuplicateLayer { layer: TerrainLayer },
    #[error("layer name is not valid UTF-8")]
    InvalidLayerName,
    #[error("layer name length varint is malformed")]
    InvalidVarint,
    #[error("{count} unexpected trailing bytes")]
    TrailingBytes { count: usize },
    #[error("invalid DEFLATE stream: {source}")]
    Deflate {
        #[source]
        source: io::Error,
    },
}

/// Uncompressed chunk payload plus the palette order it was written with.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub payload: Vec<u8>,
    pub palette: Vec<GlobalId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub layers: Vec<TerrainLayer>,
    pub unresolved_entries: usize,
}

pub fn encode_chunk(
    chunk: &DataChunk,
    registry: &TileRegistry,
) -> Result<EncodedChunk, ChunkFormatError> {
    let mut payload = Vec::<u8>::new();
    let palette = write_body(&mut payload, chunk, registry)?;
    Ok(EncodedChunk { payload, palette })
}

pub fn encode_mobile_chunk(
    mobile: &MobileDataChunk,
    registry: &TileRegistry,
) -> Result<EncodedChunk, ChunkFormatError> {
    let mut payload = Vec::<u8>::with_capacity(MOBILE_HEADER_LEN);
    write_header(&mut payload, &mobile.header());
    let palette = write_body(&mut payload, &mobile.chunk, registry)?;
    Ok(EncodedChunk { payload, palette })
}

/// Decodes `bytes` into `chunk`. Nothing is written to `chunk` unless the
/// whole payload is valid.
pub fn decode_chunk(
    bytes: &[u8],
    chunk: &mut DataChunk,
    registry: &TileRegistry,
) -> Result<DecodeReport, ChunkFormatError> {
    let mut cursor = 0usize;
    let body = read_body(bytes, &mut cursor, chunk.cell_count(), registry)?;
    finish(bytes, cursor)?;
    Ok(body.apply(chunk))
}

pub fn decode_mobile_chunk(
    bytes: &[u8],
    mobile: &mut MobileDataChunk,
    registry: &TileRegistry,
) -> Result<DecodeReport, ChunkFormatError> {
    let mut cursor = 0usize;
    let header = read_header(bytes, &mut cursor)?;
    let body = read_body(bytes, &mut cursor, mobile.chunk.cell_count(), registry)?;
    finish(bytes, cursor)?;
    mobile.apply_header(header);
    Ok(body.apply(&mut mobile.chunk))
}

pub fn deflate(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub fn inflate(bytes: &[u8]) -> Result<Vec<u8>, ChunkFormatError> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|source| ChunkFormatError::Deflate { source })?;
    Ok(out)
}

fn write_body(
    out: &mut Vec<u8>,
    chunk: &DataChunk,
    registry: &TileRegistry,
) -> Result<Vec<GlobalId>, ChunkFormatError> {
    let edited: Vec<TerrainLayer> = chunk.edited_layers().collect();
    let palette = Palette::build(
        chunk.palette(),
        edited.iter().map(|layer| chunk.layer(*layer).ids()),
    )?;

    out.push(palette.len() as u8);
    for id in palette.entries() {
        let tile = registry
            .tile_string(*id)
            .ok_or(ChunkFormatError::UnregisteredTile { id: *id })?;
        encode_tile_string(tile, out)?;
    }

    out.push(edited.len() as u8);
    for layer in edited {
        write_layer_name(out, layer.name());
        let grid = chunk.layer(layer);
        for id in grid.ids() {
            let index = palette
                .tile_index(*id)
                .ok_or(ChunkFormatError::UnregisteredTile { id: *id })?;
            out.push(index);
        }
        for bitmask in grid.bitmasks() {
            out.extend_from_slice(&bitmask.to_le_bytes());
        }
    }
    Ok(palette.entries().to_vec())
}

struct DecodedLayer {
    layer: TerrainLayer,
    ids: Vec<GlobalId>,
    bitmasks: Vec<u16>,
}

struct DecodedBody {
    palette: DecodedPalette,
    layers: Vec<DecodedLayer>,
}

impl DecodedBody {
    fn apply(self, chunk: &mut DataChunk) -> DecodeReport {
        let mut report = DecodeReport {
            layers: Vec::with_capacity(self.layers.len()),
            unresolved_entries: self.palette.unresolved_count(),
        };
        for layer in TerrainLayer::ALL {
            chunk.clear_layer(layer);
        }
        for decoded in self.layers {
            chunk.fill_layer(decoded.layer, &decoded.ids, &decoded.bitmasks);
            report.layers.push(decoded.layer);
        }
        chunk.set_palette(self.palette.compact());
        report
    }
}

fn read_body(
    bytes: &[u8],
    cursor: &mut usize,
    cell_count: usize,
    registry: &TileRegistry,
) -> Result<DecodedBody, ChunkFormatError> {
    let palette_count = read_u8(bytes, cursor, "palette count")?;
    let mut tiles = Vec::with_capacity(palette_count as usize);
    for _ in 0..palette_count {
        let len = read_u8(bytes, cursor, "palette entry length")?;
        let symbols = read_exact(bytes, cursor, len as usize, "palette entry")?;
        tiles.push(decode_tile_string(symbols)?);
    }
    let palette = DecodedPalette::resolve(registry, &tiles);

    let layer_count = read_u8(bytes, cursor, "layer count")?;
    let mut layers = Vec::<DecodedLayer>::with_capacity(layer_count as usize);
    for _ in 0..layer_count {
        let name = read_layer_name(bytes, cursor)?;
        let layer = TerrainLayer::from_name(&name)
            .ok_or(ChunkFormatError::UnknownLayer { name })?;
        if layers.iter().any(|decoded| decoded.layer == layer) {
            return Err(ChunkFormatError::DuplicateLayer { layer });
        }

        let indices = read_exact(bytes, cursor, cell_count, "tile indices")?;
        let ids = indices
            .iter()
            .map(|index| palette.global_id(*index))
            .collect::<Result<Vec<_>, _>>()?;
        let raw_masks = read_exact(bytes, cursor, cell_count * 2, "bitmasks")?;
        let bitmasks = raw_masks
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        layers.push(DecodedLayer {
            layer,
            ids,
            bitmasks,
        });
    }
    Ok(DecodedBody { palette, layers })
}

fn write_header(out: &mut Vec<u8>, header: &MobileHeader) {
    for value in header.position {
        out.extend_from_slice(&value.to_le_bytes());
    }
    for vec in [header.collider_offset, header.collider_size] {
        out.extend_from_slice(&vec.x.to_le_bytes());
        out.extend_from_slice(&vec.y.to_le_bytes());
    }
    out.extend_from_slice(&header.restricted_size.0.to_le_bytes());
    out.extend_from_slice(&header.restricted_size.1.to_le_bytes());
    out.extend_from_slice(&header.velocity.x.to_le_bytes());
    out.extend_from_slice(&header.velocity.y.to_le_bytes());
}

fn read_header(bytes: &[u8], cursor: &mut usize) -> Result<MobileHeader, ChunkFormatError> {
    let position = [
        read_f32(bytes, cursor)?,
        read_f32(bytes, cursor)?,
        read_f32(bytes, cursor)?,
    ];
    let collider_offset = Vec2::new(read_f32(bytes, cursor)?, read_f32(bytes, cursor)?);
    let collider_size = Vec2::new(read_f32(bytes, cursor)?, read_f32(bytes, cursor)?);
    let restricted_size = (read_i32(bytes, cursor)?, read_i32(bytes, cursor)?);
    let velocity = Vec2::new(read_f32(bytes, cursor)?, read_f32(bytes, cursor)?);
    Ok(MobileHeader {
        position,
        collider_offset,
        collider_size,
        restricted_size,
        velocity,
    })
}

fn write_layer_name(out: &mut Vec<u8>, name: &str) {
    let mut len = name.len() as u32;
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out.extend_from_slice(name.as_bytes());
}

fn read_layer_name(bytes: &[u8], cursor: &mut usize) -> Result<String, ChunkFormatError> {
    let mut len = 0u32;
    let mut shift = 0u32;
    loop {
        let byte = read_u8(bytes, cursor, "layer name length")?;
        if shift >= 32 {
            return Err(ChunkFormatError::InvalidVarint);
        }
        len |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let raw = read_exact(bytes, cursor, len as usize, "layer name")?;
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| ChunkFormatError::InvalidLayerName)
}

fn finish(bytes: &[u8], cursor: usize) -> Result<(), ChunkFormatError> {
    if cursor != bytes.len() {
        return Err(ChunkFormatError::TrailingBytes {
            count: bytes.len() - cursor,
        });
    }
    Ok(())
}

fn read_u8(bytes: &[u8], cursor: &mut usize, what: &'static str) -> Result<u8, ChunkFormatError> {
    read_exact(bytes, cursor, 1, what)?
        .first()
        .copied()
        .ok_or(ChunkFormatError::Truncated { what })
}

fn read_f32(bytes: &[u8], cursor: &mut usize) -> Result<f32, ChunkFormatError> {
    Ok(f32::from_le_bytes(read_array(bytes, cursor, "mobile header")?))
}

fn read_i32(bytes: &[u8], cursor: &mut usize) -> Result<i32, ChunkFormatError> {
    Ok(i32::from_le_bytes(read_array(bytes, cursor, "mobile header")?))
}

fn read_array<const N: usize>(
    bytes: &[u8],
    cursor: &mut usize,
    what: &'static str,
) -> Result<[u8; N], ChunkFormatError> {
    read_exact(bytes, cursor, N, what)?
        .try_into()
        .map_err(|_| ChunkFormatError::Truncated { what })
}

fn read_exact<'a>(
    bytes: &'a [u8],
    cursor: &mut usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], ChunkFormatError> {
    let end = cursor.saturating_add(len);
    if end > bytes.len() {
        return Err(ChunkFormatError::Truncated { what });
    }
    let out = &bytes[*cursor..end];
    *cursor = end;
    Ok(out)
}
