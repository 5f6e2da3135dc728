use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::Path;

use fastnbt::{ByteArray, Value};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::modules::block_state::BlockState;
use crate::modules::error::FormatError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Palette ids at or above this are treated as corrupt.
pub const MAX_PALETTE_ID: i32 = u16::MAX as i32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dimensions {
    pub fn volume(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }
}

/// Position inside a structure, relative to its (0, 0, 0) corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalPos {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// A parsed structure: a palette of block states and one palette id per cell.
#[derive(Clone, Debug)]
pub struct VoxelGrid {
    dimensions: Dimensions,
    palette: Vec<BlockState>,
    cells: Vec<u32>,
    air: BlockState,
}

impl VoxelGrid {
    /// `cells` shorter than the volume are padded with air; ids outside the
    /// palette read as air.
    pub fn new(dimensions: Dimensions, palette: Vec<BlockState>, cells: Vec<u32>) -> Self {
        Self {
            dimensions,
            palette,
            cells,
            air: BlockState::air(),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn block(&self, pos: LocalPos) -> &BlockState {
        let d = self.dimensions;
        if pos.x >= d.x || pos.y >= d.y || pos.z >= d.z {
            return &self.air;
        }
        // Sponge order: x fastest, then z, then y.
        let index =
            (pos.y as usize * d.z as usize + pos.z as usize) * d.x as usize + pos.x as usize;
        self.cells
            .get(index)
            .and_then(|id| self.palette.get(*id as usize))
            .unwrap_or(&self.air)
    }

    /// Every cell, y outermost then z then x. Call again to restart.
    pub fn iter(&self) -> impl Iterator<Item = (LocalPos, &BlockState)> + '_ {
        let d = self.dimensions;
        (0..d.y).flat_map(move |y| {
            (0..d.z).flat_map(move |z| {
                (0..d.x).map(move |x| {
                    let pos = LocalPos { x, y, z };
                    (pos, self.block(pos))
                })
            })
        })
    }

    /// Count of non-air base names.
    pub fn histogram(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for (_, block) in self.iter().filter(|(_, b)| !b.is_air()) {
            *counts.entry(block.name.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn solid_count(&self) -> usize {
        self.iter().filter(|(_, b)| !b.is_air()).count()
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct SpongeWrapped {
    #[serde(rename = "Schematic")]
    schematic: SpongeBody,
}

#[derive(Debug, Deserialize, Serialize)]
struct SpongeBody {
    #[serde(rename = "Width")]
    width: i16,
    #[serde(rename = "Height")]
    height: i16,
    #[serde(rename = "Length")]
    length: i16,
    #[serde(rename = "Blocks", default, skip_serializing_if = "Option::is_none")]
    blocks: Option<SpongeBlocks>,
    #[serde(rename = "Palette", default, skip_serializing_if = "Option::is_none")]
    palette: Option<HashMap<String, i32>>,
    #[serde(rename = "BlockData", default, skip_serializing_if = "Option::is_none")]
    block_data: Option<ByteArray>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SpongeBlocks {
    #[serde(rename = "Palette")]
    palette: HashMap<String, i32>,
    #[serde(rename = "Data")]
    data: ByteArray,
}

/// Read a structure file from disk.
pub fn load(path: &Path) -> Result<VoxelGrid, FormatError> {
    let raw = fs::read(path)?;
    let grid = parse(&raw)?;
    debug!(
        path = %path.display(),
        width = grid.dimensions.x,
        height = grid.dimensions.y,
        length = grid.dimensions.z,
        "loaded structure"
    );
    Ok(grid)
}

/// Parse structure bytes, gzipped or not.
pub fn parse(raw: &[u8]) -> Result<VoxelGrid, FormatError> {
    let bytes = decompress(raw)?;
    match parse_structured(&bytes) {
        Ok(grid) => Ok(grid),
        Err(err) => {
            debug!(error = %err, "structured parse failed; walking tags manually");
            parse_tags(&bytes)
        }
    }
}

fn decompress(raw: &[u8]) -> Result<Vec<u8>, FormatError> {
    if !raw.starts_with(&GZIP_MAGIC) {
        return Ok(raw.to_vec());
    }
    let mut out = Vec::new();
    GzDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(FormatError::Decompress)?;
    Ok(out)
}

fn parse_structured(bytes: &[u8]) -> Result<VoxelGrid, FormatError> {
    let body = match fastnbt::from_bytes::<SpongeWrapped>(bytes) {
        Ok(wrapped) => wrapped.schematic,
        Err(_) => fastnbt::from_bytes::<SpongeBody>(bytes)
            .map_err(|e| FormatError::Layout(e.to_string()))?,
    };

    let dimensions = dimensions(
        body.width as u16 as i64,
        body.height as u16 as i64,
        body.length as u16 as i64,
    )?;
    let (palette, data) = match (body.blocks, body.palette, body.block_data) {
        (Some(blocks), _, _) => (blocks.palette, blocks.data),
        (None, Some(palette), Some(data)) => (palette, data),
        _ => return Err(FormatError::MissingField("Blocks")),
    };

    let bytes: Vec<u8> = data.iter().map(|b| *b as u8).collect();
    let cells = decode_varints(&bytes)?;
    Ok(VoxelGrid::new(
        dimensions,
        decode_palette(palette.into_iter())?,
        cells,
    ))
}

fn parse_tags(bytes: &[u8]) -> Result<VoxelGrid, FormatError> {
    let root: Value =
        fastnbt::from_bytes(bytes).map_err(|e| FormatError::Layout(e.to_string()))?;
    let body = field(&root, "Schematic").unwrap_or(&root);

    let dim = |key: &'static str| {
        field(body, key)
            .and_then(as_i64)
            .ok_or(FormatError::MissingField(key))
    };
    let dimensions = dimensions(dim("Width")?, dim("Height")?, dim("Length")?)?;

    let palette = match field(body, "Blocks")
        .and_then(|b| field(b, "Palette"))
        .or_else(|| field(body, "Palette"))
    {
        Some(Value::Compound(entries)) => entries,
        _ => return Err(FormatError::MissingField("Palette")),
    };
    let entries = palette.iter().filter_map(|(state, id)| {
        as_i64(id).map(|id| (state.clone(), i32::try_from(id).unwrap_or(i32::MAX)))
    });
    let palette = decode_palette(entries)?;

    let data = field(body, "Blocks")
        .and_then(|b| field(b, "Data"))
        .or_else(|| field(body, "BlockData"))
        .ok_or(FormatError::MissingField("Data"))?;
    let cells = match data {
        Value::ByteArray(raw) => {
            let raw: Vec<u8> = raw.iter().map(|b| *b as u8).collect();
            decode_varints(&raw)?
        }
        Value::IntArray(ids) => ids.iter().map(|id| (*id).max(0) as u32).collect(),
        _ => return Err(FormatError::MissingField("Data")),
    };

    Ok(VoxelGrid::new(dimensions, palette, cells))
}

fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Compound(entries) => entries.get(key),
        _ => None,
    }
}

/// Any integer tag width.
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Byte(v) => Some(*v as i64),
        Value::Short(v) => Some(*v as i64),
        Value::Int(v) => Some(*v as i64),
        Value::Long(v) => Some(*v),
        _ => None,
    }
}

fn dimensions(width: i64, height: i64, length: i64) -> Result<Dimensions, FormatError> {
    let valid = |v: i64| (1..=u16::MAX as i64).contains(&v);
    if !(valid(width) && valid(height) && valid(length)) {
        return Err(FormatError::InvalidDimensions {
            width,
            height,
            length,
        });
    }
    Ok(Dimensions {
        x: width as u32,
        y: height as u32,
        z: length as u32,
    })
}

/// Turn `state string -> id` into an id-indexed table. Gaps become air.
fn decode_palette(
    entries: impl Iterator<Item = (String, i32)>,
) -> Result<Vec<BlockState>, FormatError> {
    let mut by_id: Vec<(usize, BlockState)> = Vec::new();
    for (state, id) in entries {
        if id < 0 {
            continue;
        }
        if id >= MAX_PALETTE_ID {
            return Err(FormatError::PaletteId(id));
        }
        by_id.push((id as usize, state.parse()?));
    }
    let len = by_id.iter().map(|(id, _)| id + 1).max().unwrap_or(0);
    let mut palette = vec![BlockState::air(); len];
    for (id, state) in by_id {
        palette[id] = state;
    }
    Ok(palette)
}

fn decode_varints(bytes: &[u8]) -> Result<Vec<u32>, FormatError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut value: u32 = 0;
    let mut shift = 0u32;
    for (i, byte) in bytes.iter().enumerate() {
        if shift >= 32 {
            return Err(FormatError::BadVarint(out.len()));
        }
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            out.push(value);
            value = 0;
            shift = 0;
        } else {
            shift += 7;
            if i == bytes.len() - 1 {
                return Err(FormatError::BadVarint(out.len()));
            }
        }
    }
    Ok(out)
}
