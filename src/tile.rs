use crate::{reader::AseReader, writer::AseWriter, Result};
use std::io::{Read, Write};

const TILE_INDEX_MASK: u32 = 0x1fff_ffff;
const TILE_FLIP_X: u32 = 0x8000_0000;
const TILE_FLIP_Y: u32 = 0x4000_0000;
const TILE_ROTATE_90CW: u32 = 0x2000_0000;

// Empty tile marker used by tilemaps of very old (pre-release) files.
const LEGACY_EMPTY_TILE: u32 = 0xffff_ffff;

/// A reference to a single tile of a [crate::Tileset], as stored in a tilemap
/// image.
///
/// Index 0 is always the empty tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tile(u32);

impl Tile {
    /// The empty tile.
    pub const EMPTY: Tile = Tile(0);

    /// Create a tile reference. Indices are truncated to 29 bits.
    pub fn new(index: u32, flip_x: bool, flip_y: bool, rotate_90cw: bool) -> Self {
        let mut bits = index & TILE_INDEX_MASK;
        if flip_x {
            bits |= TILE_FLIP_X;
        }
        if flip_y {
            bits |= TILE_FLIP_Y;
        }
        if rotate_90cw {
            bits |= TILE_ROTATE_90CW;
        }
        Tile(bits)
    }

    /// Reinterpret a raw tile word using the in-memory bit layout.
    pub fn from_raw(bits: u32) -> Self {
        Tile(bits)
    }

    /// The raw tile word.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Index into the tileset.
    pub fn index(&self) -> u32 {
        self.0 & TILE_INDEX_MASK
    }

    /// Tile is mirrored horizontally.
    pub fn flip_x(&self) -> bool {
        self.0 & TILE_FLIP_X != 0
    }

    /// Tile is mirrored vertically.
    pub fn flip_y(&self) -> bool {
        self.0 & TILE_FLIP_Y != 0
    }

    /// Tile is rotated by 90 degrees clockwise.
    pub fn rotate_90cw(&self) -> bool {
        self.0 & TILE_ROTATE_90CW != 0
    }

    /// Returns `true` if this is the empty tile.
    pub fn is_empty(&self) -> bool {
        self.index() == 0
    }
}

/// Describes which bits of a stored 32-bit tile word hold the tile index and
/// which hold the flip/rotate flags. Every tilemap cel carries its own masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TileBitmasks {
    pub index: u32,
    pub flip_x: u32,
    pub flip_y: u32,
    pub rotate_90cw: u32,
}

impl TileBitmasks {
    /// The layout used in memory and by the encoder.
    pub(crate) const CURRENT: TileBitmasks = TileBitmasks {
        index: TILE_INDEX_MASK,
        flip_x: TILE_FLIP_X,
        flip_y: TILE_FLIP_Y,
        rotate_90cw: TILE_ROTATE_90CW,
    };

    pub(crate) fn parse<R: Read>(reader: &mut AseReader<R>) -> Result<Self> {
        let index = reader.dword()?;
        let flip_x = reader.dword()?;
        let flip_y = reader.dword()?;
        let rotate_90cw = reader.dword()?;
        Ok(Self {
            index,
            flip_x,
            flip_y,
            rotate_90cw,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut AseWriter<W>) -> Result<()> {
        writer.dword(self.index)?;
        writer.dword(self.flip_x)?;
        writer.dword(self.flip_y)?;
        writer.dword(self.rotate_90cw)
    }

    fn index_shift(&self) -> u32 {
        if self.index == 0 {
            0
        } else {
            self.index.trailing_zeros()
        }
    }

    /// Decode a stored tile word into the in-memory layout.
    pub(crate) fn decode(&self, word: u32) -> Tile {
        let index = (word & self.index) >> self.index_shift();
        Tile::new(
            index,
            word & self.flip_x != 0,
            word & self.flip_y != 0,
            word & self.rotate_90cw != 0,
        )
    }

    /// Rewrite a tile word from a tileset where index 0 was a real tile: the
    /// old empty marker becomes index 0 and every other index moves up by one.
    /// The word stays in this mask layout.
    pub(crate) fn shift_legacy(&self, word: u32) -> u32 {
        if word == LEGACY_EMPTY_TILE {
            return 0;
        }
        let shift = self.index_shift();
        let index = (word & self.index) >> shift;
        let shifted = (index.wrapping_add(1) << shift) & self.index;
        shifted | (word & !self.index)
    }
}
