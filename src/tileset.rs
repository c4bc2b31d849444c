use crate::{
    compress,
    pixel::{Image, PixelFormat, Pixels},
    reader::AseReader,
    user_data::UserData,
    writer::AseWriter,
    AsepriteError, Result,
};
use bitflags::bitflags;
use std::{convert::TryFrom, io::Write};

bitflags! {
    struct TilesetFlags: u32 {
        // Include link to external file.
        const LINKS_EXTERNAL_FILE = 0x0001;
        // Include tiles inside this file.
        const FILE_INCLUDES_TILES = 0x0002;
        // Tilemaps using this tileset use tile ID=0 as empty tile.
        // Files without this flag come from internal versions of Aseprite
        // where 0 was a real tile.
        const EMPTY_TILE_IS_ID_ZERO = 0x0004;
    }
}

/// A [Tileset] reference to a tileset in another file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalTilesetReference {
    /// Id of the [crate::ExternalFile] entry.
    pub file_id: u32,
    /// Id of the tileset inside the external file.
    pub tileset_id: u32,
}

/// A collection of equally sized tiles referenced by tilemap layers.
///
/// Tile 0 is always the empty tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Tileset {
    /// Tileset name. May not be unique among tilesets.
    pub name: String,
    /// Number to show in the UI for the tile with index=0. Default is 1.
    pub base_index: i16,
    /// Set if the tiles are (also) stored in another file.
    pub external: Option<ExternalTilesetReference>,
    #[allow(missing_docs)]
    pub user_data: UserData,
    tile_size: (u16, u16),
    tile_count: u32,
    tiles: Vec<Image>,
}

impl Tileset {
    /// A tileset holding only the empty tile.
    pub fn new(name: &str, format: PixelFormat, tile_width: u16, tile_height: u16) -> Self {
        Self {
            name: name.to_owned(),
            base_index: 1,
            external: None,
            user_data: UserData::default(),
            tile_size: (tile_width, tile_height),
            tile_count: 1,
            tiles: vec![Image::new(format, tile_width, tile_height)],
        }
    }

    /// A tileset whose tiles live only in another file.
    pub fn new_external(
        name: &str,
        tile_width: u16,
        tile_height: u16,
        tile_count: u32,
        reference: ExternalTilesetReference,
    ) -> Self {
        Self {
            name: name.to_owned(),
            base_index: 1,
            external: Some(reference),
            user_data: UserData::default(),
            tile_size: (tile_width, tile_height),
            tile_count,
            tiles: Vec::new(),
        }
    }

    /// Append a tile and return its index.
    pub fn push_tile(&mut self, tile: Image) -> Result<u32> {
        if (tile.width(), tile.height()) != self.tile_size {
            return Err(AsepriteError::InvalidInput(format!(
                "Tile of size {}x{} does not fit tileset of size {}x{}",
                tile.width(),
                tile.height(),
                self.tile_size.0,
                self.tile_size.1
            )));
        }
        if let Some(first) = self.tiles.first() {
            if first.format() != tile.format() {
                return Err(AsepriteError::InvalidInput(
                    "Tile pixel format does not match tileset".into(),
                ));
            }
        }
        self.tiles.push(tile);
        self.tile_count += 1;
        Ok(self.tile_count - 1)
    }

    /// Tile width and height in pixels.
    pub fn tile_size(&self) -> (u16, u16) {
        self.tile_size
    }

    /// Number of tiles, including the empty tile.
    pub fn tile_count(&self) -> u32 {
        self.tile_count
    }

    /// Embedded tile images. Empty for tilesets that are only stored
    /// externally.
    pub fn tiles(&self) -> &[Image] {
        &self.tiles
    }

    #[allow(missing_docs)]
    pub fn tile(&self, index: u32) -> Option<&Image> {
        self.tiles.get(index as usize)
    }
}

/// The tilesets of a document, addressed by the index stored in tilemap
/// layers. Slots may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tilesets(Vec<Option<Tileset>>);

impl Tilesets {
    /// Store `tileset` at `index`, replacing any previous one.
    pub fn set(&mut self, index: u32, tileset: Tileset) {
        let index = index as usize;
        if index >= self.0.len() {
            self.0.resize(index + 1, None);
        }
        self.0[index] = Some(tileset);
    }

    /// Store `tileset` in the next free index.
    pub fn push(&mut self, tileset: Tileset) -> u32 {
        let index = self.0.len() as u32;
        self.0.push(Some(tileset));
        index
    }

    #[allow(missing_docs)]
    pub fn get(&self, index: u32) -> Option<&Tileset> {
        self.0.get(index as usize).and_then(|t| t.as_ref())
    }

    #[allow(missing_docs)]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Tileset> {
        self.0.get_mut(index as usize).and_then(|t| t.as_mut())
    }

    /// Number of tileset slots.
    pub fn len(&self) -> u32 {
        self.0.len() as u32
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All tilesets with their index.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Tileset)> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (i as u32, t)))
    }
}

pub(crate) struct ParsedTileset {
    pub id: u32,
    pub tileset: Tileset,
    /// Tile index 0 was a real tile in this file.
    pub legacy: bool,
}

pub(crate) fn parse_chunk(
    data: &[u8],
    format: PixelFormat,
    progress: &mut dyn FnMut(usize),
) -> Result<ParsedTileset> {
    let mut reader = AseReader::new(data);
    let id = reader.dword()?;
    let flags = TilesetFlags::from_bits_truncate(reader.dword()?);
    let mut tile_count = reader.dword()?;
    let tile_width = reader.word()?;
    let tile_height = reader.word()?;
    let base_index = reader.short()?;
    reader.skip_reserved(14)?;
    let name = reader.string()?;

    let external = if flags.contains(TilesetFlags::LINKS_EXTERNAL_FILE) {
        Some(ExternalTilesetReference {
            file_id: reader.dword()?,
            tileset_id: reader.dword()?,
        })
    } else {
        None
    };

    let mut tiles = Vec::new();
    if flags.contains(TilesetFlags::FILE_INCLUDES_TILES) {
        let compressed_len = reader.dword()? as usize;
        let remaining = reader.remaining();
        if compressed_len > remaining.len() {
            return Err(AsepriteError::Truncated(format!(
                "Tileset data of {} bytes exceeds chunk ({} bytes left)",
                compressed_len,
                remaining.len()
            )));
        }
        if tile_width == 0 || tile_height == 0 {
            return Err(AsepriteError::InvalidInput(format!(
                "Invalid tile size {}x{}",
                tile_width, tile_height
            )));
        }
        let tile_bytes = (tile_width as usize)
            .checked_mul(tile_height as usize)
            .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| AsepriteError::InvalidInput("Tile size overflow".into()))?;
        let expected = tile_bytes
            .checked_mul(tile_count as usize)
            .ok_or_else(|| AsepriteError::InvalidInput("Tileset size overflow".into()))?;
        let bytes = compress::inflate(&remaining[..compressed_len], expected, progress)?;
        for chunk in bytes.chunks_exact(tile_bytes) {
            let pixels = Pixels::unpack(format, chunk)?;
            tiles.push(Image::from_pixels(tile_width, tile_height, pixels)?);
        }
    }

    let legacy = !flags.contains(TilesetFlags::EMPTY_TILE_IS_ID_ZERO);
    if legacy {
        // Old tile indices are shifted by one on load. Make room for the
        // empty tile.
        if flags.contains(TilesetFlags::FILE_INCLUDES_TILES) {
            tiles.insert(0, Image::new(format, tile_width, tile_height));
        }
        tile_count = tile_count.saturating_add(1);
    }

    Ok(ParsedTileset {
        id,
        tileset: Tileset {
            name,
            base_index,
            external,
            user_data: UserData::default(),
            tile_size: (tile_width, tile_height),
            tile_count,
            tiles,
        },
        legacy,
    })
}

// `format` is the sprite's pixel format, which embedded tiles must share.
pub(crate) fn write_chunk<W: Write>(
    writer: &mut AseWriter<W>,
    id: u32,
    tileset: &Tileset,
    format: PixelFormat,
) -> Result<()> {
    for tile in &tileset.tiles {
        tile.check(format)?;
    }

    let mut flags = TilesetFlags::EMPTY_TILE_IS_ID_ZERO;
    if tileset.external.is_some() {
        flags |= TilesetFlags::LINKS_EXTERNAL_FILE;
    }
    if !tileset.tiles.is_empty() {
        flags |= TilesetFlags::FILE_INCLUDES_TILES;
    }

    writer.dword(id)?;
    writer.dword(flags.bits())?;
    writer.dword(tileset.tile_count)?;
    writer.word(tileset.tile_size.0)?;
    writer.word(tileset.tile_size.1)?;
    writer.short(tileset.base_index)?;
    writer.padding(14)?;
    writer.string(&tileset.name)?;
    if let Some(reference) = &tileset.external {
        writer.dword(reference.file_id)?;
        writer.dword(reference.tileset_id)?;
    }
    if !tileset.tiles.is_empty() {
        let compressed = compress::deflate_images(Vec::new(), &tileset.tiles)?;
        let len = u32::try_from(compressed.len())
            .map_err(|_| AsepriteError::InvalidInput("Tileset data too large".into()))?;
        writer.dword(len)?;
        writer.bytes(&compressed)?;
    }
    Ok(())
}
