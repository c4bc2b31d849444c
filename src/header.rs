use crate::{reader::AseReader, writer::AseWriter, AsepriteError, ColorMode, Result};
use bitflags::bitflags;
use log::warn;
use std::io::{Read, Write};

pub(crate) const HEADER_MAGIC: u16 = 0xA5E0;
pub(crate) const FRAME_MAGIC: u16 = 0xF1FA;
pub(crate) const HEADER_SIZE: u32 = 128;
pub(crate) const FRAME_HEADER_SIZE: u32 = 16;

// Chunk counts at or above this value are stored in the 32-bit field only.
const CHUNK_COUNT_ESCAPE: u16 = 0xFFFF;

bitflags! {
    pub(crate) struct HeaderFlags: u32 {
        /// Layer opacity has a valid value.
        const LAYER_OPACITY = 0x0001;
        /// Group layer opacity and blend mode have valid values.
        const GROUP_BLEND = 0x0002;
        /// Layer chunks carry a UUID.
        const LAYER_UUID = 0x0004;
    }
}

// Fixed 128-byte file header.
#[derive(Debug, Clone)]
pub(crate) struct FileHeader {
    pub file_size: u32,
    pub frames: u16,
    pub width: u16,
    pub height: u16,
    pub color_mode: ColorMode,
    pub flags: HeaderFlags,
    pub speed: u16,
    pub transparent_index: u8,
    pub num_colors: u16,
    pub pixel_width: u8,
    pub pixel_height: u8,
    pub grid_x: i16,
    pub grid_y: i16,
    pub grid_width: u16,
    pub grid_height: u16,
}

impl FileHeader {
    pub(crate) fn read<R: Read>(reader: &mut AseReader<R>) -> Result<Self> {
        let file_size = reader.dword()?;
        let magic_number = reader.word()?;
        if magic_number != HEADER_MAGIC {
            let msg = format!(
                "Invalid magic number for header: {:x} != {:x}",
                magic_number, HEADER_MAGIC
            );
            if cfg!(feature = "dev-mode") {
                warn!("{} (ignored in dev-mode)", msg);
            } else {
                return Err(AsepriteError::InvalidInput(msg));
            }
        }

        let frames = reader.word()?;
        let width = reader.word()?;
        let height = reader.word()?;
        let color_depth = reader.word()?;
        let flags = HeaderFlags::from_bits_truncate(reader.dword()?);
        let speed = reader.word()?;
        let _next = reader.dword()?;
        let _frit = reader.dword()?;
        let transparent_index = reader.byte()?;
        reader.skip_reserved(3)?;
        let num_colors = reader.word()?;
        let pixel_width = reader.byte()?;
        let pixel_height = reader.byte()?;
        let grid_x = reader.short()?;
        let grid_y = reader.short()?;
        let grid_width = reader.word()?;
        let grid_height = reader.word()?;
        reader.skip_reserved(84)?;

        let color_mode = ColorMode::from_depth(color_depth)?;

        Ok(Self {
            file_size,
            frames,
            width,
            height,
            color_mode,
            flags,
            speed,
            transparent_index,
            num_colors,
            pixel_width,
            pixel_height,
            grid_x,
            grid_y,
            grid_width,
            grid_height,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut AseWriter<W>) -> Result<()> {
        writer.dword(self.file_size)?;
        writer.word(HEADER_MAGIC)?;
        writer.word(self.frames)?;
        writer.word(self.width)?;
        writer.word(self.height)?;
        writer.word(self.color_mode.depth())?;
        writer.dword(self.flags.bits())?;
        writer.word(self.speed)?;
        writer.dword(0)?;
        writer.dword(0)?;
        writer.byte(self.transparent_index)?;
        writer.padding(3)?;
        writer.word(self.num_colors)?;
        writer.byte(self.pixel_width)?;
        writer.byte(self.pixel_height)?;
        writer.short(self.grid_x)?;
        writer.short(self.grid_y)?;
        writer.word(self.grid_width)?;
        writer.word(self.grid_height)?;
        writer.padding(84)
    }

    /// Palette size. Old files store 0 for 256 colors.
    pub(crate) fn palette_size(&self) -> u32 {
        if self.num_colors == 0 {
            256
        } else {
            self.num_colors as u32
        }
    }

    /// Pixel aspect ratio. Old files store 0:0 for square pixels.
    pub(crate) fn pixel_ratio(&self) -> (u8, u8) {
        if self.pixel_width == 0 || self.pixel_height == 0 {
            (1, 1)
        } else {
            (self.pixel_width, self.pixel_height)
        }
    }
}

// Fixed 16-byte frame header.
#[derive(Debug, Clone)]
pub(crate) struct FrameHeader {
    /// Frame size in bytes, including this header.
    pub size: u32,
    pub chunks: u32,
    pub duration: u16,
}

impl FrameHeader {
    pub(crate) fn read<R: Read>(reader: &mut AseReader<R>) -> Result<Self> {
        let size = reader.dword()?;
        let magic_number = reader.word()?;
        if magic_number != FRAME_MAGIC {
            return Err(AsepriteError::InvalidInput(format!(
                "Invalid magic number for frame: {:x} != {:x}",
                magic_number, FRAME_MAGIC
            )));
        }
        let old_chunks = reader.word()?;
        let duration = reader.word()?;
        reader.skip_reserved(2)?;
        let new_chunks = reader.dword()?;

        let chunks = if old_chunks == CHUNK_COUNT_ESCAPE && new_chunks != 0 {
            new_chunks
        } else {
            old_chunks as u32
        };
        if size < FRAME_HEADER_SIZE {
            return Err(AsepriteError::InvalidInput(format!(
                "Frame size {} is smaller than the frame header",
                size
            )));
        }

        Ok(Self {
            size,
            chunks,
            duration,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut AseWriter<W>) -> Result<()> {
        writer.dword(self.size)?;
        writer.word(FRAME_MAGIC)?;
        let old_chunks = if self.chunks < CHUNK_COUNT_ESCAPE as u32 {
            self.chunks as u16
        } else {
            CHUNK_COUNT_ESCAPE
        };
        writer.word(old_chunks)?;
        writer.word(self.duration)?;
        writer.padding(2)?;
        writer.dword(self.chunks)
    }
}
