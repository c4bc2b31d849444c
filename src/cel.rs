use crate::{
    compress,
    pixel::{Image, PixelFormat, Pixels},
    reader::AseReader,
    tile::TileBitmasks,
    user_data::UserData,
    writer::AseWriter,
    AsepriteError, Result,
};
use std::{
    convert::TryFrom,
    io::{Read, Write},
    sync::Arc,
};

const CEL_RAW: u16 = 0;
const CEL_LINKED: u16 = 1;
const CEL_COMPRESSED: u16 = 2;
const CEL_COMPRESSED_TILEMAP: u16 = 3;

const CEL_EXTRA_PRECISE_BOUNDS: u32 = 0x0001;

/// Cel bounds with sub-pixel precision. Used by reference layers.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreciseBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Content shared by linked cels: the image and its user data.
#[derive(Debug, Clone, PartialEq)]
pub struct CelData {
    #[allow(missing_docs)]
    pub image: Image,
    #[allow(missing_docs)]
    pub user_data: UserData,
}

impl CelData {
    /// Image content without user data.
    pub fn new(image: Image) -> Self {
        Self {
            image,
            user_data: UserData::default(),
        }
    }
}

/// A shared handle to cel content. Linked cels hold clones of the same handle.
pub type CelDataRef = Arc<CelData>;

/// The placement of one layer's image at one frame.
///
/// Cels that share the same content (linked cels) hold clones of the same
/// [CelDataRef]. Use [Cel::is_linked_to] to check for identity.
///
/// [Official docs for cels](https://www.aseprite.org/docs/cel/).
#[derive(Debug, Clone, PartialEq)]
pub struct Cel {
    /// Offset of the image from the canvas origin.
    pub position: (i32, i32),
    #[allow(missing_docs)]
    pub opacity: u8,
    /// Z-index relative to the layer order (0 = default).
    pub z_index: i16,
    /// Precise bounds, stored in a separate cel extra chunk.
    pub bounds: Option<PreciseBounds>,
    pub(crate) data: CelDataRef,
}

impl Cel {
    /// A cel at the origin owning `image`.
    pub fn new(image: Image) -> Self {
        Self::with_data(Arc::new(CelData::new(image)))
    }

    /// A cel sharing an existing content handle.
    pub fn with_data(data: CelDataRef) -> Self {
        Self {
            position: (0, 0),
            opacity: 255,
            z_index: 0,
            bounds: None,
            data,
        }
    }

    /// A new cel sharing the content of `self`, with the same position and
    /// opacity.
    pub fn linked(&self) -> Self {
        let mut cel = Self::with_data(self.data.clone());
        cel.position = self.position;
        cel.opacity = self.opacity;
        cel
    }

    #[allow(missing_docs)]
    pub fn image(&self) -> &Image {
        &self.data.image
    }

    /// User data of the cel content. Linked cels share it.
    pub fn user_data(&self) -> &UserData {
        &self.data.user_data
    }

    /// The shared content handle.
    pub fn data_ref(&self) -> &CelDataRef {
        &self.data
    }

    /// Mutable access to the content. Unlinks this cel from other cels first
    /// if the content is shared.
    pub fn data_mut(&mut self) -> &mut CelData {
        Arc::make_mut(&mut self.data)
    }

    /// Mutable access to the image. Unlinks this cel like [Cel::data_mut].
    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.data_mut().image
    }

    /// Mutable access to the user data. Unlinks this cel like
    /// [Cel::data_mut].
    pub fn user_data_mut(&mut self) -> &mut UserData {
        &mut self.data_mut().user_data
    }

    /// Returns `true` if both cels share the same content.
    pub fn is_linked_to(&self, other: &Cel) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    // Same placement on the canvas. Links can only be stored between cels
    // with the same placement.
    pub(crate) fn same_placement(&self, other: &Cel) -> bool {
        self.position == other.position && self.opacity == other.opacity
    }
}

// Fields common to all cel chunk types.
#[derive(Debug)]
pub(crate) struct CelHeader {
    pub layer_index: u16,
    pub x: i16,
    pub y: i16,
    pub opacity: u8,
    pub z_index: i16,
}

impl CelHeader {
    fn parse<R: Read>(reader: &mut AseReader<R>) -> Result<(Self, u16)> {
        let layer_index = reader.word()?;
        let x = reader.short()?;
        let y = reader.short()?;
        let opacity = reader.byte()?;
        let cel_type = reader.word()?;
        let z_index = reader.short()?;
        reader.skip_reserved(5)?;
        Ok((
            Self {
                layer_index,
                x,
                y,
                opacity,
                z_index,
            },
            cel_type,
        ))
    }

    pub(crate) fn apply(&self, cel: &mut Cel) {
        cel.position = (self.x as i32, self.y as i32);
        cel.opacity = self.opacity;
        cel.z_index = self.z_index;
    }
}

// Payload of a cel chunk. Tilemap words are still in the stored bit layout.
#[derive(Debug)]
pub(crate) enum CelContent {
    Image(Image),
    Linked(u16),
    Tilemap { words: Vec<u32>, width: u16, height: u16, masks: TileBitmasks },
}

pub(crate) struct ParsedCel {
    pub header: CelHeader,
    pub content: CelContent,
}

fn image_size<R: Read>(reader: &mut AseReader<R>) -> Result<(u16, u16, usize)> {
    let width = reader.word()?;
    let height = reader.word()?;
    Ok((width, height, width as usize * height as usize))
}

fn parse_raw<R: Read>(reader: &mut AseReader<R>, format: PixelFormat) -> Result<Image> {
    let (width, height, count) = image_size(reader)?;
    let bytes = reader.bytes(count * format.bytes_per_pixel())?;
    Image::from_pixels(width, height, Pixels::unpack(format, &bytes)?)
}

pub(crate) fn parse_chunk(
    data: &[u8],
    format: PixelFormat,
    progress: &mut dyn FnMut(usize),
) -> Result<ParsedCel> {
    let mut reader = AseReader::new(data);
    let (header, cel_type) = CelHeader::parse(&mut reader)?;

    let content = match cel_type {
        CEL_RAW => CelContent::Image(parse_raw(&mut reader, format)?),
        CEL_LINKED => CelContent::Linked(reader.word()?),
        CEL_COMPRESSED => {
            let (width, height, count) = image_size(&mut reader)?;
            let offset = reader.position();
            let bytes = compress::inflate(
                reader.remaining(),
                count * format.bytes_per_pixel(),
                &mut |n: usize| progress(offset + n),
            )?;
            CelContent::Image(Image::from_pixels(
                width,
                height,
                Pixels::unpack(format, &bytes)?,
            )?)
        }
        CEL_COMPRESSED_TILEMAP => {
            let (width, height, count) = image_size(&mut reader)?;
            let bits_per_tile = reader.word()?;
            if bits_per_tile != 32 {
                return Err(AsepriteError::UnsupportedFeature(format!(
                    "Tilemaps with {} bits per tile",
                    bits_per_tile
                )));
            }
            let masks = TileBitmasks::parse(&mut reader)?;
            reader.skip_reserved(10)?;
            let offset = reader.position();
            let bytes = compress::inflate(reader.remaining(), count * 4, &mut |n: usize| {
                progress(offset + n)
            })?;
            let words = bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            CelContent::Tilemap {
                words,
                width,
                height,
                masks,
            }
        }
        _ => {
            return Err(AsepriteError::UnsupportedFeature(format!(
                "Invalid/Unsupported Cel type: {}",
                cel_type
            )))
        }
    };

    Ok(ParsedCel { header, content })
}

/// How a cel is stored.
pub(crate) enum CelWriteMode {
    Image,
    LinkedTo(u16),
}

fn position_i16(value: i32) -> Result<i16> {
    i16::try_from(value)
        .map_err(|_| AsepriteError::InvalidInput(format!("Cel position {} out of range", value)))
}

// `format` is the pixel format the cel's layer requires.
pub(crate) fn write_chunk<W: Write>(
    writer: &mut AseWriter<W>,
    layer_index: u16,
    cel: &Cel,
    format: PixelFormat,
    mode: CelWriteMode,
) -> Result<()> {
    let image = cel.image();
    if let CelWriteMode::Image = mode {
        image.check(format)?;
    }
    let cel_type = match (&mode, image.format()) {
        (CelWriteMode::LinkedTo(_), _) => CEL_LINKED,
        (CelWriteMode::Image, PixelFormat::Tilemap) => CEL_COMPRESSED_TILEMAP,
        (CelWriteMode::Image, _) => CEL_COMPRESSED,
    };

    writer.word(layer_index)?;
    writer.short(position_i16(cel.position.0)?)?;
    writer.short(position_i16(cel.position.1)?)?;
    writer.byte(cel.opacity)?;
    writer.word(cel_type)?;
    writer.short(cel.z_index)?;
    writer.padding(5)?;

    match mode {
        CelWriteMode::LinkedTo(frame) => writer.word(frame)?,
        CelWriteMode::Image => {
            writer.word(image.width())?;
            writer.word(image.height())?;
            if cel_type == CEL_COMPRESSED_TILEMAP {
                writer.word(32)?;
                TileBitmasks::CURRENT.write(writer)?;
                writer.padding(10)?;
            }
            compress::deflate_images(writer.get_mut(), std::iter::once(image))?;
        }
    }
    Ok(())
}

pub(crate) fn parse_extra_chunk(data: &[u8]) -> Result<Option<PreciseBounds>> {
    let mut reader = AseReader::new(data);
    let flags = reader.dword()?;
    let x = reader.fixed()?;
    let y = reader.fixed()?;
    let width = reader.fixed()?;
    let height = reader.fixed()?;
    if flags & CEL_EXTRA_PRECISE_BOUNDS == 0 {
        return Ok(None);
    }
    Ok(Some(PreciseBounds {
        x,
        y,
        width,
        height,
    }))
}

pub(crate) fn write_extra_chunk<W: Write>(
    writer: &mut AseWriter<W>,
    bounds: &PreciseBounds,
) -> Result<()> {
    writer.dword(CEL_EXTRA_PRECISE_BOUNDS)?;
    writer.fixed(bounds.x)?;
    writer.fixed(bounds.y)?;
    writer.fixed(bounds.width)?;
    writer.fixed(bounds.height)?;
    writer.padding(16)
}
