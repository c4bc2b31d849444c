use crate::{
    cel::Cel,
    color_profile::ColorProfile,
    external_file::ExternalFiles,
    layer::{Layer, LayerId, LayerKind, LayerTree},
    palette::Palette,
    pixel::PixelFormat,
    slice::{Rect, Slice},
    tags::Tag,
    tileset::Tilesets,
    user_data::UserData,
    write::RegionOfInterest,
    AsepriteError, Result, Warning,
};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Cursor, Read, Seek, Write},
    path::Path,
};

const DEFAULT_FRAME_DURATION: u16 = 100;
const DEFAULT_PALETTE_SIZE: u32 = 256;

/// Color mode of a sprite. Determines the pixel format of all non-tilemap
/// images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// 32 bits per pixel.
    Rgba,
    /// 16 bits per pixel.
    Grayscale,
    /// 8 bits per pixel, referencing the palette.
    Indexed,
}

impl ColorMode {
    pub(crate) fn from_depth(depth: u16) -> Result<Self> {
        match depth {
            8 => Ok(ColorMode::Indexed),
            16 => Ok(ColorMode::Grayscale),
            32 => Ok(ColorMode::Rgba),
            _ => Err(AsepriteError::InvalidInput(format!(
                "Unknown pixel format. Color depth: {}",
                depth
            ))),
        }
    }

    pub(crate) fn depth(&self) -> u16 {
        match self {
            ColorMode::Indexed => 8,
            ColorMode::Grayscale => 16,
            ColorMode::Rgba => 32,
        }
    }

    /// Pixel format of images in this color mode.
    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            ColorMode::Rgba => PixelFormat::Rgba,
            ColorMode::Grayscale => PixelFormat::Grayscale,
            ColorMode::Indexed => PixelFormat::Indexed,
        }
    }
}

/// A complete sprite: canvas, frames, layers with their cels, palettes,
/// tags, slices, and tilesets.
///
/// # Example
///
/// ```
/// use asecodec::{Cel, ColorMode, Document, Image, Layer, LayerKind};
///
/// let mut doc = Document::new(16, 16, ColorMode::Rgba);
/// let layer = doc.add_layer(None, Layer::new(LayerKind::Image, "Layer 1")).unwrap();
/// let image = Image::new(doc.color_mode().pixel_format(), 16, 16);
/// doc.add_cel(layer, 0, Cel::new(image)).unwrap();
///
/// let bytes = doc.to_bytes().unwrap();
/// let (copy, warnings) = asecodec::decode(&bytes[..]).unwrap();
/// assert!(warnings.is_empty());
/// assert_eq!(copy, doc);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    width: u16,
    height: u16,
    color_mode: ColorMode,
    frame_durations: Vec<u16>,
    palettes: Vec<Palette>,
    layers: LayerTree,
    tilesets: Tilesets,
    cancelled: bool,
    /// Palette index of the transparent color. Only used in indexed mode.
    pub transparent_index: u8,
    /// Pixel aspect ratio (width, height).
    pub pixel_ratio: (u8, u8),
    /// Editor grid.
    pub grid: Option<Rect>,
    #[allow(missing_docs)]
    pub color_profile: Option<ColorProfile>,
    /// All tags. Frame ranges may overlap.
    pub tags: Vec<Tag>,
    #[allow(missing_docs)]
    pub slices: Vec<Slice>,
    /// External files referenced by tilesets.
    pub external_files: ExternalFiles,
    /// User data of the sprite itself.
    pub user_data: UserData,
}

impl Document {
    /// A document with one frame, no layers, and a palette of 256 opaque
    /// black entries.
    pub fn new(width: u16, height: u16, color_mode: ColorMode) -> Self {
        Self {
            width,
            height,
            color_mode,
            frame_durations: vec![DEFAULT_FRAME_DURATION],
            palettes: vec![Palette::new(0, DEFAULT_PALETTE_SIZE)],
            layers: LayerTree::default(),
            tilesets: Tilesets::default(),
            cancelled: false,
            transparent_index: 0,
            pixel_ratio: (1, 1),
            grid: None,
            color_profile: None,
            tags: Vec::new(),
            slices: Vec::new(),
            external_files: ExternalFiles::default(),
            user_data: UserData::default(),
        }
    }

    /// Decode a document from `input`, collecting warnings.
    pub fn read<R: Read>(input: R) -> Result<(Self, Vec<Warning>)> {
        crate::decode(input)
    }

    /// Decode a document from a file.
    pub fn read_file(path: impl AsRef<Path>) -> Result<(Self, Vec<Warning>)> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file))
    }

    /// Encode all frames of the document.
    pub fn write<W: Write + Seek>(&self, output: W) -> Result<W> {
        crate::encode(self, &RegionOfInterest::default(), output)
    }

    /// Encode all frames of the document into a file.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = self.write(BufWriter::new(file))?;
        writer.flush()?;
        Ok(())
    }

    /// Encode all frames of the document into memory.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.write(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Canvas width in pixels.
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Canvas height in pixels.
    pub fn height(&self) -> u16 {
        self.height
    }

    #[allow(missing_docs)]
    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    /// Total number of frames.
    pub fn num_frames(&self) -> u32 {
        self.frame_durations.len() as u32
    }

    /// Change the number of frames. New frames copy the duration of the last
    /// frame. Cels beyond the new end are removed.
    pub fn set_total_frames(&mut self, frames: u32) -> Result<()> {
        if frames == 0 || frames > u16::MAX as u32 {
            return Err(AsepriteError::InvalidInput(format!(
                "Invalid number of frames: {}",
                frames
            )));
        }
        let last = self
            .frame_durations
            .last()
            .copied()
            .unwrap_or(DEFAULT_FRAME_DURATION);
        self.frame_durations.resize(frames as usize, last);
        let ids: Vec<LayerId> = self.layers.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(layer) = self.layers.get_mut(id) {
                layer.retain_cels(|frame| frame < frames);
            }
        }
        Ok(())
    }

    /// Duration of `frame` in milliseconds.
    pub fn frame_duration(&self, frame: u32) -> Option<u16> {
        self.frame_durations.get(frame as usize).copied()
    }

    #[allow(missing_docs)]
    pub fn set_frame_duration(&mut self, frame: u32, duration: u16) -> Result<()> {
        let slot = self
            .frame_durations
            .get_mut(frame as usize)
            .ok_or_else(|| AsepriteError::InvalidInput(format!("Invalid frame {}", frame)))?;
        *slot = duration;
        Ok(())
    }

    /// The layer hierarchy.
    pub fn layers(&self) -> &LayerTree {
        &self.layers
    }

    #[allow(missing_docs)]
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    #[allow(missing_docs)]
    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(id)
    }

    /// Add a layer on top of the children of `parent`, or on top of the
    /// top-level layers.
    pub fn add_layer(&mut self, parent: Option<LayerId>, layer: Layer) -> Result<LayerId> {
        self.layers.add(parent, layer)
    }

    /// Set the cel of `layer` at `frame`, replacing any existing one.
    ///
    /// The image must be a tilemap for tilemap layers and match the color
    /// mode otherwise. Group layers have no cels.
    pub fn add_cel(&mut self, layer: LayerId, frame: u32, cel: Cel) -> Result<()> {
        if frame >= self.num_frames() {
            return Err(AsepriteError::InvalidInput(format!(
                "Invalid frame reference in Cel: {}",
                frame
            )));
        }
        let expected = self.color_mode.pixel_format();
        let target = self
            .layers
            .get_mut(layer)
            .ok_or_else(|| AsepriteError::InvalidInput(format!("Unknown layer {}", layer.0)))?;
        let format = match target.kind {
            LayerKind::Group => {
                return Err(AsepriteError::InvalidInput(format!(
                    "Group layer '{}' cannot hold cels",
                    target.name
                )))
            }
            LayerKind::Tilemap { .. } => PixelFormat::Tilemap,
            LayerKind::Image => expected,
        };
        if cel.image().format() != format {
            return Err(AsepriteError::InvalidInput(format!(
                "Cel image is {:?} but layer '{}' needs {:?}",
                cel.image().format(),
                target.name,
                format
            )));
        }
        target.insert_cel(frame, cel);
        Ok(())
    }

    /// All palette versions ordered by their first frame. There is always a
    /// version for frame 0.
    pub fn palettes(&self) -> &[Palette] {
        &self.palettes
    }

    /// The palette in effect at `frame`.
    pub fn palette(&self, frame: u32) -> &Palette {
        let index = self.palettes.partition_point(|p| p.frame() <= frame);
        &self.palettes[index.saturating_sub(1)]
    }

    /// Set the palette from `frame` on, until the next stored version.
    pub fn set_palette(&mut self, frame: u32, mut palette: Palette) {
        palette.set_frame(frame);
        match self.palettes.binary_search_by_key(&frame, |p| p.frame()) {
            Ok(index) => self.palettes[index] = palette,
            Err(index) => self.palettes.insert(index, palette),
        }
    }

    #[allow(missing_docs)]
    pub fn tilesets(&self) -> &Tilesets {
        &self.tilesets
    }

    #[allow(missing_docs)]
    pub fn tilesets_mut(&mut self) -> &mut Tilesets {
        &mut self.tilesets
    }

    /// Returns `true` if decoding was stopped early. The document is then
    /// incomplete.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn set_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn set_frame_durations(&mut self, frames: u16, duration: u16) {
        self.frame_durations = vec![duration; frames.max(1) as usize];
    }
}
