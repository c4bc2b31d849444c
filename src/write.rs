//! Encoder. Frames are assembled in memory one at a time; the file size in
//! the header is patched once all frames are written.

use crate::{
    cel::{self, CelWriteMode},
    color_profile,
    delegate::EncodeDelegate,
    external_file,
    header::{FileHeader, FrameHeader, HeaderFlags, FRAME_HEADER_SIZE},
    layer::{self, LayerKind},
    palette,
    pixel::PixelFormat,
    slice::{self, SliceKey},
    tags, tileset,
    user_data::{self, UserData},
    writer::AseWriter,
    AsepriteError, Document, Palette, Result, Tag,
};
use log::{debug, trace};
use std::{
    convert::TryFrom,
    io::{Seek, SeekFrom, Write},
};

const CHUNK_OLD_PALETTE: u16 = 0x0004;
const CHUNK_LAYER: u16 = 0x2004;
const CHUNK_CEL: u16 = 0x2005;
const CHUNK_CEL_EXTRA: u16 = 0x2006;
const CHUNK_COLOR_PROFILE: u16 = 0x2007;
const CHUNK_EXTERNAL_FILES: u16 = 0x2008;
const CHUNK_TAGS: u16 = 0x2018;
const CHUNK_PALETTE: u16 = 0x2019;
const CHUNK_USER_DATA: u16 = 0x2020;
const CHUNK_SLICE: u16 = 0x2022;
const CHUNK_TILESET: u16 = 0x2023;

const CHUNK_HEADER_SIZE: usize = 6;

/// Selects the part of a document to encode.
///
/// The default exports everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionOfInterest {
    /// Inclusive frame range. `None` exports all frames.
    pub frames: Option<(u32, u32)>,
    /// Only export the frames of the first tag with this name, and only
    /// that tag.
    pub tag: Option<String>,
    /// Only export slices with this name.
    pub slice: Option<String>,
}

impl RegionOfInterest {
    /// Export the frames `from..=to`.
    pub fn frames(from: u32, to: u32) -> Self {
        Self {
            frames: Some((from, to)),
            ..Self::default()
        }
    }

    /// Export the frames of the tag `name`.
    pub fn tag(name: &str) -> Self {
        Self {
            tag: Some(name.to_owned()),
            ..Self::default()
        }
    }

    /// Narrow the written slices to those named `name`.
    pub fn with_slice(mut self, name: &str) -> Self {
        self.slice = Some(name.to_owned());
        self
    }
}

// Chunks of one frame, in file order.
#[derive(Default)]
struct FrameChunks {
    chunks: Vec<(u16, Vec<u8>)>,
}

impl FrameChunks {
    fn add<F>(&mut self, chunk_type: u16, write: F) -> Result<()>
    where
        F: FnOnce(&mut AseWriter<Vec<u8>>) -> Result<()>,
    {
        let mut writer = AseWriter::buffer();
        write(&mut writer)?;
        self.chunks.push((chunk_type, writer.into_inner()));
        Ok(())
    }

    fn add_user_data(&mut self, user_data: &UserData) -> Result<()> {
        self.add(CHUNK_USER_DATA, |w| user_data::write_chunk(w, user_data))
    }

    fn add_user_data_if_set(&mut self, user_data: &UserData) -> Result<()> {
        if user_data.is_empty() {
            return Ok(());
        }
        self.add_user_data(user_data)
    }

    fn write<W: Write>(self, writer: &mut AseWriter<W>, duration: u16) -> Result<()> {
        let data_size: usize = self
            .chunks
            .iter()
            .map(|(_, data)| data.len() + CHUNK_HEADER_SIZE)
            .sum();
        let size = u32::try_from(data_size + FRAME_HEADER_SIZE as usize)
            .map_err(|_| AsepriteError::InvalidInput("Frame data exceeds 4 GiB".into()))?;
        FrameHeader {
            size,
            chunks: self.chunks.len() as u32,
            duration,
        }
        .write(writer)?;

        for (chunk_type, data) in self.chunks {
            trace!("Writing chunk 0x{:04x} ({} bytes)", chunk_type, data.len());
            writer.dword((data.len() + CHUNK_HEADER_SIZE) as u32)?;
            writer.word(chunk_type)?;
            writer.bytes(&data)?;
        }
        Ok(())
    }
}

fn resolve_frames(doc: &Document, roi: &RegionOfInterest) -> Result<(u32, u32)> {
    let last = doc.num_frames().saturating_sub(1);
    let (mut from, mut to) = roi.frames.unwrap_or((0, last));
    if let Some(name) = &roi.tag {
        let tag = find_tag(doc, name)?;
        from = from.max(tag.from_frame);
        to = to.min(tag.to_frame);
    }
    to = to.min(last);
    if from > to {
        return Err(AsepriteError::InvalidInput(format!(
            "Empty frame range {}..={}",
            from, to
        )));
    }
    if to - from >= u16::MAX as u32 {
        return Err(AsepriteError::InvalidInput(format!(
            "Too many frames: {}",
            to - from + 1
        )));
    }
    Ok((from, to))
}

fn find_tag<'a>(doc: &'a Document, name: &str) -> Result<&'a Tag> {
    doc.tags
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| AsepriteError::InvalidInput(format!("Unknown tag '{}'", name)))
}

struct Encoder<'a> {
    doc: &'a Document,
    roi: &'a RegionOfInterest,
    from: u32,
    to: u32,
}

impl<'a> Encoder<'a> {
    fn header(&self) -> Result<FileHeader> {
        let doc = self.doc;
        let mut flags = HeaderFlags::LAYER_OPACITY | HeaderFlags::GROUP_BLEND;
        if doc.layers().iter().any(|(_, l)| l.uuid.is_some()) {
            flags |= HeaderFlags::LAYER_UUID;
        }
        let palette = doc.palette(self.from);
        let num_colors = u16::try_from(palette.len()).map_err(|_| {
            AsepriteError::InvalidInput(format!("Palette too large: {}", palette.len()))
        })?;
        let grid = doc.grid.unwrap_or_default();
        let grid_value = |v: i64| {
            i16::try_from(v).map_err(|_| AsepriteError::InvalidInput("Grid out of range".into()))
        };
        let grid_size = |v: u32| {
            u16::try_from(v).map_err(|_| AsepriteError::InvalidInput("Grid out of range".into()))
        };

        Ok(FileHeader {
            file_size: 0,
            frames: (self.to - self.from + 1) as u16,
            width: doc.width(),
            height: doc.height(),
            color_mode: doc.color_mode(),
            flags,
            speed: doc.frame_duration(self.from).unwrap_or(0),
            transparent_index: doc.transparent_index,
            num_colors,
            pixel_width: doc.pixel_ratio.0,
            pixel_height: doc.pixel_ratio.1,
            grid_x: grid_value(grid.x as i64)?,
            grid_y: grid_value(grid.y as i64)?,
            grid_width: grid_size(grid.width)?,
            grid_height: grid_size(grid.height)?,
        })
    }

    fn palette_chunks(&self, frame: u32, chunks: &mut FrameChunks) -> Result<()> {
        let palette = self.doc.palette(frame);
        if palette.is_empty() {
            return Err(AsepriteError::InvalidInput(format!(
                "Palette of frame {} has no entries",
                frame
            )));
        }
        let last = palette.len() - 1;

        if frame == self.from {
            if palette.len() <= 256 && palette.is_opaque() {
                chunks.add(CHUNK_OLD_PALETTE, |w| palette::write_old_chunk(w, palette))?;
            }
            return chunks.add(CHUNK_PALETTE, |w| palette::write_chunk(w, palette, 0, last));
        }

        let previous: &Palette = self.doc.palette(frame - 1);
        if let Some((from, to)) = previous.diff(palette) {
            // A shrinking palette only needs the new size. Write its last
            // entry to keep the range valid.
            let to = to.min(last);
            let from = from.min(to);
            debug!("Palette changed in frame {}: {}..={}", frame, from, to);
            chunks.add(CHUNK_PALETTE, |w| palette::write_chunk(w, palette, from, to))?;
        }
        Ok(())
    }

    fn first_frame_chunks(&self, chunks: &mut FrameChunks) -> Result<()> {
        let doc = self.doc;

        if let Some(profile) = &doc.color_profile {
            chunks.add(CHUNK_COLOR_PROFILE, |w| color_profile::write_chunk(w, profile))?;
        }
        if !doc.external_files.is_empty() {
            chunks.add(CHUNK_EXTERNAL_FILES, |w| {
                external_file::write_chunk(w, &doc.external_files)
            })?;
        }
        self.palette_chunks(self.from, chunks)?;
        chunks.add_user_data_if_set(&doc.user_data)?;

        for (index, tileset) in doc.tilesets().iter() {
            let format = doc.color_mode().pixel_format();
            chunks.add(CHUNK_TILESET, |w| tileset::write_chunk(w, index, tileset, format))?;
            chunks.add_user_data_if_set(&tileset.user_data)?;
        }

        let with_uuid = doc.layers().iter().any(|(_, l)| l.uuid.is_some());
        for (id, level) in doc.layers().pre_order() {
            let layer = &doc.layers()[id];
            chunks.add(CHUNK_LAYER, |w| layer::write_chunk(w, layer, level, with_uuid))?;
            chunks.add_user_data_if_set(&layer.user_data)?;
        }
        Ok(())
    }

    fn cel_chunks<E: EncodeDelegate + ?Sized>(
        &self,
        frame: u32,
        chunks: &mut FrameChunks,
        delegate: &mut E,
    ) -> Result<()> {
        for (layer_index, (id, _)) in self.doc.layers().pre_order().into_iter().enumerate() {
            let layer = &self.doc.layers()[id];
            let cel = match layer.cel(frame) {
                Some(cel) => cel,
                None => continue,
            };
            if delegate.is_cancelled() {
                return Err(AsepriteError::Cancelled);
            }
            let layer_index = u16::try_from(layer_index)
                .map_err(|_| AsepriteError::InvalidInput("Too many layers".into()))?;

            // Link to the first exported frame sharing the image. Earlier
            // frames outside the region are not written.
            let link = (self.from..frame).find(|f| {
                layer
                    .cel(*f)
                    .map(|other| cel.is_linked_to(other) && cel.same_placement(other))
                    .unwrap_or(false)
            });
            let mode = match link {
                Some(f) => CelWriteMode::LinkedTo((f - self.from) as u16),
                None => CelWriteMode::Image,
            };
            let format = match layer.kind {
                LayerKind::Tilemap { .. } => PixelFormat::Tilemap,
                _ => self.doc.color_mode().pixel_format(),
            };
            chunks.add(CHUNK_CEL, |w| cel::write_chunk(w, layer_index, cel, format, mode))?;
            if let Some(bounds) = &cel.bounds {
                chunks.add(CHUNK_CEL_EXTRA, |w| cel::write_extra_chunk(w, bounds))?;
            }
            // Linked cels share the user data of the cel they link to.
            if link.is_none() {
                chunks.add_user_data_if_set(cel.user_data())?;
            }
        }
        Ok(())
    }

    fn tag_chunks(&self, chunks: &mut FrameChunks) -> Result<()> {
        let (from, to) = (self.from, self.to);
        let selected: Vec<&Tag> = match &self.roi.tag {
            Some(name) => vec![find_tag(self.doc, name)?],
            None => self
                .doc
                .tags
                .iter()
                .filter(|t| t.from_frame <= to && t.to_frame >= from)
                .collect(),
        };
        if selected.is_empty() {
            return Ok(());
        }
        let shifted: Vec<Tag> = selected
            .iter()
            .map(|t| {
                let mut tag = (*t).clone();
                tag.from_frame = t.from_frame.max(from).min(to) - from;
                tag.to_frame = t.to_frame.max(from).min(to) - from;
                tag
            })
            .collect();

        chunks.add(CHUNK_TAGS, |w| tags::write_chunk(w, shifted.iter()))?;
        // One user data chunk per tag, even if empty, so readers can match
        // them by position.
        for tag in &shifted {
            chunks.add_user_data(&tag.user_data)?;
        }
        Ok(())
    }

    fn slice_chunks(&self, chunks: &mut FrameChunks) -> Result<()> {
        let (from, to) = (self.from, self.to);
        if let Some(name) = &self.roi.slice {
            if !self.doc.slices.iter().any(|s| &s.name == name) {
                return Err(AsepriteError::InvalidInput(format!(
                    "Unknown slice '{}'",
                    name
                )));
            }
        }

        for slice in &self.doc.slices {
            if matches!(&self.roi.slice, Some(name) if name != &slice.name) {
                continue;
            }
            let mut keys: Vec<(u32, &SliceKey)> = Vec::new();
            if let Some(key) = slice.key_at(from) {
                keys.push((0, key));
            }
            if to > from {
                for (frame, key) in slice.keys.range(from + 1..=to) {
                    keys.push((frame - from, key));
                }
            }
            if keys.is_empty() {
                continue;
            }
            chunks.add(CHUNK_SLICE, |w| slice::write_chunk(w, &slice.name, &keys))?;
            chunks.add_user_data_if_set(&slice.user_data)?;
        }
        Ok(())
    }
}

/// Encode the selected region of `doc` into `output`.
pub fn encode<W: Write + Seek>(doc: &Document, roi: &RegionOfInterest, output: W) -> Result<W> {
    encode_with(doc, roi, output, &mut ())
}

/// Encode the selected region of `doc` into `output`, reporting progress to
/// `delegate`.
///
/// Any error, including cancellation, leaves `output` with an incomplete
/// file.
pub fn encode_with<W, E>(
    doc: &Document,
    roi: &RegionOfInterest,
    output: W,
    delegate: &mut E,
) -> Result<W>
where
    W: Write + Seek,
    E: EncodeDelegate + ?Sized,
{
    let (from, to) = resolve_frames(doc, roi)?;
    let encoder = Encoder { doc, roi, from, to };
    let header = encoder.header()?;

    let mut writer = AseWriter::with(output);
    let start = writer.get_mut().stream_position()?;
    header.write(&mut writer)?;

    let total = (to - from + 1) as f32;
    for frame in from..=to {
        if delegate.is_cancelled() {
            return Err(AsepriteError::Cancelled);
        }
        let mut chunks = FrameChunks::default();
        if frame == from {
            encoder.first_frame_chunks(&mut chunks)?;
        } else {
            encoder.palette_chunks(frame, &mut chunks)?;
        }
        encoder.cel_chunks(frame, &mut chunks, delegate)?;
        if frame == from {
            encoder.tag_chunks(&mut chunks)?;
            encoder.slice_chunks(&mut chunks)?;
        }
        chunks.write(&mut writer, doc.frame_duration(frame).unwrap_or(0))?;
        delegate.progress((frame - from + 1) as f32 / total);
    }

    let mut output = writer.into_inner();
    let end = output.stream_position()?;
    let file_size = u32::try_from(end - start)
        .map_err(|_| AsepriteError::InvalidInput("File exceeds 4 GiB".into()))?;
    output.seek(SeekFrom::Start(start))?;
    AseWriter::with(&mut output).dword(file_size)?;
    output.seek(SeekFrom::Start(end))?;
    Ok(output)
}
