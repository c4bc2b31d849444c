use crate::{
    cel::{self, CelContent, ParsedCel},
    color_profile,
    delegate::DecodeDelegate,
    external_file,
    header::{FileHeader, FrameHeader, HeaderFlags, FRAME_HEADER_SIZE, HEADER_SIZE},
    layer::{self, LayerId, LayerKind, ParsedLayer},
    palette,
    pixel::{Image, PixelFormat, Pixels},
    reader::AseReader,
    slice::{self, Rect},
    tags,
    tile::Tile,
    tileset, user_data,
    user_data::UserData,
    AsepriteError, Cel, Document, Palette, Result, Warning,
};
use log::{debug, trace, warn};
use nohash::IntSet;
use std::{io::Read, sync::Arc};

// The object the next user data chunk is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserDataTarget {
    None,
    Sprite,
    Layer(LayerId),
    Cel(LayerId, u32),
    // Index of the next tag that has not received its user data yet.
    Tag(usize),
    Slice(usize),
    Tileset(u32),
}

struct ParseInfo {
    document: Document,
    header_flags: HeaderFlags,
    pixel_format: PixelFormat,
    // Layer nesting cursor. `None` is the (implicit) root group.
    previous_layer: Option<LayerId>,
    previous_level: i32,
    last_cel: Option<(LayerId, u32)>,
    user_data_target: UserDataTarget,
    seen_new_palette: bool,
    // Tilesets stored before tile index 0 was reserved for the empty tile.
    legacy_tilesets: IntSet<u32>,
    // Problems found while handling the current chunk that did not stop it.
    notes: Vec<AsepriteError>,
}

impl ParseInfo {
    fn new(header: &FileHeader) -> Self {
        let mut document = Document::new(header.width, header.height, header.color_mode);
        document.set_frame_durations(header.frames, header.speed);
        document.set_palette(0, Palette::new(0, header.palette_size()));
        document.transparent_index = header.transparent_index;
        document.pixel_ratio = header.pixel_ratio();
        document.grid = if header.grid_width == 0 || header.grid_height == 0 {
            None
        } else {
            Some(Rect::new(
                header.grid_x as i32,
                header.grid_y as i32,
                header.grid_width as u32,
                header.grid_height as u32,
            ))
        };

        Self {
            pixel_format: header.color_mode.pixel_format(),
            document,
            header_flags: header.flags,
            previous_layer: None,
            previous_level: -1,
            last_cel: None,
            user_data_target: UserDataTarget::None,
            seen_new_palette: false,
            legacy_tilesets: IntSet::default(),
            notes: Vec::new(),
        }
    }

    fn parent_of(&self, id: Option<LayerId>) -> Option<LayerId> {
        id.and_then(|id| self.document.layers()[id].parent())
    }

    fn add_layer(&mut self, parsed: ParsedLayer) -> Result<()> {
        let ParsedLayer { layer, level } = parsed;
        let level = level as i32;

        if let LayerKind::Tilemap { tileset } = layer.kind {
            if self.document.tilesets().get(tileset).is_none() {
                self.notes.push(AsepriteError::InvalidInput(format!(
                    "Tilemap layer '{}' references missing tileset {}",
                    layer.name, tileset
                )));
            }
        }

        let parent = if level == self.previous_level {
            self.parent_of(self.previous_layer)
        } else if level > self.previous_level {
            match self.previous_layer {
                None => None,
                Some(previous) if self.document.layers()[previous].is_group() => Some(previous),
                Some(previous) => {
                    self.notes.push(AsepriteError::InvalidInput(format!(
                        "Layer '{}' is nested below non-group layer '{}'",
                        layer.name,
                        self.document.layers()[previous].name
                    )));
                    self.parent_of(Some(previous))
                }
            }
        } else {
            let mut parent = self.parent_of(self.previous_layer);
            for _ in 0..(self.previous_level - level) {
                match parent {
                    None => break,
                    Some(_) => parent = self.parent_of(parent),
                }
            }
            parent
        };

        let id = self.document.add_layer(parent, layer)?;
        self.previous_layer = Some(id);
        self.previous_level = level;
        self.user_data_target = UserDataTarget::Layer(id);
        Ok(())
    }

    fn add_cel(&mut self, frame: u32, parsed: ParsedCel) -> Result<()> {
        let ParsedCel { header, content } = parsed;
        let layer_id = self
            .document
            .layers()
            .by_index(header.layer_index as u32)
            .ok_or_else(|| {
                AsepriteError::InvalidInput(format!(
                    "Cel references unknown layer {}",
                    header.layer_index
                ))
            })?;
        let layer = &self.document.layers()[layer_id];

        let mut cel = match content {
            CelContent::Image(image) => {
                if layer.kind != LayerKind::Image {
                    return Err(AsepriteError::InvalidInput(format!(
                        "Image cel in non-image layer '{}'",
                        layer.name
                    )));
                }
                Cel::new(image)
            }
            CelContent::Linked(link_frame) => {
                let target = layer.cel(link_frame as u32).ok_or_else(|| {
                    AsepriteError::InvalidInput(format!(
                        "Cel at frame {} links to empty frame {} in layer '{}'",
                        frame, link_frame, layer.name
                    ))
                })?;
                let placement = (header.x as i32, header.y as i32);
                if target.position == placement && target.opacity == header.opacity {
                    target.linked()
                } else {
                    // Files from old betas linked cels with different
                    // placements. These become independent copies.
                    debug!(
                        "Unlinking cel at frame {} from frame {} with different placement",
                        frame, link_frame
                    );
                    Cel::with_data(Arc::new(target.data_ref().as_ref().clone()))
                }
            }
            CelContent::Tilemap {
                words,
                width,
                height,
                masks,
            } => {
                let tileset_index = match layer.kind {
                    LayerKind::Tilemap { tileset } => tileset,
                    _ => {
                        return Err(AsepriteError::InvalidInput(format!(
                            "Tilemap cel outside of tilemap layer '{}'",
                            layer.name
                        )))
                    }
                };
                let tileset = self.document.tilesets().get(tileset_index).ok_or_else(|| {
                    AsepriteError::InvalidInput(format!(
                        "Tilemap cel references tileset {} before it was defined",
                        tileset_index
                    ))
                })?;
                let legacy = self.legacy_tilesets.contains(&tileset_index);
                let tile_count = tileset.tile_count();

                let mut clamped = 0;
                let tiles = words
                    .into_iter()
                    .map(|word| {
                        let word = if legacy {
                            masks.shift_legacy(word)
                        } else {
                            word
                        };
                        let tile = masks.decode(word);
                        if tile.index() >= tile_count {
                            clamped += 1;
                            Tile::EMPTY
                        } else {
                            tile
                        }
                    })
                    .collect();
                if clamped > 0 {
                    self.notes.push(AsepriteError::InvalidInput(format!(
                        "{} tile references beyond tileset {} ({} tiles) replaced by the empty tile",
                        clamped, tileset_index, tile_count
                    )));
                }
                Cel::new(Image::from_pixels(width, height, Pixels::Tilemap(tiles))?)
            }
        };
        header.apply(&mut cel);

        self.document.add_cel(layer_id, frame, cel)?;
        self.last_cel = Some((layer_id, frame));
        self.user_data_target = UserDataTarget::Cel(layer_id, frame);
        Ok(())
    }

    fn cel_mut(&mut self, layer: LayerId, frame: u32) -> Result<&mut Cel> {
        self.document
            .layer_mut(layer)
            .and_then(|l| l.cel_mut(frame))
            .ok_or_else(|| {
                AsepriteError::InternalError(format!(
                    "Invalid cel stored in chunk context: layer {}, frame {}",
                    layer.index(),
                    frame
                ))
            })
    }

    fn apply_palette<F>(&mut self, frame: u32, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Palette) -> Result<()>,
    {
        let current = self.document.palette(frame);
        let mut palette = current.clone();
        apply(&mut palette)?;
        if palette.diff(current).is_some() {
            self.document.set_palette(frame, palette);
        }
        if frame == 0 {
            self.user_data_target = UserDataTarget::Sprite;
        }
        Ok(())
    }

    fn add_user_data(&mut self, user_data: UserData) -> Result<()> {
        match self.user_data_target {
            UserDataTarget::None => {
                return Err(AsepriteError::InvalidInput(
                    "Found dangling user data chunk. Expected a previous chunk to attach user data"
                        .into(),
                ))
            }
            UserDataTarget::Sprite => self.document.user_data = user_data,
            UserDataTarget::Layer(id) => {
                let layer = self.document.layer_mut(id).ok_or_else(|| {
                    AsepriteError::InternalError(format!(
                        "Invalid layer id stored in chunk context: {}",
                        id.index()
                    ))
                })?;
                layer.user_data = user_data;
            }
            UserDataTarget::Cel(layer, frame) => {
                // Applies to the cel content, which linked cels share.
                self.document
                    .layer_mut(layer)
                    .and_then(|l| l.set_cel_user_data(frame, user_data))
                    .ok_or_else(|| {
                        AsepriteError::InternalError(format!(
                            "Invalid cel stored in chunk context: layer {}, frame {}",
                            layer.index(),
                            frame
                        ))
                    })?;
            }
            UserDataTarget::Tag(index) => {
                let tag = self.document.tags.get_mut(index).ok_or_else(|| {
                    AsepriteError::InternalError(format!(
                        "Invalid tag index stored in chunk context: {}",
                        index
                    ))
                })?;
                tag.user_data = user_data;
                self.user_data_target = if index + 1 < self.document.tags.len() {
                    UserDataTarget::Tag(index + 1)
                } else {
                    UserDataTarget::None
                };
            }
            UserDataTarget::Slice(index) => {
                let slice = self.document.slices.get_mut(index).ok_or_else(|| {
                    AsepriteError::InternalError(format!(
                        "Invalid slice index stored in chunk context: {}",
                        index
                    ))
                })?;
                slice.user_data = user_data;
            }
            UserDataTarget::Tileset(index) => {
                let tileset = self.document.tilesets_mut().get_mut(index).ok_or_else(|| {
                    AsepriteError::InternalError(format!(
                        "Invalid tileset index stored in chunk context: {}",
                        index
                    ))
                })?;
                tileset.user_data = user_data;
            }
        }
        Ok(())
    }

    fn handle_chunk(
        &mut self,
        frame: u32,
        chunk_type: ChunkType,
        data: &[u8],
        progress: &mut dyn FnMut(usize),
    ) -> Result<()> {
        match chunk_type {
            ChunkType::OldPalette04 | ChunkType::OldPalette11 => {
                if self.seen_new_palette {
                    debug!("Ignoring old palette chunk after new palette chunk");
                    if frame == 0 {
                        self.user_data_target = UserDataTarget::Sprite;
                    }
                    return Ok(());
                }
                let six_bit = chunk_type == ChunkType::OldPalette11;
                self.apply_palette(frame, |p| palette::parse_old_chunk(data, six_bit, p))?;
            }
            ChunkType::Palette => {
                self.seen_new_palette = true;
                self.apply_palette(frame, |p| palette::parse_chunk(data, p))?;
            }
            ChunkType::Layer => {
                let parsed = layer::parse_chunk(data, self.header_flags)?;
                self.add_layer(parsed)?;
            }
            ChunkType::Cel => {
                let parsed = cel::parse_chunk(data, self.pixel_format, progress)?;
                self.add_cel(frame, parsed)?;
            }
            ChunkType::CelExtra => {
                let (layer, cel_frame) = self.last_cel.ok_or_else(|| {
                    AsepriteError::InvalidInput("Cel extra chunk without a cel".into())
                })?;
                let bounds = cel::parse_extra_chunk(data)?;
                self.cel_mut(layer, cel_frame)?.bounds = bounds;
            }
            ChunkType::ColorProfile => {
                self.document.color_profile = Some(color_profile::parse_chunk(data)?);
            }
            ChunkType::ExternalFiles => {
                for file in external_file::parse_chunk(data)? {
                    self.document.external_files.add(file);
                }
            }
            ChunkType::Mask | ChunkType::Path => {
                debug!("Ignoring unsupported chunk type: {:?}", chunk_type);
            }
            ChunkType::Tags => {
                let tags = tags::parse_chunk(data)?;
                let first = self.document.tags.len();
                self.user_data_target = if tags.is_empty() {
                    UserDataTarget::None
                } else {
                    UserDataTarget::Tag(first)
                };
                self.document.tags.extend(tags);
            }
            ChunkType::UserData => {
                let user_data = user_data::parse_chunk(data)?;
                self.add_user_data(user_data)?;
            }
            ChunkType::OldSlices => {
                let slices = slice::parse_old_chunk(data)?;
                if !slices.is_empty() {
                    self.document.slices.extend(slices);
                    self.user_data_target = UserDataTarget::Slice(self.document.slices.len() - 1);
                }
            }
            ChunkType::Slice => {
                let slice = slice::parse_chunk(data)?;
                self.document.slices.push(slice);
                self.user_data_target = UserDataTarget::Slice(self.document.slices.len() - 1);
            }
            ChunkType::Tileset => {
                let parsed = tileset::parse_chunk(data, self.pixel_format, progress)?;
                if parsed.legacy {
                    self.legacy_tilesets.insert(parsed.id);
                } else {
                    self.legacy_tilesets.remove(&parsed.id);
                }
                self.document.tilesets_mut().set(parsed.id, parsed.tileset);
                self.user_data_target = UserDataTarget::Tileset(parsed.id);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkType {
    OldPalette04, // deprecated
    OldPalette11, // deprecated
    Palette,
    Layer,
    Cel,
    CelExtra,
    ColorProfile,
    ExternalFiles,
    Mask, // deprecated
    Path,
    Tags,
    UserData,
    OldSlices, // deprecated
    Slice,
    Tileset,
}

fn parse_chunk_type(chunk_type: u16) -> Result<ChunkType> {
    match chunk_type {
        0x0004 => Ok(ChunkType::OldPalette04),
        0x0011 => Ok(ChunkType::OldPalette11),
        0x2004 => Ok(ChunkType::Layer),
        0x2005 => Ok(ChunkType::Cel),
        0x2006 => Ok(ChunkType::CelExtra),
        0x2007 => Ok(ChunkType::ColorProfile),
        0x2008 => Ok(ChunkType::ExternalFiles),
        0x2016 => Ok(ChunkType::Mask),
        0x2017 => Ok(ChunkType::Path),
        0x2018 => Ok(ChunkType::Tags),
        0x2019 => Ok(ChunkType::Palette),
        0x2020 => Ok(ChunkType::UserData),
        0x2021 => Ok(ChunkType::OldSlices),
        0x2022 => Ok(ChunkType::Slice),
        0x2023 => Ok(ChunkType::Tileset),
        _ => Err(AsepriteError::UnsupportedFeature(format!(
            "Invalid or unsupported chunk type: 0x{:x}",
            chunk_type
        ))),
    }
}

const CHUNK_HEADER_SIZE: u32 = 6;

fn check_chunk_bytes(chunk_size: u32, bytes_available: u32) -> Result<()> {
    if chunk_size < CHUNK_HEADER_SIZE {
        return Err(AsepriteError::InvalidInput(format!(
            "Chunk size is too small {}, minimum_size: {}",
            chunk_size, CHUNK_HEADER_SIZE
        )));
    }
    if chunk_size > bytes_available {
        return Err(AsepriteError::InvalidInput(format!(
            "Trying to read chunk of size {}, but there are only {} bytes available in the frame",
            chunk_size, bytes_available
        )));
    }
    Ok(())
}

// Tracks the absolute input position for warnings and progress.
struct Progress<'a, D: DecodeDelegate + ?Sized> {
    delegate: &'a mut D,
    offset: u64,
    file_size: f32,
}

impl<'a, D: DecodeDelegate + ?Sized> Progress<'a, D> {
    fn report(&mut self, offset: u64) {
        let fraction = (offset as f32 / self.file_size).min(1.0);
        self.delegate.progress(fraction);
    }

    fn warning(&mut self, frame: u32, chunk_type: u16, offset: u64, error: AsepriteError) {
        warn!(
            "Frame {}, chunk 0x{:04x} at offset {}: {}",
            frame, chunk_type, offset, error
        );
        self.delegate.warning(Warning {
            frame,
            chunk_type,
            offset,
            error,
        });
    }
}

// Returns `false` if decoding was cancelled.
fn parse_frame<R: Read, D: DecodeDelegate + ?Sized>(
    reader: &mut AseReader<R>,
    frame: u32,
    info: &mut ParseInfo,
    progress: &mut Progress<D>,
) -> Result<bool> {
    let frame_header = FrameHeader::read(reader)?;
    progress.offset += FRAME_HEADER_SIZE as u64;
    if frame_header.duration > 0 {
        info.document
            .set_frame_duration(frame, frame_header.duration)?;
    }

    let mut bytes_available = frame_header.size - FRAME_HEADER_SIZE;
    for _ in 0..frame_header.chunks {
        let chunk_offset = progress.offset;
        let chunk_size = reader.dword()?;
        let chunk_type_code = reader.word()?;
        check_chunk_bytes(chunk_size, bytes_available)?;
        let data = reader.bytes((chunk_size - CHUNK_HEADER_SIZE) as usize)?;
        bytes_available -= chunk_size;
        progress.offset += chunk_size as u64;

        trace!(
            "Frame {}: chunk 0x{:04x} ({} bytes) at offset {}",
            frame,
            chunk_type_code,
            chunk_size,
            chunk_offset
        );
        let data_offset = chunk_offset + CHUNK_HEADER_SIZE as u64;
        let result = parse_chunk_type(chunk_type_code).and_then(|chunk_type| {
            info.handle_chunk(frame, chunk_type, &data, &mut |consumed: usize| {
                progress.report(data_offset + consumed as u64)
            })
        });
        for note in info.notes.drain(..) {
            progress.warning(frame, chunk_type_code, chunk_offset, note);
        }
        if let Err(error) = result {
            progress.warning(frame, chunk_type_code, chunk_offset, error);
        }

        let offset = progress.offset;
        progress.report(offset);
        if progress.delegate.is_cancelled() {
            return Ok(false);
        }
    }

    if bytes_available > 0 {
        debug!(
            "Skipping {} unused bytes at the end of frame {}",
            bytes_available, frame
        );
        reader.skip_reserved(bytes_available as usize)?;
        progress.offset += bytes_available as u64;
    }
    Ok(true)
}

/// Decode a document, collecting warnings about chunks that could not be
/// decoded.
///
/// Only a malformed header or a truncated file are fatal. Any other problem
/// skips the affected chunk and is reported as a [Warning].
pub fn decode<R: Read>(input: R) -> Result<(Document, Vec<Warning>)> {
    let mut warnings = Vec::new();
    let document = decode_with(input, &mut warnings)?;
    Ok((document, warnings))
}

// file format docs: https://github.com/aseprite/aseprite/blob/master/docs/ase-file-specs.md
/// Decode a document, reporting warnings and progress to `delegate`.
///
/// If the delegate cancels, the partially decoded document is returned and
/// [Document::is_cancelled] is set.
pub fn decode_with<R: Read, D: DecodeDelegate + ?Sized>(
    input: R,
    delegate: &mut D,
) -> Result<Document> {
    let mut reader = AseReader::with(input);
    let header = FileHeader::read(&mut reader)?;
    let mut info = ParseInfo::new(&header);
    let mut progress = Progress {
        delegate,
        offset: HEADER_SIZE as u64,
        file_size: header.file_size.max(1) as f32,
    };

    for frame in 0..header.frames as u32 {
        if !parse_frame(&mut reader, frame, &mut info, &mut progress)? {
            debug!("Decoding cancelled in frame {}", frame);
            info.document.set_cancelled();
            break;
        }
    }

    Ok(info.document)
}
