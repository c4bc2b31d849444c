use crate::{
    cel::{self, CelWriteMode},
    compress,
    header::{FileHeader, FrameHeader, HeaderFlags, FRAME_HEADER_SIZE, HEADER_SIZE},
    layer, palette,
    reader::AseReader,
    tags, user_data,
    writer::AseWriter,
    *,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{cell::Cell, io::Cursor};

const CHUNK_OLD_PALETTE: u16 = 0x0004;
const CHUNK_LAYER: u16 = 0x2004;
const CHUNK_CEL: u16 = 0x2005;
const CHUNK_TAGS: u16 = 0x2018;
const CHUNK_PALETTE: u16 = 0x2019;
const CHUNK_USER_DATA: u16 = 0x2020;
const CHUNK_TILESET: u16 = 0x2023;

type Chunk = (u16, Vec<u8>);

fn chunk<F>(chunk_type: u16, write: F) -> Chunk
where
    F: FnOnce(&mut AseWriter<Vec<u8>>) -> Result<()>,
{
    let mut writer = AseWriter::buffer();
    write(&mut writer).unwrap();
    (chunk_type, writer.into_inner())
}

// Assemble a file from raw chunks, one list per frame.
fn build_file(color_mode: ColorMode, flags: HeaderFlags, frames: &[Vec<Chunk>]) -> Vec<u8> {
    let mut body = AseWriter::buffer();
    for chunks in frames {
        let size: usize = chunks.iter().map(|(_, data)| data.len() + 6).sum();
        FrameHeader {
            size: size as u32 + FRAME_HEADER_SIZE,
            chunks: chunks.len() as u32,
            duration: 100,
        }
        .write(&mut body)
        .unwrap();
        for (chunk_type, data) in chunks {
            body.dword(data.len() as u32 + 6).unwrap();
            body.word(*chunk_type).unwrap();
            body.bytes(data).unwrap();
        }
    }
    let body = body.into_inner();

    let header = FileHeader {
        file_size: HEADER_SIZE + body.len() as u32,
        frames: frames.len() as u16,
        width: 4,
        height: 4,
        color_mode,
        flags,
        speed: 100,
        transparent_index: 0,
        num_colors: 256,
        pixel_width: 1,
        pixel_height: 1,
        grid_x: 0,
        grid_y: 0,
        grid_width: 0,
        grid_height: 0,
    };
    let mut out = AseWriter::buffer();
    header.write(&mut out).unwrap();
    out.bytes(&body).unwrap();
    out.into_inner()
}

// Split an encoded file back into raw chunks, one list per frame.
fn list_chunks(bytes: &[u8]) -> Vec<Vec<Chunk>> {
    let mut reader = AseReader::new(bytes);
    let header = FileHeader::read(&mut reader).unwrap();
    let mut frames = Vec::new();
    for _ in 0..header.frames {
        let frame = FrameHeader::read(&mut reader).unwrap();
        let mut chunks = Vec::new();
        for _ in 0..frame.chunks {
            let size = reader.dword().unwrap();
            let chunk_type = reader.word().unwrap();
            chunks.push((chunk_type, reader.bytes(size as usize - 6).unwrap()));
        }
        frames.push(chunks);
    }
    frames
}

fn image_layer(name: &str) -> Layer {
    Layer::new(LayerKind::Image, name)
}

fn layer_chunk(layer: &Layer, level: u16) -> Chunk {
    chunk(CHUNK_LAYER, |w| layer::write_chunk(w, layer, level, false))
}

fn cel_chunk(layer_index: u16, cel: &Cel, mode: CelWriteMode) -> Chunk {
    let format = cel.image().format();
    chunk(CHUNK_CEL, |w| cel::write_chunk(w, layer_index, cel, format, mode))
}

fn user_data_chunk(text: &str) -> Chunk {
    let user_data = UserData {
        text: Some(text.to_owned()),
        ..UserData::default()
    };
    chunk(CHUNK_USER_DATA, |w| user_data::write_chunk(w, &user_data))
}

fn rgba_image(width: u16, height: u16, seed: u8) -> Image {
    let pixels = (0..width as usize * height as usize)
        .map(|i| Rgba::new(seed, i as u8, (i * 3) as u8, 255))
        .collect();
    Image::from_pixels(width, height, Pixels::Rgba(pixels)).unwrap()
}

fn round_trip(doc: &Document) -> Document {
    let bytes = doc.to_bytes().unwrap();
    let (decoded, warnings) = decode(&bytes[..]).unwrap();
    assert!(warnings.is_empty(), "Unexpected warnings: {:?}", warnings);
    decoded
}

// Document generator

const BLEND_MODES: [BlendMode; 5] = [
    BlendMode::Normal,
    BlendMode::Multiply,
    BlendMode::Screen,
    BlendMode::HardLight,
    BlendMode::Divide,
];

const DIRECTIONS: [AnimationDirection; 4] = [
    AnimationDirection::Forward,
    AnimationDirection::Reverse,
    AnimationDirection::PingPong,
    AnimationDirection::PingPongReverse,
];

fn random_user_data(rng: &mut StdRng) -> UserData {
    let mut user_data = UserData {
        text: if rng.gen_bool(0.3) {
            Some(format!("note {}", rng.gen_range(0..1000)))
        } else {
            None
        },
        color: if rng.gen_bool(0.3) { Some(rng.gen()) } else { None },
        ..UserData::default()
    };
    if rng.gen_bool(0.1) {
        let mut map = PropertyMap::new();
        map.insert("weight".into(), Property::I32(rng.gen()));
        map.insert("tag".into(), Property::String(format!("t{}", rng.gen_range(0..9))));
        map.insert(
            "points".into(),
            Property::Vector(vec![Property::U16(rng.gen()), Property::Bool(rng.gen())]),
        );
        user_data.properties.insert(0, map);
    }
    user_data
}

fn random_image(rng: &mut StdRng, format: PixelFormat, width: u16, height: u16) -> Image {
    let count = width as usize * height as usize;
    let pixels = match format {
        PixelFormat::Rgba => Pixels::Rgba(
            (0..count)
                .map(|_| Rgba::new(rng.gen(), rng.gen(), rng.gen(), rng.gen()))
                .collect(),
        ),
        PixelFormat::Grayscale => Pixels::Grayscale(
            (0..count)
                .map(|_| Grayscale {
                    value: rng.gen(),
                    alpha: rng.gen(),
                })
                .collect(),
        ),
        PixelFormat::Indexed => Pixels::Indexed((0..count).map(|_| rng.gen()).collect()),
        PixelFormat::Tilemap => Pixels::Tilemap(vec![Tile::EMPTY; count]),
    };
    Image::from_pixels(width, height, pixels).unwrap()
}

fn random_tilemap(rng: &mut StdRng, width: u16, height: u16, tile_count: u32) -> Image {
    let tiles = (0..width as usize * height as usize)
        .map(|_| {
            Tile::new(
                rng.gen_range(0..tile_count),
                rng.gen(),
                rng.gen(),
                rng.gen(),
            )
        })
        .collect();
    Image::from_pixels(width, height, Pixels::Tilemap(tiles)).unwrap()
}

fn random_palette_entry(rng: &mut StdRng, index: u32) -> PaletteEntry {
    let alpha = if rng.gen_bool(0.8) { 255 } else { rng.gen() };
    PaletteEntry {
        rgba: [rng.gen(), rng.gen(), rng.gen(), alpha],
        name: if rng.gen_bool(0.2) {
            Some(format!("color {}", index))
        } else {
            None
        },
    }
}

fn random_slice_key(rng: &mut StdRng) -> SliceKey {
    SliceKey {
        bounds: Rect::new(
            rng.gen_range(-10..10),
            rng.gen_range(-10..10),
            rng.gen_range(1..20),
            rng.gen_range(1..20),
        ),
        center: if rng.gen_bool(0.3) {
            Some(Rect::new(1, 1, rng.gen_range(1..5), rng.gen_range(1..5)))
        } else {
            None
        },
        pivot: if rng.gen_bool(0.3) {
            Some((rng.gen_range(-5..5), rng.gen_range(-5..5)))
        } else {
            None
        },
    }
}

// Layers are added in file order so that decoded layer ids match, and every
// palette version differs from the previous one.
fn random_document(rng: &mut StdRng) -> Document {
    let color_mode = [ColorMode::Rgba, ColorMode::Grayscale, ColorMode::Indexed][rng.gen_range(0..3)];
    let format = color_mode.pixel_format();
    let mut doc = Document::new(rng.gen_range(1..64), rng.gen_range(1..64), color_mode);

    let frames = rng.gen_range(1..6);
    doc.set_total_frames(frames).unwrap();
    for frame in 0..frames {
        doc.set_frame_duration(frame, rng.gen_range(1..500)).unwrap();
    }
    doc.transparent_index = rng.gen();
    doc.pixel_ratio = (rng.gen_range(1..4), rng.gen_range(1..4));
    if rng.gen_bool(0.5) {
        doc.grid = Some(Rect::new(
            rng.gen_range(-8..8),
            rng.gen_range(-8..8),
            rng.gen_range(1..32),
            rng.gen_range(1..32),
        ));
    }
    doc.user_data = random_user_data(rng);
    doc.color_profile = match rng.gen_range(0..4) {
        0 => None,
        1 => Some(ColorProfile {
            kind: ColorProfileKind::Srgb,
            gamma: None,
        }),
        2 => Some(ColorProfile {
            kind: ColorProfileKind::None,
            gamma: Some(2.5),
        }),
        _ => {
            let len = rng.gen_range(1..40);
            Some(ColorProfile {
                kind: ColorProfileKind::Icc((0..len).map(|_| rng.gen()).collect()),
                gamma: None,
            })
        }
    };

    let size = rng.gen_range(2..40);
    let entries = (0..size).map(|i| random_palette_entry(rng, i)).collect();
    doc.set_palette(0, Palette::from_entries(0, entries));
    for frame in 1..frames {
        if rng.gen_bool(0.3) {
            let mut palette = doc.palette(frame).clone();
            let index = rng.gen_range(0..palette.len());
            palette.set(
                index,
                PaletteEntry {
                    rgba: rng.gen(),
                    name: Some(format!("frame {}", frame)),
                },
            );
            doc.set_palette(frame, palette);
        }
    }

    if rng.gen_bool(0.3) {
        doc.external_files.add(ExternalFile::new(
            1,
            ExternalFileKind::Tileset,
            "shared.aseprite".to_owned(),
        ));
    }
    for t in 0..rng.gen_range(0..3) {
        let (width, height) = (rng.gen_range(1..4), rng.gen_range(1..4));
        let mut tileset = Tileset::new(&format!("tiles {}", t), format, width, height);
        for _ in 0..rng.gen_range(1..4) {
            let tile = random_image(rng, format, width, height);
            tileset.push_tile(tile).unwrap();
        }
        if rng.gen_bool(0.2) {
            tileset.external = Some(ExternalTilesetReference {
                file_id: 1,
                tileset_id: t,
            });
        }
        tileset.user_data = random_user_data(rng);
        doc.tilesets_mut().push(tileset);
    }

    let with_uuid = rng.gen_bool(0.3);
    let mut open_groups: Vec<LayerId> = Vec::new();
    let mut cel_layers = Vec::new();
    for i in 0..rng.gen_range(0..7) {
        let depth = rng.gen_range(0..=open_groups.len());
        open_groups.truncate(depth);
        let tileset_count = doc.tilesets().len();
        let kind = match rng.gen_range(0..4) {
            0 => LayerKind::Group,
            1 if tileset_count > 0 => LayerKind::Tilemap {
                tileset: rng.gen_range(0..tileset_count),
            },
            _ => LayerKind::Image,
        };
        let mut layer = Layer::new(kind, &format!("layer {}", i));
        layer.flags = LayerFlags::from_bits_truncate(rng.gen());
        layer.blend_mode = BLEND_MODES[rng.gen_range(0..BLEND_MODES.len())];
        layer.opacity = rng.gen();
        if with_uuid {
            layer.uuid = Some(rng.gen());
        }
        layer.user_data = random_user_data(rng);
        let id = doc.add_layer(open_groups.last().copied(), layer).unwrap();
        if kind == LayerKind::Group {
            open_groups.push(id);
        } else {
            cel_layers.push(id);
        }
    }

    for id in cel_layers {
        let kind = doc.layers()[id].kind;
        for frame in 0..frames {
            if rng.gen_bool(0.3) {
                continue;
            }
            let previous = if frame > 0 {
                doc.layers()[id].cel(frame - 1).cloned()
            } else {
                None
            };
            let mut cel = match previous {
                Some(previous) if rng.gen_bool(0.4) => previous.linked(),
                _ => {
                    let (width, height) = (rng.gen_range(1..6), rng.gen_range(1..6));
                    let image = match kind {
                        LayerKind::Tilemap { tileset } => {
                            let tile_count = doc.tilesets().get(tileset).unwrap().tile_count();
                            random_tilemap(rng, width, height, tile_count)
                        }
                        _ => random_image(rng, format, width, height),
                    };
                    let mut cel = Cel::new(image);
                    cel.position = (rng.gen_range(-40..40), rng.gen_range(-40..40));
                    cel.opacity = rng.gen();
                    *cel.user_data_mut() = random_user_data(rng);
                    cel
                }
            };
            cel.z_index = rng.gen_range(-2..3);
            if rng.gen_bool(0.2) {
                cel.bounds = Some(PreciseBounds {
                    x: 1.5,
                    y: -0.25,
                    width: 8.0,
                    height: 4.75,
                });
            }
            doc.add_cel(id, frame, cel).unwrap();
        }
    }

    for i in 0..rng.gen_range(0..3) {
        let from = rng.gen_range(0..frames);
        let to = rng.gen_range(from..frames);
        let mut tag = Tag::new(&format!("tag {}", i), from, to);
        tag.direction = DIRECTIONS[rng.gen_range(0..DIRECTIONS.len())];
        tag.repeat = rng.gen_range(0..4);
        tag.color = rng.gen();
        tag.user_data = random_user_data(rng);
        doc.tags.push(tag);
    }

    for i in 0..rng.gen_range(0..3) {
        let mut slice = Slice::new(&format!("slice {}", i));
        let first = rng.gen_range(0..frames);
        for frame in first..frames {
            if frame == first || rng.gen_bool(0.3) {
                let key = random_slice_key(rng);
                slice.keys.insert(frame, key);
            }
        }
        slice.user_data = random_user_data(rng);
        doc.slices.push(slice);
    }

    doc
}

#[test]
fn random_documents_round_trip() {
    let mut rng = StdRng::seed_from_u64(0x5eed_a5e0);
    for _ in 0..40 {
        let doc = random_document(&mut rng);
        let bytes = doc.to_bytes().unwrap();

        let (decoded, warnings) = decode(&bytes[..]).unwrap();
        assert!(warnings.is_empty(), "Unexpected warnings: {:?}", warnings);
        assert_eq!(decoded, doc);

        // Links survive as shared images.
        for (id, layer) in doc.layers().iter() {
            let decoded_layer = &decoded.layers()[id];
            for (frame, cel) in layer.cels() {
                let decoded_cel = decoded_layer.cel(*frame).unwrap();
                for (other_frame, other) in layer.cels().range(..*frame) {
                    let decoded_other = decoded_layer.cel(*other_frame).unwrap();
                    assert_eq!(cel.is_linked_to(other), decoded_cel.is_linked_to(decoded_other));
                }
            }
        }

        // Decoding is deterministic and re-encoding reproduces the bytes.
        let (again, _) = decode(&bytes[..]).unwrap();
        assert_eq!(again, decoded);
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }
}

#[test]
fn linked_cel_shares_image() {
    let mut doc = Document::new(8, 8, ColorMode::Rgba);
    doc.set_total_frames(2).unwrap();
    let layer = doc.add_layer(None, image_layer("Layer 1")).unwrap();
    let first = Cel::new(rgba_image(8, 8, 1));
    let second = first.linked();
    doc.add_cel(layer, 0, first).unwrap();
    doc.add_cel(layer, 1, second).unwrap();

    let bytes = doc.to_bytes().unwrap();
    let frames = list_chunks(&bytes);
    let cel_type = |data: &[u8]| u16::from_le_bytes([data[7], data[8]]);
    let (_, frame1_cel) = frames[1].iter().find(|(t, _)| *t == CHUNK_CEL).unwrap();
    assert_eq!(cel_type(frame1_cel), 1);

    let (decoded, _) = decode(&bytes[..]).unwrap();
    let layer = decoded.layer(layer).unwrap();
    let cel0 = layer.cel(0).unwrap();
    let cel1 = layer.cel(1).unwrap();
    assert!(cel1.is_linked_to(cel0));
    assert!(std::sync::Arc::ptr_eq(cel0.data_ref(), cel1.data_ref()));
}

#[test]
fn layers_added_out_of_file_order() {
    let mut doc = Document::new(4, 4, ColorMode::Rgba);
    let group = doc.add_layer(None, Layer::new(LayerKind::Group, "group")).unwrap();
    let top = doc.add_layer(None, image_layer("top")).unwrap();
    doc.add_cel(top, 0, Cel::new(rgba_image(2, 2, 9))).unwrap();
    doc.add_layer(Some(group), image_layer("child")).unwrap();

    let decoded = round_trip(&doc);
    assert_eq!(decoded, doc);

    let layers = decoded.layers();
    let names: Vec<&str> = layers
        .pre_order()
        .iter()
        .map(|(id, _)| layers[*id].name.as_str())
        .collect();
    assert_eq!(names, vec!["group", "child", "top"]);
    let decoded_top = layers.by_index(2).unwrap();
    assert_eq!(layers[decoded_top].name, "top");
    assert_eq!(layers[decoded_top].cel(0), doc.layers()[top].cel(0));
}

#[test]
fn linked_cels_share_user_data() {
    let original = Cel::new(rgba_image(2, 2, 3));
    let link = original.linked();
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[
            vec![
                layer_chunk(&image_layer("a"), 0),
                cel_chunk(0, &original, CelWriteMode::Image),
                user_data_chunk("shared"),
            ],
            vec![cel_chunk(0, &link, CelWriteMode::LinkedTo(0))],
        ],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert!(warnings.is_empty(), "Unexpected warnings: {:?}", warnings);
    let layer = &doc.layers()[doc.layers().roots()[0]];
    let (first, second) = (layer.cel(0).unwrap(), layer.cel(1).unwrap());
    assert!(second.is_linked_to(first));
    assert_eq!(second.user_data().text.as_deref(), Some("shared"));

    // Stored once, after the cel that owns the content.
    let frames = list_chunks(&doc.to_bytes().unwrap());
    assert!(frames[0].iter().any(|(t, _)| *t == CHUNK_USER_DATA));
    assert!(frames[1].iter().all(|(t, _)| *t != CHUNK_USER_DATA));
}

#[test]
fn user_data_after_link_reaches_original() {
    let original = Cel::new(rgba_image(2, 2, 4));
    let link = original.linked();
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[
            vec![
                layer_chunk(&image_layer("a"), 0),
                cel_chunk(0, &original, CelWriteMode::Image),
            ],
            vec![
                cel_chunk(0, &link, CelWriteMode::LinkedTo(0)),
                user_data_chunk("late"),
            ],
        ],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert!(warnings.is_empty(), "Unexpected warnings: {:?}", warnings);
    let layer = &doc.layers()[doc.layers().roots()[0]];
    let (first, second) = (layer.cel(0).unwrap(), layer.cel(1).unwrap());
    assert!(second.is_linked_to(first));
    assert_eq!(first.user_data().text.as_deref(), Some("late"));
}

#[test]
fn malformed_content_fails_encoding() {
    let mut doc = Document::new(4, 4, ColorMode::Indexed);
    let layer = doc.add_layer(None, image_layer("a")).unwrap();
    doc.add_cel(layer, 0, Cel::new(Image::new(PixelFormat::Indexed, 2, 2)))
        .unwrap();
    let cel = doc.layer_mut(layer).unwrap().cel_mut(0).unwrap();
    assert!(cel.image_mut().set_pixels(Pixels::Indexed(vec![1])).is_err());
    doc.to_bytes().unwrap();

    doc.tilesets_mut()
        .push(Tileset::new("rgb tiles", PixelFormat::Rgba, 2, 2));
    match doc.to_bytes() {
        Err(AsepriteError::InvalidInput(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    }
}

#[test]
fn palette_diff_is_minimal() {
    let mut doc = Document::new(4, 4, ColorMode::Indexed);
    doc.set_total_frames(2).unwrap();
    let mut palette = Palette::new(0, 16);
    for i in 0..16 {
        palette.set(i, PaletteEntry::new([i as u8 * 10, 0, 0, 255]));
    }
    doc.set_palette(0, palette.clone());
    for i in 5..=9 {
        palette.set(i, PaletteEntry::new([0, i as u8, 0, 255]));
    }
    doc.set_palette(1, palette.clone());

    let bytes = doc.to_bytes().unwrap();
    let frames = list_chunks(&bytes);

    let first: Vec<u16> = frames[0].iter().map(|(t, _)| *t).collect();
    assert_eq!(first, vec![CHUNK_OLD_PALETTE, CHUNK_PALETTE]);

    let (_, data) = frames[1]
        .iter()
        .find(|(t, _)| *t == CHUNK_PALETTE)
        .unwrap();
    let dword = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    assert_eq!((dword(0), dword(4), dword(8)), (16, 5, 9));

    let decoded = round_trip(&doc);
    assert_eq!(decoded.palettes().len(), 2);
    assert_eq!(decoded.palette(1).entries(), palette.entries());
    assert_eq!(decoded.palette(0).get(5), Some(&PaletteEntry::new([50, 0, 0, 255])));
}

#[test]
fn unchanged_palette_writes_no_chunk() {
    let mut doc = Document::new(4, 4, ColorMode::Rgba);
    doc.set_total_frames(3).unwrap();
    let frames = list_chunks(&doc.to_bytes().unwrap());
    assert!(frames[1].is_empty());
    assert!(frames[2].is_empty());
}

#[test]
fn region_re_points_links() {
    let mut doc = Document::new(8, 8, ColorMode::Rgba);
    doc.set_total_frames(8).unwrap();
    let layer = doc.add_layer(None, image_layer("Layer 1")).unwrap();
    let mut cel = Cel::new(rgba_image(4, 4, 9));
    cel.position = (2, 3);
    for frame in 4..8 {
        doc.add_cel(layer, frame, cel.linked()).unwrap();
    }
    doc.add_cel(layer, 3, cel).unwrap();

    let roi = RegionOfInterest::frames(5, 7);
    let out = encode(&doc, &roi, Cursor::new(Vec::new())).unwrap();
    let bytes = out.into_inner();

    let frames = list_chunks(&bytes);
    assert_eq!(frames.len(), 3);
    let cel_data = |frame: usize| {
        frames[frame]
            .iter()
            .find(|(t, _)| *t == CHUNK_CEL)
            .map(|(_, data)| data.clone())
            .unwrap()
    };
    let cel_type = |data: &[u8]| u16::from_le_bytes([data[7], data[8]]);
    assert_eq!(cel_type(&cel_data(0)), 2);
    for frame in 1..3 {
        let data = cel_data(frame);
        assert_eq!(cel_type(&data), 1);
        assert_eq!(u16::from_le_bytes([data[16], data[17]]), 0);
    }

    let (part, warnings) = decode(&bytes[..]).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(part.num_frames(), 3);
    let layer = &part.layers()[part.layers().roots()[0]];
    let first = layer.cel(0).unwrap();
    assert_eq!(first.position, (2, 3));
    assert_eq!(first.image(), &rgba_image(4, 4, 9));
    assert!(layer.cel(1).unwrap().is_linked_to(first));
    assert!(layer.cel(2).unwrap().is_linked_to(first));
}

#[test]
fn region_by_tag() {
    let mut doc = Document::new(4, 4, ColorMode::Rgba);
    doc.set_total_frames(6).unwrap();
    for frame in 0..6 {
        doc.set_frame_duration(frame, 10 + frame as u16).unwrap();
    }
    doc.tags.push(Tag::new("idle", 0, 1));
    let mut run = Tag::new("run", 2, 4);
    run.user_data.text = Some("fast".into());
    doc.tags.push(run);
    let mut overlap = Tag::new("all", 0, 5);
    overlap.user_data.color = Some([1, 2, 3, 4]);
    doc.tags.push(overlap);

    let out = encode(&doc, &RegionOfInterest::tag("run"), Cursor::new(Vec::new())).unwrap();
    let (part, _) = decode(&out.get_ref()[..]).unwrap();
    assert_eq!(part.num_frames(), 3);
    assert_eq!(part.frame_duration(0), Some(12));
    assert_eq!(part.frame_duration(2), Some(14));
    assert_eq!(part.tags.len(), 1);
    assert_eq!(part.tags[0].name, "run");
    assert_eq!((part.tags[0].from_frame, part.tags[0].to_frame), (0, 2));
    assert_eq!(part.tags[0].user_data.text.as_deref(), Some("fast"));

    // Without a tag every intersecting tag is kept and clamped.
    let out = encode(&doc, &RegionOfInterest::frames(1, 3), Cursor::new(Vec::new())).unwrap();
    let (part, _) = decode(&out.get_ref()[..]).unwrap();
    let ranges: Vec<(&str, u32, u32)> = part
        .tags
        .iter()
        .map(|t| (t.name.as_str(), t.from_frame, t.to_frame))
        .collect();
    assert_eq!(ranges, vec![("idle", 0, 0), ("run", 1, 2), ("all", 0, 2)]);
    assert_eq!(part.tags[1].user_data.text.as_deref(), Some("fast"));
    assert_eq!(part.tags[2].user_data.color, Some([1, 2, 3, 4]));

    match encode(&doc, &RegionOfInterest::tag("jump"), Cursor::new(Vec::new())) {
        Err(AsepriteError::InvalidInput(_)) => {}
        other => panic!("Expected InvalidInput, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn region_by_slice() {
    let mut doc = Document::new(4, 4, ColorMode::Rgba);
    doc.set_total_frames(3).unwrap();
    for name in &["head", "feet"] {
        let mut slice = Slice::new(name);
        let _ = slice.keys.insert(0, SliceKey::new(Rect::new(0, 0, 2, 2)));
        let _ = slice.keys.insert(2, SliceKey::new(Rect::new(1, 1, 2, 2)));
        doc.slices.push(slice);
    }

    let roi = RegionOfInterest::frames(1, 2).with_slice("feet");
    let out = encode(&doc, &roi, Cursor::new(Vec::new())).unwrap();
    let (part, _) = decode(&out.get_ref()[..]).unwrap();
    assert_eq!(part.slices.len(), 1);
    let feet = &part.slices[0];
    assert_eq!(feet.name, "feet");
    let keys: Vec<(u32, Rect)> = feet.keys.iter().map(|(f, k)| (*f, k.bounds)).collect();
    assert_eq!(
        keys,
        vec![(0, Rect::new(0, 0, 2, 2)), (1, Rect::new(1, 1, 2, 2))]
    );

    let roi = RegionOfInterest::default().with_slice("hands");
    assert!(encode(&doc, &roi, Cursor::new(Vec::new())).is_err());
}

#[test]
fn legacy_tileset_reserves_empty_tile() {
    let red = rgba_image(1, 1, 255);
    let green = rgba_image(1, 1, 7);
    let tiles = vec![red.clone(), green.clone()];
    let compressed = compress::deflate_images(Vec::new(), &tiles).unwrap();

    // Tiles included, tile 0 is not the empty tile.
    let tileset = chunk(CHUNK_TILESET, |w| {
        w.dword(0)?;
        w.dword(0x0002)?;
        w.dword(2)?;
        w.word(1)?;
        w.word(1)?;
        w.short(1)?;
        w.padding(14)?;
        w.string("terrain")?;
        w.dword(compressed.len() as u32)?;
        w.bytes(&compressed)
    });
    let map_layer = Layer::new(LayerKind::Tilemap { tileset: 0 }, "map");
    let stored = Image::from_pixels(
        2,
        1,
        Pixels::Tilemap(vec![
            Tile::new(0, false, false, false),
            Tile::new(1, true, false, false),
        ]),
    )
    .unwrap();
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[vec![
            tileset,
            layer_chunk(&map_layer, 0),
            cel_chunk(0, &Cel::new(stored), CelWriteMode::Image),
        ]],
    );

    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert!(warnings.is_empty(), "Unexpected warnings: {:?}", warnings);
    let tileset = doc.tilesets().get(0).unwrap();
    assert_eq!(tileset.tile_count(), 3);
    assert_eq!(tileset.tile(0), Some(&Image::new(PixelFormat::Rgba, 1, 1)));
    assert_eq!(tileset.tile(1), Some(&red));
    assert_eq!(tileset.tile(2), Some(&green));

    let layer = &doc.layers()[doc.layers().roots()[0]];
    let cel = layer.cel(0).unwrap();
    assert_eq!(
        cel.image().pixels(),
        &Pixels::Tilemap(vec![
            Tile::new(1, false, false, false),
            Tile::new(2, true, false, false),
        ])
    );

    // Saved again, the tileset is current and decodes unchanged.
    assert_eq!(round_trip(&doc), doc);
}

#[test]
fn truncated_cel_is_skipped() {
    let mut rng = StdRng::seed_from_u64(7);
    let image = random_image(&mut rng, PixelFormat::Rgba, 16, 16);
    let (_, mut broken) = cel_chunk(0, &Cel::new(image), CelWriteMode::Image);
    // Keep the cel header and half of the zlib stream.
    let stream_start = 20;
    let keep = stream_start + (broken.len() - stream_start) / 2;
    broken.truncate(keep);

    let mut tag = Tag::new("walk", 0, 1);
    tag.repeat = 2;
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[
            vec![
                layer_chunk(&image_layer("a"), 0),
                (CHUNK_CEL, broken),
                chunk(CHUNK_TAGS, |w| tags::write_chunk(w, std::iter::once(&tag))),
                user_data_chunk("tag note"),
            ],
            vec![cel_chunk(0, &Cel::new(rgba_image(2, 2, 3)), CelWriteMode::Image)],
        ],
    );

    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert_eq!(warnings.len(), 1);
    let warning = &warnings[0];
    assert_eq!(warning.frame(), 0);
    assert_eq!(warning.chunk_type(), CHUNK_CEL);
    assert!(matches!(
        warning.error(),
        AsepriteError::Truncated(_) | AsepriteError::InvalidInput(_)
    ));

    let layer = &doc.layers()[doc.layers().roots()[0]];
    assert!(layer.cel(0).is_none());
    assert_eq!(layer.cel(1).unwrap().image(), &rgba_image(2, 2, 3));
    assert_eq!(doc.tags.len(), 1);
    assert_eq!(doc.tags[0].repeat, 2);
    assert_eq!(doc.tags[0].user_data.text.as_deref(), Some("tag note"));
}

#[test]
fn unknown_chunk_is_reported() {
    let first = layer_chunk(&image_layer("a"), 0);
    let unknown_offset = (HEADER_SIZE + FRAME_HEADER_SIZE) as u64 + first.1.len() as u64 + 6;
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[vec![
            first,
            (0x7777, vec![1, 2, 3, 4, 5]),
            layer_chunk(&image_layer("b"), 0),
        ]],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].chunk_type(), 0x7777);
    assert_eq!(warnings[0].offset(), unknown_offset);
    assert!(matches!(
        warnings[0].error(),
        AsepriteError::UnsupportedFeature(_)
    ));
    assert_eq!(doc.layers().len(), 2);
}

#[test]
fn missing_tileset_is_reported() {
    let map_layer = Layer::new(LayerKind::Tilemap { tileset: 3 }, "map");
    let tiles = Image::from_pixels(1, 1, Pixels::Tilemap(vec![Tile::EMPTY])).unwrap();
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[vec![
            layer_chunk(&map_layer, 0),
            cel_chunk(0, &Cel::new(tiles), CelWriteMode::Image),
        ]],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].chunk_type(), CHUNK_LAYER);
    assert_eq!(warnings[1].chunk_type(), CHUNK_CEL);
    assert_eq!(doc.layers().len(), 1);
    assert!(doc.layers()[doc.layers().roots()[0]].cels().is_empty());
}

#[test]
fn link_with_other_placement_becomes_copy() {
    let original = Cel::new(rgba_image(2, 2, 5));
    let mut moved = original.linked();
    moved.position = (5, 0);
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[
            vec![
                layer_chunk(&image_layer("a"), 0),
                cel_chunk(0, &original, CelWriteMode::Image),
            ],
            vec![cel_chunk(0, &moved, CelWriteMode::LinkedTo(0))],
        ],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert!(warnings.is_empty());
    let layer = &doc.layers()[doc.layers().roots()[0]];
    let first = layer.cel(0).unwrap();
    let second = layer.cel(1).unwrap();
    assert!(!second.is_linked_to(first));
    assert_eq!(second.image(), first.image());
    assert_eq!(second.position, (5, 0));
}

#[test]
fn link_to_empty_frame_is_reported() {
    let cel = Cel::new(rgba_image(1, 1, 0));
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[
            vec![layer_chunk(&image_layer("a"), 0)],
            vec![cel_chunk(0, &cel, CelWriteMode::LinkedTo(0))],
        ],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].frame(), 1);
    assert!(doc.layers()[doc.layers().roots()[0]].cels().is_empty());
}

#[test]
fn layer_nesting_from_levels() {
    let group = |name: &str| Layer::new(LayerKind::Group, name);
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY | HeaderFlags::GROUP_BLEND,
        &[vec![
            layer_chunk(&image_layer("bg"), 0),
            layer_chunk(&group("body"), 0),
            layer_chunk(&group("arm"), 1),
            layer_chunk(&image_layer("hand"), 2),
            layer_chunk(&image_layer("head"), 1),
            layer_chunk(&image_layer("fx"), 0),
        ]],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert!(warnings.is_empty());
    let names = |ids: &[LayerId]| -> Vec<String> {
        ids.iter().map(|id| doc.layers()[*id].name.clone()).collect()
    };
    assert_eq!(names(doc.layers().roots()), vec!["bg", "body", "fx"]);
    let body = doc.layers().roots()[1];
    assert_eq!(names(doc.layers()[body].children()), vec!["arm", "head"]);
    let arm = doc.layers()[body].children()[0];
    assert_eq!(names(doc.layers()[arm].children()), vec!["hand"]);
}

#[test]
fn old_palette_ignored_after_new_palette() {
    let mut red = Palette::new(0, 256);
    red.set(0, PaletteEntry::new([255, 0, 0, 255]));
    let mut blue = Palette::new(0, 256);
    blue.set(0, PaletteEntry::new([0, 0, 255, 255]));
    blue.set(1, PaletteEntry::new([0, 0, 255, 255]));

    let bytes = build_file(
        ColorMode::Indexed,
        HeaderFlags::LAYER_OPACITY,
        &[vec![
            chunk(CHUNK_PALETTE, |w| palette::write_chunk(w, &red, 0, 0)),
            chunk(CHUNK_OLD_PALETTE, |w| palette::write_old_chunk(w, &blue)),
            user_data_chunk("sprite"),
        ]],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(doc.palette(0).get(0).unwrap().rgba, [255, 0, 0, 255]);
    assert_eq!(doc.palette(0).get(1).unwrap().rgba, [0, 0, 0, 255]);
    assert_eq!(doc.user_data.text.as_deref(), Some("sprite"));
}

#[test]
fn user_data_without_target_is_reported() {
    let bytes = build_file(
        ColorMode::Rgba,
        HeaderFlags::LAYER_OPACITY,
        &[vec![user_data_chunk("lost")]],
    );
    let (doc, warnings) = decode(&bytes[..]).unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].chunk_type(), CHUNK_USER_DATA);
    assert!(doc.user_data.is_empty());
}

#[cfg(not(feature = "dev-mode"))]
#[test]
fn bad_magic_is_fatal() {
    let mut bytes = Document::new(4, 4, ColorMode::Rgba).to_bytes().unwrap();
    bytes[4] = 0;
    assert!(matches!(
        decode(&bytes[..]),
        Err(AsepriteError::InvalidInput(_))
    ));
}

#[test]
fn truncated_file_is_fatal() {
    let mut doc = Document::new(4, 4, ColorMode::Rgba);
    let layer = doc.add_layer(None, image_layer("a")).unwrap();
    doc.add_cel(layer, 0, Cel::new(rgba_image(4, 4, 1))).unwrap();
    let bytes = doc.to_bytes().unwrap();
    let cut = &bytes[..bytes.len() - 10];
    assert!(matches!(decode(cut), Err(AsepriteError::Truncated(_))));
}

#[test]
fn file_size_is_patched() {
    let doc = Document::new(4, 4, ColorMode::Grayscale);
    let mut out = Cursor::new(vec![0xAA; 3]);
    out.set_position(3);
    let bytes = doc.write(out).unwrap().into_inner();
    let size = u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
    assert_eq!(size as usize, bytes.len() - 3);
    assert_eq!(&bytes[..3], &[0xAA; 3]);
}

struct CancelOnFirstPoll {
    polls: Cell<usize>,
    warnings: Vec<Warning>,
}

impl DecodeDelegate for CancelOnFirstPoll {
    fn warning(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    fn is_cancelled(&self) -> bool {
        self.polls.set(self.polls.get() + 1);
        true
    }
}

#[test]
fn decode_can_be_cancelled() {
    let mut doc = Document::new(4, 4, ColorMode::Rgba);
    doc.set_total_frames(3).unwrap();
    let layer = doc.add_layer(None, image_layer("a")).unwrap();
    for frame in 0..3 {
        doc.add_cel(layer, frame, Cel::new(rgba_image(2, 2, frame as u8)))
            .unwrap();
    }
    let bytes = doc.to_bytes().unwrap();

    let mut delegate = CancelOnFirstPoll {
        polls: Cell::new(0),
        warnings: Vec::new(),
    };
    let partial = decode_with(&bytes[..], &mut delegate).unwrap();
    assert!(partial.is_cancelled());
    assert_eq!(delegate.polls.get(), 1);
    assert!(delegate.warnings.is_empty());
    assert!(partial.layers().is_empty());
}

#[derive(Default)]
struct ProgressLog {
    fractions: Vec<f32>,
    cancel: bool,
}

impl DecodeDelegate for ProgressLog {
    fn warning(&mut self, _warning: Warning) {}

    fn progress(&mut self, fraction: f32) {
        self.fractions.push(fraction);
    }
}

impl EncodeDelegate for ProgressLog {
    fn progress(&mut self, fraction: f32) {
        self.fractions.push(fraction);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
    }
}

#[test]
fn progress_is_reported() {
    let mut doc = Document::new(16, 16, ColorMode::Rgba);
    doc.set_total_frames(4).unwrap();
    let layer = doc.add_layer(None, image_layer("a")).unwrap();
    for frame in 0..4 {
        doc.add_cel(layer, frame, Cel::new(rgba_image(16, 16, frame as u8)))
            .unwrap();
    }

    let mut encoding = ProgressLog::default();
    let out = encode_with(
        &doc,
        &RegionOfInterest::default(),
        Cursor::new(Vec::new()),
        &mut encoding,
    )
    .unwrap();
    assert_eq!(encoding.fractions, vec![0.25, 0.5, 0.75, 1.0]);

    let mut decoding = ProgressLog::default();
    let decoded = decode_with(&out.get_ref()[..], &mut decoding).unwrap();
    assert_eq!(decoded, doc);
    assert!(decoding.fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(decoding.fractions.last().copied(), Some(1.0));
}

#[test]
fn encode_can_be_cancelled() {
    let doc = Document::new(4, 4, ColorMode::Rgba);
    let mut delegate = ProgressLog {
        cancel: true,
        ..ProgressLog::default()
    };
    let result = encode_with(
        &doc,
        &RegionOfInterest::default(),
        Cursor::new(Vec::new()),
        &mut delegate,
    );
    assert!(matches!(result, Err(AsepriteError::Cancelled)));
    assert!(delegate.fractions.is_empty());
}
