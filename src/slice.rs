use crate::{reader::AseReader, user_data::UserData, writer::AseWriter, AsepriteError, Result};
use std::{
    collections::BTreeMap,
    convert::TryFrom,
    io::{Read, Write},
};

const FLAG_NINE_PATCH: u32 = 0x0001;
const FLAG_PIVOT: u32 = 0x0002;

// Stored pivot of keys that have none.
const NO_PIVOT: i32 = i32::MIN;

/// An integer rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    #[allow(missing_docs)]
    pub x: i32,
    #[allow(missing_docs)]
    pub y: i32,
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
}

impl Rect {
    #[allow(missing_docs)]
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns `true` if the rectangle covers no area.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The shape of a [Slice] from a given frame on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceKey {
    /// Slice bounds in canvas coordinates.
    pub bounds: Rect,
    /// 9-patch center, relative to `bounds`.
    pub center: Option<Rect>,
    /// Pivot point, relative to `bounds`.
    pub pivot: Option<(i32, i32)>,
}

impl SliceKey {
    /// A key with the given bounds and no center or pivot.
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            center: None,
            pivot: None,
        }
    }
}

/// A slice is a named rectangular region of the sprite. Its shape can change
/// over the animation; every key applies until the frame of the next key.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    /// Name of the slice. Not guaranteed to be unique.
    pub name: String,
    /// Keys by the first frame they apply to.
    pub keys: BTreeMap<u32, SliceKey>,
    #[allow(missing_docs)]
    pub user_data: UserData,
}

impl Slice {
    /// A slice without keys.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            keys: BTreeMap::new(),
            user_data: UserData::default(),
        }
    }

    /// The key active at `frame`, if the slice exists at that frame.
    pub fn key_at(&self, frame: u32) -> Option<&SliceKey> {
        self.keys.range(..=frame).next_back().map(|(_, key)| key)
    }
}

fn parse_slice<R: Read>(reader: &mut AseReader<R>) -> Result<Slice> {
    let num_slice_keys = reader.dword()?;
    let flags = reader.dword()?;
    let _reserved = reader.dword()?;
    let name = reader.string()?;

    let mut keys = BTreeMap::new();
    for _id in 0..num_slice_keys {
        let from_frame = reader.dword()?;
        let bounds = Rect::new(reader.long()?, reader.long()?, reader.dword()?, reader.dword()?);
        let center = if flags & FLAG_NINE_PATCH != 0 {
            let center =
                Rect::new(reader.long()?, reader.long()?, reader.dword()?, reader.dword()?);
            Some(center).filter(|c| !c.is_empty())
        } else {
            None
        };
        let pivot = if flags & FLAG_PIVOT != 0 {
            let pivot = (reader.long()?, reader.long()?);
            Some(pivot).filter(|p| *p != (NO_PIVOT, NO_PIVOT))
        } else {
            None
        };

        keys.insert(
            from_frame,
            SliceKey {
                bounds,
                center,
                pivot,
            },
        );
    }

    Ok(Slice {
        name,
        keys,
        user_data: UserData::default(),
    })
}

pub(crate) fn parse_chunk(data: &[u8]) -> Result<Slice> {
    parse_slice(&mut AseReader::new(data))
}

/// Old slices chunk (0x2021): several slices in one chunk.
pub(crate) fn parse_old_chunk(data: &[u8]) -> Result<Vec<Slice>> {
    let mut reader = AseReader::new(data);
    let count = reader.dword()?;
    reader.skip_reserved(8)?;
    let mut slices = Vec::with_capacity(count.min(256) as usize);
    for _ in 0..count {
        slices.push(parse_slice(&mut reader)?);
    }
    Ok(slices)
}

fn write_rect<W: Write>(writer: &mut AseWriter<W>, rect: &Rect) -> Result<()> {
    writer.long(rect.x)?;
    writer.long(rect.y)?;
    writer.dword(rect.width)?;
    writer.dword(rect.height)
}

/// Write a slice chunk with the given keys. Keys are `(frame, key)` pairs in
/// ascending frame order.
pub(crate) fn write_chunk<W: Write>(
    writer: &mut AseWriter<W>,
    name: &str,
    keys: &[(u32, &SliceKey)],
) -> Result<()> {
    let mut flags = 0;
    if keys.iter().any(|(_, k)| k.center.is_some()) {
        flags |= FLAG_NINE_PATCH;
    }
    if keys.iter().any(|(_, k)| k.pivot.is_some()) {
        flags |= FLAG_PIVOT;
    }

    let count = u32::try_from(keys.len())
        .map_err(|_| AsepriteError::InvalidInput("Too many slice keys".into()))?;
    writer.dword(count)?;
    writer.dword(flags)?;
    writer.dword(0)?;
    writer.string(name)?;
    for (frame, key) in keys {
        writer.dword(*frame)?;
        write_rect(writer, &key.bounds)?;
        if flags & FLAG_NINE_PATCH != 0 {
            write_rect(writer, &key.center.unwrap_or_default())?;
        }
        if flags & FLAG_PIVOT != 0 {
            let (x, y) = key.pivot.unwrap_or((NO_PIVOT, NO_PIVOT));
            writer.long(x)?;
            writer.long(y)?;
        }
    }
    Ok(())
}
