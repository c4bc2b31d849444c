use crate::{reader::AseReader, writer::AseWriter, AsepriteError, Result};
use std::io::Write;

const ENTRY_HAS_NAME: u16 = 0x0001;

// The file header stores the palette size in 16 bits.
const MAX_PALETTE_SIZE: u32 = 0x10000;

/// A single entry in a [Palette].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteEntry {
    /// Color components [red, green, blue, alpha].
    pub rgba: [u8; 4],
    /// Optional color name.
    pub name: Option<String>,
}

impl PaletteEntry {
    /// Create an unnamed entry.
    pub fn new(rgba: [u8; 4]) -> Self {
        Self { rgba, name: None }
    }
}

/// One version of the document palette.
///
/// A document stores a new version for every frame in which the palette
/// changes. [Palette::frame] is the first frame this version applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    frame: u32,
    entries: Vec<PaletteEntry>,
}

impl Palette {
    /// A palette with `size` opaque black entries.
    pub fn new(frame: u32, size: u32) -> Self {
        Self {
            frame,
            entries: vec![PaletteEntry::new([0, 0, 0, 255]); size as usize],
        }
    }

    /// A palette with the given entries.
    pub fn from_entries(frame: u32, entries: Vec<PaletteEntry>) -> Self {
        Self { frame, entries }
    }

    /// First frame of this palette version.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub(crate) fn set_frame(&mut self, frame: u32) {
        self.frame = frame;
    }

    /// Number of entries.
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, ordered by index.
    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    /// Look up entry at given index.
    pub fn get(&self, index: u32) -> Option<&PaletteEntry> {
        self.entries.get(index as usize)
    }

    /// Replace the entry at `index`. Grows the palette with opaque black
    /// entries if required.
    pub fn set(&mut self, index: u32, entry: PaletteEntry) {
        let index = index as usize;
        if index >= self.entries.len() {
            self.entries
                .resize(index + 1, PaletteEntry::new([0, 0, 0, 255]));
        }
        self.entries[index] = entry;
    }

    /// Change the number of entries. New entries are opaque black.
    pub fn resize(&mut self, size: u32) {
        self.entries
            .resize(size as usize, PaletteEntry::new([0, 0, 0, 255]));
    }

    /// Smallest index range `[from, to]` covering every entry that differs
    /// between `self` and `other`. A size change extends the range to the
    /// last entry of the larger palette. Returns `None` if both are equal.
    pub fn diff(&self, other: &Palette) -> Option<(u32, u32)> {
        let min = self.entries.len().min(other.entries.len());
        let max = self.entries.len().max(other.entries.len());

        let mut range: Option<(usize, usize)> = None;
        for (i, (a, b)) in self.entries.iter().zip(&other.entries).enumerate() {
            if a != b {
                range = Some(match range {
                    None => (i, i),
                    Some((from, _)) => (from, i),
                });
            }
        }
        if max != min {
            range = Some(match range {
                None => (min, max - 1),
                Some((from, _)) => (from, max - 1),
            });
        }
        range.map(|(from, to)| (from as u32, to as u32))
    }

    pub(crate) fn is_opaque(&self) -> bool {
        self.entries.iter().all(|e| e.rgba[3] == 255)
    }
}

// Expand a 6-bit VGA channel to 8 bits.
fn scale_6bit(value: u8) -> u8 {
    let value = value & 0x3f;
    (value << 2) | (value >> 4)
}

/// Apply a palette chunk (0x2019) to `palette`.
pub(crate) fn parse_chunk(data: &[u8], palette: &mut Palette) -> Result<()> {
    let mut reader = AseReader::new(data);

    let new_size = reader.dword()?;
    let from = reader.dword()?;
    let to = reader.dword()?;
    reader.skip_reserved(8)?;

    if to < from || to >= new_size || new_size > MAX_PALETTE_SIZE {
        return Err(AsepriteError::InvalidInput(format!(
            "Bad palette color indices: first={} last={} size={}",
            from, to, new_size,
        )));
    }

    let mut entries = Vec::with_capacity(((to - from + 1) as usize).min(256));
    for _ in from..=to {
        let flags = reader.word()?;
        let red = reader.byte()?;
        let green = reader.byte()?;
        let blue = reader.byte()?;
        let alpha = reader.byte()?;
        let name = if flags & ENTRY_HAS_NAME != 0 {
            Some(reader.string()?)
        } else {
            None
        };
        entries.push(PaletteEntry {
            rgba: [red, green, blue, alpha],
            name,
        });
    }

    palette.resize(new_size);
    for (index, entry) in (from..).zip(entries) {
        palette.set(index, entry);
    }
    Ok(())
}

/// Apply an old color chunk (0x0004 or 0x0011) to `palette`.
///
/// Each packet skips a number of entries from the current position and then
/// sets a run of colors. Entries beyond the palette size are dropped.
pub(crate) fn parse_old_chunk(data: &[u8], six_bit: bool, palette: &mut Palette) -> Result<()> {
    let mut reader = AseReader::new(data);

    let packets = reader.word()?;
    let mut index: u32 = 0;
    for _ in 0..packets {
        index += reader.byte()? as u32;
        let size = match reader.byte()? {
            0 => 256,
            n => n as u32,
        };
        for _ in 0..size {
            let mut rgb = [reader.byte()?, reader.byte()?, reader.byte()?];
            if six_bit {
                for c in rgb.iter_mut() {
                    *c = scale_6bit(*c);
                }
            }
            if index < palette.len() {
                palette.set(index, PaletteEntry::new([rgb[0], rgb[1], rgb[2], 255]));
            }
            index += 1;
        }
    }
    Ok(())
}

pub(crate) fn write_chunk<W: Write>(
    writer: &mut AseWriter<W>,
    palette: &Palette,
    from: u32,
    to: u32,
) -> Result<()> {
    if to < from || to >= palette.len() {
        return Err(AsepriteError::InternalError(format!(
            "Palette range {}..={} outside of {} entries",
            from,
            to,
            palette.len()
        )));
    }
    writer.dword(palette.len())?;
    writer.dword(from)?;
    writer.dword(to)?;
    writer.padding(8)?;
    for entry in &palette.entries[from as usize..=to as usize] {
        writer.word(if entry.name.is_some() {
            ENTRY_HAS_NAME
        } else {
            0
        })?;
        writer.bytes(&entry.rgba)?;
        if let Some(name) = &entry.name {
            writer.string(name)?;
        }
    }
    Ok(())
}

// Single packet covering the whole palette. Only valid for up to 256 entries.
pub(crate) fn write_old_chunk<W: Write>(writer: &mut AseWriter<W>, palette: &Palette) -> Result<()> {
    if palette.is_empty() || palette.len() > 256 {
        return Err(AsepriteError::InternalError(format!(
            "Old color chunk cannot hold {} entries",
            palette.len()
        )));
    }
    writer.word(1)?;
    writer.byte(0)?;
    // A run of 256 colors is stored as 0.
    writer.byte((palette.len() % 256) as u8)?;
    for entry in &palette.entries {
        writer.bytes(&entry.rgba[..3])?;
    }
    Ok(())
}
