use crate::{reader::AseReader, writer::AseWriter, AsepriteError, Result};
use nohash::IntMap;
use std::{convert::TryFrom, io::Write};

/// What an [ExternalFile] entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalFileKind {
    /// An external palette.
    Palette,
    /// An external tileset.
    Tileset,
    /// Extension name used for user data properties.
    PropertiesExtension,
    /// Extension name used for tile management.
    TileManagementExtension,
    /// A kind this version does not know about.
    Unknown(u8),
}

impl ExternalFileKind {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExternalFileKind::Palette,
            1 => ExternalFileKind::Tileset,
            2 => ExternalFileKind::PropertiesExtension,
            3 => ExternalFileKind::TileManagementExtension,
            other => ExternalFileKind::Unknown(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ExternalFileKind::Palette => 0,
            ExternalFileKind::Tileset => 1,
            ExternalFileKind::PropertiesExtension => 2,
            ExternalFileKind::TileManagementExtension => 3,
            ExternalFileKind::Unknown(other) => other,
        }
    }
}

/// An external file. Used to reference external palettes or tilesets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFile {
    id: u32,
    kind: ExternalFileKind,
    name: String,
}

impl ExternalFile {
    /// Create a new entry.
    pub fn new(id: u32, kind: ExternalFileKind, name: String) -> Self {
        Self { id, kind, name }
    }

    /// Id used by other chunks to refer to this file.
    pub fn id(&self) -> u32 {
        self.id
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> ExternalFileKind {
        self.kind
    }

    /// File name or extension id.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The table of external files of a document, keyed by id. Later entries
/// with the same id replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalFiles(IntMap<u32, ExternalFile>);

impl ExternalFiles {
    /// Add or replace an entry.
    pub fn add(&mut self, file: ExternalFile) {
        self.0.insert(file.id, file);
    }

    /// Lookup an entry by id.
    pub fn get(&self, id: u32) -> Option<&ExternalFile> {
        self.0.get(&id)
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All entries, ordered by id.
    pub fn sorted(&self) -> Vec<&ExternalFile> {
        let mut files: Vec<_> = self.0.values().collect();
        files.sort_by_key(|f| f.id);
        files
    }
}

pub(crate) fn parse_chunk(data: &[u8]) -> Result<Vec<ExternalFile>> {
    let mut reader = AseReader::new(data);
    let entry_ct = reader.dword()?;
    reader.skip_reserved(8)?;

    let mut results = Vec::with_capacity(entry_ct.min(1024) as usize);
    for _ in 0..entry_ct {
        let id = reader.dword()?;
        let kind = ExternalFileKind::from_u8(reader.byte()?);
        reader.skip_reserved(7)?;
        let name = reader.string()?;
        results.push(ExternalFile::new(id, kind, name));
    }

    Ok(results)
}

pub(crate) fn write_chunk<W: Write>(writer: &mut AseWriter<W>, files: &ExternalFiles) -> Result<()> {
    let sorted = files.sorted();
    let count = u32::try_from(sorted.len())
        .map_err(|_| AsepriteError::InvalidInput("Too many external files".into()))?;
    writer.dword(count)?;
    writer.padding(8)?;
    for file in sorted {
        writer.dword(file.id)?;
        writer.byte(file.kind.to_u8())?;
        writer.padding(7)?;
        writer.string(&file.name)?;
    }
    Ok(())
}
