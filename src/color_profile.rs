use crate::{reader::AseReader, writer::AseWriter, AsepriteError, Result};
use std::{convert::TryFrom, io::Write};

const FLAG_FIXED_GAMMA: u16 = 0x0001;

/// Color space information of the sprite.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorProfile {
    /// Which color space the pixels are in.
    pub kind: ColorProfileKind,
    /// Fixed gamma (1.0 = linear). Only used if present.
    pub gamma: Option<f64>,
}

/// The type of color profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorProfileKind {
    /// No color profile. Colors are used as-is.
    None,
    /// sRGB color space.
    Srgb,
    /// Embedded ICC profile.
    Icc(Vec<u8>),
}

pub(crate) fn parse_chunk(data: &[u8]) -> Result<ColorProfile> {
    let mut reader = AseReader::new(data);
    let profile_type = reader.word()?;
    let flags = reader.word()?;
    let gamma = reader.fixed()?;
    reader.skip_reserved(8)?;

    let kind = match profile_type {
        0x0000 => ColorProfileKind::None,
        0x0001 => ColorProfileKind::Srgb,
        0x0002 => {
            let len = reader.dword()?;
            ColorProfileKind::Icc(reader.bytes(len as usize)?)
        }
        _ => {
            return Err(AsepriteError::UnsupportedFeature(format!(
                "Unknown color profile type: {}",
                profile_type
            )))
        }
    };
    let gamma = if flags & FLAG_FIXED_GAMMA != 0 {
        Some(gamma)
    } else {
        None
    };

    Ok(ColorProfile { kind, gamma })
}

pub(crate) fn write_chunk<W: Write>(writer: &mut AseWriter<W>, profile: &ColorProfile) -> Result<()> {
    let profile_type = match profile.kind {
        ColorProfileKind::None => 0,
        ColorProfileKind::Srgb => 1,
        ColorProfileKind::Icc(_) => 2,
    };
    writer.word(profile_type)?;
    writer.word(if profile.gamma.is_some() {
        FLAG_FIXED_GAMMA
    } else {
        0
    })?;
    writer.fixed(profile.gamma.unwrap_or(0.0))?;
    writer.padding(8)?;
    if let ColorProfileKind::Icc(icc) = &profile.kind {
        let len = u32::try_from(icc.len())
            .map_err(|_| AsepriteError::InvalidInput("ICC profile is too large".into()))?;
        writer.dword(len)?;
        writer.bytes(icc)?;
    }
    Ok(())
}
