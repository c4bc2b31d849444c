use crate::{AsepriteError, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::{convert::TryFrom, io::Write};

const FIXED_ONE: f64 = 65536.0;

/// Mirror of `AseReader`. Only fails if the underlying sink fails or a value
/// does not fit into its on-disk field.
pub(crate) struct AseWriter<W: Write> {
    output: W,
}

impl AseWriter<Vec<u8>> {
    pub(crate) fn buffer() -> Self {
        Self { output: Vec::new() }
    }
}

impl<W: Write> AseWriter<W> {
    pub(crate) fn with(output: W) -> Self {
        Self { output }
    }

    pub(crate) fn into_inner(self) -> W {
        self.output
    }

    pub(crate) fn get_mut(&mut self) -> &mut W {
        &mut self.output
    }

    pub(crate) fn byte(&mut self, value: u8) -> Result<()> {
        Ok(self.output.write_u8(value)?)
    }

    pub(crate) fn word(&mut self, value: u16) -> Result<()> {
        Ok(self.output.write_u16::<LittleEndian>(value)?)
    }

    pub(crate) fn short(&mut self, value: i16) -> Result<()> {
        Ok(self.output.write_i16::<LittleEndian>(value)?)
    }

    pub(crate) fn dword(&mut self, value: u32) -> Result<()> {
        Ok(self.output.write_u32::<LittleEndian>(value)?)
    }

    pub(crate) fn long(&mut self, value: i32) -> Result<()> {
        Ok(self.output.write_i32::<LittleEndian>(value)?)
    }

    pub(crate) fn qword(&mut self, value: u64) -> Result<()> {
        Ok(self.output.write_u64::<LittleEndian>(value)?)
    }

    pub(crate) fn fixed(&mut self, value: f64) -> Result<()> {
        self.long((value * FIXED_ONE).round() as i32)
    }

    pub(crate) fn bytes(&mut self, data: &[u8]) -> Result<()> {
        Ok(self.output.write_all(data)?)
    }

    pub(crate) fn string(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            AsepriteError::InvalidInput(format!(
                "String is too long to be stored ({} bytes)",
                value.len()
            ))
        })?;
        self.word(len)?;
        self.bytes(value.as_bytes())
    }

    pub(crate) fn padding(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.byte(0)?;
        }
        Ok(())
    }
}
