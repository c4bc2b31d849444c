use crate::{AsepriteError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

// Fixed point values are stored as 16.16 signed integers.
const FIXED_ONE: f64 = 65536.0;

pub(crate) struct AseReader<T: Read> {
    input: T,
}

impl<'a> AseReader<Cursor<&'a [u8]>> {
    pub(crate) fn new(data: &'a [u8]) -> AseReader<Cursor<&'a [u8]>> {
        let input = Cursor::new(data);
        AseReader { input }
    }

    pub(crate) fn position(&self) -> usize {
        self.input.position() as usize
    }

    /// Everything after the current read position.
    pub(crate) fn remaining(&self) -> &'a [u8] {
        let data: &'a [u8] = *self.input.get_ref();
        let pos = self.position().min(data.len());
        &data[pos..]
    }
}

impl<T: Read> AseReader<T> {
    pub(crate) fn with(input: T) -> Self {
        Self { input }
    }

    pub(crate) fn byte(&mut self) -> Result<u8> {
        Ok(self.input.read_u8()?)
    }

    pub(crate) fn word(&mut self) -> Result<u16> {
        Ok(self.input.read_u16::<LittleEndian>()?)
    }

    pub(crate) fn short(&mut self) -> Result<i16> {
        Ok(self.input.read_i16::<LittleEndian>()?)
    }

    pub(crate) fn dword(&mut self) -> Result<u32> {
        Ok(self.input.read_u32::<LittleEndian>()?)
    }

    pub(crate) fn long(&mut self) -> Result<i32> {
        Ok(self.input.read_i32::<LittleEndian>()?)
    }

    pub(crate) fn qword(&mut self) -> Result<u64> {
        Ok(self.input.read_u64::<LittleEndian>()?)
    }

    pub(crate) fn fixed(&mut self) -> Result<f64> {
        self.long().map(|raw| raw as f64 / FIXED_ONE)
    }

    /// A length-prefixed byte string. No encoding checks are done here.
    pub(crate) fn string_bytes(&mut self) -> Result<Vec<u8>> {
        let str_len = self.word()?;
        self.bytes(str_len as usize)
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        let bytes = self.string_bytes()?;
        Ok(String::from_utf8(bytes)
            .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned()))
    }

    pub(crate) fn bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(count.min(1 << 20));
        (&mut self.input)
            .take(count as u64)
            .read_to_end(&mut output)?;
        if output.len() != count {
            return Err(AsepriteError::Truncated(format!(
                "Invalid data size. Expected: {}, Actual: {}",
                count,
                output.len()
            )));
        }
        Ok(output)
    }

    pub(crate) fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        Ok(self.input.read_exact(buffer)?)
    }

    pub(crate) fn skip_reserved(&mut self, count: usize) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.input).take(count as u64), &mut io::sink())?;
        if skipped != count as u64 {
            return Err(AsepriteError::Truncated(format!(
                "Could not skip {} bytes, only {} available",
                count, skipped
            )));
        }
        Ok(())
    }
}
