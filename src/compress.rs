//! Scanline compression shared by cel, tilemap, and tileset payloads.
//!
//! Each payload is a single zlib stream. The decoder never produces more than
//! the declared image size and never reads past the end of the chunk.

use crate::{pixel::Image, AsepriteError, Result};
use flate2::{write::ZlibEncoder, Compression, Decompress, FlushDecompress, Status};
use log::debug;
use std::io::Write;

const INPUT_BLOCK_SIZE: usize = 4096;

// Upper bound of the deflate compression ratio. Declared sizes beyond this
// cannot be produced from the available input.
const MAX_DEFLATE_RATIO: usize = 1032;

/// Inflate the zlib stream in `input` into exactly `expected` bytes.
///
/// `progress` receives the number of input bytes consumed so far after every
/// block.
pub(crate) fn inflate(
    input: &[u8],
    expected: usize,
    progress: &mut dyn FnMut(usize),
) -> Result<Vec<u8>> {
    if expected / MAX_DEFLATE_RATIO > input.len() {
        return Err(AsepriteError::InvalidInput(format!(
            "{} compressed bytes cannot hold {} bytes of image data",
            input.len(),
            expected
        )));
    }

    let mut inflater = Decompress::new(true);
    let mut output = vec![0_u8; expected];
    let mut stream_end = false;

    while (inflater.total_out() as usize) < expected {
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out() as usize;
        if consumed >= input.len() {
            return Err(AsepriteError::Truncated(format!(
                "Compressed data ended after {} of {} bytes",
                produced, expected
            )));
        }
        let block_end = (consumed + INPUT_BLOCK_SIZE).min(input.len());
        let status = inflater
            .decompress(
                &input[consumed..block_end],
                &mut output[produced..],
                FlushDecompress::None,
            )
            .map_err(|err| {
                AsepriteError::InvalidInput(format!("Corrupt compressed data: {}", err))
            })?;
        progress(inflater.total_in() as usize);

        let stalled =
            inflater.total_in() as usize == consumed && inflater.total_out() as usize == produced;
        match status {
            Status::StreamEnd => {
                stream_end = true;
                break;
            }
            Status::Ok | Status::BufError if stalled => {
                return Err(AsepriteError::InvalidInput(format!(
                    "Compressed data stalled after {} of {} bytes",
                    produced, expected
                )));
            }
            Status::Ok | Status::BufError => {}
        }
    }

    let produced = inflater.total_out() as usize;
    if produced != expected {
        return Err(AsepriteError::Truncated(format!(
            "Compressed stream ended after {} of {} bytes",
            produced, expected
        )));
    }

    if !stream_end {
        // Consume the stream trailer so we can tell whether it ended cleanly.
        let consumed = inflater.total_in() as usize;
        let mut rest = [0_u8; 1];
        match inflater.decompress(&input[consumed..], &mut rest, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => {}
            Ok(status) => debug!(
                "Compressed stream did not end cleanly ({:?}, {} bytes left)",
                status,
                input.len() - consumed
            ),
            Err(err) => debug!("Error at end of compressed stream: {}", err),
        }
    }

    Ok(output)
}

/// Deflate the scanlines of all `images`, one after the other, into a single
/// zlib stream. The stream is finished after the last row.
pub(crate) fn deflate_images<'a, W, I>(output: W, images: I) -> Result<W>
where
    W: Write,
    I: IntoIterator<Item = &'a Image>,
{
    let mut encoder = ZlibEncoder::new(output, Compression::default());
    let mut row = Vec::new();
    for image in images {
        row.reserve(image.row_stride());
        for y in 0..image.height() as usize {
            row.clear();
            image.pack_row(y, &mut row)?;
            encoder.write_all(&row)?;
        }
    }
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{PixelFormat, Pixels};

    fn indexed_image() -> Image {
        let data = (0..64).map(|i| (i * 7 % 256) as u8).collect();
        Image::from_pixels(8, 8, Pixels::Indexed(data)).unwrap()
    }

    #[test]
    fn inflate_restores_scanlines() {
        let image = indexed_image();
        let compressed = deflate_images(Vec::new(), vec![&image]).unwrap();
        let mut calls = 0;
        let bytes = inflate(&compressed, 64, &mut |_| calls += 1).unwrap();
        assert!(calls > 0);
        let pixels = Pixels::unpack(PixelFormat::Indexed, &bytes).unwrap();
        assert_eq!(&pixels, image.pixels());
    }

    #[test]
    fn short_input_is_truncated() {
        let image = Image::new(PixelFormat::Rgba, 64, 64);
        let noise = Image::from_pixels(
            64,
            1,
            Pixels::Indexed((0..64).map(|i| (i * 37 % 251) as u8).collect()),
        )
        .unwrap();
        let compressed = deflate_images(Vec::new(), vec![&noise, &image]).unwrap();
        let half = &compressed[..compressed.len() / 2];
        match inflate(half, 64 + 64 * 64 * 4, &mut |_| ()) {
            Err(AsepriteError::Truncated(_)) | Err(AsepriteError::InvalidInput(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn garbage_is_rejected() {
        let garbage = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x11];
        assert!(inflate(&garbage, 4, &mut |_| ()).is_err());
    }
}
