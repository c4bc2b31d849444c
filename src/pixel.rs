use crate::{tile::Tile, AsepriteError, Result};

/// Pixel format of an [Image].
///
/// RGBA, grayscale, and indexed images hold pixel data of the sprite's color
/// mode. Tilemap images hold one [Tile] reference per cell instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Red, green, blue, and alpha with 8 bits each.
    Rgba,
    /// 8 bit grayscale and 8 bit alpha.
    Grayscale,
    /// 8 bit palette index.
    Indexed,
    /// 32 bit tile references.
    Tilemap,
}

impl PixelFormat {
    /// Number of bytes to store one pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Grayscale => 2,
            PixelFormat::Indexed => 1,
            PixelFormat::Tilemap => 4,
        }
    }
}

// From the Aseprite file format docs:
// PIXEL: One pixel, depending on the image pixel format:
// Grayscale: BYTE[2], each pixel have 2 bytes in the order Value, Alpha.
// Indexed: BYTE, Each pixel uses 1 byte (the index).
// RGBA: BYTE[4], each pixel have 4 bytes in this order Red, Green, Blue, Alpha.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Rgba {
    /// Create a new color.
    pub fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Grayscale {
    pub value: u8,
    pub alpha: u8,
}

/// Pixel storage of an [Image].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pixels {
    Rgba(Vec<Rgba>),
    Grayscale(Vec<Grayscale>),
    Indexed(Vec<u8>),
    Tilemap(Vec<Tile>),
}

impl Pixels {
    fn filled(format: PixelFormat, count: usize) -> Self {
        match format {
            PixelFormat::Rgba => Pixels::Rgba(vec![Rgba::default(); count]),
            PixelFormat::Grayscale => Pixels::Grayscale(vec![Grayscale::default(); count]),
            PixelFormat::Indexed => Pixels::Indexed(vec![0; count]),
            PixelFormat::Tilemap => Pixels::Tilemap(vec![Tile::EMPTY; count]),
        }
    }

    /// Pixel format of this data.
    pub fn format(&self) -> PixelFormat {
        match self {
            Pixels::Rgba(_) => PixelFormat::Rgba,
            Pixels::Grayscale(_) => PixelFormat::Grayscale,
            Pixels::Indexed(_) => PixelFormat::Indexed,
            Pixels::Tilemap(_) => PixelFormat::Tilemap,
        }
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        match self {
            Pixels::Rgba(v) => v.len(),
            Pixels::Grayscale(v) => v.len(),
            Pixels::Indexed(v) => v.len(),
            Pixels::Tilemap(v) => v.len(),
        }
    }

    /// Returns `true` if there are no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Unpacks scanline bytes. Tile words are kept raw; the caller knows the
    // bit layout.
    pub(crate) fn unpack(format: PixelFormat, bytes: &[u8]) -> Result<Self> {
        let bpp = format.bytes_per_pixel();
        if bytes.len() % bpp != 0 {
            return Err(AsepriteError::InvalidInput(format!(
                "Incorrect length of bytes for {:?} image data: {}",
                format,
                bytes.len()
            )));
        }
        let pixels = match format {
            PixelFormat::Rgba => Pixels::Rgba(
                bytes
                    .chunks_exact(4)
                    .map(|c| Rgba::new(c[0], c[1], c[2], c[3]))
                    .collect(),
            ),
            PixelFormat::Grayscale => Pixels::Grayscale(
                bytes
                    .chunks_exact(2)
                    .map(|c| Grayscale {
                        value: c[0],
                        alpha: c[1],
                    })
                    .collect(),
            ),
            PixelFormat::Indexed => Pixels::Indexed(bytes.to_vec()),
            PixelFormat::Tilemap => Pixels::Tilemap(
                bytes
                    .chunks_exact(4)
                    .map(|c| Tile::from_raw(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                    .collect(),
            ),
        };
        Ok(pixels)
    }

    /// Appends the packed bytes of `count` pixels starting at `start`.
    pub(crate) fn pack_into(&self, start: usize, count: usize, out: &mut Vec<u8>) -> Result<()> {
        let end = start + count;
        match self {
            Pixels::Rgba(v) => {
                for p in span(v, start, end)? {
                    out.extend_from_slice(&[p.red, p.green, p.blue, p.alpha]);
                }
            }
            Pixels::Grayscale(v) => {
                for p in span(v, start, end)? {
                    out.extend_from_slice(&[p.value, p.alpha]);
                }
            }
            Pixels::Indexed(v) => out.extend_from_slice(span(v, start, end)?),
            Pixels::Tilemap(v) => {
                for t in span(v, start, end)? {
                    out.extend_from_slice(&t.raw().to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

fn span<T>(pixels: &[T], start: usize, end: usize) -> Result<&[T]> {
    pixels.get(start..end).ok_or_else(|| {
        AsepriteError::InvalidInput(format!(
            "Pixel range {}..{} outside of image data ({} pixels)",
            start,
            end,
            pixels.len()
        ))
    })
}

/// A rectangular block of pixels or tile references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u16,
    height: u16,
    pixels: Pixels,
}

impl Image {
    /// A new image where every pixel is zero (transparent, index 0, or the
    /// empty tile).
    pub fn new(format: PixelFormat, width: u16, height: u16) -> Self {
        let pixels = Pixels::filled(format, width as usize * height as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Wrap existing pixel data. Fails if the pixel count does not match.
    pub fn from_pixels(width: u16, height: u16, pixels: Pixels) -> Result<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(AsepriteError::InvalidInput(format!(
                "Image of size {}x{} needs {} pixels, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    #[allow(missing_docs)]
    pub fn width(&self) -> u16 {
        self.width
    }

    #[allow(missing_docs)]
    pub fn height(&self) -> u16 {
        self.height
    }

    #[allow(missing_docs)]
    pub fn format(&self) -> PixelFormat {
        self.pixels.format()
    }

    #[allow(missing_docs)]
    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    /// Replace the pixel data. The new pixels must have the same format and
    /// count as the current ones.
    pub fn set_pixels(&mut self, pixels: Pixels) -> Result<()> {
        if pixels.format() != self.format() || pixels.len() != self.pixels.len() {
            return Err(AsepriteError::InvalidInput(format!(
                "Cannot replace {} {:?} pixels with {} {:?} pixels",
                self.pixels.len(),
                self.format(),
                pixels.len(),
                pixels.format()
            )));
        }
        self.pixels = pixels;
        Ok(())
    }

    /// Fails unless the image is stored as `format` and holds exactly
    /// `width * height` pixels.
    pub(crate) fn check(&self, format: PixelFormat) -> Result<()> {
        if self.format() != format {
            return Err(AsepriteError::InvalidInput(format!(
                "Image is {:?}, expected {:?}",
                self.format(),
                format
            )));
        }
        let expected = self.width as usize * self.height as usize;
        if self.pixels.len() != expected {
            return Err(AsepriteError::InvalidInput(format!(
                "Image of size {}x{} holds {} pixels",
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }

    /// Bytes per packed scanline.
    pub(crate) fn row_stride(&self) -> usize {
        self.width as usize * self.format().bytes_per_pixel()
    }

    pub(crate) fn pack_row(&self, row: usize, out: &mut Vec<u8>) -> Result<()> {
        let width = self.width as usize;
        self.pixels.pack_into(row * width, width, out)
    }
}
