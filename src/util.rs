//! Conversions between cel images and the [image](https://docs.rs/image)
//! crate. (Requires feature `utils`.)
//!
//! This module is not available by default. To use it, you must enable the
//! feature `utils` in your `Cargo.toml`.
//!
//! ```toml
//! [dependencies]
//! asecodec = { version = "0.1", features = ["utils"] }
//! ```

use image::RgbaImage;
use nohash::IntMap;
use std::convert::TryFrom;

use crate::{AsepriteError, Grayscale, Image, Palette, Pixels, Result, Rgba};

/// Convert an RGBA, grayscale, or indexed image into an `RgbaImage`.
///
/// Indexed pixels are looked up in `palette`. Pixels equal to
/// `transparent_index` (if given) and indexes outside the palette become
/// fully transparent. Tilemap images have no color and are rejected.
pub fn to_rgba_image(
    image: &Image,
    palette: &Palette,
    transparent_index: Option<u8>,
) -> Result<RgbaImage> {
    let mut data = Vec::with_capacity(image.pixels().len() * 4);
    match image.pixels() {
        Pixels::Rgba(pixels) => {
            for p in pixels {
                data.extend_from_slice(&[p.red, p.green, p.blue, p.alpha]);
            }
        }
        Pixels::Grayscale(pixels) => {
            for p in pixels {
                data.extend_from_slice(&[p.value, p.value, p.value, p.alpha]);
            }
        }
        Pixels::Indexed(pixels) => {
            for &index in pixels {
                let color = if Some(index) == transparent_index {
                    [0, 0, 0, 0]
                } else {
                    palette
                        .get(index as u32)
                        .map(|entry| entry.rgba)
                        .unwrap_or([0, 0, 0, 0])
                };
                data.extend_from_slice(&color);
            }
        }
        Pixels::Tilemap(_) => {
            return Err(AsepriteError::InvalidInput(
                "Tilemap images cannot be converted to RGBA".into(),
            ))
        }
    }
    RgbaImage::from_raw(image.width() as u32, image.height() as u32, data).ok_or_else(|| {
        AsepriteError::InternalError("Pixel buffer does not match image size".into())
    })
}

/// Convert an `RgbaImage` into an RGBA cel image.
///
/// Fails if either dimension does not fit into 16 bits.
pub fn from_rgba_image(image: &RgbaImage) -> Result<Image> {
    let (w, h) = image.dimensions();
    let width = u16::try_from(w)
        .map_err(|_| AsepriteError::InvalidInput(format!("Image width too large: {}", w)))?;
    let height = u16::try_from(h)
        .map_err(|_| AsepriteError::InvalidInput(format!("Image height too large: {}", h)))?;
    let pixels = image
        .pixels()
        .map(|c| Rgba::new(c.0[0], c.0[1], c.0[2], c.0[3]))
        .collect();
    Image::from_pixels(width, height, Pixels::Rgba(pixels))
}

/// Convert an `RgbaImage` into a grayscale cel image using the red channel as
/// the value.
pub fn grayscale_from_rgba_image(image: &RgbaImage) -> Result<Image> {
    let rgba = from_rgba_image(image)?;
    let pixels = match rgba.pixels() {
        Pixels::Rgba(pixels) => pixels
            .iter()
            .map(|p| Grayscale {
                value: p.red,
                alpha: p.alpha,
            })
            .collect(),
        _ => return Err(AsepriteError::InternalError("Expected RGBA pixels".into())),
    };
    Image::from_pixels(rgba.width(), rgba.height(), Pixels::Grayscale(pixels))
}

/// A helper for mapping `Rgba` values into indexes in a color palette.
pub struct PaletteMapper {
    map: IntMap<u32, u8>,
    transparent: u8,
    failure: u8,
}

/// Configuration of palette mapping.
pub struct MappingOptions {
    /// If pixel is not in the palette, use this index.
    pub failure: u8,
    /// If pixel is transparent (`alpha != 255`), use this index. If `None`
    /// transparent pixels are treated as failures.
    pub transparent: Option<u8>,
}

impl PaletteMapper {
    /// Create a new mapper from a color palette. Only the first 256 entries
    /// can be addressed by an indexed image. If a color occurs more than once
    /// the lowest index wins.
    pub fn new(palette: &Palette, options: MappingOptions) -> PaletteMapper {
        let mut map = IntMap::default();
        for (idx, entry) in palette.entries().iter().enumerate().take(256) {
            let [r, g, b, _] = entry.rgba;
            let _ = map.entry(color_key(r, g, b)).or_insert(idx as u8);
        }
        PaletteMapper {
            map,
            transparent: options.transparent.unwrap_or(options.failure),
            failure: options.failure,
        }
    }

    /// Look up a color in the palette.
    ///
    /// An `alpha` other than `255` is considered transparent. If the color
    /// is not in the palette returns the failure color.
    pub fn lookup(&self, r: u8, g: u8, b: u8, alpha: u8) -> u8 {
        if alpha != 255 {
            return self.transparent;
        }
        *self.map.get(&color_key(r, g, b)).unwrap_or(&self.failure)
    }
}

fn color_key(r: u8, g: u8, b: u8) -> u32 {
    r as u32 + ((g as u32) << 8) + ((b as u32) << 16)
}

/// Turn an `RgbaImage` into an indexed cel image.
///
/// # Example
///
/// ```
/// use asecodec::util::{from_rgba_image, to_indexed_image, to_rgba_image, MappingOptions, PaletteMapper};
/// use asecodec::{Palette, PaletteEntry, PixelFormat};
///
/// let palette = Palette::from_entries(0, vec![
///     PaletteEntry::new([0, 0, 0, 255]),
///     PaletteEntry::new([255, 0, 0, 255]),
/// ]);
/// let rgba = image::RgbaImage::from_raw(2, 1, vec![255, 0, 0, 255, 0, 0, 0, 0]).unwrap();
/// let mapper = PaletteMapper::new(&palette, MappingOptions { failure: 0, transparent: Some(0) });
/// let indexed = to_indexed_image(&rgba, &mapper).unwrap();
/// assert_eq!(indexed.format(), PixelFormat::Indexed);
///
/// let back = to_rgba_image(&indexed, &palette, Some(0)).unwrap();
/// assert_eq!(back, rgba);
/// # let _ = from_rgba_image(&rgba).unwrap();
/// ```
pub fn to_indexed_image(image: &RgbaImage, mapper: &PaletteMapper) -> Result<Image> {
    let rgba = from_rgba_image(image)?;
    let data = image
        .pixels()
        .map(|c| mapper.lookup(c.0[0], c.0[1], c.0[2], c.0[3]))
        .collect();
    Image::from_pixels(rgba.width(), rgba.height(), Pixels::Indexed(data))
}
