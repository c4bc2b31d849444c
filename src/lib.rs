#![warn(clippy::all)]
#![warn(missing_docs)]
/*!

Reading and writing [Aseprite](https://www.aseprite.org/) sprite files. This
library decodes the binary `.aseprite`/`.ase` format ([file format
specification][spec]) into an in-memory [Document] and encodes a document
back into the same format. Layers, cels, palettes, tags, slices, tilesets,
user data, and color profiles all survive a round trip.

Note that this library can be rather slow when compiled without optimizations
since cel data is zlib compressed. We recommend that you override the
optimization settings for this dependency in dev mode by adding the following
to your `Cargo.toml`:

```text
[profile.dev.package.asecodec]
opt-level = 2  # or 3
```

[spec]: https://github.com/aseprite/aseprite/blob/master/docs/ase-file-specs.md

# Basic Usage

## Decode a file

Use [decode] (or [Document::read_file]) to load a sprite. Damaged chunks do
not abort the whole file; they are skipped and reported as [Warning]s.

```
# use asecodec::{ColorMode, Document};
# let bytes = Document::new(8, 8, ColorMode::Indexed).to_bytes().unwrap();
let (doc, warnings) = asecodec::decode(&bytes[..]).unwrap();

println!("Size: {}x{}", doc.width(), doc.height());
println!("Frames: {}", doc.num_frames());
println!("Layers: {}", doc.layers().len());
for warning in &warnings {
    println!("{}", warning);
}
```

## Build and encode a sprite

```
use asecodec::{Cel, ColorMode, Document, Image, Layer, LayerKind, Pixels, Rgba};

let mut doc = Document::new(2, 1, ColorMode::Rgba);
let layer = doc.add_layer(None, Layer::new(LayerKind::Image, "Background")).unwrap();
let red = Rgba::new(255, 0, 0, 255);
let image = Image::from_pixels(2, 1, Pixels::Rgba(vec![red, red])).unwrap();
doc.add_cel(layer, 0, Cel::new(image)).unwrap();

let bytes = doc.to_bytes().unwrap();
assert_eq!(&bytes[4..6], &[0xE0, 0xA5]);
```

## Export part of a sprite

A [RegionOfInterest] restricts the encoder to a frame range, a tag, or a
single slice. Linked cels that point outside the range are re-pointed.

```
# use asecodec::{ColorMode, Document, RegionOfInterest};
# use std::io::Cursor;
# let mut doc = Document::new(8, 8, ColorMode::Rgba);
# doc.set_total_frames(4).unwrap();
let roi = RegionOfInterest::frames(1, 2);
let out = asecodec::encode(&doc, &roi, Cursor::new(Vec::new())).unwrap();
let (part, _) = asecodec::decode(&out.get_ref()[..]).unwrap();
assert_eq!(part.num_frames(), 2);
```

*/

pub(crate) mod cel;
pub(crate) mod color_profile;
pub(crate) mod compress;
pub(crate) mod delegate;
pub(crate) mod document;
pub(crate) mod error;
pub(crate) mod external_file;
pub(crate) mod header;
pub(crate) mod layer;
pub(crate) mod palette;
pub(crate) mod parse;
pub(crate) mod pixel;
pub(crate) mod reader;
pub(crate) mod slice;
pub(crate) mod tags;
#[cfg(test)]
mod tests;
pub(crate) mod tile;
pub(crate) mod tileset;
pub(crate) mod user_data;
#[cfg(feature = "utils")]
pub mod util;
pub(crate) mod write;
pub(crate) mod writer;

/// A specialized `Result` type for Aseprite decoding and encoding.
pub type Result<T> = std::result::Result<T, AsepriteError>;

pub use cel::{Cel, CelData, CelDataRef, PreciseBounds};
pub use color_profile::{ColorProfile, ColorProfileKind};
pub use delegate::{DecodeDelegate, EncodeDelegate};
pub use document::{ColorMode, Document};
pub use error::{AsepriteError, Warning};
pub use external_file::{ExternalFile, ExternalFileKind, ExternalFiles};
pub use layer::{BlendMode, Layer, LayerFlags, LayerId, LayerKind, LayerTree};
pub use palette::{Palette, PaletteEntry};
pub use parse::{decode, decode_with};
pub use pixel::{Grayscale, Image, PixelFormat, Pixels, Rgba};
pub use slice::{Rect, Slice, SliceKey};
pub use tags::{AnimationDirection, Tag};
pub use tile::Tile;
pub use tileset::{ExternalTilesetReference, Tileset, Tilesets};
pub use user_data::{Property, PropertyMap, UserData};
pub use write::{encode, encode_with, RegionOfInterest};
