use std::io::Cursor;

use crate::error::Result;
use crate::format::stream::ByteStream;
use crate::palette::{ColorAtlas, ColorPalette, OrderedPalette, RgbaColor};

// Two on-wire layouts:
//   legacy:  u8 rows | u8 cols | u16 count | u8 default | u8 defaultBg |
//            RGBA[count] | bool[count]
//   current: u8 count | RGBA[count] | bool[count]
// The legacy editor defaults are consumed and discarded.

/// Decodes a palette payload (already unframed and inflated).
pub fn decode_palette(
    payload: &[u8],
    atlas: &mut ColorAtlas,
    legacy: bool,
) -> Result<ColorPalette> {
    let mut stream = ByteStream::new(Cursor::new(payload))?;
    let color_count = if legacy {
        stream.read_u8()?; // row count
        stream.read_u8()?; // column count
        let count = stream.read_u16()?;
        stream.read_u8()?; // default color
        stream.read_u8()?; // default background color
        count
    } else {
        u16::from(stream.read_u8()?)
    };

    let mut colors = Vec::with_capacity(usize::from(color_count));
    for _ in 0..color_count {
        colors.push(RgbaColor::new(
            stream.read_u8()?,
            stream.read_u8()?,
            stream.read_u8()?,
            stream.read_u8()?,
        ));
    }
    let mut emissive = Vec::with_capacity(usize::from(color_count));
    for _ in 0..color_count {
        emissive.push(stream.read_u8()? != 0);
    }

    Ok(ColorPalette::from_data(atlas, &colors, &emissive))
}

/// Encodes a palette in the current layout, passing it through its ordered
/// projection first. The returned mapping remaps in-memory block indices
/// to the serialized order.
pub fn encode_palette(palette: &ColorPalette) -> (Vec<u8>, Vec<u8>) {
    let OrderedPalette {
        colors,
        emissive,
        mapping,
    } = palette.ordered();

    let mut payload = Vec::with_capacity(1 + colors.len() * 5);
    payload.push(colors.len() as u8);
    for color in &colors {
        payload.extend_from_slice(&[color.r, color.g, color.b, color.a]);
    }
    for &flag in &emissive {
        payload.push(u8::from(flag));
    }
    (payload, mapping)
}
