use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use crate::error::{P3sError, Result};
use crate::format::chunk;
use crate::format::palette::{decode_palette, encode_palette};
use crate::format::shape::{read_shape_chunk, write_shape_tree};
use crate::format::stream::{write_u32, write_u8, ByteStream};
use crate::format::{
    Asset, AssetFilter, LoadShapeSettings, CHUNK_ID_PALETTE, CHUNK_ID_PALETTE_ID,
    CHUNK_ID_PALETTE_LEGACY, CHUNK_ID_PREVIEW, CHUNK_ID_SHAPE, COMPRESSION_METHOD_COUNT,
    COMPRESSION_ZIP, FORMAT_VERSION, MAGIC_BYTES,
};
use crate::palette::{ColorAtlas, ColorPalette, PALETTE_ID_CUSTOM, PALETTE_ID_IOS_ITEM_EDITOR_LEGACY};
use crate::shape::{PaletteHandle, ShapeHandle};

// Header: MagicBytes | u32 version | u8 algo | u32 totalSize, then
// totalSize bytes of chunks. The algo byte only signals that chunks *may*
// be compressed.

fn read_scene_header<R: Read + Seek>(stream: &mut ByteStream<R>) -> Result<u32> {
    let magic = stream.read_exact_vec(MAGIC_BYTES.len())?;
    if magic != MAGIC_BYTES {
        return Err(P3sError::BadMagic);
    }
    let version = stream.read_u32()?;
    if version != FORMAT_VERSION {
        return Err(P3sError::UnsupportedVersion(version));
    }
    let algo = stream.read_u8()?;
    if algo >= COMPRESSION_METHOD_COUNT {
        return Err(P3sError::BadCompression);
    }
    stream.read_u32()
}

/// Loads every asset of a v6 container, in declaration order.
///
/// `atlas` is borrowed for the duration of the call so palette colors land
/// in the caller's interner. Chunks whose kind the filter rejects are
/// still parsed when later chunks may depend on them (a file palette
/// drives SINGLE-mode shapes), but stay out of the result.
pub fn load_assets<R: Read + Seek>(
    reader: R,
    atlas: &mut ColorAtlas,
    filter: AssetFilter,
    settings: &LoadShapeSettings,
) -> Result<Vec<Asset>> {
    let mut stream = ByteStream::new(reader)?;
    let total_size = read_scene_header(&mut stream)?;
    let chunks_end = stream.position()? + u64::from(total_size);

    let mut assets = Vec::new();
    let mut shapes: Vec<ShapeHandle> = Vec::new();
    let mut file_palette: Option<PaletteHandle> = None;
    let mut root_shape_palette: Option<PaletteHandle> = None;
    let mut palette_id = PALETTE_ID_IOS_ITEM_EDITOR_LEGACY;

    while stream.position()? < chunks_end {
        let chunk_id = stream.read_u8()?;
        match chunk_id {
            CHUNK_ID_PALETTE | CHUNK_ID_PALETTE_LEGACY => {
                let payload = chunk::read_v6_frame(&mut stream)?;
                let palette =
                    decode_palette(&payload, atlas, chunk_id == CHUNK_ID_PALETTE_LEGACY)?;
                let handle: PaletteHandle = Rc::new(RefCell::new(palette));
                palette_id = PALETTE_ID_CUSTOM;
                if filter.accepts_palettes() {
                    assets.push(Asset::Palette(handle.clone()));
                }
                file_palette = Some(handle);
            }
            CHUNK_ID_PALETTE_ID => {
                let payload = chunk::read_v6_frame(&mut stream)?;
                palette_id = payload[0];
            }
            CHUNK_ID_SHAPE => {
                let shape = read_shape_chunk(
                    &mut stream,
                    &mut shapes,
                    settings,
                    atlas,
                    file_palette.as_ref(),
                    palette_id,
                    &mut root_shape_palette,
                )?;
                if filter.accepts_shapes() {
                    assets.push(Asset::Shape(shape));
                }
            }
            CHUNK_ID_PREVIEW => {
                chunk::skip_v5_frame(&mut stream)?;
            }
            _ => {
                log::debug!("skipping unknown chunk id {chunk_id}");
                chunk::skip_v5_frame(&mut stream)?;
            }
        }
    }

    Ok(assets)
}

/// Scans a v6 container until the PREVIEW chunk and returns its raw
/// payload, or `None` when the file carries no preview. Shape and palette
/// chunks are skipped by their headers and never inflated.
pub fn get_preview<R: Read + Seek>(reader: R) -> Result<Option<Vec<u8>>> {
    let mut stream = ByteStream::new(reader)?;
    let total_size = read_scene_header(&mut stream)?;
    let chunks_end = stream.position()? + u64::from(total_size);

    while stream.position()? < chunks_end {
        let chunk_id = stream.read_u8()?;
        match chunk_id {
            CHUNK_ID_PREVIEW => {
                let size = stream.read_u32()?;
                if size == 0 {
                    return Err(P3sError::BadChunk("empty preview chunk".into()));
                }
                return stream.read_exact_vec(size as usize).map(Some);
            }
            CHUNK_ID_SHAPE | CHUNK_ID_PALETTE | CHUNK_ID_PALETTE_LEGACY | CHUNK_ID_PALETTE_ID => {
                chunk::skip_v6_frame(&mut stream)?;
            }
            _ => {
                chunk::skip_v5_frame(&mut stream)?;
            }
        }
    }

    Ok(None)
}

/// Serializes a shape tree (pre-order, ids from 1) to a seekable sink.
/// `shape` may be `None` for an empty scene: the result is just the
/// header with `totalSize = 0`.
pub fn save_shape<W: Write + Seek>(
    mut writer: W,
    shape: Option<&ShapeHandle>,
    preview: Option<&[u8]>,
) -> Result<()> {
    writer.write_all(MAGIC_BYTES)?;
    write_u32(&mut writer, FORMAT_VERSION)?;
    write_u8(&mut writer, COMPRESSION_ZIP)?;

    let total_size_at = writer.stream_position()?;
    write_u32(&mut writer, 0)?;
    let chunks_start = writer.stream_position()?;

    if let Some(preview) = preview.filter(|bytes| !bytes.is_empty()) {
        chunk::write_v5_frame(&mut writer, CHUNK_ID_PREVIEW, preview)?;
    }
    if let Some(root) = shape {
        let shared_palette = root.borrow().palette.clone();
        let shared_mapping = shared_palette
            .as_ref()
            .map(|palette| palette.borrow().ordered().mapping);
        let mut next_id = 1u16;
        write_shape_tree(
            &mut writer,
            root,
            &mut next_id,
            0,
            shared_palette.as_ref(),
            shared_mapping.as_deref(),
        )?;
    }

    // patch the total size now that the chunk region is known
    let end = writer.stream_position()?;
    writer.seek(SeekFrom::Start(total_size_at))?;
    write_u32(&mut writer, (end - chunks_start) as u32)?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

/// Same as [`save_shape`], into a freshly allocated buffer, optionally
/// preceding the shapes with a standalone artist palette chunk.
pub fn save_shape_to_buffer(
    shape: Option<&ShapeHandle>,
    artist_palette: Option<&ColorPalette>,
    preview: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(MAGIC_BYTES);
    write_u32(&mut buffer, FORMAT_VERSION)?;
    write_u8(&mut buffer, COMPRESSION_ZIP)?;

    let total_size_at = buffer.len();
    write_u32(&mut buffer, 0)?;
    let chunks_start = buffer.len();

    if let Some(preview) = preview.filter(|bytes| !bytes.is_empty()) {
        chunk::write_v5_frame(&mut buffer, CHUNK_ID_PREVIEW, preview)?;
    }
    if let Some(palette) = artist_palette {
        let (payload, _) = encode_palette(palette);
        chunk::write_v6_frame(&mut buffer, CHUNK_ID_PALETTE, &payload, true)?;
    }
    if let Some(root) = shape {
        let shared_palette = root.borrow().palette.clone();
        let shared_mapping = shared_palette
            .as_ref()
            .map(|palette| palette.borrow().ordered().mapping);
        let mut next_id = 1u16;
        write_shape_tree(
            &mut buffer,
            root,
            &mut next_id,
            0,
            shared_palette.as_ref(),
            shared_mapping.as_deref(),
        )?;
    }

    let total = (buffer.len() - chunks_start) as u32;
    buffer[total_size_at..total_size_at + 4].copy_from_slice(&total.to_le_bytes());
    Ok(buffer)
}
