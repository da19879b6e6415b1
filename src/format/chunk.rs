use std::io::{Read, Seek, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{P3sError, Result};
use crate::format::stream::{write_u32, write_u8, ByteStream};

// Two header shapes coexist. The caller decides which applies, purely by
// chunk id:
//   v5: id | u32 size | payload            (PREVIEW, and how unknown ids
//                                           are skipped)
//   v6: id | u32 stored | u8 compressed | u32 uncompressed | payload
//                                          (PALETTE*, SHAPE)

/// Reads the body of a v6 frame, the id byte already consumed, inflating
/// the payload when flagged.
pub fn read_v6_frame<R: Read + Seek>(stream: &mut ByteStream<R>) -> Result<Vec<u8>> {
    let stored_size = stream.read_u32()?;
    let is_compressed = stream.read_u8()?;
    let uncompressed_size = stream.read_u32()?;
    if stored_size == 0 || uncompressed_size == 0 {
        return Err(P3sError::BadChunk("empty v6 chunk payload".into()));
    }
    let payload = stream.read_exact_vec(stored_size as usize)?;
    if is_compressed == 0 {
        return Ok(payload);
    }
    inflate(&payload, uncompressed_size as usize)
}

/// Writes a v6 frame. `storedSize` is the byte count actually written to
/// the sink, so it is computed after compression.
pub fn write_v6_frame<W: Write>(
    writer: &mut W,
    chunk_id: u8,
    payload: &[u8],
    compress: bool,
) -> Result<()> {
    write_u8(writer, chunk_id)?;
    if compress {
        let deflated = deflate(payload)?;
        write_u32(writer, deflated.len() as u32)?;
        write_u8(writer, 1)?;
        write_u32(writer, payload.len() as u32)?;
        writer.write_all(&deflated)?;
    } else {
        write_u32(writer, payload.len() as u32)?;
        write_u8(writer, 0)?;
        write_u32(writer, payload.len() as u32)?;
        writer.write_all(payload)?;
    }
    Ok(())
}

/// Writes a v5 frame: id, size, raw payload.
pub fn write_v5_frame<W: Write>(writer: &mut W, chunk_id: u8, payload: &[u8]) -> Result<()> {
    write_u8(writer, chunk_id)?;
    write_u32(writer, payload.len() as u32)?;
    writer.write_all(payload)?;
    Ok(())
}

/// Skips a v5-framed chunk, the id byte already consumed. Unknown ids are
/// skipped this way; consumers treat the u32 after the id as a length.
pub fn skip_v5_frame<R: Read + Seek>(stream: &mut ByteStream<R>) -> Result<()> {
    let size = stream.read_u32()?;
    stream.skip(u64::from(size))
}

/// Skips a v6-framed chunk without inflating it.
pub fn skip_v6_frame<R: Read + Seek>(stream: &mut ByteStream<R>) -> Result<()> {
    let stored_size = stream.read_u32()?;
    // remainder of the header: compressed flag + uncompressed size
    stream.skip(u64::from(stored_size) + 5)
}

pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|_| P3sError::BadCompression)
}

pub fn inflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut inflated = Vec::new();
    inflated.try_reserve_exact(expected_len)?;
    ZlibDecoder::new(data)
        .read_to_end(&mut inflated)
        .map_err(|_| P3sError::BadCompression)?;
    if inflated.len() != expected_len {
        return Err(P3sError::BadCompression);
    }
    Ok(inflated)
}
