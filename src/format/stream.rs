use std::io::{Read, Seek, SeekFrom, Write};

use glam::Vec3;

use crate::error::{P3sError, Result};

/// Cursor over a readable, seekable source. All multi-byte reads are
/// little-endian; any short read or out-of-bounds skip surfaces as
/// [`P3sError::Truncated`].
pub struct ByteStream<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> ByteStream<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let position = inner.stream_position()?;
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(position))?;
        Ok(Self { inner, len })
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn remaining(&mut self) -> Result<u64> {
        let position = self.position()?;
        Ok(self.len.saturating_sub(position))
    }

    pub fn skip(&mut self, count: u64) -> Result<()> {
        if count > self.remaining()? {
            return Err(P3sError::Truncated);
        }
        self.inner.seek(SeekFrom::Current(count as i64))?;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut bytes = [0u8; 1];
        self.inner.read_exact(&mut bytes)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut bytes = [0u8; 2];
        self.inner.read_exact(&mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.inner.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let mut bytes = [0u8; 4];
        self.inner.read_exact(&mut bytes)?;
        Ok(f32::from_le_bytes(bytes))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    /// Reads exactly `count` bytes into a fresh buffer, refusing before
    /// allocation when the stream cannot satisfy the request.
    pub fn read_exact_vec(&mut self, count: usize) -> Result<Vec<u8>> {
        if count as u64 > self.remaining()? {
            return Err(P3sError::Truncated);
        }
        let mut data = Vec::new();
        data.try_reserve_exact(count)?;
        data.resize(count, 0);
        self.inner.read_exact(&mut data)?;
        Ok(data)
    }
}

pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> Result<()> {
    writer.write_all(&[value])?;
    Ok(())
}

pub fn write_u16<W: Write>(writer: &mut W, value: u16) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_f32<W: Write>(writer: &mut W, value: f32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_vec3<W: Write>(writer: &mut W, value: Vec3) -> Result<()> {
    write_f32(writer, value.x)?;
    write_f32(writer, value.y)?;
    write_f32(writer, value.z)?;
    Ok(())
}
