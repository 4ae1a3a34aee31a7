use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Ed9Error, Result};

/// Little-endian reads at absolute offsets of a script buffer.
///
/// The reader never owns a cursor of its own; decoders carry their position
/// explicitly.
#[derive(Debug, Clone, Copy)]
pub struct BinaryReader<'a> {
    buf: &'a [u8],
}

/// A string read out of the pool, with a flag telling whether invalid UTF-8
/// had to be replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolString {
    pub text: String,
    pub lossy: bool,
}

impl<'a> BinaryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.buf
    }

    fn span(&self, what: &'static str, offset: usize, needed: usize) -> Result<&'a [u8]> {
        match offset.checked_add(needed) {
            Some(end) if end <= self.buf.len() => Ok(&self.buf[offset..end]),
            _ => Err(Ed9Error::TruncatedSection {
                what,
                offset,
                needed,
                len: self.buf.len(),
            }),
        }
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.span("u8", offset, 1)?[0])
    }

    pub fn read_i8(&self, offset: usize) -> Result<i8> {
        Ok(self.read_u8(offset)? as i8)
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.span("u16", offset, 2)?))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.span("u32", offset, 4)?))
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.span("i32", offset, 4)?))
    }

    pub fn read_f32(&self, offset: usize) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.span("f32", offset, 4)?))
    }

    /// Read a NUL-terminated UTF-8 string starting at `offset`.
    ///
    /// Invalid sequences are replaced with U+FFFD and reported through
    /// [`PoolString::lossy`]; a missing terminator is a truncation error.
    pub fn read_string_at(&self, offset: usize) -> Result<PoolString> {
        // bounds check only; the span itself is empty
        self.span("string", offset, 0)?;
        let rest = &self.buf[offset..];
        let end = rest.iter().position(|&b| b == 0).ok_or(Ed9Error::TruncatedSection {
            what: "string terminator",
            offset,
            needed: rest.len() + 1,
            len: self.buf.len(),
        })?;
        let raw = &rest[..end];
        Ok(match std::str::from_utf8(raw) {
            Ok(s) => PoolString {
                text: s.to_string(),
                lossy: false,
            },
            Err(_) => PoolString {
                text: String::from_utf8_lossy(raw).into_owned(),
                lossy: true,
            },
        })
    }
}

/// Append-only output buffer with in-place dword patching.
///
/// `io::Write` on a `Vec` never fails, so the writes drop their `io::Result`.
#[derive(Debug, Clone, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    /// Current end of the buffer, which is also the offset of the next write.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        let _ = self.buf.write_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        let _ = self.buf.write_i8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        let _ = self.buf.write_u16::<LittleEndian>(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        let _ = self.buf.write_u32::<LittleEndian>(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        let _ = self.buf.write_i32::<LittleEndian>(v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// UTF-8 bytes followed by a NUL.
    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Overwrite an already written dword.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let len = self.buf.len();
        match offset.checked_add(4) {
            Some(end) if end <= len => {
                LittleEndian::write_u32(&mut self.buf[offset..end], value);
                Ok(())
            }
            _ => Err(Ed9Error::OutOfRange { offset, len }),
        }
    }
}
