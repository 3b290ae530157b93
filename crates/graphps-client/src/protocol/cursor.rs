//! Bounds-checked reader over a response buffer.

use super::DecodeError;
use bytes::Buf;

/// Sequential little-endian reader that validates the remaining length
/// before every read.
///
/// A read that would run past the end returns [`DecodeError::Truncated`]
/// and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: len,
                remaining: self.remaining(),
            });
        }
        let chunk = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(chunk)
    }

    /// Reads a little-endian u64.
    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let mut chunk = self.take(8)?;
        Ok(chunk.get_u64_le())
    }

    /// Reads a little-endian i32.
    pub fn read_i32_le(&mut self) -> Result<i32, DecodeError> {
        let mut chunk = self.take(4)?;
        Ok(chunk.get_i32_le())
    }

    /// Reads a little-endian f32.
    pub fn read_f32_le(&mut self) -> Result<f32, DecodeError> {
        let mut chunk = self.take(4)?;
        Ok(chunk.get_f32_le())
    }

    /// Borrows the next `len` bytes.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    /// Splits off a sub-cursor over the next `len` bytes.
    pub fn sub_cursor(&mut self, len: usize) -> Result<ByteCursor<'a>, DecodeError> {
        self.take(len).map(ByteCursor::new)
    }
}
