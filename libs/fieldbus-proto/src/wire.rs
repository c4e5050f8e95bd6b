//! Bounds-checked reader over raw payload bytes.
//!
//! Every field a decoder pulls off the wire goes through this cursor, so a
//! short or lying length field fails with `InvalidFormat` instead of
//! indexing past the buffer.

use crate::error::{ErrorCode, Result};

pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(ErrorCode::InvalidFormat);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a big-endian word.
    pub fn read_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(ErrorCode::InvalidFormat);
        }
        let v = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ErrorCode::InvalidFormat);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Fail unless the cursor consumed the whole buffer.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(ErrorCode::InvalidFormat);
        }
        Ok(())
    }
}
