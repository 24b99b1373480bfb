//! Length-prefixed framed buffer codec (C1).
//!
//! Every protocol message in `message.rs` is built from three
//! primitives: a length-prefixed utf-8 string, a little-endian 64-bit
//! signed integer, and a length-prefixed opaque byte buffer. This
//! mirrors the `Gears_BufferWriter`/`Gears_BufferReader` call sequence
//! in the original consensus module field-for-field: whichever order
//! a C handler writes `name`, then the two longs, then occasionally a
//! value buffer, is the order `FramedWriter`/`FramedReader` are called
//! in here.
//!
//! The codec rejects truncated frames by returning [`CodecError`]
//! rather than panicking; per spec §4.1, "handlers MAY assume
//! well-formed frames from trusted peers", so most call sites simply
//! `.expect()` the result.

use crate::error::CodecError;

/// Writes length-prefixed fields into a growable byte buffer.
#[derive(Default)]
pub struct FramedWriter {
    buf: Vec<u8>,
}

impl FramedWriter {
    pub fn new() -> Self {
        FramedWriter { buf: Vec::new() }
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_buf(s.as_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_buf(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(b);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Reads length-prefixed fields back out of a byte slice, in the same
/// order they were written.
pub struct FramedReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FramedReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        FramedReader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_len(&mut self) -> Result<usize, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()) as usize)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_buf(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Bytes left unread. A well-formed frame should drain this to 0.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
