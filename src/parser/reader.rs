//! A checked cursor over the immutable bytes of a function body.
//!
//! Every read is bounds-checked and reports failure as a [`ReadError`]
//! instead of panicking, so truncated or over-long encodings surface as
//! validation errors. Positions are tracked relative to the body; `offset`
//! adds the body's module-relative base for diagnostics.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("unexpected end of code")]
    UnexpectedEof,

    #[error("integer representation too long")]
    TooLong,

    #[error("integer too large")]
    Overflow,
}

#[derive(Debug, Clone)]
pub struct CodeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: u32,
}

impl<'a> CodeReader<'a> {
    pub fn new(bytes: &'a [u8], base: u32) -> CodeReader<'a> {
        CodeReader { bytes, pos: 0, base }
    }

    // Basic operations --------------------------------------------------------
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Module-relative offset of the next byte.
    pub fn offset(&self) -> u32 {
        self.offset_at(self.pos)
    }

    /// Saturates at `u32::MAX` for positions past the addressable range.
    pub fn offset_at(&self, pos: usize) -> u32 {
        u32::try_from(pos).map_or(u32::MAX, |pos| self.base.saturating_add(pos))
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Bytes surrounding `pos`, for diagnostics.
    pub fn window(&self, pos: usize, radius: usize) -> &'a [u8] {
        let start = pos.saturating_sub(radius).min(self.bytes.len());
        let end = pos.saturating_add(radius).min(self.bytes.len());
        &self.bytes[start..end]
    }

    fn next_byte(&mut self) -> Result<u8, ReadError> {
        let byte = *self.bytes.get(self.pos).ok_or(ReadError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_array<const N: usize>(&mut self) -> Result<&'a [u8], ReadError> {
        if self.remaining() < N {
            return Err(ReadError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + N];
        self.pos += N;
        Ok(slice)
    }

    // Read and interpret types ------------------------------------------------

    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        self.next_byte()
    }

    pub fn read_vu32(&mut self) -> Result<u32, ReadError> {
        read_vu32(&mut || self.next_byte())
    }

    pub fn read_vs32(&mut self) -> Result<i32, ReadError> {
        read_vs32(&mut || self.next_byte())
    }

    pub fn read_vs64(&mut self) -> Result<i64, ReadError> {
        read_vs64(&mut || self.next_byte())
    }

    /// Raw little-endian bit pattern of an f32 immediate; NaN payloads are preserved.
    pub fn read_f32_bits(&mut self) -> Result<u32, ReadError> {
        self.read_array::<4>().map(LittleEndian::read_u32)
    }

    pub fn read_f64_bits(&mut self) -> Result<u64, ReadError> {
        self.read_array::<8>().map(LittleEndian::read_u64)
    }
}

fn read_vu<F>(reader: &mut F, size: u32) -> Result<u64, ReadError>
where
    F: FnMut() -> Result<u8, ReadError>,
{
    let mut result: u64 = 0;
    let max_bytes = (size + 6) / 7;

    for i in 0..max_bytes {
        let b = reader()?;
        let shift = 7 * i;
        result |= ((b & 0x7f) as u64) << shift;
        if (b & 0x80) == 0 {
            // bits past `size` in the final byte must be zero
            if i == max_bytes - 1 && ((b & 0x7f) as u32) >> (size - shift) != 0 {
                return Err(ReadError::Overflow);
            }
            return Ok(result);
        }
    }

    Err(ReadError::TooLong)
}

pub fn read_vu32<F>(reader: &mut F) -> Result<u32, ReadError>
where
    F: FnMut() -> Result<u8, ReadError>,
{
    read_vu(reader, 32).map(|v| v as u32)
}

fn read_vs<F>(reader: &mut F, size: u32) -> Result<i64, ReadError>
where
    F: FnMut() -> Result<u8, ReadError>,
{
    let mut result: i64 = 0;
    let max_bytes = (size + 6) / 7;

    for i in 0..max_bytes {
        let b = reader()?;
        let shift = 7 * i;
        result |= ((b & 0x7f) as i64) << shift;
        if (b & 0x80) == 0 {
            if i == max_bytes - 1 {
                // the sign bit and everything above it must agree
                let remaining = size - shift;
                let high = (b & 0x7f) >> (remaining - 1);
                if high != 0 && high != (0x7f >> (remaining - 1)) {
                    return Err(ReadError::Overflow);
                }
            } else if (b & 0x40) != 0 {
                result |= -1i64 << (shift + 7);
            }
            return Ok(result);
        }
    }

    Err(ReadError::TooLong)
}

pub fn read_vs64<F>(reader: &mut F) -> Result<i64, ReadError>
where
    F: FnMut() -> Result<u8, ReadError>,
{
    read_vs(reader, 64)
}

pub fn read_vs32<F>(reader: &mut F) -> Result<i32, ReadError>
where
    F: FnMut() -> Result<u8, ReadError>,
{
    read_vs(reader, 32).map(|v| v as i32)
}
