//! Positional byte reader and writer.
//!
//! `ByteCursor` reads primitives from a borrowed buffer and never reads past
//! its window end; `ByteWriter` is the growable counterpart used by every
//! encoder. Both default to little-endian, the byte order of all HDF5
//! metadata.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::address::Address;
use crate::error::{FormatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Bytes needed to hold any value up to `max` (at least one).
///
/// Used for the variable-width fields whose width the reader derives from a
/// known maximum: compound member offsets, B-tree v2 record counts, and
/// filtered chunk sizes.
pub fn encoded_width(max: u64) -> usize {
    if max == 0 {
        1
    } else {
        (63 - max.leading_zeros() as usize) / 8 + 1
    }
}

fn check_width(size: u8) -> Result<usize> {
    match size {
        2 | 4 | 8 => Ok(size as usize),
        _ => Err(FormatError::InvalidOffsetSize(size)),
    }
}

/// Read-only cursor over `data[pos..end]`.
///
/// Positions are absolute within `data`, so a sub-cursor made with
/// [`window`](Self::window) still reports file positions.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
    endian: Endian,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor {
            data,
            pos: 0,
            end: data.len(),
            endian: Endian::Little,
        }
    }

    /// Cursor positioned at `pos`.
    pub fn at(data: &'a [u8], pos: usize) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        cursor.seek(pos)?;
        Ok(cursor)
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// The whole underlying buffer, ignoring the window.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.end {
            return Err(FormatError::UnexpectedEof {
                expected: pos,
                available: self.end,
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// Split off the next `len` bytes as a bounded cursor and move past them.
    pub fn window(&mut self, len: usize) -> Result<ByteCursor<'a>> {
        let start = self.pos;
        self.take(len)?;
        Ok(ByteCursor {
            data: self.data,
            pos: start,
            end: start + len,
            endian: self.endian,
        })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.end).ok_or(
            FormatError::UnexpectedEof {
                expected: self.pos.saturating_add(n),
                available: self.end,
            },
        )?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        if self.pos < self.end {
            Ok(self.data[self.pos])
        } else {
            Err(FormatError::UnexpectedEof {
                expected: self.pos + 1,
                available: self.end,
            })
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_u16(b),
            Endian::Big => BigEndian::read_u16(b),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_u32(b),
            Endian::Big => BigEndian::read_u32(b),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_u64(b),
            Endian::Big => BigEndian::read_u64(b),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Unsigned integer of 1..=8 bytes in the cursor's byte order.
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        if width == 0 || width > 8 {
            return Err(FormatError::InvalidInput(format!(
                "integer width {width} outside 1..=8"
            )));
        }
        let b = self.take(width)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_uint(b, width),
            Endian::Big => BigEndian::read_uint(b, width),
        })
    }

    /// File offset of `size` bytes (2, 4, or 8).
    pub fn read_offset(&mut self, size: u8) -> Result<u64> {
        let width = check_width(size)?;
        self.read_uint(width)
    }

    /// Length field of `size` bytes (2, 4, or 8).
    pub fn read_length(&mut self, size: u8) -> Result<u64> {
        match size {
            2 | 4 | 8 => self.read_uint(size as usize),
            _ => Err(FormatError::InvalidLengthSize(size)),
        }
    }

    /// Address field; all-ones of the given width becomes [`Address::UNDEFINED`].
    pub fn read_address(&mut self, size: u8) -> Result<Address> {
        let width = check_width(size)?;
        let raw = self.read_uint(width)?;
        let all_ones = if width == 8 { u64::MAX } else { (1u64 << (width * 8)) - 1 };
        Ok(if raw == all_ones {
            Address::UNDEFINED
        } else {
            Address(raw)
        })
    }

    pub fn expect_signature(&mut self, signature: &[u8; 4], structure: &'static str) -> Result<()> {
        let found: [u8; 4] = self.read_array()?;
        if &found != signature {
            return Err(FormatError::InvalidSignature { structure, found });
        }
        Ok(())
    }

    /// Bytes up to the next NUL (exclusive); the cursor moves past the NUL.
    /// The search never leaves the window.
    pub fn read_cstring(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..self.end];
        let nul = rest.iter().position(|&b| b == 0).ok_or(FormatError::UnexpectedEof {
            expected: self.end + 1,
            available: self.end,
        })?;
        let s = self.take(nul)?;
        self.pos += 1;
        Ok(s)
    }

    /// Advance so that `position - base` is a multiple of `boundary`.
    pub fn align_to(&mut self, base: usize, boundary: usize) -> Result<()> {
        if boundary <= 1 {
            return Ok(());
        }
        let rel = self.pos.saturating_sub(base);
        let pad = (boundary - rel % boundary) % boundary;
        self.skip(pad)
    }
}

/// Growable output buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
    endian: Endian,
}

impl ByteWriter {
    pub fn new() -> Self {
        ByteWriter::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteWriter {
            buf: Vec::with_capacity(capacity),
            endian: Endian::Little,
        }
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_uint(v as u64, 2);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_uint(v as u64, 4);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_uint(v, 8);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_u64(v as u64);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    /// Low `width` bytes of `v` (1..=8) in the writer's byte order.
    pub fn write_uint(&mut self, v: u64, width: usize) {
        let width = width.clamp(1, 8);
        let mut tmp = [0u8; 8];
        match self.endian {
            Endian::Little => LittleEndian::write_u64(&mut tmp, v),
            Endian::Big => BigEndian::write_u64(&mut tmp, v),
        }
        match self.endian {
            Endian::Little => self.buf.extend_from_slice(&tmp[..width]),
            Endian::Big => self.buf.extend_from_slice(&tmp[8 - width..]),
        }
    }

    pub fn write_offset(&mut self, v: u64, size: u8) {
        self.write_uint(v, size as usize);
    }

    /// Address field; [`Address::UNDEFINED`] becomes all-ones of the width.
    pub fn write_address(&mut self, address: Address, size: u8) {
        if address.is_undefined() {
            self.write_zeros_of(0xff, size as usize);
        } else {
            self.write_uint(address.value(), size as usize);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_zeros(&mut self, n: usize) {
        self.write_zeros_of(0, n);
    }

    fn write_zeros_of(&mut self, fill: u8, n: usize) {
        self.buf.resize(self.buf.len() + n, fill);
    }

    /// Overwrite already written bytes at `pos`.
    pub fn write_at(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        let end = pos + bytes.len();
        if end > self.buf.len() {
            return Err(FormatError::UnexpectedEof {
                expected: end,
                available: self.buf.len(),
            });
        }
        self.buf[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_u32_at(&mut self, pos: usize, v: u32) -> Result<()> {
        let mut tmp = [0u8; 4];
        match self.endian {
            Endian::Little => LittleEndian::write_u32(&mut tmp, v),
            Endian::Big => BigEndian::write_u32(&mut tmp, v),
        }
        self.write_at(pos, &tmp)
    }

    /// Zero-pad until the length is a multiple of `boundary`.
    pub fn align_to(&mut self, boundary: usize) {
        if boundary > 1 {
            let pad = (boundary - self.buf.len() % boundary) % boundary;
            self.write_zeros(pad);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
