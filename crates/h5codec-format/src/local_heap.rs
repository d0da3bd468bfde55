//! HDF5 local heap: a header ("HEAP") pointing at one flat data segment
//! addressed by byte offset.

use crate::address::Address;
use crate::context::FileContext;
use crate::cursor::{ByteCursor, ByteWriter};
use crate::error::{FormatError, Result};

const HEAP_SIGNATURE: [u8; 4] = *b"HEAP";

/// Free-list offset the library writes when the list is empty.
const FREE_NULL: u64 = 1;

/// Parsed local heap header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeap {
    pub data_segment_size: u64,
    /// Offset of the first free block, if any.
    pub free_list_head: Option<u64>,
    pub data_segment_address: Address,
}

fn header_len(ctx: &FileContext) -> usize {
    8 + 2 * ctx.length_size as usize + ctx.offset_size as usize
}

impl LocalHeap {
    pub fn parse(file_data: &[u8], address: Address, ctx: &FileContext) -> Result<LocalHeap> {
        let pos = ctx.resolve_within(address, header_len(ctx), file_data.len())?;
        let mut c = ByteCursor::at(file_data, pos)?;
        c.expect_signature(&HEAP_SIGNATURE, "local heap")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                component: "local heap",
                version,
            });
        }
        c.skip(3)?;
        let data_segment_size = c.read_length(ctx.length_size)?;
        let free_raw = c.read_length(ctx.length_size)?;
        let all_ones = u64::MAX >> (64 - 8 * ctx.length_size as u32);
        let free_list_head = if free_raw == FREE_NULL || free_raw == all_ones {
            None
        } else if free_raw >= data_segment_size {
            return Err(FormatError::HeapOffsetOutOfRange {
                offset: free_raw,
                size: data_segment_size,
            });
        } else {
            Some(free_raw)
        };
        let data_segment_address = c
            .read_address(ctx.offset_size)?
            .require("local heap data segment")?;
        Ok(LocalHeap {
            data_segment_size,
            free_list_head,
            data_segment_address,
        })
    }

    /// The whole data segment.
    pub fn segment<'a>(&self, file_data: &'a [u8], ctx: &FileContext) -> Result<&'a [u8]> {
        let size = usize::try_from(self.data_segment_size).map_err(|_| {
            FormatError::HeapOffsetOutOfRange {
                offset: 0,
                size: self.data_segment_size,
            }
        })?;
        let start = ctx.resolve_within(self.data_segment_address, size, file_data.len())?;
        Ok(&file_data[start..start + size])
    }

    /// Bytes from `offset` to the end of the segment.
    pub fn read_bytes<'a>(
        &self,
        file_data: &'a [u8],
        ctx: &FileContext,
        offset: u64,
    ) -> Result<&'a [u8]> {
        let segment = self.segment(file_data, ctx)?;
        if offset >= self.data_segment_size {
            return Err(FormatError::HeapOffsetOutOfRange {
                offset,
                size: self.data_segment_size,
            });
        }
        Ok(&segment[offset as usize..])
    }

    /// NUL-terminated string at `offset`; the terminator must lie inside
    /// the segment.
    pub fn read_string(&self, file_data: &[u8], ctx: &FileContext, offset: u64) -> Result<String> {
        let mut c = ByteCursor::new(self.read_bytes(file_data, ctx, offset)?);
        let raw = c.read_cstring()?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

/// Builds a local heap. Every appended payload gets a NUL terminator and is
/// padded to 8 bytes, so offsets strictly increase.
#[derive(Debug, Clone)]
pub struct LocalHeapWriter {
    ctx: FileContext,
    segment: Vec<u8>,
    reserve: usize,
}

impl LocalHeapWriter {
    pub fn new(ctx: &FileContext) -> Self {
        LocalHeapWriter {
            ctx: *ctx,
            segment: Vec::new(),
            reserve: 0,
        }
    }

    /// Make the segment at least `bytes` long, leaving free space for later
    /// appends.
    pub fn with_reserve(mut self, bytes: usize) -> Self {
        self.reserve = (bytes + 7) & !7;
        self
    }

    pub fn append(&mut self, payload: &[u8]) -> u64 {
        let offset = self.segment.len() as u64;
        self.segment.extend_from_slice(payload);
        self.segment.push(0);
        let padded = (self.segment.len() + 7) & !7;
        self.segment.resize(padded, 0);
        offset
    }

    pub fn append_str(&mut self, s: &str) -> u64 {
        self.append(s.as_bytes())
    }

    pub fn segment_size(&self) -> usize {
        self.segment.len().max(self.reserve)
    }

    /// Header followed directly by the segment, for placement at `address`.
    pub fn serialize(&self, address: Address) -> Result<Vec<u8>> {
        let ls = self.ctx.length_size;
        let hlen = header_len(&self.ctx);
        let used = self.segment.len();
        let size = self.segment_size();
        let free = size - used;
        // a free block needs room for its next-offset and size fields
        let has_free_block = free >= 2 * ls as usize;
        let segment_address = address.require("local heap")?.offset_by(hlen as u64);

        let mut w = ByteWriter::with_capacity(hlen + size);
        w.write_bytes(&HEAP_SIGNATURE);
        w.write_u8(0);
        w.write_zeros(3);
        w.write_uint(size as u64, ls as usize);
        w.write_uint(if has_free_block { used as u64 } else { FREE_NULL }, ls as usize);
        w.write_address(segment_address, self.ctx.offset_size);
        w.write_bytes(&self.segment);
        if has_free_block {
            w.write_uint(FREE_NULL, ls as usize);
            w.write_uint(free as u64, ls as usize);
            w.write_zeros(free - 2 * ls as usize);
        } else {
            w.write_zeros(free);
        }
        Ok(w.into_inner())
    }
}
