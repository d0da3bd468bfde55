//! HDF5 fractal heap reader.
//!
//! Managed objects live in direct blocks ("FHDB") reached through a
//! doubling table of indirect blocks ("FHIB"). Heap IDs carry a version and
//! a type in their first byte: managed IDs encode (offset, length), tiny IDs
//! embed the object, huge IDs point into a separate B-tree that this reader
//! does not follow.

use std::collections::HashMap;

use tracing::trace;

use crate::address::Address;
use crate::checksum::{self, jenkins_lookup3};
use crate::context::FileContext;
use crate::cursor::{encoded_width, ByteCursor};
use crate::error::{FormatError, Result};

const FRHP_SIGNATURE: [u8; 4] = *b"FRHP";
const FHIB_SIGNATURE: [u8; 4] = *b"FHIB";
const FHDB_SIGNATURE: [u8; 4] = *b"FHDB";

/// Heap flag: direct blocks carry a checksum.
const FLAG_CHECKSUM_DIRECT: u8 = 0x02;

/// Heap IDs at most this long use the one-byte tiny length form.
const TINY_SHORT_FORM_MAX: u16 = 18;

const MAX_INDIRECT_DEPTH: usize = 64;

/// Parsed "FRHP" header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FractalHeapHeader {
    pub heap_id_length: u16,
    pub io_filter_encoded_length: u16,
    pub flags: u8,
    pub max_managed_object_size: u32,
    pub huge_object_btree_address: Address,
    pub managed_objects_count: u64,
    pub huge_objects_count: u64,
    pub tiny_objects_count: u64,
    pub table_width: u16,
    pub starting_block_size: u64,
    pub max_direct_block_size: u64,
    /// Width in bits of heap offsets.
    pub max_heap_size: u16,
    pub starting_root_rows: u16,
    pub root_block_address: Address,
    /// 0 means the root is a single direct block.
    pub current_root_rows: u16,
}

impl FractalHeapHeader {
    pub fn parse(file_data: &[u8], address: Address, ctx: &FileContext) -> Result<Self> {
        let start = ctx.resolve(address)?;
        let mut c = ByteCursor::at(file_data, start)?;
        c.expect_signature(&FRHP_SIGNATURE, "fractal heap")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                component: "fractal heap",
                version,
            });
        }
        let (os, ls) = (ctx.offset_size, ctx.length_size);

        let heap_id_length = c.read_u16()?;
        let io_filter_encoded_length = c.read_u16()?;
        let flags = c.read_u8()?;
        let max_managed_object_size = c.read_u32()?;
        let _next_huge_id = c.read_length(ls)?;
        let huge_object_btree_address = c.read_address(os)?;
        let _free_space = c.read_length(ls)?;
        let _free_space_manager = c.read_address(os)?;
        let _managed_space = c.read_length(ls)?;
        let _allocated_space = c.read_length(ls)?;
        let _iterator_offset = c.read_length(ls)?;
        let managed_objects_count = c.read_length(ls)?;
        let _huge_size = c.read_length(ls)?;
        let huge_objects_count = c.read_length(ls)?;
        let _tiny_size = c.read_length(ls)?;
        let tiny_objects_count = c.read_length(ls)?;
        let table_width = c.read_u16()?;
        let starting_block_size = c.read_length(ls)?;
        let max_direct_block_size = c.read_length(ls)?;
        let max_heap_size = c.read_u16()?;
        let starting_root_rows = c.read_u16()?;
        let root_block_address = c.read_address(os)?;
        let current_root_rows = c.read_u16()?;
        if io_filter_encoded_length > 0 {
            let _filtered_root_size = c.read_length(ls)?;
            let _filter_mask = c.read_u32()?;
            c.skip(io_filter_encoded_length as usize)?;
        }
        checksum::verify(&file_data[start..], c.position() - start, "fractal heap header")?;

        let header = FractalHeapHeader {
            heap_id_length,
            io_filter_encoded_length,
            flags,
            max_managed_object_size,
            huge_object_btree_address,
            managed_objects_count,
            huge_objects_count,
            tiny_objects_count,
            table_width,
            starting_block_size,
            max_direct_block_size,
            max_heap_size,
            starting_root_rows,
            root_block_address,
            current_root_rows,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        let bad = |what: &str| Err(FormatError::MalformedHeap(what.to_string()));
        if self.table_width == 0 || !self.table_width.is_power_of_two() {
            return bad("table width is not a power of two");
        }
        if self.starting_block_size == 0 || !self.starting_block_size.is_power_of_two() {
            return bad("starting block size is not a power of two");
        }
        if !self.max_direct_block_size.is_power_of_two()
            || self.max_direct_block_size < self.starting_block_size
        {
            return bad("maximum direct block size is invalid");
        }
        if !(1..=64).contains(&self.max_heap_size) {
            return bad("heap offset width outside 1..=64 bits");
        }
        Ok(())
    }

    /// Bytes used by a managed heap ID's offset field.
    pub fn offset_bytes(&self) -> usize {
        (self.max_heap_size as usize).div_ceil(8)
    }

    /// Bytes used by a managed heap ID's length field.
    pub fn length_bytes(&self) -> usize {
        let by_block = (self.max_direct_block_size.ilog2() as usize).div_ceil(8);
        by_block.min(encoded_width(self.max_managed_object_size as u64))
    }

    /// Rows of the doubling table that hold direct blocks.
    pub fn max_direct_rows(&self) -> usize {
        (self.max_direct_block_size.ilog2() - self.starting_block_size.ilog2()) as usize + 2
    }

    /// Size of each block in `row` of the doubling table.
    pub fn row_block_size(&self, row: usize) -> Result<u64> {
        if row == 0 {
            return Ok(self.starting_block_size);
        }
        let shift = row - 1;
        if shift + self.starting_block_size.ilog2() as usize >= 64 {
            return Err(FormatError::MalformedHeap(format!(
                "doubling table row {row} too large"
            )));
        }
        Ok(self.starting_block_size << shift)
    }

    /// Rows in an indirect block spanning `block_size` bytes.
    fn child_rows(&self, block_size: u64) -> u16 {
        let first_row_bits = self.starting_block_size.ilog2() + (self.table_width as u64).ilog2();
        (block_size.ilog2().saturating_sub(first_row_bits) + 1) as u16
    }

    fn checksums_direct_blocks(&self) -> bool {
        self.flags & FLAG_CHECKSUM_DIRECT != 0
    }
}

/// Decoded heap ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapId {
    Managed { offset: u64, length: u64 },
    Huge,
    Tiny(Vec<u8>),
}

impl HeapId {
    pub fn parse(id: &[u8], header: &FractalHeapHeader) -> Result<HeapId> {
        let mut c = ByteCursor::new(id);
        let flags = c.read_u8()?;
        let version = flags >> 6;
        if version != 0 {
            return Err(FormatError::InvalidHeapId(format!("version {version}")));
        }
        match (flags >> 4) & 0x03 {
            0 => {
                let offset = c.read_uint(header.offset_bytes())?;
                let length = c.read_uint(header.length_bytes())?;
                Ok(HeapId::Managed { offset, length })
            }
            1 => Ok(HeapId::Huge),
            2 => {
                let len = if header.heap_id_length <= TINY_SHORT_FORM_MAX {
                    (flags & 0x0f) as usize + 1
                } else {
                    ((((flags & 0x0f) as usize) << 8) | c.read_u8()? as usize) + 1
                };
                Ok(HeapId::Tiny(c.read_bytes(len)?.to_vec()))
            }
            t => Err(FormatError::InvalidHeapId(format!("type {t}"))),
        }
    }
}

/// Reader over one fractal heap, caching managed objects by heap offset.
#[derive(Debug)]
pub struct FractalHeap<'a> {
    file_data: &'a [u8],
    ctx: FileContext,
    header: FractalHeapHeader,
    cache: HashMap<u64, Vec<u8>>,
}

impl<'a> FractalHeap<'a> {
    pub fn open(file_data: &'a [u8], address: Address, ctx: &FileContext) -> Result<Self> {
        let header = FractalHeapHeader::parse(file_data, address, ctx)?;
        trace!(
            address = %address,
            root = %header.root_block_address,
            rows = header.current_root_rows,
            "opened fractal heap"
        );
        Ok(FractalHeap {
            file_data,
            ctx: *ctx,
            header,
            cache: HashMap::new(),
        })
    }

    pub fn header(&self) -> &FractalHeapHeader {
        &self.header
    }

    pub fn read_object(&mut self, id: &[u8]) -> Result<Vec<u8>> {
        match HeapId::parse(id, &self.header)? {
            HeapId::Tiny(data) => Ok(data),
            HeapId::Huge => Err(FormatError::UnsupportedFeature("huge fractal heap objects")),
            HeapId::Managed { offset, length } => {
                if let Some(hit) = self.cache.get(&offset) {
                    return Ok(hit.clone());
                }
                let data = self.read_managed(offset, length)?;
                self.cache.insert(offset, data.clone());
                Ok(data)
            }
        }
    }

    pub fn cached_objects(&self) -> usize {
        self.cache.len()
    }

    fn read_managed(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        if self.header.io_filter_encoded_length > 0 {
            return Err(FormatError::UnsupportedFeature("filtered fractal heap blocks"));
        }
        let root = self.header.root_block_address.require("fractal heap root block")?;
        let (block, block_offset, block_size) = if self.header.current_root_rows == 0 {
            (root, 0, self.header.starting_block_size)
        } else {
            self.locate(root, self.header.current_root_rows, 0, offset, 0)?
        };
        self.read_from_direct_block(block, block_offset, block_size, offset, length)
    }

    /// Find the direct block holding heap offset `target` below the
    /// indirect block at `iblock`.
    fn locate(
        &self,
        iblock: Address,
        nrows: u16,
        iblock_offset: u64,
        target: u64,
        depth: usize,
    ) -> Result<(Address, u64, u64)> {
        if depth > MAX_INDIRECT_DEPTH {
            return Err(FormatError::MalformedHeap("indirect blocks nested too deeply".into()));
        }
        let h = &self.header;
        let pos = self.ctx.resolve(iblock)?;
        let mut c = ByteCursor::at(self.file_data, pos)?;
        c.expect_signature(&FHIB_SIGNATURE, "fractal heap indirect block")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                component: "fractal heap indirect block",
                version,
            });
        }
        let _heap = c.read_address(self.ctx.offset_size)?;
        let stored_offset = c.read_uint(h.offset_bytes())?;
        if stored_offset != iblock_offset {
            return Err(FormatError::MalformedHeap(format!(
                "indirect block at {iblock} claims heap offset {stored_offset}, expected {iblock_offset}"
            )));
        }

        let mut entries = Vec::new();
        for row in 0..nrows as usize {
            for _ in 0..h.table_width {
                entries.push((row, c.read_address(self.ctx.offset_size)?));
            }
        }
        checksum::verify(&self.file_data[pos..], c.position() - pos, "fractal heap indirect block")?;
        trace!(address = %iblock, rows = nrows, "loaded fractal heap indirect block");

        let max_direct_rows = h.max_direct_rows();
        let mut heap_offset = iblock_offset;
        for (row, child) in entries {
            let size = h.row_block_size(row)?;
            if target < heap_offset.saturating_add(size) {
                let child = child.require("fractal heap block")?;
                if row < max_direct_rows {
                    return Ok((child, heap_offset, size));
                }
                return self.locate(child, h.child_rows(size), heap_offset, target, depth + 1);
            }
            heap_offset = heap_offset.saturating_add(size);
        }
        Err(FormatError::HeapOffsetOutOfRange {
            offset: target,
            size: heap_offset,
        })
    }

    fn read_from_direct_block(
        &self,
        block: Address,
        block_offset: u64,
        block_size: u64,
        target: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        let size = usize::try_from(block_size)
            .map_err(|_| FormatError::MalformedHeap("direct block too large".into()))?;
        let pos = self.ctx.resolve_within(block, size, self.file_data.len())?;
        let bytes = &self.file_data[pos..pos + size];

        let mut c = ByteCursor::new(bytes);
        c.expect_signature(&FHDB_SIGNATURE, "fractal heap direct block")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                component: "fractal heap direct block",
                version,
            });
        }
        let _heap = c.read_address(self.ctx.offset_size)?;
        let stored_offset = c.read_uint(self.header.offset_bytes())?;
        if stored_offset != block_offset {
            return Err(FormatError::MalformedHeap(format!(
                "direct block at {block} claims heap offset {stored_offset}, expected {block_offset}"
            )));
        }
        if self.header.checksums_direct_blocks() {
            let at = c.position();
            let stored = c.read_u32()?;
            let mut zeroed = bytes.to_vec();
            zeroed[at..at + 4].fill(0);
            let computed = jenkins_lookup3(&zeroed);
            if stored != computed {
                return Err(FormatError::ChecksumMismatch {
                    structure: "fractal heap direct block",
                    stored,
                    computed,
                });
            }
        }
        trace!(address = %block, offset = block_offset, size = block_size, "loaded fractal heap direct block");

        let local = target - block_offset;
        let end = local.checked_add(length).filter(|&e| e <= block_size);
        match end {
            Some(end) if local >= c.position() as u64 => Ok(bytes[local as usize..end as usize].to_vec()),
            _ => Err(FormatError::HeapOffsetOutOfRange {
                offset: target,
                size: block_size,
            }),
        }
    }
}
