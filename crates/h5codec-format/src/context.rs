//! Per-file parameters every structure parser needs.

use crate::address::Address;
use crate::error::{FormatError, Result};

/// Offset and length widths from the superblock plus the base address that
/// all stored addresses are relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileContext {
    pub offset_size: u8,
    pub length_size: u8,
    pub base_address: u64,
}

impl Default for FileContext {
    fn default() -> Self {
        FileContext {
            offset_size: 8,
            length_size: 8,
            base_address: 0,
        }
    }
}

impl FileContext {
    pub fn new(offset_size: u8, length_size: u8) -> Result<Self> {
        if !matches!(offset_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidOffsetSize(offset_size));
        }
        if !matches!(length_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidLengthSize(length_size));
        }
        Ok(FileContext {
            offset_size,
            length_size,
            base_address: 0,
        })
    }

    pub fn with_base_address(mut self, base_address: u64) -> Self {
        self.base_address = base_address;
        self
    }

    /// Turn a stored address into a position in the file buffer.
    pub fn resolve(&self, address: Address) -> Result<usize> {
        let address = address.require("resolve")?;
        let absolute = address
            .value()
            .checked_add(self.base_address)
            .ok_or(FormatError::AddressOutOfBounds {
                address: address.value(),
                len: usize::MAX,
            })?;
        usize::try_from(absolute).map_err(|_| FormatError::AddressOutOfBounds {
            address: absolute,
            len: usize::MAX,
        })
    }

    /// Like [`resolve`](Self::resolve) but also checks that `needed` bytes
    /// starting there fit within a buffer of `len` bytes.
    pub fn resolve_within(&self, address: Address, needed: usize, len: usize) -> Result<usize> {
        let pos = self.resolve(address)?;
        match pos.checked_add(needed) {
            Some(end) if end <= len => Ok(pos),
            _ => Err(FormatError::AddressOutOfBounds {
                address: address.value(),
                len,
            }),
        }
    }
}
