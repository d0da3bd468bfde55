//! Chunk keys and records shared by both chunk index formats.

use crate::address::Address;
use crate::error::{FormatError, Result};

/// Element offsets of a chunk's first element along each axis, plus the
/// trailing zero coordinate the on-disk layout carries for the element
/// size dimension. Ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey(Vec<u64>);

impl ChunkKey {
    /// A key from all N+1 stored coordinates.
    pub fn new(offsets: Vec<u64>) -> Self {
        ChunkKey(offsets)
    }

    /// A key from N element offsets; the trailing zero is appended.
    pub fn from_offsets(offsets: &[u64]) -> Self {
        let mut v = Vec::with_capacity(offsets.len() + 1);
        v.extend_from_slice(offsets);
        v.push(0);
        ChunkKey(v)
    }

    /// A key from chunk grid indices: offset = index × chunk dimension.
    pub fn from_chunk_index(index: &[u64], chunk_dims: &[u64]) -> Result<Self> {
        if index.len() != chunk_dims.len() {
            return Err(FormatError::RankMismatch {
                expected: chunk_dims.len(),
                got: index.len(),
            });
        }
        let offsets = index
            .iter()
            .zip(chunk_dims)
            .map(|(&i, &d)| {
                i.checked_mul(d)
                    .ok_or_else(|| FormatError::InvalidInput(format!("chunk offset {i}×{d} overflows")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ChunkKey::from_offsets(&offsets))
    }

    /// All stored coordinates, trailing zero included.
    pub fn coordinates(&self) -> &[u64] {
        &self.0
    }

    /// Element offsets without the trailing coordinate.
    pub fn offsets(&self) -> &[u64] {
        &self.0[..self.0.len().saturating_sub(1)]
    }

    /// Dataset rank N.
    pub fn rank(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Chunk grid indices: offset ÷ chunk dimension.
    pub fn chunk_index(&self, chunk_dims: &[u64]) -> Result<Vec<u64>> {
        if chunk_dims.len() != self.rank() {
            return Err(FormatError::RankMismatch {
                expected: self.rank(),
                got: chunk_dims.len(),
            });
        }
        self.offsets()
            .iter()
            .zip(chunk_dims)
            .map(|(&o, &d)| {
                if d == 0 {
                    Err(FormatError::InvalidInput("zero chunk dimension".into()))
                } else {
                    Ok(o / d)
                }
            })
            .collect()
    }
}

/// Chunk shape of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGeometry {
    pub chunk_dims: Vec<u64>,
    pub element_size: u32,
}

impl ChunkGeometry {
    pub fn new(chunk_dims: Vec<u64>, element_size: u32) -> Result<Self> {
        if chunk_dims.is_empty() || chunk_dims.contains(&0) || element_size == 0 {
            return Err(FormatError::InvalidInput(format!(
                "invalid chunk shape {chunk_dims:?} with {element_size}-byte elements"
            )));
        }
        Ok(ChunkGeometry {
            chunk_dims,
            element_size,
        })
    }

    pub fn rank(&self) -> usize {
        self.chunk_dims.len()
    }

    /// Unfiltered size of one chunk in bytes.
    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_dims
            .iter()
            .fold(self.element_size as u64, |acc, &d| acc.saturating_mul(d))
    }

    /// Width of the stored-size field in filtered chunk records: one byte
    /// more than the unfiltered size needs, at most 8.
    pub fn size_field_width(&self) -> usize {
        let bits = self.chunk_bytes().max(1).ilog2() as usize;
        (1 + (bits + 8) / 8).min(8)
    }

    /// Chunk grid indices of `key`; offsets must be chunk-aligned.
    pub fn scaled(&self, key: &ChunkKey) -> Result<Vec<u64>> {
        let scaled = key.chunk_index(&self.chunk_dims)?;
        let aligned = key
            .offsets()
            .iter()
            .zip(&self.chunk_dims)
            .all(|(&o, &d)| o % d == 0);
        if !aligned {
            return Err(FormatError::InvalidInput(format!(
                "chunk key {:?} is not aligned to chunk dims {:?}",
                key.offsets(),
                self.chunk_dims
            )));
        }
        Ok(scaled)
    }

    pub fn key_from_scaled(&self, scaled: &[u64]) -> Result<ChunkKey> {
        ChunkKey::from_chunk_index(scaled, &self.chunk_dims)
    }
}

/// Where one chunk is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub key: ChunkKey,
    pub address: Address,
    /// Stored (filtered) size in bytes.
    pub size: u64,
    /// Bit `i` set means pipeline filter `i` was skipped for this chunk.
    pub filter_mask: u32,
}

/// A parsed chunk index. Lookups may populate internal node caches.
pub trait ChunkIndex {
    /// The record stored under `key`, or `None` when the chunk was never
    /// written.
    fn lookup(&mut self, key: &ChunkKey) -> Result<Option<ChunkRecord>>;

    /// Every record, in key order.
    fn records(&mut self) -> Result<Vec<ChunkRecord>>;
}
