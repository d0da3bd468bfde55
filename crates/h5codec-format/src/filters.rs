//! Filter implementations and the id-keyed registry the pipeline resolves
//! them through.
//!
//! Each built-in wraps a kernel from `h5codec-filters`. Kernel failures come
//! back as strings and are wrapped here with the filter id.

use std::collections::HashMap;
use std::fmt;

use crate::error::{FormatError, Result};

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
/// Registered id of the LZF filter shipped with h5py.
pub const FILTER_LZF: u16 = 32000;

/// Deflate level used when a pipeline entry carries no parameters.
pub const DEFAULT_DEFLATE_LEVEL: u32 = 6;

/// A reversible chunk transform.
///
/// `params` are the client data values stored in the pipeline message.
/// `element_size` is the dataset's element width in bytes.
pub trait Filter: Send + Sync {
    fn id(&self) -> u16;

    fn name(&self) -> &'static str;

    /// Forward transform, applied when writing.
    fn encode(&self, data: &[u8], params: &[u32], element_size: usize) -> Result<Vec<u8>>;

    /// Inverse transform, applied when reading.
    fn decode(&self, data: &[u8], params: &[u32], element_size: usize) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateFilter;

impl Filter for DeflateFilter {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn encode(&self, data: &[u8], params: &[u32], _element_size: usize) -> Result<Vec<u8>> {
        let level = params.first().copied().unwrap_or(DEFAULT_DEFLATE_LEVEL).min(9);
        h5codec_filters::deflate_compress(data, level).map_err(|message| {
            FormatError::CompressionFailed {
                filter: FILTER_DEFLATE,
                message,
            }
        })
    }

    fn decode(&self, data: &[u8], _params: &[u32], _element_size: usize) -> Result<Vec<u8>> {
        h5codec_filters::deflate_decompress(data, data.len().saturating_mul(4)).map_err(
            |message| FormatError::DecompressionFailed {
                filter: FILTER_DEFLATE,
                message,
            },
        )
    }
}

/// Byte shuffle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShuffleFilter;

impl Filter for ShuffleFilter {
    fn id(&self) -> u16 {
        FILTER_SHUFFLE
    }

    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn encode(&self, data: &[u8], params: &[u32], element_size: usize) -> Result<Vec<u8>> {
        Ok(h5codec_filters::shuffle::shuffle(data, shuffle_width(params, element_size)))
    }

    fn decode(&self, data: &[u8], params: &[u32], element_size: usize) -> Result<Vec<u8>> {
        Ok(h5codec_filters::shuffle::unshuffle(data, shuffle_width(params, element_size)))
    }
}

/// The library records the element size as the first parameter.
fn shuffle_width(params: &[u32], element_size: usize) -> usize {
    params
        .first()
        .map(|&s| s as usize)
        .filter(|&s| s > 0)
        .unwrap_or(element_size)
}

/// Fletcher-32 checksum, appended on encode and verified then stripped on
/// decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fletcher32Filter;

impl Filter for Fletcher32Filter {
    fn id(&self) -> u16 {
        FILTER_FLETCHER32
    }

    fn name(&self) -> &'static str {
        "fletcher32"
    }

    fn encode(&self, data: &[u8], _params: &[u32], _element_size: usize) -> Result<Vec<u8>> {
        Ok(h5codec_filters::fletcher32::append(data))
    }

    fn decode(&self, data: &[u8], _params: &[u32], _element_size: usize) -> Result<Vec<u8>> {
        h5codec_filters::fletcher32::verify(data)
            .map(<[u8]>::to_vec)
            .map_err(|_| FormatError::Fletcher32Mismatch)
    }
}

/// LZF. The third parameter, when non-zero, is the decoded chunk size.
#[derive(Debug, Clone, Copy, Default)]
pub struct LzfFilter;

/// Filter revision and LZF version h5py writes as the first two parameters.
pub const LZF_PARAMS: [u32; 3] = [4, 0x0105, 0];

impl Filter for LzfFilter {
    fn id(&self) -> u16 {
        FILTER_LZF
    }

    fn name(&self) -> &'static str {
        "lzf"
    }

    fn encode(&self, data: &[u8], _params: &[u32], _element_size: usize) -> Result<Vec<u8>> {
        Ok(h5codec_filters::lzf_compress(data))
    }

    fn decode(&self, data: &[u8], params: &[u32], _element_size: usize) -> Result<Vec<u8>> {
        let expected = params.get(2).copied().unwrap_or(0) as usize;
        h5codec_filters::lzf_decompress(data, expected).map_err(|message| {
            FormatError::DecompressionFailed {
                filter: FILTER_LZF,
                message,
            }
        })
    }
}

/// Filters by id.
pub struct FilterRegistry {
    filters: HashMap<u16, Box<dyn Filter>>,
}

impl FilterRegistry {
    /// A registry with no filters.
    pub fn empty() -> Self {
        FilterRegistry {
            filters: HashMap::new(),
        }
    }

    /// A registry holding the built-in filters.
    pub fn new() -> Self {
        let mut registry = FilterRegistry::empty();
        #[cfg(feature = "deflate")]
        registry.register(Box::new(DeflateFilter));
        registry.register(Box::new(ShuffleFilter));
        registry.register(Box::new(Fletcher32Filter));
        registry.register(Box::new(LzfFilter));
        registry
    }

    /// Add or replace a filter, returning the one it displaced.
    pub fn register(&mut self, filter: Box<dyn Filter>) -> Option<Box<dyn Filter>> {
        self.filters.insert(filter.id(), filter)
    }

    pub fn get(&self, id: u16) -> Result<&dyn Filter> {
        self.filters
            .get(&id)
            .map(Box::as_ref)
            .ok_or(FormatError::UnsupportedFilter(id))
    }

    pub fn contains(&self, id: u16) -> bool {
        self.filters.contains_key(&id)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        FilterRegistry::new()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.filters.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("FilterRegistry").field("ids", &ids).finish()
    }
}
