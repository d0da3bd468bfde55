//! Property bundles for configuring chunk indexes and filter pipelines.
//!
//! Property lists group related settings into reusable values built with
//! chained setters, as an alternative to passing each setting separately.

use crate::chunk::ChunkGeometry;
use crate::filter_pipeline::{FilterDescription, FilterPipeline};
use crate::filters::{FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_LZF, FILTER_SHUFFLE, LZF_PARAMS};

/// Chunk index (B-tree v2) creation properties.
///
/// Defaults match the HDF5 library's chunk B-tree v2: 2 KiB nodes, split at
/// 100% full, merge below 40%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkIndexCreateProps {
    /// Size of every tree node in bytes.
    pub node_size: u32,
    /// Fill percentage at which a node splits.
    pub split_percent: u8,
    /// Fill percentage below which siblings merge.
    pub merge_percent: u8,
}

impl Default for ChunkIndexCreateProps {
    fn default() -> Self {
        Self {
            node_size: 2048,
            split_percent: 100,
            merge_percent: 40,
        }
    }
}

impl ChunkIndexCreateProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_size(mut self, bytes: u32) -> Self {
        self.node_size = bytes;
        self
    }

    pub fn split_percent(mut self, percent: u8) -> Self {
        self.split_percent = percent;
        self
    }

    pub fn merge_percent(mut self, percent: u8) -> Self {
        self.merge_percent = percent;
        self
    }
}

/// Filter creation properties.
///
/// Turned into a pipeline message by [`build_pipeline`](Self::build_pipeline)
/// in the fixed order shuffle, compression, checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCreateProps {
    /// Byte shuffle before compression.
    pub shuffle: bool,
    /// Deflate compression level (0-9).
    pub deflate_level: Option<u32>,
    /// LZF compression. Ignored when deflate is set.
    pub lzf: bool,
    /// Fletcher-32 checksum over the compressed chunk.
    pub fletcher32: bool,
    /// Mark the compression filter optional, so chunks it cannot shrink
    /// are stored unfiltered.
    pub optional_compression: bool,
}

impl FilterCreateProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable shuffle filter.
    pub fn shuffle(mut self) -> Self {
        self.shuffle = true;
        self
    }

    /// Set deflate compression level (0-9).
    pub fn deflate(mut self, level: u32) -> Self {
        self.deflate_level = Some(level);
        self
    }

    /// Enable LZF compression.
    pub fn lzf(mut self) -> Self {
        self.lzf = true;
        self
    }

    /// Enable fletcher32 checksum.
    pub fn fletcher32(mut self) -> Self {
        self.fletcher32 = true;
        self
    }

    pub fn optional_compression(mut self) -> Self {
        self.optional_compression = true;
        self
    }

    /// The pipeline for datasets chunked as `geometry`, or `None` when no
    /// filter is enabled.
    ///
    /// Shuffle records the element size and LZF the unfiltered chunk size
    /// (0 when it does not fit 32 bits) as their client data.
    pub fn build_pipeline(&self, geometry: &ChunkGeometry) -> Option<FilterPipeline> {
        let mut filters = Vec::new();
        if self.shuffle {
            filters.push(FilterDescription::new(FILTER_SHUFFLE, vec![geometry.element_size]));
        }
        let compression = match (self.deflate_level, self.lzf) {
            (Some(level), _) => Some(FilterDescription::new(FILTER_DEFLATE, vec![level.min(9)])),
            (None, true) => {
                let mut params = LZF_PARAMS.to_vec();
                params[2] = u32::try_from(geometry.chunk_bytes()).unwrap_or(0);
                Some(FilterDescription::new(FILTER_LZF, params))
            }
            (None, false) => None,
        };
        if let Some(filter) = compression {
            filters.push(if self.optional_compression {
                filter.optional()
            } else {
                filter
            });
        }
        if self.fletcher32 {
            filters.push(FilterDescription::new(FILTER_FLETCHER32, Vec::new()));
        }
        (!filters.is_empty()).then(|| FilterPipeline::new(filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_index_defaults() {
        let props = ChunkIndexCreateProps::new();
        assert_eq!(props.node_size, 2048);
        assert_eq!(props.split_percent, 100);
        assert_eq!(props.merge_percent, 40);
    }

    #[test]
    fn chunk_index_builder_chain() {
        let props = ChunkIndexCreateProps::new()
            .node_size(512)
            .split_percent(90)
            .merge_percent(30);
        assert_eq!((props.node_size, props.split_percent, props.merge_percent), (512, 90, 30));
    }

    fn geometry(element_size: u32) -> ChunkGeometry {
        ChunkGeometry::new(vec![16, 8], element_size).unwrap()
    }

    #[test]
    fn no_filters_no_pipeline() {
        assert!(FilterCreateProps::new().build_pipeline(&geometry(4)).is_none());
    }

    #[test]
    fn pipeline_order() {
        let pipeline = FilterCreateProps::new()
            .fletcher32()
            .deflate(12)
            .shuffle()
            .build_pipeline(&geometry(8))
            .unwrap();
        let ids: Vec<u16> = pipeline.filters.iter().map(|f| f.filter_id).collect();
        assert_eq!(ids, vec![FILTER_SHUFFLE, FILTER_DEFLATE, FILTER_FLETCHER32]);
        assert_eq!(pipeline.filters[0].client_data, vec![8]);
        assert_eq!(pipeline.filters[1].client_data, vec![9]);
        assert!(!pipeline.filters[1].is_optional());
    }

    #[test]
    fn lzf_and_optional_compression() {
        let pipeline = FilterCreateProps::new()
            .lzf()
            .optional_compression()
            .build_pipeline(&geometry(4))
            .unwrap();
        assert_eq!(pipeline.filters.len(), 1);
        assert_eq!(pipeline.filters[0].filter_id, FILTER_LZF);
        assert!(pipeline.filters[0].is_optional());
        // 16 x 8 chunk of 4-byte elements
        assert_eq!(pipeline.filters[0].client_data, vec![4, 0x0105, 512]);

        let both = FilterCreateProps::new()
            .lzf()
            .deflate(1)
            .build_pipeline(&geometry(4))
            .unwrap();
        assert_eq!(both.filters[0].filter_id, FILTER_DEFLATE);
    }
}
