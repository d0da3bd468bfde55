//! Pure-Rust codec for the core HDF5 binary structures.
//!
//! Covers type descriptors and dataspaces, element decoding, the filter
//! pipeline message and its codecs, local/global/fractal heaps, and both
//! chunk index trees: the version 1 B-tree read path and a bulk builder and
//! reader for version 2 B-trees. Everything operates on byte slices with
//! offset and length widths supplied by a [`FileContext`].

pub mod address;
pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod chunk;
pub mod context;
pub mod cursor;
pub mod data_read;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod filter_pipeline;
pub mod filters;
pub mod fractal_heap;
pub mod global_heap;
pub mod local_heap;
pub mod property_list;
pub mod type_builders;

pub use address::Address;
pub use btree_v1::BTreeV1ChunkIndex;
pub use btree_v2::{BTreeV2ChunkIndex, BTreeV2ChunkIndexBuilder, BuiltChunkIndex};
pub use chunk::{ChunkGeometry, ChunkIndex, ChunkKey, ChunkRecord};
pub use context::FileContext;
pub use cursor::{ByteCursor, ByteWriter};
pub use data_read::Value;
pub use dataspace::Dataspace;
pub use datatype::Datatype;
pub use error::{ErrorKind, FormatError, Result};
pub use filter_pipeline::{FilterDescription, FilterPipeline, FilteredChunk};
pub use filters::{Filter, FilterRegistry};
pub use fractal_heap::{FractalHeap, HeapId};
pub use global_heap::{GlobalHeapReader, GlobalHeapRef, GlobalHeapWriter, VlReference};
pub use local_heap::{LocalHeap, LocalHeapWriter};
pub use property_list::{ChunkIndexCreateProps, FilterCreateProps};
pub use type_builders::{CompoundTypeBuilder, EnumTypeBuilder};
