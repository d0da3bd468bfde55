//! Error types for the HDF5 core codec.

/// Coarse classification of a [`FormatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A wire structure carries a version this crate cannot read.
    Versioning,
    /// Bytes are missing, malformed, or fail an integrity check.
    Corruption,
    /// The structure is recognised but its feature is not implemented.
    UnsupportedFeature,
    /// A codec failed to transform a chunk.
    Decompression,
    /// The caller supplied a value that cannot be encoded.
    InvalidInput,
}

/// Errors raised while decoding or encoding HDF5 structures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("unsupported {component} version {version}")]
    UnsupportedVersion { component: &'static str, version: u8 },

    #[error("unknown datatype class {0}")]
    UnknownDatatypeClass(u8),

    #[error("unexpected EOF: need {expected} bytes, have {available}")]
    UnexpectedEof { expected: usize, available: usize },

    #[error("invalid {structure} signature {found:?}")]
    InvalidSignature { structure: &'static str, found: [u8; 4] },

    #[error("undefined address where {context} requires one")]
    UndefinedAddress { context: &'static str },

    #[error("address {address:#x} lies outside the {len}-byte buffer")]
    AddressOutOfBounds { address: u64, len: usize },

    #[error("invalid offset size: {0} (must be 2, 4, or 8)")]
    InvalidOffsetSize(u8),

    #[error("invalid length size: {0} (must be 2, 4, or 8)")]
    InvalidLengthSize(u8),

    #[error("invalid heap id: {0}")]
    InvalidHeapId(String),

    #[error("heap object {index} not found in collection at {address:#x}")]
    HeapObjectNotFound { address: u64, index: u32 },

    #[error("malformed heap: {0}")]
    MalformedHeap(String),

    #[error("heap offset {offset} outside the {size}-byte data segment")]
    HeapOffsetOutOfRange { offset: u64, size: u64 },

    #[error("checksum mismatch in {structure}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { structure: &'static str, stored: u32, computed: u32 },

    #[error("fletcher32 checksum mismatch")]
    Fletcher32Mismatch,

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    #[error("filter {filter} does not support {operation}")]
    UnsupportedOperation { filter: &'static str, operation: &'static str },

    #[error("unsupported filter id {0}")]
    UnsupportedFilter(u16),

    #[error("filter {filter} failed to decode: {message}")]
    DecompressionFailed { filter: u16, message: String },

    #[error("filter {filter} failed to encode: {message}")]
    CompressionFailed { filter: u16, message: String },

    #[error("invalid filter parameters for filter {filter}: {message}")]
    InvalidFilterParams { filter: u16, message: String },

    #[error("invalid datatype: {0}")]
    InvalidDatatype(String),

    #[error("malformed datatype: {0}")]
    MalformedDatatype(String),

    #[error("unsupported B-tree node type {0}")]
    UnsupportedNodeType(u8),

    #[error("invalid B-tree node at {address:#x}: {reason}")]
    InvalidBTreeNode { address: u64, reason: String },

    #[error("chunk key rank {got} does not match index rank {expected}")]
    RankMismatch { expected: usize, got: usize },

    #[error("data size mismatch: expected {expected} bytes, got {actual}")]
    DataSizeMismatch { expected: usize, actual: usize },

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FormatError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use FormatError::*;
        match self {
            UnsupportedVersion { .. } => ErrorKind::Versioning,
            UnknownDatatypeClass(_)
            | UnexpectedEof { .. }
            | InvalidSignature { .. }
            | UndefinedAddress { .. }
            | AddressOutOfBounds { .. }
            | InvalidOffsetSize(_)
            | InvalidLengthSize(_)
            | InvalidHeapId(_)
            | HeapObjectNotFound { .. }
            | HeapOffsetOutOfRange { .. }
            | MalformedHeap(_)
            | ChecksumMismatch { .. }
            | Fletcher32Mismatch
            | InvalidFilterParams { .. }
            | MalformedDatatype(_)
            | DataSizeMismatch { .. }
            | InvalidBTreeNode { .. } => ErrorKind::Corruption,
            UnsupportedFeature(_)
            | UnsupportedOperation { .. }
            | UnsupportedFilter(_)
            | UnsupportedNodeType(_) => ErrorKind::UnsupportedFeature,
            DecompressionFailed { .. } | CompressionFailed { .. } => ErrorKind::Decompression,
            InvalidDatatype(_) | RankMismatch { .. } | TypeMismatch { .. } | InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FormatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let v = FormatError::UnsupportedVersion { component: "datatype", version: 9 };
        assert_eq!(v.kind(), ErrorKind::Versioning);
        assert_eq!(
            FormatError::UnexpectedEof { expected: 4, available: 1 }.kind(),
            ErrorKind::Corruption
        );
        assert_eq!(
            FormatError::UnsupportedFeature("huge objects").kind(),
            ErrorKind::UnsupportedFeature
        );
        assert_eq!(
            FormatError::DecompressionFailed { filter: 1, message: "x".into() }.kind(),
            ErrorKind::Decompression
        );
    }

    #[test]
    fn display_names_component() {
        let e = FormatError::UnsupportedVersion { component: "local heap", version: 3 };
        assert_eq!(e.to_string(), "unsupported local heap version 3");
        let e = FormatError::InvalidSignature { structure: "TREE", found: *b"XXXX" };
        assert!(e.to_string().contains("TREE"));
    }
}
