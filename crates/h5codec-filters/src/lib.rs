//! Byte-level codecs used by the HDF5 filter pipeline.
//!
//! - deflate (zlib) through flate2, on `miniz_oxide` by default or zlib-ng
//!   with the `fast-deflate` feature
//! - LZF, the h5py-registered compressor
//! - byte shuffle
//! - Fletcher-32 checksums
//!
//! Every codec works on whole in-memory buffers and reports failures as a
//! message string; the format crate wraps them into typed errors.

pub mod fast_deflate;
pub mod fletcher32;
pub mod lzf;
pub mod shuffle;

/// Decompress zlib-compressed data.
///
/// `max_output_size` is the expected decoded length when known, or 0.
pub fn deflate_decompress(data: &[u8], max_output_size: usize) -> Result<Vec<u8>, String> {
    fast_deflate::decompress(data, max_output_size)
}

/// Compress data with zlib at `level` (0..=9).
pub fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    fast_deflate::compress(data, level)
}

/// Decompress zlib data using the pure-Rust miniz_oxide backend.
/// Always available regardless of feature flags, for comparison/testing.
pub fn deflate_decompress_miniz(data: &[u8]) -> Result<Vec<u8>, String> {
    miniz_oxide::inflate::decompress_to_vec_zlib(data)
        .map_err(|e| format!("miniz_oxide decompress error: {e:?}"))
}

/// Compress data using the pure-Rust miniz_oxide backend.
pub fn deflate_compress_miniz(data: &[u8], level: u32) -> Vec<u8> {
    miniz_oxide::deflate::compress_to_vec_zlib(data, level.min(10) as u8)
}

/// Returns the name of the currently active deflate backend.
pub fn deflate_backend() -> &'static str {
    fast_deflate::active_backend()
}

/// Compress with LZF. Never fails.
pub fn lzf_compress(data: &[u8]) -> Vec<u8> {
    lzf::compress(data)
}

/// Decompress LZF data; `max_output_size` of 0 means unbounded.
pub fn lzf_decompress(data: &[u8], max_output_size: usize) -> Result<Vec<u8>, String> {
    lzf::decompress(data, max_output_size)
}
