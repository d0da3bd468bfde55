//! Deflate backends behind flate2.
//!
//! Without features flate2 runs on its pure-Rust `miniz_oxide` backend. The
//! `fast-deflate` feature switches it to zlib-ng, which is what the C library
//! links against.

use std::io::{Read, Write};

/// Decompress into a buffer sized up front from the expected chunk length.
///
/// The hint only reserves capacity; a stream that inflates past it still
/// decodes in full so the caller can report the size mismatch.
pub(crate) fn flate2_decompress_sized(data: &[u8], output_hint: usize) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut output = Vec::with_capacity(output_hint);
    decoder
        .read_to_end(&mut output)
        .map_err(|e| format!("zlib decompress error: {e}"))?;
    Ok(output)
}

/// Decompress when nothing is known about the output length.
pub(crate) fn flate2_decompress_streaming(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| format!("zlib decompress error: {e}"))?;
    Ok(result)
}

pub(crate) fn flate2_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .map_err(|e| format!("zlib compress error: {e}"))?;
    encoder
        .finish()
        .map_err(|e| format!("zlib compress error: {e}"))
}

/// Decompress zlib data with the active backend.
pub fn decompress(data: &[u8], output_hint: usize) -> Result<Vec<u8>, String> {
    if output_hint > 0 {
        flate2_decompress_sized(data, output_hint)
    } else {
        flate2_decompress_streaming(data)
    }
}

/// Compress data with the active backend. Levels above 9 are clamped.
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    flate2_compress(data, level)
}

/// Name of the backend flate2 was built with.
pub fn active_backend() -> &'static str {
    if cfg!(feature = "fast-deflate") {
        "zlib-ng"
    } else {
        "miniz_oxide"
    }
}
